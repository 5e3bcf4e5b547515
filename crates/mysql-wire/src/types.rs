//! Column metadata and text-protocol value decoding.
//!
//! In the text protocol every non-NULL value arrives as a length-encoded
//! string. The column definition's type code, flags and charset decide how
//! that string becomes a [`Value`].

use std::sync::Arc;

use mysql_wire_core::{ColumnInfo, Result, Row, Value};

use crate::protocol::{PacketReader, charset, malformed};

/// MySQL field type codes.
///
/// These are the `MYSQL_TYPE_*` constants from the MySQL C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    /// Internal to the server, never sent to clients
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    /// BLOB or TEXT, told apart by charset
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type from a byte. Unknown codes are treated as strings.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    /// Check if this is an integer type.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::Int24
                | FieldType::Year
        )
    }

    /// Check if this is a binary/blob type.
    #[must_use]
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob | FieldType::MediumBlob | FieldType::LongBlob | FieldType::Blob
        )
    }

    /// Check if this is a date/time type.
    #[must_use]
    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::Time
                | FieldType::DateTime
                | FieldType::Timestamp
                | FieldType::NewDate
                | FieldType::Timestamp2
                | FieldType::DateTime2
                | FieldType::Time2
        )
    }

    /// SQL name of the type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp | FieldType::Timestamp2 => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time | FieldType::Time2 => "TIME",
            FieldType::DateTime | FieldType::DateTime2 => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

/// Column flags in result set metadata.
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NO_DEFAULT_VALUE: u16 = 4096;
    pub const ON_UPDATE_NOW: u16 = 8192;
    pub const NUM: u16 = 32768;
}

/// Column definition from a result set (protocol 4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Catalog name (always "def")
    pub catalog: String,
    pub schema: String,
    /// Table name (or alias)
    pub table: String,
    pub org_table: String,
    /// Column name (or alias)
    pub name: String,
    pub org_name: String,
    /// Collation id; 63 marks binary data
    pub charset: u16,
    /// Display width
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    /// Parse a column definition packet.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let bad = || malformed("column definition", payload);

        let catalog = reader.read_lenenc_string().ok_or_else(bad)?;
        let schema = reader.read_lenenc_string().ok_or_else(bad)?;
        let table = reader.read_lenenc_string().ok_or_else(bad)?;
        let org_table = reader.read_lenenc_string().ok_or_else(bad)?;
        let name = reader.read_lenenc_string().ok_or_else(bad)?;
        let org_name = reader.read_lenenc_string().ok_or_else(bad)?;

        // Length of the fixed-size fields, always 0x0c
        reader.read_lenenc_int().ok_or_else(bad)?;

        let charset = reader.read_u16_le().ok_or_else(bad)?;
        let column_length = reader.read_u32_le().ok_or_else(bad)?;
        let column_type = FieldType::from_u8(reader.read_u8().ok_or_else(bad)?);
        let flags = reader.read_u16_le().ok_or_else(bad)?;
        let decimals = reader.read_u8().ok_or_else(bad)?;

        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    #[must_use]
    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    #[must_use]
    pub const fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    /// Does the column carry raw bytes rather than text?
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        self.charset == charset::BINARY as u16
    }
}

/// Decode one text-protocol value.
///
/// Values that do not parse as their declared type (zero dates, out of
/// range numbers) are returned as text rather than failing the row.
pub fn decode_text_value(column: &ColumnDef, data: &[u8]) -> Value {
    let text = || String::from_utf8_lossy(data).into_owned();
    let Ok(s) = std::str::from_utf8(data) else {
        return if column.column_type.is_integer() || column.column_type.is_temporal() {
            Value::Text(text())
        } else {
            Value::Bytes(data.to_vec())
        };
    };
    let unsigned = column.is_unsigned();

    match column.column_type {
        FieldType::Tiny if unsigned => s
            .parse::<u8>()
            .map_or_else(|_| Value::Text(text()), |v| Value::SmallInt(i16::from(v))),
        FieldType::Tiny => s.parse::<i8>().map_or_else(|_| Value::Text(text()), Value::TinyInt),
        FieldType::Short if unsigned => s
            .parse::<u16>()
            .map_or_else(|_| Value::Text(text()), |v| Value::Int(i32::from(v))),
        FieldType::Short | FieldType::Year => {
            s.parse::<i16>().map_or_else(|_| Value::Text(text()), Value::SmallInt)
        }
        FieldType::Long | FieldType::Int24 if unsigned => {
            s.parse::<u32>().map_or_else(|_| Value::Text(text()), |v| Value::BigInt(i64::from(v)))
        }
        FieldType::Long | FieldType::Int24 => {
            s.parse::<i32>().map_or_else(|_| Value::Text(text()), Value::Int)
        }
        FieldType::LongLong if unsigned => {
            s.parse::<u64>().map_or_else(|_| Value::Text(text()), Value::UBigInt)
        }
        FieldType::LongLong => s.parse::<i64>().map_or_else(|_| Value::Text(text()), Value::BigInt),

        FieldType::Float => s.parse::<f32>().map_or_else(|_| Value::Text(text()), Value::Float),
        FieldType::Double => s.parse::<f64>().map_or_else(|_| Value::Text(text()), Value::Double),
        FieldType::Decimal | FieldType::NewDecimal => Value::Decimal(text()),

        FieldType::Date | FieldType::NewDate => {
            parse_date(s).map_or_else(|| Value::Text(text()), Value::Date)
        }
        FieldType::DateTime
        | FieldType::DateTime2
        | FieldType::Timestamp
        | FieldType::Timestamp2 => {
            parse_datetime(s).map_or_else(|| Value::Text(text()), Value::Timestamp)
        }
        FieldType::Time | FieldType::Time2 => {
            parse_time(s).map_or_else(|| Value::Text(text()), Value::Time)
        }

        FieldType::Json => {
            serde_json::from_str(s).map_or_else(|_| Value::Text(text()), Value::Json)
        }
        FieldType::Bit | FieldType::Geometry => Value::Bytes(data.to_vec()),
        FieldType::Null => Value::Null,
        _ if column.is_binary() => Value::Bytes(data.to_vec()),
        _ => Value::Text(text()),
    }
}

/// Decode a text-protocol row against its column definitions.
pub fn decode_text_row(
    payload: &[u8],
    columns: &[ColumnDef],
    info: &Arc<ColumnInfo>,
) -> Result<Row> {
    let mut reader = PacketReader::new(payload);
    let mut values = Vec::with_capacity(columns.len());

    for column in columns {
        let value = match reader.read_row_value() {
            Some(None) => Value::Null,
            Some(Some(data)) => decode_text_value(column, data),
            None => return Err(malformed("row", payload)),
        };
        values.push(value);
    }

    Ok(Row::with_columns(Arc::clone(info), values))
}

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

/// Days since 1970-01-01 for a proleptic Gregorian date.
///
/// Howard Hinnant's `days_from_civil`.
fn days_from_civil(year: i32, month: u32, day: u32) -> i32 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = (if y >= 0 { y } else { y - 399 }) / 400;
    #[allow(clippy::cast_sign_loss)]
    let yoe = (y - era * 400) as u32; // [0, 399]
    let mp = if month > 2 { month - 3 } else { month + 9 }; // March-based month
    let doy = (153 * mp + 2) / 5 + day - 1; // [0, 365]
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy; // [0, 146096]
    #[allow(clippy::cast_possible_wrap)]
    let doe = doe as i32;
    era * 146_097 + doe - 719_468
}

/// "YYYY-MM-DD" to days since the epoch. Zero dates yield `None`.
fn parse_date(s: &str) -> Option<i32> {
    let mut parts = s.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(days_from_civil(year, month, day))
}

/// "YYYY-MM-DD HH:MM:SS[.ffffff]" to microseconds since the epoch.
fn parse_datetime(s: &str) -> Option<i64> {
    let (date, time) = s.split_once(' ').unwrap_or((s, "00:00:00"));
    let days = parse_date(date)?;
    let micros = parse_time(time)?;
    if !(0..MICROS_PER_DAY).contains(&micros) {
        return None;
    }
    Some(i64::from(days) * MICROS_PER_DAY + micros)
}

/// "[-]HHH:MM:SS[.ffffff]" to signed microseconds.
fn parse_time(s: &str) -> Option<i64> {
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (clock, frac) = s.split_once('.').unwrap_or((s, ""));

    let mut parts = clock.splitn(3, ':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    if minutes > 59 || seconds > 59 || hours < 0 {
        return None;
    }

    let mut micros = (hours * 3600 + minutes * 60 + seconds) * MICROS_PER_SECOND;
    if !frac.is_empty() {
        if frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let digits: i64 = frac.parse().ok()?;
        #[allow(clippy::cast_possible_truncation)]
        let scale = 10_i64.pow(6 - frac.len() as u32);
        micros += digits * scale;
    }

    Some(if negative { -micros } else { micros })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::PacketWriter;

    pub(crate) fn column(name: &str, column_type: FieldType, flags: u16, charset: u16) -> ColumnDef {
        ColumnDef {
            catalog: "def".to_string(),
            schema: "test".to_string(),
            table: "t".to_string(),
            org_table: "t".to_string(),
            name: name.to_string(),
            org_name: name.to_string(),
            charset,
            column_length: 11,
            column_type,
            flags,
            decimals: 0,
        }
    }

    /// Encode a column definition the way the server sends it.
    pub(crate) fn column_packet(col: &ColumnDef) -> Vec<u8> {
        let mut w = PacketWriter::new();
        w.write_lenenc_string(&col.catalog);
        w.write_lenenc_string(&col.schema);
        w.write_lenenc_string(&col.table);
        w.write_lenenc_string(&col.org_table);
        w.write_lenenc_string(&col.name);
        w.write_lenenc_string(&col.org_name);
        w.write_lenenc_int(0x0c);
        w.write_u16_le(col.charset);
        w.write_u32_le(col.column_length);
        w.write_u8(col.column_type as u8);
        w.write_u16_le(col.flags);
        w.write_u8(col.decimals);
        w.write_zeros(2);
        w.into_bytes()
    }

    fn text(t: FieldType) -> ColumnDef {
        column("c", t, 0, 45)
    }

    #[test]
    fn test_parse_column_def() {
        let col = column("id", FieldType::LongLong, column_flags::UNSIGNED | column_flags::NOT_NULL, 63);
        let parsed = ColumnDef::parse(&column_packet(&col)).unwrap();
        assert_eq!(parsed, col);
        assert!(parsed.is_unsigned());
        assert!(parsed.is_not_null());
        assert!(parsed.is_binary());
    }

    #[test]
    fn test_parse_truncated_column_def() {
        let packet = column_packet(&text(FieldType::Long));
        let err = ColumnDef::parse(&packet[..10]).unwrap_err();
        assert!(err.to_string().contains("column definition"));
    }

    #[test]
    fn test_decode_integers() {
        assert_eq!(decode_text_value(&text(FieldType::Tiny), b"-5"), Value::TinyInt(-5));
        assert_eq!(decode_text_value(&text(FieldType::Long), b"1"), Value::Int(1));
        assert_eq!(
            decode_text_value(&column("c", FieldType::Tiny, column_flags::UNSIGNED, 63), b"200"),
            Value::SmallInt(200)
        );
        assert_eq!(
            decode_text_value(&column("c", FieldType::Long, column_flags::UNSIGNED, 63), b"4294967295"),
            Value::BigInt(4_294_967_295)
        );
        assert_eq!(
            decode_text_value(
                &column("c", FieldType::LongLong, column_flags::UNSIGNED, 63),
                b"18446744073709551615"
            ),
            Value::UBigInt(u64::MAX)
        );
        assert_eq!(decode_text_value(&text(FieldType::Year), b"2024"), Value::SmallInt(2024));
    }

    #[test]
    fn test_decode_floats_and_decimal() {
        assert_eq!(decode_text_value(&text(FieldType::Double), b"2.5"), Value::Double(2.5));
        assert_eq!(
            decode_text_value(&text(FieldType::NewDecimal), b"10.10"),
            Value::Decimal("10.10".to_string())
        );
    }

    #[test]
    fn test_decode_temporal() {
        assert_eq!(decode_text_value(&text(FieldType::Date), b"1970-01-02"), Value::Date(1));
        assert_eq!(decode_text_value(&text(FieldType::Date), b"2000-03-01"), Value::Date(11_017));
        assert_eq!(decode_text_value(&text(FieldType::Date), b"1969-12-31"), Value::Date(-1));
        assert_eq!(
            decode_text_value(&text(FieldType::DateTime), b"1970-01-01 00:00:01.5"),
            Value::Timestamp(1_500_000)
        );
        assert_eq!(
            decode_text_value(&text(FieldType::Timestamp), b"2001-09-09 01:46:40"),
            Value::Timestamp(1_000_000_000 * MICROS_PER_SECOND)
        );
        assert_eq!(
            decode_text_value(&text(FieldType::Time), b"-838:59:59"),
            Value::Time(-(838 * 3600 + 59 * 60 + 59) * MICROS_PER_SECOND)
        );
        assert_eq!(
            decode_text_value(&text(FieldType::Time), b"00:00:00.000123"),
            Value::Time(123)
        );
    }

    #[test]
    fn test_zero_dates_fall_back_to_text() {
        assert_eq!(
            decode_text_value(&text(FieldType::Date), b"0000-00-00"),
            Value::Text("0000-00-00".to_string())
        );
        assert_eq!(
            decode_text_value(&text(FieldType::DateTime), b"0000-00-00 00:00:00"),
            Value::Text("0000-00-00 00:00:00".to_string())
        );
    }

    #[test]
    fn test_decode_strings_and_bytes() {
        assert_eq!(
            decode_text_value(&text(FieldType::VarString), b"hello"),
            Value::Text("hello".to_string())
        );
        assert_eq!(
            decode_text_value(&text(FieldType::Blob), b"long text"),
            Value::Text("long text".to_string())
        );
        assert_eq!(
            decode_text_value(&column("c", FieldType::Blob, column_flags::BLOB, 63), b"\x00\x01"),
            Value::Bytes(vec![0, 1])
        );
        assert_eq!(
            decode_text_value(&column("c", FieldType::String, 0, 63), b"ab"),
            Value::Bytes(b"ab".to_vec())
        );
        assert_eq!(
            decode_text_value(&text(FieldType::Bit), b"\x01"),
            Value::Bytes(vec![1])
        );
    }

    #[test]
    fn test_decode_json() {
        assert_eq!(
            decode_text_value(&text(FieldType::Json), br#"{"a":1}"#),
            Value::Json(serde_json::json!({"a": 1}))
        );
    }

    #[test]
    fn test_decode_text_row() {
        let columns = vec![text(FieldType::Long), text(FieldType::VarString)];
        let info = Arc::new(ColumnInfo::new(vec!["id".to_string(), "name".to_string()]));

        let mut w = PacketWriter::new();
        w.write_lenenc_string("7");
        w.write_u8(0xFB);
        let row = decode_text_row(w.as_bytes(), &columns, &info).unwrap();
        assert_eq!(row.get(0), Some(&Value::Int(7)));
        assert_eq!(row.get_by_name("name"), Some(&Value::Null));

        let err = decode_text_row(&[0x01, b'7'], &columns, &info).unwrap_err();
        assert!(err.to_string().contains("row"));
    }

    #[test]
    fn test_days_from_civil() {
        assert_eq!(days_from_civil(1970, 1, 1), 0);
        assert_eq!(days_from_civil(2000, 1, 1), 10_957);
        assert_eq!(days_from_civil(1600, 3, 1), -135_080);
    }
}
