//! Dynamic column values decoded from result rows.

use serde::{Deserialize, Serialize};

/// A dynamically-typed column value.
///
/// Values are produced by the result decoder according to each column's
/// declared type code and flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// 8-bit signed integer (TINYINT)
    TinyInt(i8),

    /// 16-bit signed integer (SMALLINT, YEAR, TINYINT UNSIGNED)
    SmallInt(i16),

    /// 32-bit signed integer (INT, MEDIUMINT, SMALLINT UNSIGNED)
    Int(i32),

    /// 64-bit signed integer (BIGINT, INT UNSIGNED)
    BigInt(i64),

    /// 64-bit unsigned integer (BIGINT UNSIGNED)
    UBigInt(u64),

    /// 32-bit floating point
    Float(f32),

    /// 64-bit floating point
    Double(f64),

    /// Exact decimal, kept as its text representation
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since 1970-01-01)
    Date(i32),

    /// Time of day or duration (signed microseconds)
    Time(i64),

    /// DATETIME / TIMESTAMP (microseconds since 1970-01-01 00:00:00, session time zone)
    Timestamp(i64),

    /// JSON document
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::UBigInt(_) => "BIGINT UNSIGNED",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "DATETIME",
            Value::Json(_) => "JSON",
        }
    }

    /// Try to convert this value to a bool (non-zero integers are true).
    pub fn as_bool(&self) -> Option<bool> {
        self.as_i64().map(|v| v != 0)
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::UBigInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Try to convert this value to a u64.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UBigInt(v) => Some(*v),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::UBigInt(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(Value::Int(7).as_i64(), Some(7));
        assert_eq!(Value::UBigInt(u64::MAX).as_i64(), None);
        assert_eq!(Value::UBigInt(u64::MAX).as_u64(), Some(u64::MAX));
        assert_eq!(Value::BigInt(-1).as_u64(), None);
        assert_eq!(Value::Decimal("1.50".to_string()).as_f64(), Some(1.5));
        assert_eq!(Value::TinyInt(1).as_bool(), Some(true));
        assert_eq!(Value::Text("1".to_string()).as_i64(), None);
    }

    #[test]
    fn test_text_accessors() {
        let v = Value::Text("hello".to_string());
        assert_eq!(v.as_str(), Some("hello"));
        assert_eq!(v.as_bytes(), Some(&b"hello"[..]));
        assert_eq!(Value::Bytes(vec![1, 2]).as_str(), None);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Null.type_name(), "NULL");
        assert!(Value::Null.is_null());
        assert_eq!(Value::Timestamp(0).type_name(), "DATETIME");
        assert_eq!(Value::Json(serde_json::json!({})).type_name(), "JSON");
    }
}
