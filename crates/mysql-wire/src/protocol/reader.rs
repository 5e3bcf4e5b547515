//! MySQL packet reading utilities.
//!
//! Readers return `None` on truncated input; callers turn that into a
//! protocol error naming the packet being decoded.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{EofPacket, ErrPacket, OkPacket};

/// A cursor over one packet payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a new reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Get remaining bytes in the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if we've reached the end of the data.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    /// Read a u16 (little-endian).
    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.take().map(u16::from_le_bytes)
    }

    /// Read a u24 (little-endian, 3 bytes).
    pub fn read_u24_le(&mut self) -> Option<u32> {
        self.take::<3>().map(|[a, b, c]| u32::from_le_bytes([a, b, c, 0]))
    }

    /// Read a u32 (little-endian).
    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    /// Read a u64 (little-endian).
    pub fn read_u64_le(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    /// Read a length-encoded integer.
    ///
    /// - 0x00-0xFA: 1-byte value
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    ///
    /// 0xFB (NULL) and 0xFF (reserved) are not integers and yield `None`;
    /// use [`read_lenenc_nullable`](Self::read_lenenc_nullable) in row data.
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        match self.peek()? {
            0xFB | 0xFF => None,
            _ => self.read_lenenc_nullable()?,
        }
    }

    /// Read a length-encoded integer that may be the NULL marker.
    ///
    /// Outer `None` means truncated or invalid, inner `None` means NULL.
    pub fn read_lenenc_nullable(&mut self) -> Option<Option<u64>> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Some(Some(u64::from(first))),
            0xFB => Some(None),
            0xFC => self.read_u16_le().map(|v| Some(u64::from(v))),
            0xFD => self.read_u24_le().map(|v| Some(u64::from(v))),
            0xFE => self.read_u64_le().map(Some),
            0xFF => None,
        }
    }

    /// Read a length-encoded string.
    pub fn read_lenenc_string(&mut self) -> Option<String> {
        let len = self.read_lenenc_int()?;
        self.read_string(usize::try_from(len).ok()?)
    }

    /// Read a length-encoded byte slice.
    pub fn read_lenenc_bytes(&mut self) -> Option<&'a [u8]> {
        let len = self.read_lenenc_int()?;
        self.read_bytes(usize::try_from(len).ok()?)
    }

    /// Read one text-protocol row value: NULL or length-encoded bytes.
    pub fn read_row_value(&mut self) -> Option<Option<&'a [u8]>> {
        match self.read_lenenc_nullable()? {
            None => Some(None),
            Some(len) => self.read_bytes(usize::try_from(len).ok()?).map(Some),
        }
    }

    /// Read a null-terminated string.
    ///
    /// A missing terminator consumes the rest of the payload.
    pub fn read_null_string(&mut self) -> Option<String> {
        self.read_null_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Read null-terminated bytes, without the terminator.
    pub fn read_null_bytes(&mut self) -> Option<&'a [u8]> {
        let rest = self.data.get(self.pos..)?;
        let end = rest.iter().position(|&b| b == 0);
        let bytes = &rest[..end.unwrap_or(rest.len())];
        self.pos += bytes.len() + usize::from(end.is_some());
        Some(bytes)
    }

    /// Read a fixed-length string.
    pub fn read_string(&mut self, len: usize) -> Option<String> {
        let bytes = self.read_bytes(len)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read remaining data as a string.
    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    /// Read remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        self.pos = self.data.len();
        rest
    }

    /// Skip a number of bytes.
    pub fn skip(&mut self, n: usize) -> bool {
        self.read_bytes(n).is_some()
    }

    /// Parse an OK packet.
    ///
    /// Format (protocol 4.1+): marker (0x00, or 0xFE as a result-set
    /// terminator), affected_rows lenenc, last_insert_id lenenc,
    /// status_flags u16, warnings u16, info (rest of packet).
    pub fn parse_ok_packet(&mut self) -> Option<OkPacket> {
        if matches!(self.peek(), Some(0x00 | 0xFE)) {
            self.skip(1);
        }

        let affected_rows = self.read_lenenc_int()?;
        let last_insert_id = self.read_lenenc_int()?;
        let status_flags = self.read_u16_le()?;
        let warnings = self.read_u16_le()?;
        let info = self.read_rest_string();

        Some(OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }

    /// Parse an Error packet.
    ///
    /// Format (protocol 4.1+): 0xFF, error_code u16, optional '#' followed by
    /// a 5-byte SQL state, message (rest of packet).
    pub fn parse_err_packet(&mut self) -> Option<ErrPacket> {
        if self.peek() == Some(0xFF) {
            self.skip(1);
        }

        let error_code = self.read_u16_le()?;
        let sql_state = if self.peek() == Some(b'#') {
            self.skip(1);
            Some(self.read_string(5)?)
        } else {
            None
        };
        let error_message = self.read_rest_string();

        Some(ErrPacket {
            error_code,
            sql_state,
            error_message,
        })
    }

    /// Parse an EOF packet: 0xFE, warnings u16, status_flags u16.
    ///
    /// Pre-4.1 servers send a bare 0xFE; both fields then read as zero.
    pub fn parse_eof_packet(&mut self) -> Option<EofPacket> {
        if self.peek() == Some(0xFE) {
            self.skip(1);
        }
        if self.is_empty() {
            return Some(EofPacket {
                warnings: 0,
                status_flags: 0,
            });
        }

        let warnings = self.read_u16_le()?;
        let status_flags = self.read_u16_le()?;

        Some(EofPacket {
            warnings,
            status_flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_integers() {
        let mut reader = PacketReader::new(&[0x42, 0x34, 0x12, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u8(), Some(0x42));
        assert_eq!(reader.read_u16_le(), Some(0x1234));
        assert_eq!(reader.read_u24_le(), Some(0x0012_3456));
        assert_eq!(reader.read_u8(), None);

        let mut reader = PacketReader::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(reader.read_u64_le(), Some(0x0807_0605_0403_0201));
    }

    #[test]
    fn test_read_lenenc_int_forms() {
        let mut reader = PacketReader::new(&[0xFA]);
        assert_eq!(reader.read_lenenc_int(), Some(250));

        let mut reader = PacketReader::new(&[0xFC, 0xFB, 0x00]);
        assert_eq!(reader.read_lenenc_int(), Some(251));

        let mut reader = PacketReader::new(&[0xFD, 0x00, 0x00, 0x01]);
        assert_eq!(reader.read_lenenc_int(), Some(65536));

        let mut reader = PacketReader::new(&[0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(reader.read_lenenc_int(), Some(0x0807_0605_0403_0201));
    }

    #[test]
    fn test_lenenc_null_and_reserved() {
        let mut reader = PacketReader::new(&[0xFB]);
        assert_eq!(reader.read_lenenc_int(), None);
        assert_eq!(reader.remaining(), 1, "NULL marker is not consumed as an integer");
        assert_eq!(reader.read_lenenc_nullable(), Some(None));

        let mut reader = PacketReader::new(&[0xFF]);
        assert_eq!(reader.read_lenenc_nullable(), None);

        let mut reader = PacketReader::new(&[0xFC, 0x01]);
        assert_eq!(reader.read_lenenc_nullable(), None, "truncated");
    }

    #[test]
    fn test_read_row_values() {
        let mut reader = PacketReader::new(&[0x01, b'1', 0xFB, 0x00, 0x02, b'a']);
        assert_eq!(reader.read_row_value(), Some(Some(&b"1"[..])));
        assert_eq!(reader.read_row_value(), Some(None));
        assert_eq!(reader.read_row_value(), Some(Some(&b""[..])));
        assert_eq!(reader.read_row_value(), None, "value runs past the payload");
    }

    #[test]
    fn test_read_null_string() {
        let mut reader = PacketReader::new(b"hello\0world");
        assert_eq!(reader.read_null_string(), Some("hello".to_string()));
        assert_eq!(reader.read_null_string(), Some("world".to_string()));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_lenenc_string() {
        let mut reader = PacketReader::new(&[0x05, b'h', b'e', b'l', b'l', b'o']);
        assert_eq!(reader.read_lenenc_string(), Some("hello".to_string()));
        let mut reader = PacketReader::new(&[0x05, b'h']);
        assert_eq!(reader.read_lenenc_string(), None);
    }

    #[test]
    fn test_parse_ok_packet() {
        // affected_rows=1, last_insert_id=42, status=2, warnings=0
        let data = [0x00, 0x01, 0x2A, 0x02, 0x00, 0x00, 0x00];
        let ok = PacketReader::new(&data).parse_ok_packet().unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 42);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 0);
        assert!(ok.info.is_empty());
        assert!(!ok.has_more_results());
    }

    #[test]
    fn test_parse_ok_packet_with_eof_marker() {
        let data = [0xFE, 0x00, 0x00, 0x0A, 0x00, 0x01, 0x00];
        let ok = PacketReader::new(&data).parse_ok_packet().unwrap();
        assert_eq!(ok.status_flags, 0x000A);
        assert_eq!(ok.warnings, 1);
        assert!(ok.has_more_results());
    }

    #[test]
    fn test_parse_err_packet() {
        let mut data = vec![0xFF, 0x15, 0x04, b'#'];
        data.extend_from_slice(b"28000");
        data.extend_from_slice(b"Access denied");
        let err = PacketReader::new(&data).parse_err_packet().unwrap();
        assert_eq!(err.error_code, 1045);
        assert_eq!(err.sql_state.as_deref(), Some("28000"));
        assert_eq!(err.error_message, "Access denied");
    }

    #[test]
    fn test_parse_err_packet_without_state() {
        let mut data = vec![0xFF, 0x10, 0x04];
        data.extend_from_slice(b"Too many connections");
        let err = PacketReader::new(&data).parse_err_packet().unwrap();
        assert_eq!(err.error_code, 1040);
        assert_eq!(err.sql_state, None);
        assert_eq!(err.error_message, "Too many connections");
    }

    #[test]
    fn test_parse_eof_packet() {
        let data = [0xFE, 0x00, 0x00, 0x02, 0x00];
        let eof = PacketReader::new(&data).parse_eof_packet().unwrap();
        assert_eq!(eof.warnings, 0);
        assert_eq!(eof.status_flags, 2);

        let eof = PacketReader::new(&[0xFE]).parse_eof_packet().unwrap();
        assert_eq!(eof.status_flags, 0);
    }
}
