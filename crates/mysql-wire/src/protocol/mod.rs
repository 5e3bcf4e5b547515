//! MySQL wire protocol definitions.
//!
//! MySQL packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum packet payload is 2^24 - 1 (16MB - 1). Larger payloads
//! are split into multiple packets.

pub mod handshake;
pub mod reader;
pub mod writer;

pub use handshake::{AuthSwitchRequest, Handshake, HandshakeResponse, build_ssl_request};
pub use reader::PacketReader;
pub use writer::{PacketWriter, frame_payload};

use mysql_wire_core::error::{AuthError, DatabaseError, ProtocolError};
use mysql_wire_core::Error;
use serde::Serialize;

/// Maximum payload size for a single MySQL packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// MySQL capability flags (client and server).
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_NO_SCHEMA: u32 = 1 << 4;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_ODBC: u32 = 1 << 6;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_IGNORE_SPACE: u32 = 1 << 8;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_INTERACTIVE: u32 = 1 << 10;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_IGNORE_SIGPIPE: u32 = 1 << 12;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_RESERVED: u32 = 1 << 14;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS: u32 = 1 << 22;
    pub const CLIENT_SESSION_TRACK: u32 = 1 << 23;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Capabilities requested on every connection.
    ///
    /// Flags that depend on configuration (database, local infile,
    /// connection attributes, SSL) are added during negotiation.
    pub const DEFAULT_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_TRANSACTIONS
        | CLIENT_MULTI_STATEMENTS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;
}

/// MySQL command codes (COM_xxx) used by the text protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum Command {
    /// Quit connection
    Quit = 0x01,
    /// Switch default database
    InitDb = 0x02,
    /// Text protocol query
    Query = 0x03,
    /// Server statistics string
    Statistics = 0x09,
    /// Kill a connection
    ProcessKill = 0x0c,
    /// Ping server
    Ping = 0x0e,
    /// Enable or disable multi-statements
    SetOption = 0x1b,
    /// Reset session state
    ResetConnection = 0x1f,
}

/// MySQL server status flags.
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_NO_GOOD_INDEX_USED: u16 = 0x0010;
    pub const SERVER_STATUS_NO_INDEX_USED: u16 = 0x0020;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
    pub const SERVER_STATUS_DB_DROPPED: u16 = 0x0100;
    pub const SERVER_STATUS_NO_BACKSLASH_ESCAPES: u16 = 0x0200;
    pub const SERVER_STATUS_METADATA_CHANGED: u16 = 0x0400;
    pub const SERVER_QUERY_WAS_SLOW: u16 = 0x0800;
    pub const SERVER_PS_OUT_PARAMS: u16 = 0x1000;
    pub const SERVER_STATUS_IN_TRANS_READONLY: u16 = 0x2000;
    pub const SERVER_SESSION_STATE_CHANGED: u16 = 0x4000;
}

/// MySQL collation ids.
pub mod charset {
    pub const LATIN1_SWEDISH_CI: u8 = 8;
    pub const UTF8_GENERAL_CI: u8 = 33;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const BINARY: u8 = 63;
    pub const UTF8MB4_UNICODE_CI: u8 = 224;
    pub const UTF8MB4_0900_AI_CI: u8 = 255;

    /// Default collation for new sessions.
    pub const DEFAULT_CHARSET: u8 = UTF8MB4_GENERAL_CI;
}

/// A MySQL packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    /// Parse a packet header from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        Self {
            payload_length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]),
            sequence_id: bytes[3],
        }
    }

    /// Encode the header to 4 bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        let len = self.payload_length.to_le_bytes();
        [len[0], len[1], len[2], self.sequence_id]
    }
}

/// Server response classification by leading byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// OK packet (0x00, or 0xFE terminator under CLIENT_DEPRECATE_EOF)
    Ok,
    /// Error packet (0xFF)
    Error,
    /// EOF packet (0xFE, fewer than 9 bytes)
    Eof,
    /// Local infile request (0xFB)
    LocalInfile,
    /// Anything else: result-set header, column definition or row
    Data,
}

impl PacketType {
    /// Classify a response that opens a command's reply.
    pub fn from_first_byte(byte: u8, payload_len: usize) -> Self {
        match byte {
            0x00 => PacketType::Ok,
            0xFF => PacketType::Error,
            0xFE if payload_len < 9 => PacketType::Eof,
            0xFB => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }

    /// Classify a packet inside a row stream.
    ///
    /// With CLIENT_DEPRECATE_EOF the terminator is an OK packet carrying the
    /// 0xFE marker, which may be longer than a classic EOF but never a full
    /// packet. A row starts with 0xFE only when its first value needs an
    /// 8-byte length, which makes the payload at least a full packet.
    pub fn from_row_byte(byte: u8, payload_len: usize, deprecate_eof: bool) -> Self {
        match byte {
            0xFF => PacketType::Error,
            0xFE if deprecate_eof && payload_len < MAX_PACKET_SIZE => PacketType::Ok,
            0xFE if payload_len < 9 => PacketType::Eof,
            _ => PacketType::Data,
        }
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OkPacket {
    /// Number of affected rows
    pub affected_rows: u64,
    /// Last insert ID
    pub last_insert_id: u64,
    /// Server status flags
    pub status_flags: u16,
    /// Number of warnings
    pub warnings: u16,
    /// Human readable info, e.g. "Records: 3  Duplicates: 0  Warnings: 0"
    pub info: String,
}

impl OkPacket {
    /// Does the server have another result queued for this command?
    pub fn has_more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}

/// Parsed Error packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    /// Error code
    pub error_code: u16,
    /// SQL state (5 characters), absent on pre-4.1 style errors
    pub sql_state: Option<String>,
    /// Error message
    pub error_message: String,
}

impl ErrPacket {
    /// Convert into a classified server error.
    pub fn into_database_error(self) -> Error {
        Error::Database(DatabaseError::from_server(
            self.error_code,
            self.sql_state,
            self.error_message,
        ))
    }

    /// Convert into a handshake rejection.
    pub fn into_auth_error(self) -> Error {
        Error::Auth(AuthError {
            code: self.error_code,
            sqlstate: self.sql_state,
            message: self.error_message,
        })
    }
}

/// Parsed EOF packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    /// Number of warnings
    pub warnings: u16,
    /// Server status flags
    pub status_flags: u16,
}

pub(crate) fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: None,
    })
}

/// Protocol error carrying the offending payload for diagnostics.
pub(crate) fn malformed(what: &str, payload: &[u8]) -> Error {
    Error::Protocol(ProtocolError {
        message: format!("malformed {} packet ({} bytes)", what, payload.len()),
        raw_data: Some(payload.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_header_bytes() {
        let header = PacketHeader {
            payload_length: 0x0012_3456,
            sequence_id: 7,
        };
        assert_eq!(header.to_bytes(), [0x56, 0x34, 0x12, 7]);
        assert_eq!(PacketHeader::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn test_packet_header_max_size() {
        let header = PacketHeader {
            payload_length: MAX_PACKET_SIZE as u32,
            sequence_id: 255,
        };
        assert_eq!(header.to_bytes(), [0xFF, 0xFF, 0xFF, 255]);
    }

    #[test]
    fn test_packet_type_detection() {
        assert_eq!(PacketType::from_first_byte(0x00, 10), PacketType::Ok);
        assert_eq!(PacketType::from_first_byte(0xFF, 10), PacketType::Error);
        assert_eq!(PacketType::from_first_byte(0xFE, 5), PacketType::Eof);
        assert_eq!(PacketType::from_first_byte(0xFE, 100), PacketType::Data);
        assert_eq!(
            PacketType::from_first_byte(0xFB, 10),
            PacketType::LocalInfile
        );
        assert_eq!(PacketType::from_first_byte(0x01, 10), PacketType::Data);
    }

    #[test]
    fn test_row_stream_terminators() {
        assert_eq!(PacketType::from_row_byte(0xFE, 5, false), PacketType::Eof);
        assert_eq!(PacketType::from_row_byte(0xFE, 20, false), PacketType::Data);
        assert_eq!(PacketType::from_row_byte(0xFE, 20, true), PacketType::Ok);
        assert_eq!(
            PacketType::from_row_byte(0xFE, MAX_PACKET_SIZE, true),
            PacketType::Data
        );
        // 0x00 starts a row whose first value is the empty string
        assert_eq!(PacketType::from_row_byte(0x00, 3, true), PacketType::Data);
        assert_eq!(PacketType::from_row_byte(0xFF, 9, false), PacketType::Error);
    }

    #[test]
    fn test_err_packet_conversion() {
        let err = ErrPacket {
            error_code: 1062,
            sql_state: Some("23000".to_string()),
            error_message: "Duplicate entry".to_string(),
        }
        .into_database_error();
        match err {
            Error::Database(db) => {
                assert!(db.is_duplicate_key());
                assert_eq!(db.sqlstate.as_deref(), Some("23000"));
            }
            other => panic!("expected database error, got {other:?}"),
        }

        let err = ErrPacket {
            error_code: 1045,
            sql_state: Some("28000".to_string()),
            error_message: "Access denied".to_string(),
        }
        .into_auth_error();
        assert_eq!(err.error_code(), Some(1045));
        assert!(matches!(err, Error::Auth(_)));
    }
}
