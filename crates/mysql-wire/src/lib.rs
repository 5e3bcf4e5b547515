//! Blocking MySQL wire-protocol client core.
//!
//! This crate speaks the MySQL client/server protocol over any byte
//! stream. It provides:
//!
//! - Packet framing with sequence numbers and 16MB splitting
//! - The connection phase: capability negotiation, optional TLS upgrade,
//!   pluggable authentication (mysql_native_password, caching_sha2_password,
//!   sha256_password, mysql_clear_password) and auth switching
//! - Text-protocol commands with buffered or streaming results
//! - Multi-statement results and LOAD DATA LOCAL INFILE
//!
//! # MySQL Protocol Overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Packets over 16MB are split
//! - Request/response pairing via sequence numbers
//!
//! # Example
//!
//! ```rust,ignore
//! use mysql_wire::{Session, SessionConfig};
//!
//! let config = SessionConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut session = Session::connect(config)?;
//! for row in session.query("SELECT id, name FROM users")? {
//!     let row = row?;
//!     println!("{}: {}", row.get_as::<i64>(0)?, row.get_named::<String>("name")?);
//! }
//! ```

pub mod auth;
pub mod channel;
pub mod codec;
mod command;
pub mod config;
pub mod handshake;
pub mod infile;
pub mod protocol;
pub mod result;
pub mod session;
pub mod tls;
pub mod types;

#[cfg(test)]
mod mock;

pub use auth::{AuthAction, AuthContext, AuthPlugin};
pub use channel::Channel;
pub use codec::PacketStream;
pub use config::{ResultMode, SessionConfig, SslMode, TlsConfig};
pub use handshake::{AuthState, HandshakeEngine, Negotiated};
pub use infile::{DirectoryHandler, LocalInfileHandler};
pub use protocol::{Command, OkPacket};
pub use result::ResultSet;
pub use session::{Session, SessionState};
pub use tls::TlsConnector;
pub use types::{ColumnDef, FieldType};

pub use mysql_wire_core::{
    ColumnInfo, DatabaseErrorKind, Error, FromValue, OperationalErrorKind, Result, Row, Value,
};
