//! Core types shared by the mysql-wire protocol engine.
//!
//! This crate carries no I/O. It provides:
//!
//! - `Error` and its taxonomy (protocol, auth, operational, database, interface)
//! - `Value`, the dynamically-typed decoded column value
//! - `Row` and `ColumnInfo` for result rows
//! - `FromValue` for typed access to row values

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    AuthError, ConfigError, DatabaseError, DatabaseErrorKind, Error, InterfaceError,
    OperationalError, OperationalErrorKind, ProtocolError, Result, TypeError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
