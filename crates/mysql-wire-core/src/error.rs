//! Error types for mysql-wire operations.
//!
//! The taxonomy follows how a failure affects the session that produced it:
//! protocol desyncs and I/O failures poison the session, server errors to a
//! well-formed command leave it usable, and interface errors report misuse.

use std::fmt;

/// The primary error type for all mysql-wire operations.
#[derive(Debug)]
pub enum Error {
    /// Framing, sequence or packet-shape errors (fatal for the session)
    Protocol(ProtocolError),
    /// Handshake rejected by the server or unsupported auth plugin
    Auth(AuthError),
    /// Connection-level failures: refused, reset, timeout, TLS, I/O
    Operational(OperationalError),
    /// The server rejected a well-formed command
    Database(DatabaseError),
    /// Operation attempted on a closed or improperly sequenced session
    Interface(InterfaceError),
    /// Invalid configuration
    Config(ConfigError),
    /// Typed value conversion errors
    Type(TypeError),
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct AuthError {
    /// Server (or client-side 2xxx) error code
    pub code: u16,
    pub sqlstate: Option<String>,
    pub message: String,
}

#[derive(Debug)]
pub struct OperationalError {
    pub kind: OperationalErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationalErrorKind {
    /// Failed to establish the transport
    Connect,
    /// Peer refused the connection
    Refused,
    /// Connection reset or closed by the peer
    Reset,
    /// Read, write or connect timed out
    Timeout,
    /// Secure-channel negotiation failed
    Tls,
    /// Local infile request could not be served
    LocalInfile,
    /// Any other I/O failure
    Io,
}

#[derive(Debug, Clone)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub code: u16,
    pub sqlstate: Option<String>,
    pub message: String,
}

/// Classification of server ERR packets by MySQL error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// Syntax errors, unknown tables/columns, bad identifiers
    Programming,
    /// Constraint violations
    Integrity,
    /// Values out of range or truncated
    Data,
    /// Feature unsupported by the server
    NotSupported,
    /// Server-internal errors (codes below 1000)
    Internal,
    /// Transient server-side conditions: deadlocks, lock waits, shutdowns
    Operational,
    /// Anything else
    Other,
}

#[derive(Debug, Clone)]
pub struct InterfaceError {
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl DatabaseErrorKind {
    /// Classify a MySQL server error code.
    pub fn from_code(code: u16) -> Self {
        match code {
            1007 | 1008 | 1049 | 1050 | 1051 | 1054 | 1060 | 1061 | 1064 | 1065 | 1102 | 1103
            | 1110 | 1111 | 1115 | 1146 | 1149 => DatabaseErrorKind::Programming,
            1022 | 1048 | 1062 | 1169 | 1216 | 1217 | 1451 | 1452 | 1557 | 1586 => {
                DatabaseErrorKind::Integrity
            }
            1264 | 1265 | 1292 | 1366 | 1406 | 1416 => DatabaseErrorKind::Data,
            1235 | 1286 | 1289 => DatabaseErrorKind::NotSupported,
            1040 | 1053 | 1152 | 1205 | 1213 | 1317 | 2006 | 2013 => {
                DatabaseErrorKind::Operational
            }
            0..1000 => DatabaseErrorKind::Internal,
            _ => DatabaseErrorKind::Other,
        }
    }
}

impl DatabaseError {
    /// Build a classified error from the fields of an ERR packet.
    pub fn from_server(code: u16, sqlstate: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind: DatabaseErrorKind::from_code(code),
            code,
            sqlstate,
            message: message.into(),
        }
    }

    /// Is this a unique key violation (ER_DUP_ENTRY)?
    pub fn is_duplicate_key(&self) -> bool {
        self.code == 1062
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self.code, 1216 | 1217 | 1451 | 1452)
    }
}

impl Error {
    /// Does this error leave the session permanently unusable?
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Protocol(_) | Error::Auth(_) => true,
            Error::Operational(o) => o.kind != OperationalErrorKind::LocalInfile,
            _ => false,
        }
    }

    /// Is this a transient error worth retrying on a fresh attempt?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(d) => matches!(d.code, 1205 | 1213),
            Error::Operational(o) => matches!(
                o.kind,
                OperationalErrorKind::Timeout
                    | OperationalErrorKind::Reset
                    | OperationalErrorKind::Refused
            ),
            _ => false,
        }
    }

    /// Is this a connection error that requires reconnecting?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Operational(o) => o.kind != OperationalErrorKind::LocalInfile,
            Error::Protocol(_) | Error::Auth(_) => true,
            _ => false,
        }
    }

    /// MySQL error code, if the error carries one.
    pub fn error_code(&self) -> Option<u16> {
        match self {
            Error::Database(d) => Some(d.code),
            Error::Auth(a) => Some(a.code),
            _ => None,
        }
    }

    /// SQLSTATE, if the server supplied one.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Database(d) => d.sqlstate.as_deref(),
            Error::Auth(a) => a.sqlstate.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Auth(e) => write!(f, "Authentication error: {}", e),
            Error::Operational(e) => write!(f, "Operational error: {}", e.message),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Interface(e) => write!(f, "Interface error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Operational(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "({}, {}) {}", self.code, state, self.message),
            None => write!(f, "({}) {}", self.code, self.message),
        }
    }
}

impl fmt::Display for OperationalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "({}, {}) {}", self.code, state, self.message),
            None => write!(f, "({}) {}", self.code, self.message),
        }
    }
}

impl fmt::Display for InterfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => OperationalErrorKind::Timeout,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => OperationalErrorKind::Reset,
            ErrorKind::ConnectionRefused => OperationalErrorKind::Refused,
            _ => OperationalErrorKind::Io,
        };
        Error::Operational(OperationalError {
            kind,
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Auth(err)
    }
}

impl From<OperationalError> for Error {
    fn from(err: OperationalError) -> Self {
        Error::Operational(err)
    }
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Self {
        Error::Database(err)
    }
}

impl From<InterfaceError> for Error {
    fn from(err: InterfaceError) -> Self {
        Error::Interface(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for mysql-wire operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_server_codes() {
        assert_eq!(
            DatabaseErrorKind::from_code(1064),
            DatabaseErrorKind::Programming
        );
        assert_eq!(
            DatabaseErrorKind::from_code(1062),
            DatabaseErrorKind::Integrity
        );
        assert_eq!(DatabaseErrorKind::from_code(1264), DatabaseErrorKind::Data);
        assert_eq!(
            DatabaseErrorKind::from_code(1213),
            DatabaseErrorKind::Operational
        );
        assert_eq!(DatabaseErrorKind::from_code(999), DatabaseErrorKind::Internal);
        assert_eq!(DatabaseErrorKind::from_code(3024), DatabaseErrorKind::Other);
    }

    #[test]
    fn io_errors_map_to_operational_kinds() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(
            &err,
            Error::Operational(o) if o.kind == OperationalErrorKind::Timeout
        ));
        assert!(err.is_fatal());
        assert!(err.is_retryable());

        let err: Error = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(
            &err,
            Error::Operational(o) if o.kind == OperationalErrorKind::Reset
        ));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn database_errors_keep_session_usable() {
        let err = Error::Database(DatabaseError::from_server(
            1146,
            Some("42S02".to_string()),
            "Table 'test.nope' doesn't exist",
        ));
        assert!(!err.is_fatal());
        assert!(!err.is_connection_error());
        assert_eq!(err.error_code(), Some(1146));
        assert_eq!(err.sqlstate(), Some("42S02"));
        assert_eq!(
            err.to_string(),
            "Database error: (1146, 42S02) Table 'test.nope' doesn't exist"
        );
    }

    #[test]
    fn auth_and_protocol_errors_are_fatal() {
        let auth = Error::Auth(AuthError {
            code: 1045,
            sqlstate: Some("28000".to_string()),
            message: "Access denied".to_string(),
        });
        assert!(auth.is_fatal());
        assert_eq!(auth.error_code(), Some(1045));

        let proto = Error::Protocol(ProtocolError {
            message: "packet sequence mismatch".to_string(),
            raw_data: None,
        });
        assert!(proto.is_fatal());
        assert!(proto.is_connection_error());
    }

    #[test]
    fn local_infile_failure_is_not_fatal() {
        let err = Error::Operational(OperationalError {
            kind: OperationalErrorKind::LocalInfile,
            message: "no handler".to_string(),
            source: None,
        });
        assert!(!err.is_fatal());
        assert!(!err.is_connection_error());
    }
}
