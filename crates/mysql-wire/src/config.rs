//! Session configuration.
//!
//! Everything a session needs is passed in explicitly: connection
//! parameters, TLS options, auth-plugin overrides, result mode and
//! the connection attributes reported to the server.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mysql_wire_core::Result;
use mysql_wire_core::error::{ConfigError, Error};

use crate::auth::AuthPlugin;
use crate::infile::LocalInfileHandler;
use crate::protocol::{capabilities, charset};
use crate::tls::TlsConnector;

/// Longest accepted connect timeout (one year).
pub const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(31_536_000);

/// SSL mode for MySQL connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Do not use SSL
    #[default]
    Disable,
    /// Use SSL if the server offers it, without certificate verification
    Preferred,
    /// Require SSL, without certificate verification
    Required,
    /// Require SSL and verify the server certificate chain
    VerifyCa,
    /// Require SSL and verify the certificate matches the host name
    VerifyIdentity,
}

impl SslMode {
    /// Check if SSL should be attempted.
    pub const fn should_try_ssl(self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Check if SSL is required.
    pub const fn is_required(self) -> bool {
        matches!(
            self,
            SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity
        )
    }
}

/// Certificates and verification options for the TLS upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// CA bundle (PEM) used to verify the server
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate (PEM) for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    /// Client private key (PEM) for mutual TLS
    pub client_key_path: Option<PathBuf>,
    /// Name for SNI and verification, when it differs from the host
    pub server_name: Option<String>,
    /// Accept any server certificate
    pub danger_skip_verify: bool,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Disable certificate verification. Only for testing.
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.danger_skip_verify = skip;
        self
    }
}

/// How result-set rows are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultMode {
    /// Read every row before the result is handed out
    #[default]
    Buffered,
    /// Read rows on demand; the session is busy until the result is drained
    Streaming,
}

/// Session configuration.
#[derive(Clone)]
pub struct SessionConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Local socket path; takes precedence over host/port
    pub socket: Option<PathBuf>,
    /// Username (may be empty for anonymous accounts)
    pub user: String,
    pub password: Option<String>,
    /// Default database sent with the handshake
    pub database: Option<String>,
    /// Collation id (default: utf8mb4_general_ci)
    pub charset: u8,
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// Extra capability flags to request
    pub client_flags: u32,
    /// Capability flags never to request
    pub masked_flags: u32,
    pub ssl_mode: SslMode,
    pub tls: TlsConfig,
    /// Replaces the built-in rustls upgrade
    pub tls_connector: Option<Arc<dyn TlsConnector>>,
    /// Plugins consulted before the built-ins
    pub auth_plugins: Vec<Arc<dyn AuthPlugin>>,
    /// Server RSA public key (PEM), saves a round trip on full auth
    pub server_public_key: Option<Vec<u8>>,
    /// Max packet size advertised to the server (default: 16MB)
    pub max_packet_size: u32,
    /// Supplier of file contents for LOAD DATA LOCAL INFILE
    pub local_infile: Option<Arc<dyn LocalInfileHandler>>,
    pub result_mode: ResultMode,
    /// Connection attributes, in the order they are sent
    pub attributes: Vec<(String, String)>,
    /// Run `SET sql_mode = ...` after connecting
    pub sql_mode: Option<String>,
    /// Statement run after connecting, followed by COMMIT
    pub init_command: Option<String>,
    /// Run `SET AUTOCOMMIT = ...` after connecting
    pub autocommit: Option<bool>,
    /// Auth switch requests tolerated per handshake (default: 2)
    pub max_auth_switches: u8,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("ssl_mode", &self.ssl_mode)
            .field("result_mode", &self.result_mode)
            .field("local_infile", &self.local_infile.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            socket: None,
            user: String::new(),
            password: None,
            database: None,
            charset: charset::DEFAULT_CHARSET,
            connect_timeout: Duration::from_secs(10),
            read_timeout: None,
            write_timeout: None,
            client_flags: 0,
            masked_flags: 0,
            ssl_mode: SslMode::default(),
            tls: TlsConfig::default(),
            tls_connector: None,
            auth_plugins: Vec::new(),
            server_public_key: None,
            max_packet_size: 16 * 1024 * 1024,
            local_infile: None,
            result_mode: ResultMode::default(),
            attributes: vec![
                ("_client_name".to_string(), "mysql-wire".to_string()),
                (
                    "_client_version".to_string(),
                    env!("CARGO_PKG_VERSION").to_string(),
                ),
            ],
            sql_mode: None,
            init_command: None,
            autocommit: None,
            max_auth_switches: 2,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Connect through a local socket instead of TCP.
    pub fn socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket = Some(path.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the collation id.
    pub fn charset(mut self, charset: u8) -> Self {
        self.charset = charset;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Request extra capability flags.
    pub fn client_flags(mut self, flags: u32) -> Self {
        self.client_flags |= flags;
        self
    }

    /// Never request these capability flags.
    pub fn mask_flags(mut self, flags: u32) -> Self {
        self.masked_flags |= flags;
        self
    }

    /// Toggle multi-statement queries (on by default).
    pub fn multi_statements(self, enabled: bool) -> Self {
        if enabled {
            let mut config = self.client_flags(capabilities::CLIENT_MULTI_STATEMENTS);
            config.masked_flags &= !capabilities::CLIENT_MULTI_STATEMENTS;
            config
        } else {
            self.mask_flags(capabilities::CLIENT_MULTI_STATEMENTS)
        }
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Use a custom secure-channel upgrade.
    pub fn tls_connector(mut self, connector: Arc<dyn TlsConnector>) -> Self {
        self.tls_connector = Some(connector);
        self
    }

    /// Register an auth plugin, overriding any built-in of the same name.
    pub fn auth_plugin(mut self, plugin: Arc<dyn AuthPlugin>) -> Self {
        self.auth_plugins.push(plugin);
        self
    }

    pub fn server_public_key(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.server_public_key = Some(pem.into());
        self
    }

    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Allow LOAD DATA LOCAL INFILE, served by `handler`.
    ///
    /// The server picks the file name, so only enable this against
    /// trusted servers.
    pub fn local_infile(mut self, handler: Arc<dyn LocalInfileHandler>) -> Self {
        self.local_infile = Some(handler);
        self
    }

    pub fn result_mode(mut self, mode: ResultMode) -> Self {
        self.result_mode = mode;
        self
    }

    /// Set a connection attribute, replacing any earlier value.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
        self
    }

    pub fn client_name(self, name: impl Into<String>) -> Self {
        self.attribute("_client_name", name)
    }

    pub fn client_version(self, version: impl Into<String>) -> Self {
        self.attribute("_client_version", version)
    }

    pub fn program_name(self, name: impl Into<String>) -> Self {
        self.attribute("program_name", name)
    }

    /// Send no connection attributes at all.
    pub fn clear_attributes(mut self) -> Self {
        self.attributes.clear();
        self
    }

    pub fn sql_mode(mut self, mode: impl Into<String>) -> Self {
        self.sql_mode = Some(mode.into());
        self
    }

    pub fn init_command(mut self, sql: impl Into<String>) -> Self {
        self.init_command = Some(sql.into());
        self
    }

    pub fn autocommit(mut self, enabled: bool) -> Self {
        self.autocommit = Some(enabled);
        self
    }

    pub fn max_auth_switches(mut self, rounds: u8) -> Self {
        self.max_auth_switches = rounds;
        self
    }

    /// Get the `host:port` string for TCP connections.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Name used for SNI and certificate verification.
    pub fn tls_server_name(&self) -> &str {
        self.tls.server_name.as_deref().unwrap_or(&self.host)
    }

    /// Capability flags requested before intersecting with the server's.
    ///
    /// `CLIENT_SSL` is added separately once SSL is negotiated.
    pub fn capability_flags(&self) -> u32 {
        use capabilities::{
            CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, CLIENT_LOCAL_FILES, DEFAULT_CLIENT_FLAGS,
        };

        let mut flags = DEFAULT_CLIENT_FLAGS | self.client_flags;

        if self.database.is_some() {
            flags |= CLIENT_CONNECT_WITH_DB;
        }
        if self.local_infile.is_some() {
            flags |= CLIENT_LOCAL_FILES;
        }
        if !self.attributes.is_empty() {
            flags |= CLIENT_CONNECT_ATTRS;
        }

        flags & !self.masked_flags
    }

    /// Check the configuration before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() || self.connect_timeout > MAX_CONNECT_TIMEOUT {
            return Err(config_error(format!(
                "connect_timeout should be > 0 and <= {} seconds",
                MAX_CONNECT_TIMEOUT.as_secs()
            )));
        }
        if self.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err(config_error("read_timeout should be > 0"));
        }
        if self.write_timeout.is_some_and(|t| t.is_zero()) {
            return Err(config_error("write_timeout should be > 0"));
        }
        if self.max_packet_size == 0 {
            return Err(config_error("max_packet_size should be > 0"));
        }
        if self.socket.is_none() && self.host.is_empty() {
            return Err(config_error("host is empty and no socket path is set"));
        }
        if self.tls_connector.is_none() {
            crate::tls::validate_tls_config(self.ssl_mode, &self.tls)?;
        }
        Ok(())
    }
}

fn config_error(msg: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: msg.into(),
        source: None,
    })
}
