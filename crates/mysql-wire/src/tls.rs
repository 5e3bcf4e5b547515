//! TLS upgrade for MySQL sessions.
//!
//! # MySQL TLS handshake flow
//!
//! 1. Server greeting advertises `CLIENT_SSL`
//! 2. Client sends the 32-byte SSL request (capabilities with `CLIENT_SSL`,
//!    max packet size, charset, 23 zero bytes)
//! 3. Client performs the TLS handshake on the raw channel
//! 4. Client sends the full handshake response over TLS, continuing the
//!    packet sequence
//!
//! The upgrade itself is behind the [`TlsConnector`] trait. With the `tls`
//! feature, [`RustlsConnector`] provides it using rustls.

use std::fmt;

use mysql_wire_core::Result;
use mysql_wire_core::error::{Error, OperationalError, OperationalErrorKind};

use crate::channel::Channel;
use crate::config::{SslMode, TlsConfig};
use crate::protocol::capabilities;

/// Wraps a connected channel in a secure channel.
pub trait TlsConnector: fmt::Debug + Send + Sync {
    /// Run the TLS handshake over `channel` and return the protected stream.
    fn upgrade(&self, channel: Box<dyn Channel>, server_name: &str) -> Result<Box<dyn Channel>>;
}

/// Check if the server supports SSL/TLS.
pub const fn server_supports_ssl(server_caps: u32) -> bool {
    server_caps & capabilities::CLIENT_SSL != 0
}

/// Decide whether to upgrade, given the SSL mode and server capabilities.
///
/// - `Ok(true)` if SSL should be used
/// - `Ok(false)` if SSL should not be used
/// - `Err(_)` if SSL is required but not supported by server
pub fn validate_ssl_mode(ssl_mode: SslMode, server_caps: u32) -> Result<bool> {
    let server_supports = server_supports_ssl(server_caps);

    match ssl_mode {
        SslMode::Disable => Ok(false),
        SslMode::Preferred => Ok(server_supports),
        SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if server_supports {
                Ok(true)
            } else {
                Err(tls_error("SSL required but server does not support it"))
            }
        }
    }
}

/// Validate TLS configuration for the given SSL mode.
pub fn validate_tls_config(ssl_mode: SslMode, tls_config: &TlsConfig) -> Result<()> {
    if tls_config.client_cert_path.is_some() != tls_config.client_key_path.is_some() {
        return Err(tls_error(
            "client certificate and client key must be set together for mutual TLS",
        ));
    }

    match ssl_mode {
        SslMode::Disable | SslMode::Preferred | SslMode::Required => Ok(()),
        SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if tls_config.ca_cert_path.is_none() && !tls_config.danger_skip_verify {
                return Err(tls_error(
                    "CA certificate required for VerifyCa/VerifyIdentity mode; \
                     set ca_cert_path or danger_skip_verify",
                ));
            }
            Ok(())
        }
    }
}

/// The connector used when none is configured.
#[cfg(feature = "tls")]
pub fn default_connector(ssl_mode: SslMode, tls_config: &TlsConfig) -> Result<Box<dyn TlsConnector>> {
    Ok(Box::new(RustlsConnector::new(ssl_mode, tls_config.clone())))
}

/// The connector used when none is configured.
#[cfg(not(feature = "tls"))]
pub fn default_connector(
    _ssl_mode: SslMode,
    _tls_config: &TlsConfig,
) -> Result<Box<dyn TlsConnector>> {
    Err(tls_error(
        "TLS support requires the 'tls' feature of mysql-wire, or a custom TlsConnector",
    ))
}

pub(crate) fn tls_error(message: impl Into<String>) -> Error {
    Error::Operational(OperationalError {
        kind: OperationalErrorKind::Tls,
        message: message.into(),
        source: None,
    })
}

#[cfg(feature = "tls")]
pub use rustls_impl::{RustlsConnector, TlsStream};

#[cfg(feature = "tls")]
mod rustls_impl {
    use std::io::{self, Read, Write};
    use std::sync::Arc;
    use std::time::Duration;

    use mysql_wire_core::Result;

    use super::{TlsConnector, tls_error};
    use crate::channel::Channel;
    use crate::config::{SslMode, TlsConfig};

    /// rustls-backed [`TlsConnector`].
    ///
    /// `Preferred` and `Required` accept any server certificate (MySQL servers
    /// commonly run with self-signed certificates). `VerifyCa` and
    /// `VerifyIdentity` verify against the configured CA or the webpki roots.
    #[derive(Debug, Clone)]
    pub struct RustlsConnector {
        ssl_mode: SslMode,
        tls_config: TlsConfig,
    }

    impl RustlsConnector {
        pub fn new(ssl_mode: SslMode, tls_config: TlsConfig) -> Self {
            Self {
                ssl_mode,
                tls_config,
            }
        }
    }

    impl TlsConnector for RustlsConnector {
        fn upgrade(
            &self,
            channel: Box<dyn Channel>,
            server_name: &str,
        ) -> Result<Box<dyn Channel>> {
            let config = build_client_config(&self.tls_config, self.ssl_mode)?;
            let stream = TlsStream::new(channel, config, server_name)?;
            tracing::debug!(
                version = ?stream.protocol_version(),
                "TLS established"
            );
            Ok(Box::new(stream))
        }
    }

    /// A channel protected by rustls.
    pub struct TlsStream {
        conn: rustls::ClientConnection,
        stream: Box<dyn Channel>,
    }

    impl std::fmt::Debug for TlsStream {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("TlsStream")
                .field("protocol_version", &self.conn.protocol_version())
                .field("is_handshaking", &self.conn.is_handshaking())
                .finish_non_exhaustive()
        }
    }

    impl TlsStream {
        /// Run the TLS handshake to completion over `stream`.
        pub fn new(
            mut stream: Box<dyn Channel>,
            config: rustls::ClientConfig,
            server_name: &str,
        ) -> Result<Self> {
            let name = server_name
                .to_string()
                .try_into()
                .map_err(|e| tls_error(format!("Invalid server name '{}': {}", server_name, e)))?;

            let mut conn = rustls::ClientConnection::new(Arc::new(config), name)
                .map_err(|e| tls_error(format!("Failed to create TLS connection: {}", e)))?;

            while conn.is_handshaking() {
                while conn.wants_write() {
                    conn.write_tls(&mut stream)
                        .map_err(|e| tls_error(format!("TLS handshake write error: {}", e)))?;
                }
                stream
                    .flush()
                    .map_err(|e| tls_error(format!("TLS handshake write error: {}", e)))?;

                if conn.wants_read() {
                    let n = conn
                        .read_tls(&mut stream)
                        .map_err(|e| tls_error(format!("TLS handshake read error: {}", e)))?;
                    if n == 0 {
                        return Err(tls_error("server closed the connection during TLS handshake"));
                    }
                    conn.process_new_packets()
                        .map_err(|e| tls_error(format!("TLS handshake error: {}", e)))?;
                }
            }

            Ok(Self { conn, stream })
        }

        /// Get the negotiated protocol version.
        pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
            self.conn.protocol_version()
        }
    }

    impl Read for TlsStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            loop {
                match self.conn.reader().read(buf) {
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }

                if self.conn.read_tls(&mut self.stream)? == 0 {
                    return Ok(0);
                }
                self.conn
                    .process_new_packets()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            }
        }
    }

    impl Write for TlsStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.conn.writer().write(buf)?;
            while self.conn.wants_write() {
                self.conn.write_tls(&mut self.stream)?;
            }
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.conn.writer().flush()?;
            while self.conn.wants_write() {
                self.conn.write_tls(&mut self.stream)?;
            }
            self.stream.flush()
        }
    }

    impl Channel for TlsStream {
        fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
            self.stream.set_read_timeout(timeout)
        }

        fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
            self.stream.set_write_timeout(timeout)
        }

        fn shutdown(&mut self) -> io::Result<()> {
            self.conn.send_close_notify();
            while self.conn.wants_write() {
                if self.conn.write_tls(&mut self.stream).is_err() {
                    break;
                }
            }
            self.stream.shutdown()
        }

        fn is_secure(&self) -> bool {
            true
        }

        fn peer_description(&self) -> String {
            format!("tls+{}", self.stream.peer_description())
        }
    }

    fn build_client_config(tls_config: &TlsConfig, ssl_mode: SslMode) -> Result<rustls::ClientConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        match ssl_mode {
            SslMode::Disable => Err(tls_error("TLS upgrade requested with SslMode::Disable")),
            SslMode::Preferred | SslMode::Required => build_no_verify_config(&provider, tls_config),
            SslMode::VerifyCa | SslMode::VerifyIdentity => {
                if tls_config.danger_skip_verify {
                    build_no_verify_config(&provider, tls_config)
                } else if let Some(ca_path) = &tls_config.ca_cert_path {
                    build_custom_ca_config(&provider, tls_config, ca_path)
                } else {
                    build_webpki_config(&provider, tls_config)
                }
            }
        }
    }

    fn builder(
        provider: &Arc<rustls::crypto::CryptoProvider>,
    ) -> Result<rustls::ConfigBuilder<rustls::ClientConfig, rustls::WantsVerifier>> {
        rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
            .map_err(|e| tls_error(format!("Failed to set TLS versions: {}", e)))
    }

    fn build_no_verify_config(
        provider: &Arc<rustls::crypto::CryptoProvider>,
        tls_config: &TlsConfig,
    ) -> Result<rustls::ClientConfig> {
        use rustls::client::danger::{
            HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
        };
        use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
        use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

        /// Accepts any server certificate.
        #[derive(Debug)]
        struct NoVerifier(Vec<SignatureScheme>);

        impl ServerCertVerifier for NoVerifier {
            fn verify_server_cert(
                &self,
                _end_entity: &CertificateDer<'_>,
                _intermediates: &[CertificateDer<'_>],
                _server_name: &ServerName<'_>,
                _ocsp_response: &[u8],
                _now: UnixTime,
            ) -> std::result::Result<ServerCertVerified, RustlsError> {
                Ok(ServerCertVerified::assertion())
            }

            fn verify_tls12_signature(
                &self,
                _message: &[u8],
                _cert: &CertificateDer<'_>,
                _dss: &DigitallySignedStruct,
            ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
                Ok(HandshakeSignatureValid::assertion())
            }

            fn verify_tls13_signature(
                &self,
                _message: &[u8],
                _cert: &CertificateDer<'_>,
                _dss: &DigitallySignedStruct,
            ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
                Ok(HandshakeSignatureValid::assertion())
            }

            fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
                self.0.clone()
            }
        }

        let schemes = provider
            .signature_verification_algorithms
            .supported_schemes();
        let builder = builder(provider)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(schemes)));
        add_client_auth(builder, tls_config)
    }

    fn build_webpki_config(
        provider: &Arc<rustls::crypto::CryptoProvider>,
        tls_config: &TlsConfig,
    ) -> Result<rustls::ClientConfig> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        add_client_auth(builder(provider)?.with_root_certificates(root_store), tls_config)
    }

    fn build_custom_ca_config(
        provider: &Arc<rustls::crypto::CryptoProvider>,
        tls_config: &TlsConfig,
        ca_path: &std::path::Path,
    ) -> Result<rustls::ClientConfig> {
        let certs = load_certs(ca_path, "CA certificate")?;
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs {
            root_store
                .add(cert)
                .map_err(|e| tls_error(format!("Failed to add CA certificate: {}", e)))?;
        }
        add_client_auth(builder(provider)?.with_root_certificates(root_store), tls_config)
    }

    fn load_certs(
        path: &std::path::Path,
        what: &str,
    ) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
        let file = std::fs::File::open(path)
            .map_err(|e| tls_error(format!("Failed to open {} '{}': {}", what, path.display(), e)))?;
        let certs = rustls_pemfile::certs(&mut io::BufReader::new(file))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| tls_error(format!("Failed to parse {}: {}", what, e)))?;
        if certs.is_empty() {
            return Err(tls_error(format!(
                "No certificates found in {} '{}'",
                what,
                path.display()
            )));
        }
        Ok(certs)
    }

    fn add_client_auth(
        builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
        tls_config: &TlsConfig,
    ) -> Result<rustls::ClientConfig> {
        let (Some(cert_path), Some(key_path)) =
            (&tls_config.client_cert_path, &tls_config.client_key_path)
        else {
            return Ok(builder.with_no_client_auth());
        };

        let certs = load_certs(cert_path, "client certificate")?;
        let key_file = std::fs::File::open(key_path).map_err(|e| {
            tls_error(format!(
                "Failed to open client key '{}': {}",
                key_path.display(),
                e
            ))
        })?;
        let key = rustls_pemfile::private_key(&mut io::BufReader::new(key_file))
            .map_err(|e| tls_error(format!("Failed to parse client key: {}", e)))?
            .ok_or_else(|| tls_error(format!("No private key found in '{}'", key_path.display())))?;

        builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| tls_error(format!("Failed to configure client auth: {}", e)))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_client_configs_build() {
            let tls = TlsConfig::new();
            assert!(build_client_config(&tls, SslMode::Required).is_ok());
            assert!(build_client_config(&tls, SslMode::VerifyIdentity).is_ok());
            assert!(build_client_config(&tls, SslMode::Disable).is_err());
        }

        #[test]
        fn test_missing_ca_file() {
            let tls = TlsConfig::new().ca_cert("/nonexistent/ca.pem");
            let err = build_client_config(&tls, SslMode::VerifyCa).unwrap_err();
            assert!(err.to_string().contains("CA certificate"));
        }
    }
}
