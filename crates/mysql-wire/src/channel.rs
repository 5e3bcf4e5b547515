//! Byte-stream transports a session runs over.
//!
//! A [`Channel`] is any blocking duplex stream with timeout control. TCP and
//! local sockets are provided; the TLS upgrade wraps another channel.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use mysql_wire_core::Result;
use mysql_wire_core::error::{Error, OperationalError, OperationalErrorKind};

use crate::config::SessionConfig;

/// A blocking duplex byte stream.
pub trait Channel: Read + Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Close both directions. Later reads and writes fail.
    fn shutdown(&mut self) -> io::Result<()>;

    /// Is traffic protected from observation (TLS or a local socket)?
    fn is_secure(&self) -> bool {
        false
    }

    /// Human readable peer, for logs and errors.
    fn peer_description(&self) -> String;
}

impl Channel for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn peer_description(&self) -> String {
        self.peer_addr()
            .map_or_else(|_| "tcp:<unknown>".to_string(), |addr| format!("tcp:{}", addr))
    }
}

#[cfg(unix)]
impl Channel for std::os::unix::net::UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }

    fn is_secure(&self) -> bool {
        true
    }

    fn peer_description(&self) -> String {
        self.peer_addr()
            .ok()
            .and_then(|addr| addr.as_pathname().map(|p| format!("unix:{}", p.display())))
            .unwrap_or_else(|| "unix:<unnamed>".to_string())
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_write_timeout(timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown()
    }

    fn is_secure(&self) -> bool {
        (**self).is_secure()
    }

    fn peer_description(&self) -> String {
        (**self).peer_description()
    }
}

/// Open the transport described by `config`.
///
/// A socket path wins over host/port. Each resolved TCP address is tried in
/// turn with the connect timeout. Read and write timeouts are applied to the
/// returned channel.
#[tracing::instrument(level = "debug", skip(config), fields(host = %config.host, port = config.port))]
pub fn connect(config: &SessionConfig) -> Result<Box<dyn Channel>> {
    let channel: Box<dyn Channel> = match &config.socket {
        Some(path) => connect_socket(path)?,
        None => Box::new(connect_tcp(config)?),
    };

    channel.set_read_timeout(config.read_timeout)?;
    channel.set_write_timeout(config.write_timeout)?;
    tracing::debug!(peer = %channel.peer_description(), "transport connected");
    Ok(channel)
}

fn connect_tcp(config: &SessionConfig) -> Result<TcpStream> {
    let addrs = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| {
            connect_error(
                OperationalErrorKind::Connect,
                format!("Failed to resolve {}: {}", config.socket_addr(), e),
                e,
            )
        })?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) => {
            let kind = match e.kind() {
                io::ErrorKind::ConnectionRefused => OperationalErrorKind::Refused,
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                    OperationalErrorKind::Timeout
                }
                _ => OperationalErrorKind::Connect,
            };
            connect_error(
                kind,
                format!("Can't connect to MySQL server on {} ({})", config.socket_addr(), e),
                e,
            )
        }
        None => Error::Operational(OperationalError {
            kind: OperationalErrorKind::Connect,
            message: format!("{} resolved to no addresses", config.socket_addr()),
            source: None,
        }),
    })
}

#[cfg(unix)]
fn connect_socket(path: &std::path::Path) -> Result<Box<dyn Channel>> {
    let stream = std::os::unix::net::UnixStream::connect(path).map_err(|e| {
        let kind = if e.kind() == io::ErrorKind::ConnectionRefused {
            OperationalErrorKind::Refused
        } else {
            OperationalErrorKind::Connect
        };
        connect_error(
            kind,
            format!("Can't connect to local MySQL server through socket '{}' ({})", path.display(), e),
            e,
        )
    })?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
fn connect_socket(path: &std::path::Path) -> Result<Box<dyn Channel>> {
    Err(Error::Operational(OperationalError {
        kind: OperationalErrorKind::Connect,
        message: format!(
            "local socket '{}' is not supported on this platform",
            path.display()
        ),
        source: None,
    }))
}

fn connect_error(kind: OperationalErrorKind, message: String, source: io::Error) -> Error {
    Error::Operational(OperationalError {
        kind,
        message,
        source: Some(Box::new(source)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connect_tcp_applies_options() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = SessionConfig::new()
            .host("127.0.0.1")
            .port(port)
            .read_timeout(Duration::from_secs(3));

        let channel = connect(&config).unwrap();
        assert!(!channel.is_secure());
        assert_eq!(channel.peer_description(), format!("tcp:127.0.0.1:{port}"));
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nothing listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = SessionConfig::new().host("127.0.0.1").port(port);

        let err = connect(&config).map(|_| ()).unwrap_err();
        match err {
            Error::Operational(op) => assert_eq!(op.kind, OperationalErrorKind::Refused),
            other => panic!("expected operational error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_connect_unix_socket() {
        let dir = std::env::temp_dir().join(format!("mysql-wire-sock-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("mysqld.sock");
        let _ = std::fs::remove_file(&path);
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let channel = connect(&SessionConfig::new().socket(&path)).unwrap();
        assert!(channel.is_secure());
        assert!(channel.peer_description().starts_with("unix:"));

        let _ = std::fs::remove_file(&path);
    }
}
