//! LOAD DATA LOCAL INFILE support.
//!
//! When a query asks for a local file the server replies with a 0xFB packet
//! naming it. The client streams the file back as packets and terminates
//! with an empty packet; the server then answers with OK or ERR. The empty
//! packet is sent even when the file cannot be read, so the exchange stays
//! in step.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use mysql_wire_core::Result;
use mysql_wire_core::error::{Error, OperationalError, OperationalErrorKind};

use crate::codec::PacketStream;

/// Payload size of each file-content packet.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Supplies file contents requested by the server.
pub trait LocalInfileHandler: fmt::Debug + Send + Sync {
    /// Open the named file for reading.
    fn open(&self, filename: &str) -> io::Result<Box<dyn Read + Send>>;
}

/// Serves files below a root directory.
///
/// Absolute names and names containing `..` are refused.
#[derive(Debug, Clone)]
pub struct DirectoryHandler {
    root: PathBuf,
}

impl DirectoryHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, filename: &str) -> io::Result<PathBuf> {
        let relative = Path::new(filename);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("'{}' is outside {}", filename, self.root.display()),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl LocalInfileHandler for DirectoryHandler {
    fn open(&self, filename: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = std::fs::File::open(self.resolve(filename)?)?;
        Ok(Box::new(file))
    }
}

/// Stream `filename` to the server and terminate with an empty packet.
///
/// Transport failures are returned as `Err`. A local failure (no handler,
/// unreadable file) is returned as `Ok(Some(_))` once the empty packet has
/// gone out; the caller still has to read the server's reply.
pub(crate) fn send_file<S: Read + Write>(
    stream: &mut PacketStream<S>,
    handler: Option<&dyn LocalInfileHandler>,
    filename: &str,
) -> Result<Option<Error>> {
    let local_failure = match handler {
        None => Some(infile_error(format!(
            "server requested local file '{}' but LOCAL INFILE is not enabled",
            filename
        ))),
        Some(handler) => match handler.open(filename) {
            Ok(mut file) => stream_contents(stream, &mut file, filename)?,
            Err(e) => Some(infile_error(format!("Can't open local file '{}': {}", filename, e))),
        },
    };

    stream.write_packet(&[])?;
    Ok(local_failure)
}

fn stream_contents<S: Read + Write>(
    stream: &mut PacketStream<S>,
    file: &mut dyn Read,
    filename: &str,
) -> Result<Option<Error>> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent = 0usize;
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Ok(Some(infile_error(format!(
                    "Error reading local file '{}': {}",
                    filename, e
                ))));
            }
        };
        stream.write_packet(&buf[..n])?;
        sent += n;
    }
    tracing::debug!(filename, bytes = sent, "local infile sent");
    Ok(None)
}

fn infile_error(message: String) -> Error {
    Error::Operational(OperationalError {
        kind: OperationalErrorKind::LocalInfile,
        message,
        source: None,
    })
}
