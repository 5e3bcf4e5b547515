//! Scripted in-memory server used by unit tests.

use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel::Channel;
use crate::protocol::{PacketWriter, frame_payload};

/// Server bytes to replay, built packet by packet.
#[derive(Debug, Default, Clone)]
pub(crate) struct Script {
    bytes: Vec<u8>,
}

impl Script {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn packet(mut self, seq: u8, payload: &[u8]) -> Self {
        self.bytes.extend_from_slice(&frame_payload(payload, seq).0);
        self
    }

    pub(crate) fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub(crate) fn channel(self) -> (ScriptedChannel, Arc<Mutex<Vec<u8>>>) {
        ScriptedChannel::new(self.bytes)
    }
}

/// Channel replaying a fixed server script and recording client writes.
#[derive(Debug)]
pub(crate) struct ScriptedChannel {
    input: Cursor<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    secure: bool,
    shut_down: bool,
}

impl ScriptedChannel {
    pub(crate) fn new(input: Vec<u8>) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let channel = Self {
            input: Cursor::new(input),
            written: Arc::clone(&written),
            secure: false,
            shut_down: false,
        };
        (channel, written)
    }

    pub(crate) fn secure(mut self) -> Self {
        self.secure = true;
        self
    }
}

impl Read for ScriptedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.shut_down {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.input.read(buf)
    }
}

impl Write for ScriptedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.shut_down {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.written
            .lock()
            .map_err(|_| io::Error::other("poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for ScriptedChannel {
    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn set_write_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.shut_down = true;
        Ok(())
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn peer_description(&self) -> String {
        "scripted".to_string()
    }
}

/// Split client bytes into (sequence id, payload) packets.
pub(crate) fn packets(written: &Arc<Mutex<Vec<u8>>>) -> Vec<(u8, Vec<u8>)> {
    let wire = written.lock().map(|w| w.clone()).unwrap_or_default();
    let mut out = Vec::new();
    let mut rest = wire.as_slice();
    while rest.len() >= 4 {
        let len = usize::from(rest[0]) | usize::from(rest[1]) << 8 | usize::from(rest[2]) << 16;
        out.push((rest[3], rest[4..4 + len].to_vec()));
        rest = &rest[4 + len..];
    }
    out
}

pub(crate) fn ok_packet(affected_rows: u64, last_insert_id: u64, status: u16) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x00);
    w.write_lenenc_int(affected_rows);
    w.write_lenenc_int(last_insert_id);
    w.write_u16_le(status);
    w.write_u16_le(0);
    w.into_bytes()
}

pub(crate) fn err_packet(code: u16, sqlstate: &str, message: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0xFF);
    w.write_u16_le(code);
    w.write_u8(b'#');
    w.write_bytes(sqlstate.as_bytes());
    w.write_bytes(message.as_bytes());
    w.into_bytes()
}

pub(crate) fn eof_packet(warnings: u16, status: u16) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0xFE);
    w.write_u16_le(warnings);
    w.write_u16_le(status);
    w.into_bytes()
}

/// A text row of optional values.
pub(crate) fn row_packet(values: &[Option<&str>]) -> Vec<u8> {
    let mut w = PacketWriter::new();
    for value in values {
        match value {
            Some(v) => w.write_lenenc_string(v),
            None => w.write_u8(0xFB),
        }
    }
    w.into_bytes()
}
