//! Scripted server for integration tests.
//!
//! A `Server` is a list of packets the fake server sends, in order. The
//! channel replays them and records everything the client writes, so tests
//! can assert on the exact bytes of both directions.

#![allow(dead_code)]

use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mysql_wire::protocol::{PacketWriter, capabilities, frame_payload};
use mysql_wire::{Channel, Session, SessionConfig};

pub const NONCE: &[u8] = b"abcdefghijklmnopqrst";
pub const AUTOCOMMIT: u16 = 0x0002;
pub const MORE_RESULTS: u16 = 0x0008;

pub const SERVER_CAPS: u32 = capabilities::DEFAULT_CLIENT_FLAGS
    | capabilities::CLIENT_CONNECT_WITH_DB
    | capabilities::CLIENT_CONNECT_ATTRS
    | capabilities::CLIENT_LOCAL_FILES;

#[derive(Debug, Default, Clone)]
pub struct Server {
    bytes: Vec<u8>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// A server that greets with `plugin` and accepts the first response.
    pub fn accepting(plugin: &str) -> Self {
        Self::new()
            .send(0, &greeting(plugin, SERVER_CAPS))
            .send(2, &ok(0, 0, AUTOCOMMIT))
    }

    pub fn send(mut self, seq: u8, payload: &[u8]) -> Self {
        self.bytes.extend_from_slice(&frame_payload(payload, seq).0);
        self
    }

    pub fn into_channel(self) -> (ScriptChannel, Wire) {
        let wire = Wire::default();
        let channel = ScriptChannel {
            input: Cursor::new(self.bytes),
            wire: wire.clone(),
        };
        (channel, wire)
    }

    /// Authenticate a session against this script.
    pub fn session(self, config: SessionConfig) -> (Session, Wire) {
        let (channel, wire) = self.into_channel();
        let session = Session::handshake(Box::new(channel), config).unwrap();
        (session, wire)
    }
}

/// Bytes written by the client.
#[derive(Debug, Default, Clone)]
pub struct Wire(Arc<Mutex<Vec<u8>>>);

impl Wire {
    /// Client packets as (sequence id, payload).
    pub fn packets(&self) -> Vec<(u8, Vec<u8>)> {
        let bytes = self.0.lock().unwrap().clone();
        let mut out = Vec::new();
        let mut rest = bytes.as_slice();
        while rest.len() >= 4 {
            let len = usize::from(rest[0]) | usize::from(rest[1]) << 8 | usize::from(rest[2]) << 16;
            out.push((rest[3], rest[4..4 + len].to_vec()));
            rest = &rest[4 + len..];
        }
        out
    }

    /// Client packets after the handshake response.
    pub fn commands(&self) -> Vec<(u8, Vec<u8>)> {
        self.packets().into_iter().skip(1).collect()
    }
}

#[derive(Debug)]
pub struct ScriptChannel {
    input: Cursor<Vec<u8>>,
    wire: Wire,
}

impl Read for ScriptChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.wire.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for ScriptChannel {
    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn set_write_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn peer_description(&self) -> String {
        "script".to_string()
    }
}

pub fn greeting(plugin: &str, caps: u32) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(10);
    w.write_null_string("8.0.36-test");
    w.write_u32_le(1234);
    w.write_bytes(&NONCE[..8]);
    w.write_u8(0);
    w.write_u16_le((caps & 0xFFFF) as u16);
    w.write_u8(45);
    w.write_u16_le(AUTOCOMMIT);
    w.write_u16_le((caps >> 16) as u16);
    w.write_u8(21);
    w.write_zeros(10);
    w.write_bytes(&NONCE[8..]);
    w.write_u8(0);
    w.write_null_string(plugin);
    w.into_bytes()
}

pub fn ok(affected_rows: u64, last_insert_id: u64, status: u16) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x00);
    w.write_lenenc_int(affected_rows);
    w.write_lenenc_int(last_insert_id);
    w.write_u16_le(status);
    w.write_u16_le(0);
    w.into_bytes()
}

pub fn err(code: u16, sqlstate: &str, message: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0xFF);
    w.write_u16_le(code);
    w.write_u8(b'#');
    w.write_bytes(sqlstate.as_bytes());
    w.write_bytes(message.as_bytes());
    w.into_bytes()
}

pub fn eof(status: u16) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0xFE);
    w.write_u16_le(0);
    w.write_u16_le(status);
    w.into_bytes()
}

/// Column definition packet: (name, type code, flags, charset).
pub fn column(name: &str, column_type: u8, flags: u16, charset: u16) -> Vec<u8> {
    let mut w = PacketWriter::new();
    for part in ["def", "test", "t", "t", name, name] {
        w.write_lenenc_string(part);
    }
    w.write_lenenc_int(0x0c);
    w.write_u16_le(charset);
    w.write_u32_le(255);
    w.write_u8(column_type);
    w.write_u16_le(flags);
    w.write_u8(0);
    w.write_zeros(2);
    w.into_bytes()
}

pub fn row(values: &[Option<&str>]) -> Vec<u8> {
    let mut w = PacketWriter::new();
    for value in values {
        match value {
            Some(v) => w.write_lenenc_string(v),
            None => w.write_u8(0xFB),
        }
    }
    w.into_bytes()
}

pub fn config() -> SessionConfig {
    SessionConfig::new().user("app").password("secret")
}
