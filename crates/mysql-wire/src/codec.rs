//! Packet framing over a byte stream.
//!
//! [`PacketStream`] owns the transport and the sequence counter of the
//! current exchange. Logical payloads of any size are split into
//! `MAX_PACKET_SIZE` chunks on write and reassembled on read.

// Packet lengths are bounded by MAX_PACKET_SIZE
#![allow(clippy::cast_possible_truncation)]

use std::io::{self, Read, Write};

use mysql_wire_core::Result;
use mysql_wire_core::error::{Error, OperationalError, OperationalErrorKind};

use crate::protocol::{MAX_PACKET_SIZE, PacketHeader, frame_payload, protocol_error};

/// A byte stream speaking MySQL packets.
#[derive(Debug)]
pub struct PacketStream<S> {
    stream: S,
    sequence_id: u8,
}

impl<S: Read + Write> PacketStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            sequence_id: 0,
        }
    }

    /// Sequence id expected on the next packet, in either direction.
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Start a new command exchange.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Swap the transport (TLS upgrade), keeping the sequence position.
    pub fn map_stream(self, f: impl FnOnce(S) -> Result<S>) -> Result<Self> {
        let sequence_id = self.sequence_id;
        Ok(Self {
            stream: f(self.stream)?,
            sequence_id,
        })
    }

    /// Frame and send one logical payload, then flush.
    pub fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let (bytes, next_seq) = frame_payload(payload, self.sequence_id);
        tracing::trace!(
            len = payload.len(),
            seq = self.sequence_id,
            "write packet"
        );
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        self.sequence_id = next_seq;
        Ok(())
    }

    /// Read one logical payload, joining continuation chunks.
    pub fn read_packet(&mut self) -> Result<Vec<u8>> {
        let first_seq = self.sequence_id;
        let mut payload = Vec::new();

        loop {
            let header = self.read_header(payload.is_empty())?;
            if header.sequence_id != self.sequence_id {
                return Err(protocol_error(format!(
                    "packet sequence mismatch: expected {}, received {}",
                    self.sequence_id, header.sequence_id
                )));
            }
            self.sequence_id = self.sequence_id.wrapping_add(1);

            let len = header.payload_length as usize;
            let start = payload.len();
            payload.resize(start + len, 0);
            read_full(&mut self.stream, &mut payload[start..]).map_err(|e| match e {
                ReadError::Eof(_) => protocol_error(format!(
                    "truncated packet: expected {} payload bytes",
                    len
                )),
                ReadError::Io(e) => Error::from(e),
            })?;

            if len < MAX_PACKET_SIZE {
                break;
            }
        }

        tracing::trace!(len = payload.len(), seq = first_seq, "read packet");
        Ok(payload)
    }

    fn read_header(&mut self, first_chunk: bool) -> Result<PacketHeader> {
        let mut buf = [0u8; PacketHeader::SIZE];
        match read_full(&mut self.stream, &mut buf) {
            Ok(()) => Ok(PacketHeader::from_bytes(&buf)),
            Err(ReadError::Eof(0)) if first_chunk => Err(Error::Operational(OperationalError {
                kind: OperationalErrorKind::Reset,
                message: "server closed the connection".to_string(),
                source: None,
            })),
            Err(ReadError::Eof(n)) => Err(protocol_error(format!(
                "truncated packet: header cut off after {} bytes",
                n
            ))),
            Err(ReadError::Io(e)) => Err(e.into()),
        }
    }
}

enum ReadError {
    /// End of stream after this many bytes
    Eof(usize),
    Io(io::Error),
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::result::Result<(), ReadError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(ReadError::Eof(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(ReadError::Io(e)),
        }
    }
    Ok(())
}
