//! Result decoding for the text protocol.
//!
//! A command's response opens with one packet whose leading byte decides
//! the shape of the rest:
//!
//! - `0x00` OK: a status result (affected rows, last insert id)
//! - `0xFF` ERR: the command failed, the session stays usable
//! - `0xFB` LOCAL INFILE: the server wants a client file, then replies OK/ERR
//! - otherwise: a result set header holding the column count, followed by
//!   column definitions, an EOF (unless `CLIENT_DEPRECATE_EOF`), the rows
//!   and a terminating EOF or OK
//!
//! The terminator's status flags carry `SERVER_MORE_RESULTS_EXISTS` when a
//! multi-statement query has further results queued.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;

use mysql_wire_core::{ColumnInfo, Result, Row};

use crate::codec::PacketStream;
use crate::config::ResultMode;
use crate::infile::{self, LocalInfileHandler};
use crate::protocol::{
    EofPacket, OkPacket, PacketReader, PacketType, capabilities, malformed,
};
use crate::session::Session;
use crate::types::ColumnDef;

/// First part of a command response.
#[derive(Debug)]
pub(crate) enum Response {
    Status(OkPacket),
    Columns(Vec<ColumnDef>),
    /// The client could not supply a requested file but the server
    /// accepted the empty upload. The status still matters: it may
    /// announce further queued results.
    InfileFailed(OkPacket, mysql_wire_core::Error),
}

/// One packet of a row stream.
#[derive(Debug)]
pub(crate) enum RowPacket {
    Data(Vec<u8>),
    End(EofPacket),
}

/// Read a command response up to the first row.
pub(crate) fn read_response<S: Read + Write>(
    stream: &mut PacketStream<S>,
    capabilities: u32,
    infile_handler: Option<&dyn LocalInfileHandler>,
) -> Result<Response> {
    let payload = stream.read_packet()?;
    let Some(&first) = payload.first() else {
        return Err(malformed("response", &payload));
    };

    match PacketType::from_first_byte(first, payload.len()) {
        PacketType::Ok => parse_ok(&payload).map(Response::Status),
        PacketType::Error => Err(parse_err(&payload)?),
        PacketType::LocalInfile => {
            let filename = String::from_utf8_lossy(&payload[1..]).into_owned();
            tracing::debug!(%filename, "server requested local infile");
            let local_failure = infile::send_file(stream, infile_handler, &filename)?;
            let reply = stream.read_packet()?;
            match (reply.first(), local_failure) {
                (Some(0x00), None) => parse_ok(&reply).map(Response::Status),
                (Some(0x00), Some(failure)) => {
                    parse_ok(&reply).map(|ok| Response::InfileFailed(ok, failure))
                }
                (Some(0xFF), Some(failure)) => Err(failure),
                (Some(0xFF), None) => Err(parse_err(&reply)?),
                _ => Err(malformed("local infile reply", &reply)),
            }
        }
        PacketType::Eof => Err(malformed("response", &payload)),
        PacketType::Data => {
            let count = PacketReader::new(&payload)
                .read_lenenc_int()
                .ok_or_else(|| malformed("result set header", &payload))?;
            let count = usize::try_from(count)
                .map_err(|_| malformed("result set header", &payload))?;

            let mut columns = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                columns.push(ColumnDef::parse(&stream.read_packet()?)?);
            }
            if capabilities & capabilities::CLIENT_DEPRECATE_EOF == 0 {
                let eof = stream.read_packet()?;
                if PacketType::from_first_byte(eof.first().copied().unwrap_or(0), eof.len())
                    != PacketType::Eof
                {
                    return Err(malformed("column definitions EOF", &eof));
                }
            }
            tracing::trace!(columns = count, "result set header");
            Ok(Response::Columns(columns))
        }
    }
}

/// Read one packet of a row stream.
pub(crate) fn read_row_packet<S: Read + Write>(
    stream: &mut PacketStream<S>,
    deprecate_eof: bool,
) -> Result<RowPacket> {
    let payload = stream.read_packet()?;
    let Some(&first) = payload.first() else {
        return Err(malformed("row", &payload));
    };

    match PacketType::from_row_byte(first, payload.len(), deprecate_eof) {
        PacketType::Error => Err(parse_err(&payload)?),
        PacketType::Eof => PacketReader::new(&payload)
            .parse_eof_packet()
            .map(RowPacket::End)
            .ok_or_else(|| malformed("EOF", &payload)),
        PacketType::Ok => parse_ok(&payload).map(|ok| {
            RowPacket::End(EofPacket {
                warnings: ok.warnings,
                status_flags: ok.status_flags,
            })
        }),
        _ => Ok(RowPacket::Data(payload)),
    }
}

fn parse_ok(payload: &[u8]) -> Result<OkPacket> {
    PacketReader::new(payload)
        .parse_ok_packet()
        .ok_or_else(|| malformed("OK", payload))
}

fn parse_err(payload: &[u8]) -> Result<mysql_wire_core::Error> {
    PacketReader::new(payload)
        .parse_err_packet()
        .map(|err| err.into_database_error())
        .ok_or_else(|| malformed("ERR", payload))
}

/// The result of one statement.
///
/// Either a status result (no columns) or a result set. In buffered mode
/// the rows are already in memory; in streaming mode they are read on
/// demand and the session stays busy until the last row is consumed.
/// Dropping an unfinished streaming result is allowed: the session drains
/// it before the next command.
#[derive(Debug)]
pub struct ResultSet<'s> {
    session: &'s mut Session,
    columns: Vec<ColumnDef>,
    info: Arc<ColumnInfo>,
    buffered: VecDeque<Row>,
    /// Rows still on the wire
    pending: bool,
    status: OkPacket,
}

impl<'s> ResultSet<'s> {
    pub(crate) fn new(session: &'s mut Session, response: Response, mode: ResultMode) -> Result<Self> {
        let mut result = match response {
            Response::InfileFailed(_, error) => return Err(error),
            Response::Status(status) => Self {
                session,
                columns: Vec::new(),
                info: Arc::new(ColumnInfo::new(Vec::new())),
                buffered: VecDeque::new(),
                pending: false,
                status,
            },
            Response::Columns(columns) => {
                let names = columns.iter().map(|c| c.name.clone()).collect();
                Self {
                    session,
                    columns,
                    info: Arc::new(ColumnInfo::new(names)),
                    buffered: VecDeque::new(),
                    pending: true,
                    status: OkPacket::default(),
                }
            }
        };

        if mode == ResultMode::Buffered {
            while let Some(row) = result.read_from_wire()? {
                result.buffered.push_back(row);
            }
        }
        Ok(result)
    }

    fn read_from_wire(&mut self) -> Result<Option<Row>> {
        if !self.pending {
            return Ok(None);
        }
        match self.session.fetch_row(&self.columns, &self.info) {
            Ok(Some(row)) => {
                self.status.affected_rows += 1;
                Ok(Some(row))
            }
            Ok(None) => {
                self.pending = false;
                let end = self.session.last_status();
                self.status.warnings = end.warnings;
                self.status.status_flags = end.status_flags;
                Ok(None)
            }
            Err(e) => {
                self.pending = false;
                Err(e)
            }
        }
    }

    /// Does this result carry columns and rows?
    pub fn is_result_set(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_info(&self) -> &Arc<ColumnInfo> {
        &self.info
    }

    /// Rows affected by a status result; rows read so far for a result set.
    pub fn affected_rows(&self) -> u64 {
        self.status.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.status.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.status.warnings
    }

    pub fn status_flags(&self) -> u16 {
        self.status.status_flags
    }

    /// Server info string, e.g. "Rows matched: 1  Changed: 1  Warnings: 0".
    pub fn info(&self) -> &str {
        &self.status.info
    }

    /// Status of the statement, complete once all rows are consumed.
    pub fn status(&self) -> &OkPacket {
        &self.status
    }

    /// Is another result queued after this one?
    ///
    /// Only known once this result has been fully read.
    pub fn has_next(&self) -> bool {
        !self.pending && self.status.has_more_results()
    }

    /// Next row, reading from the wire in streaming mode.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        match self.buffered.pop_front() {
            Some(row) => Ok(Some(row)),
            None => self.read_from_wire(),
        }
    }

    /// Discard remaining rows.
    pub fn drain(&mut self) -> Result<()> {
        self.buffered.clear();
        while self.read_from_wire()?.is_some() {}
        Ok(())
    }

    /// Collect all remaining rows.
    pub fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows: Vec<Row> = self.buffered.drain(..).collect();
        while let Some(row) = self.read_from_wire()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Finish this result and move to the next one of a multi-statement
    /// query, if any.
    pub fn next_result(mut self) -> Result<Option<ResultSet<'s>>> {
        self.drain()?;
        let session = self.session;
        session.next_result()
    }
}

impl Iterator for ResultSet<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}
