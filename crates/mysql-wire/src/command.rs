//! Text-protocol commands.
//!
//! Every command goes through [`Session::send_command`], which owns the
//! sequencing rules; the methods here only build payloads and read the
//! matching reply.

use mysql_wire_core::{Result, Row};

use crate::config::ResultMode;
use crate::protocol::{Command, OkPacket, PacketReader, PacketWriter, malformed};
use crate::result::ResultSet;
use crate::session::{Session, SessionState};

impl Session {
    /// Run a query and return its first result.
    ///
    /// Later results of a multi-statement query are reached through
    /// [`ResultSet::next_result`] or [`Session::next_result`].
    pub fn query(&mut self, sql: &str) -> Result<ResultSet<'_>> {
        self.send_command(Command::Query, sql.as_bytes())?;
        self.read_result()
    }

    /// Run a query and collect the rows of its first result.
    pub fn query_all(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.query(sql)?.collect_rows()
    }

    /// Run a statement, discarding any rows.
    ///
    /// Every result of a multi-statement query is consumed; the status of
    /// the last one is returned.
    pub fn execute(&mut self, sql: &str) -> Result<OkPacket> {
        self.send_command(Command::Query, sql.as_bytes())?;
        let mut status = self.drain_result()?;
        while self.advance() {
            status = self.drain_result()?;
        }
        Ok(status)
    }

    fn drain_result(&mut self) -> Result<OkPacket> {
        let mut rs = self.read_result_with(ResultMode::Streaming)?;
        rs.drain()?;
        Ok(rs.status().clone())
    }

    pub fn ping(&mut self) -> Result<()> {
        self.send_command(Command::Ping, &[])?;
        self.expect_ok().map(drop)
    }

    /// Change the default database.
    pub fn init_db(&mut self, database: &str) -> Result<()> {
        self.send_command(Command::InitDb, database.as_bytes())?;
        self.expect_ok()?;
        self.database = Some(database.to_string());
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT").map(drop)
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK").map(drop)
    }

    pub fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        let sql = if enabled {
            "SET AUTOCOMMIT = 1"
        } else {
            "SET AUTOCOMMIT = 0"
        };
        self.execute(sql).map(drop)
    }

    /// Reset session state (user variables, temporary tables, prepared
    /// statements) without re-authenticating.
    pub fn reset_connection(&mut self) -> Result<()> {
        self.send_command(Command::ResetConnection, &[])?;
        self.expect_ok().map(drop)
    }

    /// Server status string, e.g. "Uptime: 1234  Threads: 2 ...".
    pub fn statistics(&mut self) -> Result<String> {
        self.send_command(Command::Statistics, &[])?;
        let payload = self.read_reply()?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Ask the server to kill another connection.
    pub fn kill(&mut self, connection_id: u32) -> Result<()> {
        let mut w = PacketWriter::new();
        w.write_u32_le(connection_id);
        self.send_command(Command::ProcessKill, w.as_bytes())?;
        self.expect_ok().map(drop)
    }

    /// Toggle multi-statement support for this session.
    pub fn set_multi_statements(&mut self, enabled: bool) -> Result<()> {
        let mut w = PacketWriter::new();
        w.write_u16_le(u16::from(!enabled));
        self.send_command(Command::SetOption, w.as_bytes())?;
        self.expect_ok().map(drop)
    }

    /// Send COM_QUIT and shut the channel down.
    ///
    /// Errors are ignored; the session is closed afterwards either way.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        if self.state != SessionState::Poisoned {
            // Best effort - the server closes its side on COM_QUIT
            self.stream.reset_sequence();
            let _ = self.stream.write_packet(&[Command::Quit as u8]);
        }
        let _ = self.stream.get_mut().shutdown();
        self.state = SessionState::Closed;
        self.more_results = false;
        tracing::debug!(connection_id = self.connection_id(), "session closed");
        Ok(())
    }

    /// Read a single reply packet, turning ERR into an error.
    fn read_reply(&mut self) -> Result<Vec<u8>> {
        let payload = match self.stream.read_packet() {
            Ok(payload) => payload,
            Err(e) => return Err(self.fail(e)),
        };
        if payload.first() == Some(&0xFF) {
            let err = PacketReader::new(&payload)
                .parse_err_packet()
                .map_or_else(|| malformed("ERR", &payload), |e| e.into_database_error());
            return Err(self.fail(err));
        }
        self.state = SessionState::Idle;
        Ok(payload)
    }

    /// Read an OK reply. Some commands answer with an EOF packet instead.
    fn expect_ok(&mut self) -> Result<OkPacket> {
        let payload = self.read_reply()?;
        let ok = match payload.first() {
            Some(0x00) => PacketReader::new(&payload).parse_ok_packet(),
            Some(0xFE) if payload.len() < 9 => {
                PacketReader::new(&payload).parse_eof_packet().map(|eof| OkPacket {
                    warnings: eof.warnings,
                    status_flags: eof.status_flags,
                    ..OkPacket::default()
                })
            }
            _ => None,
        };
        match ok {
            Some(ok) => {
                self.finish(ok.clone());
                Ok(ok)
            }
            None => Err(self.fail(malformed("OK", &payload))),
        }
    }
}
