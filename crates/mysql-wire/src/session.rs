//! MySQL session.
//!
//! A [`Session`] owns the channel and the packet sequence of one
//! authenticated server connection. Exactly one command/response exchange
//! is in flight at a time:
//!
//! ```text
//! Idle -> AwaitingResponse -> Idle                  (status result, error)
//!                          -> Streaming -> Idle     (result set)
//! any  -> Poisoned                                  (protocol or I/O failure)
//! any  -> Closed                                    (close)
//! ```
//!
//! A poisoned or closed session rejects every operation with an interface
//! error; reconnecting is left to the caller.

// MySQL protocol uses well-defined packet sizes that fit in u32 (max 16MB)
#![allow(clippy::cast_possible_truncation)]

use mysql_wire_core::error::{Error, InterfaceError};
use mysql_wire_core::{ColumnInfo, Result, Row};
use std::sync::Arc;

use crate::channel::{self, Channel};
use crate::codec::PacketStream;
use crate::config::{ResultMode, SessionConfig};
use crate::handshake::{AuthState, HandshakeEngine};
use crate::protocol::{Command, OkPacket, capabilities, server_status};
use crate::result::{self, Response, ResultSet, RowPacket};
use crate::types::{self, ColumnDef};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Ready for a command
    Idle,
    /// A command was sent, its response has not been read
    AwaitingResponse,
    /// Rows of a result set are still on the wire
    Streaming,
    /// Closed by the caller
    Closed,
    /// Unusable after a protocol or I/O failure
    Poisoned,
}

/// An authenticated connection to a MySQL server.
pub struct Session {
    pub(crate) stream: PacketStream<Box<dyn Channel>>,
    config: SessionConfig,
    pub(crate) state: SessionState,
    /// SERVER_MORE_RESULTS_EXISTS was set on the last terminator
    pub(crate) more_results: bool,
    server_version: String,
    connection_id: u32,
    capabilities: u32,
    server_capabilities: u32,
    status_flags: u16,
    pub(crate) database: Option<String>,
    last_status: OkPacket,
    auth_states: Vec<AuthState>,
    auth_plugin: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("connection_id", &self.connection_id)
            .field("server_version", &self.server_version)
            .field("peer", &self.stream.get_ref().peer_description())
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open the transport described by `config` and authenticate.
    #[tracing::instrument(
        level = "debug",
        skip(config),
        fields(host = %config.host, port = config.port, user = %config.user)
    )]
    pub fn connect(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let channel = channel::connect(&config)?;
        Self::handshake(channel, config)
    }

    /// Authenticate over an already open channel.
    ///
    /// Runs the connection phase, then the post-connect setup from the
    /// configuration: `sql_mode`, `init_command` (followed by COMMIT) and
    /// autocommit.
    #[tracing::instrument(level = "debug", skip_all, fields(peer = %channel.peer_description()))]
    pub fn handshake(channel: Box<dyn Channel>, config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let mut engine = HandshakeEngine::new(&config);
        let outcome = engine.run(PacketStream::new(channel));
        let auth_states = engine.visited().to_vec();
        let (stream, negotiated) = outcome?;

        tracing::debug!(
            connection_id = negotiated.greeting.connection_id,
            secure = stream.get_ref().is_secure(),
            "session established"
        );

        let mut session = Self {
            stream,
            state: SessionState::Idle,
            more_results: false,
            server_version: negotiated.greeting.server_version,
            connection_id: negotiated.greeting.connection_id,
            capabilities: negotiated.capabilities,
            server_capabilities: negotiated.greeting.capabilities,
            status_flags: negotiated.ok.status_flags,
            database: config.database.clone(),
            last_status: negotiated.ok,
            auth_states,
            auth_plugin: negotiated.auth_plugin,
            config,
        };
        session.setup()?;
        Ok(session)
    }

    fn setup(&mut self) -> Result<()> {
        if let Some(mode) = self.config.sql_mode.clone() {
            self.execute(&format!("SET sql_mode = {}", escape_string(&mode)))?;
        }
        if let Some(init) = self.config.init_command.clone() {
            self.execute(&init)?;
            self.commit()?;
        }
        if let Some(enabled) = self.config.autocommit {
            if enabled != self.autocommit() {
                self.set_autocommit(enabled)?;
            }
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Capability flags in effect for this session.
    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    /// Capability flags the server advertised.
    pub fn server_capabilities(&self) -> u32 {
        self.server_capabilities
    }

    /// Collation id sent in the handshake.
    pub fn charset(&self) -> u8 {
        self.config.charset
    }

    /// Server status flags from the last OK or EOF packet.
    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_IN_TRANS != 0
    }

    /// Autocommit as last reported by the server.
    pub fn autocommit(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_AUTOCOMMIT != 0
    }

    /// Is the channel encrypted or local?
    pub fn is_secure(&self) -> bool {
        self.stream.get_ref().is_secure()
    }

    /// Current default database, as far as this session knows.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Status of the last completed statement.
    pub fn last_status(&self) -> &OkPacket {
        &self.last_status
    }

    /// States the connection phase went through.
    pub fn auth_states(&self) -> &[AuthState] {
        &self.auth_states
    }

    /// Plugin that completed authentication.
    pub fn auth_plugin(&self) -> &str {
        &self.auth_plugin
    }

    /// Is another result of a multi-statement query queued?
    pub fn has_next(&self) -> bool {
        self.more_results
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed | SessionState::Poisoned)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Closed => Err(interface_error("session is closed")),
            SessionState::Poisoned => Err(interface_error(
                "session is unusable after a protocol or connection failure",
            )),
            _ => Ok(()),
        }
    }

    /// Record a failed exchange. Fatal errors poison the session.
    pub(crate) fn fail(&mut self, err: Error) -> Error {
        self.more_results = false;
        if err.is_fatal() {
            tracing::warn!(
                connection_id = self.connection_id,
                error = %err,
                "session poisoned"
            );
            let _ = self.stream.get_mut().shutdown();
            self.state = SessionState::Poisoned;
        } else {
            self.state = SessionState::Idle;
        }
        err
    }

    /// Record the end of a statement.
    pub(crate) fn finish(&mut self, status: OkPacket) {
        self.status_flags = status.status_flags;
        self.more_results = status.has_more_results();
        self.state = SessionState::Idle;
        self.last_status = status;
    }

    /// Frame and send one command.
    ///
    /// An unfinished streaming result, or results still queued from a
    /// multi-statement query, are read and discarded first.
    pub fn send_command(&mut self, command: Command, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.finish_pending()?;

        let mut packet = Vec::with_capacity(payload.len() + 1);
        packet.push(command as u8);
        packet.extend_from_slice(payload);

        tracing::debug!(?command, len = payload.len(), "send command");
        self.stream.reset_sequence();
        if let Err(e) = self.stream.write_packet(&packet) {
            return Err(self.fail(e));
        }
        self.state = SessionState::AwaitingResponse;
        Ok(())
    }

    fn finish_pending(&mut self) -> Result<()> {
        match self.state {
            SessionState::Streaming => {
                tracing::warn!("Previous unbuffered result was left incomplete");
                self.skip_rows()?;
            }
            SessionState::AwaitingResponse => {
                tracing::warn!("Previous command response was never read");
                self.discard_result()?;
            }
            _ => {}
        }
        while self.advance() {
            tracing::warn!("Discarding unread result of a multi-statement query");
            self.discard_result()?;
        }
        Ok(())
    }

    /// Read and drop one result. Server errors are logged, not returned.
    fn discard_result(&mut self) -> Result<()> {
        match self
            .read_result_with(ResultMode::Streaming)
            .and_then(|mut rs| rs.drain())
        {
            Err(e) if !e.is_fatal() => {
                tracing::warn!(error = %e, "discarded result failed");
                Ok(())
            }
            other => other,
        }
    }

    /// Move on to the next queued result, if any.
    pub(crate) fn advance(&mut self) -> bool {
        if !self.more_results || self.state != SessionState::Idle {
            return false;
        }
        self.more_results = false;
        self.state = SessionState::AwaitingResponse;
        true
    }

    /// Read the response to the last command in the configured result mode.
    pub fn read_result(&mut self) -> Result<ResultSet<'_>> {
        self.read_result_with(self.config.result_mode)
    }

    pub(crate) fn read_result_with(&mut self, mode: ResultMode) -> Result<ResultSet<'_>> {
        self.ensure_open()?;
        if self.state != SessionState::AwaitingResponse {
            return Err(interface_error("no command response is pending"));
        }

        let infile = self.config.local_infile.clone();
        let response = match result::read_response(&mut self.stream, self.capabilities, infile.as_deref())
        {
            Ok(Response::InfileFailed(status, error)) => {
                self.finish(status);
                return Err(error);
            }
            Ok(response) => response,
            Err(e) => return Err(self.fail(e)),
        };
        match &response {
            Response::Status(ok) => self.finish(ok.clone()),
            Response::Columns(_) => self.state = SessionState::Streaming,
            Response::InfileFailed(..) => {}
        }
        ResultSet::new(self, response, mode)
    }

    /// Continue with the next result of a multi-statement query.
    ///
    /// Rows left unread in a dropped streaming result are skipped first.
    pub fn next_result(&mut self) -> Result<Option<ResultSet<'_>>> {
        self.ensure_open()?;
        if self.state == SessionState::Streaming {
            self.skip_rows()?;
        }
        if self.advance() {
            self.read_result().map(Some)
        } else {
            Ok(None)
        }
    }

    fn next_row_packet(&mut self) -> Result<Option<Vec<u8>>> {
        if self.state != SessionState::Streaming {
            return Ok(None);
        }
        let deprecate_eof = self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0;
        match result::read_row_packet(&mut self.stream, deprecate_eof) {
            Ok(RowPacket::Data(payload)) => Ok(Some(payload)),
            Ok(RowPacket::End(eof)) => {
                self.finish(OkPacket {
                    warnings: eof.warnings,
                    status_flags: eof.status_flags,
                    ..OkPacket::default()
                });
                Ok(None)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Read and decode the next row of the current result set.
    pub(crate) fn fetch_row(
        &mut self,
        columns: &[ColumnDef],
        info: &Arc<ColumnInfo>,
    ) -> Result<Option<Row>> {
        match self.next_row_packet()? {
            Some(payload) => types::decode_text_row(&payload, columns, info)
                .map(Some)
                .map_err(|e| self.fail(e)),
            None => Ok(None),
        }
    }

    fn skip_rows(&mut self) -> Result<()> {
        let mut skipped = 0u64;
        while self.next_row_packet()?.is_some() {
            skipped += 1;
        }
        tracing::debug!(rows = skipped, "skipped unread rows");
        Ok(())
    }
}

pub(crate) fn interface_error(msg: impl Into<String>) -> Error {
    Error::Interface(InterfaceError {
        message: msg.into(),
    })
}

/// Quote a string as a MySQL literal.
pub(crate) fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 2);
    result.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => result.push_str("''"),
            '\\' => result.push_str("\\\\"),
            '\0' => result.push_str("\\0"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\x1a' => result.push_str("\\Z"),
            _ => result.push(ch),
        }
    }
    result.push('\'');
    result
}
