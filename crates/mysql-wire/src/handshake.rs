//! Connection-phase state machine.
//!
//! ```text
//! AwaitingGreeting -> NegotiatingCapabilities -> AwaitingAuthResult
//!                                                  |-> Authenticated
//!                                                  |-> AuthFailed
//!                                                  |-> PluginSwitch -> AwaitingAuthResult
//! ```
//!
//! Auth-more-data packets (0x01) are handled inside `AwaitingAuthResult`
//! by the active plugin. Plugin switches are bounded by the configured
//! maximum and more-data rounds by [`MAX_MORE_DATA_ROUNDS`].

use std::sync::Arc;

use mysql_wire_core::Result;

use crate::auth::{self, AuthAction, AuthContext, AuthPlugin};
use crate::channel::Channel;
use crate::codec::PacketStream;
use crate::config::SessionConfig;
use crate::protocol::{
    AuthSwitchRequest, Handshake, HandshakeResponse, OkPacket, PacketReader, build_ssl_request,
    capabilities, malformed, protocol_error,
};
use crate::tls::{self, TlsConnector};

/// Auth-more-data exchanges tolerated in one handshake.
pub const MAX_MORE_DATA_ROUNDS: u8 = 8;

/// Connection-phase states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    AwaitingGreeting,
    NegotiatingCapabilities,
    AwaitingAuthResult,
    PluginSwitch,
    Authenticated,
    AuthFailed,
}

/// What the connection phase established.
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// The server greeting
    pub greeting: Handshake,
    /// Capability flags in effect for the session
    pub capabilities: u32,
    /// Plugin that completed authentication
    pub auth_plugin: String,
    /// Final OK packet
    pub ok: OkPacket,
}

/// Drives one connection phase over a packet stream.
#[derive(Debug)]
pub struct HandshakeEngine<'c> {
    config: &'c SessionConfig,
    state: AuthState,
    visited: Vec<AuthState>,
    switches: u8,
    more_data_rounds: u8,
}

impl<'c> HandshakeEngine<'c> {
    pub fn new(config: &'c SessionConfig) -> Self {
        Self {
            config,
            state: AuthState::AwaitingGreeting,
            visited: vec![AuthState::AwaitingGreeting],
            switches: 0,
            more_data_rounds: 0,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn visited(&self) -> &[AuthState] {
        &self.visited
    }

    /// Auth switch requests honoured so far.
    pub fn switches(&self) -> u8 {
        self.switches
    }

    fn enter(&mut self, state: AuthState) {
        tracing::trace!(from = ?self.state, to = ?state, "auth state");
        self.state = state;
        self.visited.push(state);
    }

    /// Run the connection phase to `Authenticated` or `AuthFailed`.
    ///
    /// On success the stream is returned positioned for the first command,
    /// upgraded to TLS when that was negotiated.
    #[tracing::instrument(level = "debug", skip_all, fields(user = %self.config.user))]
    pub fn run(
        &mut self,
        stream: PacketStream<Box<dyn Channel>>,
    ) -> Result<(PacketStream<Box<dyn Channel>>, Negotiated)> {
        let result = self.drive(stream);
        match &result {
            Ok((_, negotiated)) => {
                self.enter(AuthState::Authenticated);
                tracing::debug!(
                    plugin = %negotiated.auth_plugin,
                    switches = self.switches,
                    "authenticated"
                );
            }
            Err(e) => {
                self.enter(AuthState::AuthFailed);
                tracing::debug!(error = %e, "authentication failed");
            }
        }
        result
    }

    fn drive(
        &mut self,
        mut stream: PacketStream<Box<dyn Channel>>,
    ) -> Result<(PacketStream<Box<dyn Channel>>, Negotiated)> {
        let config = self.config;

        let payload = stream.read_packet()?;
        if payload.first() == Some(&0xFF) {
            // Refused before the greeting, e.g. too many connections
            return Err(parse_err(&payload)?.into_auth_error());
        }
        let greeting = Handshake::parse(&payload)?;
        tracing::debug!(
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            plugin = %greeting.auth_plugin,
            "greeting received"
        );

        self.enter(AuthState::NegotiatingCapabilities);
        if greeting.capabilities & capabilities::CLIENT_PROTOCOL_41 == 0 {
            return Err(protocol_error(
                "server does not support the 4.1 protocol (CLIENT_PROTOCOL_41)",
            ));
        }
        let mut caps = config.capability_flags() & greeting.capabilities;

        if tls::validate_ssl_mode(config.ssl_mode, greeting.capabilities)? {
            caps |= capabilities::CLIENT_SSL;
            let request = build_ssl_request(caps, config.max_packet_size, config.charset);
            stream.write_packet(&request)?;
            let connector = self.connector()?;
            stream = stream.map_stream(|channel| {
                connector.upgrade(channel, config.tls_server_name())
            })?;
            tracing::debug!(peer = %stream.get_ref().peer_description(), "TLS upgrade complete");
        }
        tracing::debug!(capabilities = format_args!("{:#010x}", caps), "capabilities negotiated");

        let secure = stream.get_ref().is_secure();
        let password = config.password.as_deref().unwrap_or_default();
        let mut nonce = greeting.nonce.clone();
        let mut plugin: &dyn AuthPlugin =
            match auth::resolve_plugin(&greeting.auth_plugin, &config.auth_plugins) {
                Some(plugin) => plugin,
                None => {
                    tracing::debug!(
                        plugin = %greeting.auth_plugin,
                        "unknown greeting plugin, using mysql_native_password"
                    );
                    auth::native_plugin()
                }
            };

        let auth_response = plugin.initial_response(&self.context(password, &nonce, secure))?;
        let response = HandshakeResponse {
            capabilities: caps,
            max_packet_size: config.max_packet_size,
            charset: config.charset,
            user: &config.user,
            auth_response: &auth_response,
            database: config.database.as_deref(),
            auth_plugin: plugin.name(),
            attributes: &config.attributes,
        };
        stream.write_packet(&response.encode())?;

        loop {
            self.enter(AuthState::AwaitingAuthResult);
            let payload = stream.read_packet()?;
            match payload.first() {
                Some(0x00) => {
                    let ok = PacketReader::new(&payload)
                        .parse_ok_packet()
                        .ok_or_else(|| malformed("OK", &payload))?;
                    let negotiated = Negotiated {
                        greeting,
                        capabilities: caps,
                        auth_plugin: plugin.name().to_string(),
                        ok,
                    };
                    return Ok((stream, negotiated));
                }
                Some(0xFF) => return Err(parse_err(&payload)?.into_auth_error()),
                Some(0xFE) => {
                    self.enter(AuthState::PluginSwitch);
                    if self.switches >= config.max_auth_switches {
                        return Err(protocol_error(format!(
                            "too many auth switch requests (limit {})",
                            config.max_auth_switches
                        )));
                    }
                    self.switches += 1;

                    let Some(switch) = AuthSwitchRequest::parse(&payload)? else {
                        return Err(auth::unknown_plugin("mysql_old_password"));
                    };
                    tracing::debug!(from = plugin.name(), to = %switch.plugin, "auth switch");
                    plugin = auth::resolve_plugin(&switch.plugin, &config.auth_plugins)
                        .ok_or_else(|| auth::unknown_plugin(&switch.plugin))?;
                    nonce = switch.nonce;

                    let response = plugin.initial_response(&self.context(password, &nonce, secure))?;
                    stream.write_packet(&response)?;
                }
                Some(0x01) => {
                    self.more_data_rounds += 1;
                    if self.more_data_rounds > MAX_MORE_DATA_ROUNDS {
                        return Err(protocol_error("too many auth-more-data rounds"));
                    }
                    let action =
                        plugin.more_data(&payload[1..], &self.context(password, &nonce, secure))?;
                    if let AuthAction::Send(data) = action {
                        stream.write_packet(&data)?;
                    }
                }
                _ => return Err(malformed("auth result", &payload)),
            }
        }
    }

    fn context<'a>(&'a self, password: &'a str, nonce: &'a [u8], secure: bool) -> AuthContext<'a> {
        AuthContext {
            password,
            nonce,
            secure,
            server_public_key: self.config.server_public_key.as_deref(),
        }
    }

    fn connector(&self) -> Result<Arc<dyn TlsConnector>> {
        match &self.config.tls_connector {
            Some(connector) => Ok(Arc::clone(connector)),
            None => tls::default_connector(self.config.ssl_mode, &self.config.tls).map(Arc::from),
        }
    }
}

fn parse_err(payload: &[u8]) -> Result<crate::protocol::ErrPacket> {
    PacketReader::new(payload)
        .parse_err_packet()
        .ok_or_else(|| malformed("ERR", payload))
}
