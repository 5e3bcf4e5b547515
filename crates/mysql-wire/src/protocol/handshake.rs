//! Connection-phase packets: server greeting, client response, SSL request
//! and auth switch.

#![allow(clippy::cast_possible_truncation)]

use mysql_wire_core::Result;

use crate::auth::plugins;
use crate::protocol::{PacketReader, PacketWriter, capabilities, malformed, protocol_error};

/// Initial handshake packet (protocol version 10) sent by the server.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Protocol version, always 10
    pub protocol_version: u8,
    /// Server version string
    pub server_version: String,
    /// Connection (thread) id
    pub connection_id: u32,
    /// Auth challenge, without the trailing NUL
    pub nonce: Vec<u8>,
    /// Server capability flags
    pub capabilities: u32,
    /// Server default collation
    pub charset: u8,
    /// Server status flags
    pub status_flags: u16,
    /// Default authentication plugin
    pub auth_plugin: String,
}

impl Handshake {
    /// Parse a greeting payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);

        let protocol_version = reader
            .read_u8()
            .ok_or_else(|| malformed("handshake", payload))?;
        if protocol_version != 10 {
            return Err(protocol_error(format!(
                "unsupported protocol version: {}",
                protocol_version
            )));
        }

        let server_version = reader
            .read_null_string()
            .ok_or_else(|| malformed("handshake", payload))?;
        let connection_id = reader
            .read_u32_le()
            .ok_or_else(|| malformed("handshake", payload))?;
        let nonce_1 = reader
            .read_bytes(8)
            .ok_or_else(|| malformed("handshake", payload))?;
        reader.skip(1);
        let caps_lower = reader
            .read_u16_le()
            .ok_or_else(|| malformed("handshake", payload))?;

        // Everything past the lower capability word is optional on very old servers
        let charset = reader.read_u8().unwrap_or(0);
        let status_flags = reader.read_u16_le().unwrap_or(0);
        let caps_upper = reader.read_u16_le().unwrap_or(0);
        let capabilities = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

        let nonce_len = reader.read_u8().unwrap_or(0);
        reader.skip(10);

        let mut nonce = nonce_1.to_vec();
        if capabilities & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            // Part 2 is max(13, len - 8) bytes and ends with a NUL
            let len2 = usize::from(nonce_len).saturating_sub(8).max(13);
            let part2 = reader
                .read_bytes(len2)
                .unwrap_or_else(|| reader.read_rest());
            let part2 = part2.strip_suffix(&[0u8]).unwrap_or(part2);
            nonce.extend_from_slice(part2);
        }

        let auth_plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader
                .read_null_string()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| plugins::MYSQL_NATIVE_PASSWORD.to_string())
        } else {
            plugins::MYSQL_NATIVE_PASSWORD.to_string()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            nonce,
            capabilities,
            charset,
            status_flags,
            auth_plugin,
        })
    }
}

/// SSLRequest payload: the first 32 bytes of a HandshakeResponse41.
pub fn build_ssl_request(client_caps: u32, max_packet_size: u32, charset: u8) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    writer.write_u32_le(client_caps | capabilities::CLIENT_SSL);
    writer.write_u32_le(max_packet_size);
    writer.write_u8(charset);
    writer.write_zeros(23);
    writer.into_bytes()
}

/// HandshakeResponse41 sent by the client.
#[derive(Debug, Clone)]
pub struct HandshakeResponse<'a> {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub charset: u8,
    pub user: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin: &'a str,
    pub attributes: &'a [(String, String)],
}

impl HandshakeResponse<'_> {
    /// Encode the response payload for the negotiated capabilities.
    pub fn encode(&self) -> Vec<u8> {
        let caps = self.capabilities;
        let mut writer = PacketWriter::new();

        writer.write_u32_le(caps);
        writer.write_u32_le(self.max_packet_size);
        writer.write_u8(self.charset);
        writer.write_zeros(23);
        writer.write_null_string(self.user);

        if caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            writer.write_lenenc_bytes(self.auth_response);
        } else if caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            // Scrambles are at most 32 bytes; cleartext longer than 255 needs lenenc
            let len = self.auth_response.len().min(255);
            writer.write_u8(len as u8);
            writer.write_bytes(&self.auth_response[..len]);
        } else {
            writer.write_bytes(self.auth_response);
            writer.write_u8(0);
        }

        if caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            writer.write_null_string(self.database.unwrap_or_default());
        }

        if caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(self.auth_plugin);
        }

        if caps & capabilities::CLIENT_CONNECT_ATTRS != 0 {
            let mut attrs = PacketWriter::new();
            for (key, value) in self.attributes {
                attrs.write_lenenc_string(key);
                attrs.write_lenenc_string(value);
            }
            writer.write_lenenc_bytes(attrs.as_bytes());
        }

        writer.into_bytes()
    }
}

/// AuthSwitchRequest (0xFE): the server asks for a different plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    pub plugin: String,
    pub nonce: Vec<u8>,
}

impl AuthSwitchRequest {
    /// Parse a switch request payload including the 0xFE marker.
    ///
    /// Returns `Ok(None)` for the bare pre-4.1 form (a lone 0xFE asking for
    /// the old password hash), which is not supported.
    pub fn parse(payload: &[u8]) -> Result<Option<Self>> {
        let mut reader = PacketReader::new(payload);
        if reader.read_u8() != Some(0xFE) {
            return Err(malformed("auth switch", payload));
        }
        if reader.is_empty() {
            return Ok(None);
        }

        let plugin = reader
            .read_null_string()
            .ok_or_else(|| malformed("auth switch", payload))?;
        let data = reader.read_rest();
        let nonce = data.strip_suffix(&[0u8]).unwrap_or(data).to_vec();

        Ok(Some(Self { plugin, nonce }))
    }
}
