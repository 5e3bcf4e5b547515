//! MySQL authentication plugins.
//!
//! Built-in plugins:
//! - `mysql_native_password`: SHA1 scramble (legacy default)
//! - `caching_sha2_password`: SHA256 scramble with a server-side cache
//!   (MySQL 8.0+ default), falling back to a full exchange
//! - `sha256_password`: cleartext over a secure channel or RSA encryption
//! - `mysql_clear_password`: cleartext, secure channels only in practice
//!
//! # mysql_native_password
//!
//! ```text
//! SHA1(password) XOR SHA1(nonce + SHA1(SHA1(password)))
//! ```
//!
//! # caching_sha2_password
//!
//! Fast auth (if cached on server):
//! ```text
//! SHA256(password) XOR SHA256(SHA256(SHA256(password)) + nonce)
//! ```
//!
//! Full auth sends the password in clear over a secure channel, or
//! `RSA-OAEP(password + NUL XOR nonce)` with the server's public key.
//!
//! Custom plugins implement [`AuthPlugin`] and are registered through the
//! session configuration; they take precedence over built-ins of the same name.

use std::fmt;
use std::sync::Arc;

use mysql_wire_core::Result;
use mysql_wire_core::error::{AuthError, Error};
use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Well-known authentication plugin names.
pub mod plugins {
    /// SHA1-based authentication (legacy default)
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    /// SHA256-based authentication (MySQL 8.0+ default)
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    /// RSA-based SHA256 authentication
    pub const SHA256_PASSWORD: &str = "sha256_password";
    /// Cleartext password
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Auth-more-data codes for caching_sha2_password.
pub mod caching_sha2 {
    /// Client asks for the server's RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// Fast auth succeeded, an OK packet follows
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// Scramble not cached, full authentication required
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// sha256_password asks for the public key with this byte.
pub const SHA256_REQUEST_PUBLIC_KEY: u8 = 0x01;

/// Client error: plugin unknown to this client.
pub const CR_AUTH_PLUGIN_CANNOT_LOAD: u16 = 2059;
/// Client error: plugin failed while computing a response.
pub const CR_AUTH_PLUGIN_ERR: u16 = 2061;

/// Inputs available to a plugin for one authentication exchange.
#[derive(Clone, Copy)]
pub struct AuthContext<'a> {
    pub password: &'a str,
    /// Challenge from the greeting or the latest auth switch
    pub nonce: &'a [u8],
    /// Channel is TLS or a local socket
    pub secure: bool,
    /// PEM public key configured by the caller
    pub server_public_key: Option<&'a [u8]>,
}

impl fmt::Debug for AuthContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("password", &"<redacted>")
            .field("nonce_len", &self.nonce.len())
            .field("secure", &self.secure)
            .field("server_public_key", &self.server_public_key.is_some())
            .finish()
    }
}

/// What to do with an auth-more-data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAction {
    /// Send these bytes back as the next packet
    Send(Vec<u8>),
    /// Nothing to send; the server's next packet follows
    Wait,
}

/// A named algorithm deriving auth responses from a password and challenge.
pub trait AuthPlugin: fmt::Debug + Send + Sync {
    /// Plugin name as sent on the wire.
    fn name(&self) -> &str;

    /// Response to the greeting or to an auth switch request.
    fn initial_response(&self, ctx: &AuthContext<'_>) -> Result<Vec<u8>>;

    /// Handle an auth-more-data payload (without the 0x01 marker).
    fn more_data(&self, data: &[u8], ctx: &AuthContext<'_>) -> Result<AuthAction>;
}

/// `mysql_native_password`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePassword;

/// `caching_sha2_password`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachingSha2Password;

/// `sha256_password`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Password;

/// `mysql_clear_password`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearPassword;

impl AuthPlugin for NativePassword {
    fn name(&self) -> &str {
        plugins::MYSQL_NATIVE_PASSWORD
    }

    fn initial_response(&self, ctx: &AuthContext<'_>) -> Result<Vec<u8>> {
        Ok(scramble_native(ctx.password, ctx.nonce))
    }

    fn more_data(&self, data: &[u8], _ctx: &AuthContext<'_>) -> Result<AuthAction> {
        Err(plugin_error(
            self.name(),
            &format!("unexpected auth data ({} bytes)", data.len()),
        ))
    }
}

impl AuthPlugin for CachingSha2Password {
    fn name(&self) -> &str {
        plugins::CACHING_SHA2_PASSWORD
    }

    fn initial_response(&self, ctx: &AuthContext<'_>) -> Result<Vec<u8>> {
        Ok(scramble_caching_sha2(ctx.password, ctx.nonce))
    }

    fn more_data(&self, data: &[u8], ctx: &AuthContext<'_>) -> Result<AuthAction> {
        match data {
            [caching_sha2::FAST_AUTH_SUCCESS] => Ok(AuthAction::Wait),
            [caching_sha2::PERFORM_FULL_AUTH] => {
                tracing::debug!(secure = ctx.secure, "caching_sha2_password full authentication");
                if ctx.secure {
                    Ok(AuthAction::Send(cleartext(ctx.password)))
                } else if let Some(key) = ctx.server_public_key {
                    encrypt_password_rsa(self.name(), ctx.password, ctx.nonce, key)
                        .map(AuthAction::Send)
                } else {
                    Ok(AuthAction::Send(vec![caching_sha2::REQUEST_PUBLIC_KEY]))
                }
            }
            [] => Err(plugin_error(self.name(), "empty auth data")),
            key => encrypt_password_rsa(self.name(), ctx.password, ctx.nonce, key)
                .map(AuthAction::Send),
        }
    }
}

impl AuthPlugin for Sha256Password {
    fn name(&self) -> &str {
        plugins::SHA256_PASSWORD
    }

    fn initial_response(&self, ctx: &AuthContext<'_>) -> Result<Vec<u8>> {
        if ctx.secure {
            Ok(cleartext(ctx.password))
        } else if ctx.password.is_empty() {
            Ok(vec![0])
        } else if let Some(key) = ctx.server_public_key {
            encrypt_password_rsa(self.name(), ctx.password, ctx.nonce, key)
        } else {
            Ok(vec![SHA256_REQUEST_PUBLIC_KEY])
        }
    }

    fn more_data(&self, data: &[u8], ctx: &AuthContext<'_>) -> Result<AuthAction> {
        encrypt_password_rsa(self.name(), ctx.password, ctx.nonce, data).map(AuthAction::Send)
    }
}

impl AuthPlugin for ClearPassword {
    fn name(&self) -> &str {
        plugins::MYSQL_CLEAR_PASSWORD
    }

    fn initial_response(&self, ctx: &AuthContext<'_>) -> Result<Vec<u8>> {
        Ok(cleartext(ctx.password))
    }

    fn more_data(&self, data: &[u8], _ctx: &AuthContext<'_>) -> Result<AuthAction> {
        Err(plugin_error(
            self.name(),
            &format!("unexpected auth data ({} bytes)", data.len()),
        ))
    }
}

static NATIVE: NativePassword = NativePassword;
static CACHING_SHA2: CachingSha2Password = CachingSha2Password;
static SHA256: Sha256Password = Sha256Password;
static CLEAR: ClearPassword = ClearPassword;

/// Find a plugin by name: configured plugins first, then built-ins.
pub fn resolve_plugin<'a>(
    name: &str,
    custom: &'a [Arc<dyn AuthPlugin>],
) -> Option<&'a dyn AuthPlugin> {
    if let Some(plugin) = custom.iter().find(|p| p.name() == name) {
        return Some(plugin.as_ref());
    }
    let builtin: &'static dyn AuthPlugin = match name {
        plugins::MYSQL_NATIVE_PASSWORD => &NATIVE,
        plugins::CACHING_SHA2_PASSWORD => &CACHING_SHA2,
        plugins::SHA256_PASSWORD => &SHA256,
        plugins::MYSQL_CLEAR_PASSWORD => &CLEAR,
        _ => return None,
    };
    Some(builtin)
}

/// The built-in `mysql_native_password` plugin.
pub fn native_plugin() -> &'static dyn AuthPlugin {
    &NATIVE
}

/// Error raised for a plugin name this client cannot load.
pub fn unknown_plugin(name: &str) -> Error {
    Error::Auth(AuthError {
        code: CR_AUTH_PLUGIN_CANNOT_LOAD,
        sqlstate: None,
        message: format!("Authentication plugin '{}' cannot be loaded", name),
    })
}

/// Error raised by a plugin that cannot produce a response.
pub fn plugin_error(plugin: &str, message: &str) -> Error {
    Error::Auth(AuthError {
        code: CR_AUTH_PLUGIN_ERR,
        sqlstate: None,
        message: format!(
            "Authentication plugin '{}' reported error: {}",
            plugin, message
        ),
    })
}

/// Compute the mysql_native_password scramble.
///
/// Only the first 20 bytes of the nonce take part. An empty password yields
/// an empty response.
pub fn scramble_native(password: &str, nonce: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let seed = &nonce[..nonce.len().min(20)];

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

/// Compute the caching_sha2_password fast-auth scramble.
pub fn scramble_caching_sha2(password: &str, nonce: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let pw_hash = Sha256::digest(password.as_bytes());
    let pw_hash_hash = Sha256::digest(pw_hash);
    let mut hasher = Sha256::new();
    hasher.update(pw_hash_hash);
    hasher.update(nonce);
    let scramble = hasher.finalize();

    pw_hash.iter().zip(scramble.iter()).map(|(a, b)| a ^ b).collect()
}

/// Encrypt `password + NUL`, XORed with the nonce, under the server's RSA
/// public key with OAEP (SHA-1) padding.
pub fn encrypt_password_rsa(
    plugin: &str,
    password: &str,
    nonce: &[u8],
    public_key_pem: &[u8],
) -> Result<Vec<u8>> {
    if nonce.is_empty() {
        return Err(plugin_error(plugin, "empty nonce"));
    }
    let mut pw = cleartext(password);
    for (i, b) in pw.iter_mut().enumerate() {
        *b ^= nonce[i % nonce.len()];
    }

    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| plugin_error(plugin, &format!("public key is not PEM: {}", e)))?;
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| plugin_error(plugin, &format!("invalid RSA public key: {}", e)))?;

    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &pw)
        .map_err(|e| plugin_error(plugin, &format!("RSA encryption failed: {}", e)))
}

fn cleartext(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}
