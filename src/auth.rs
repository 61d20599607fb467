//! Authentication for the control connection.
//!
//! Supports the NULL, HASHEDPASSWORD, COOKIE, and SAFECOOKIE methods.
//! SAFECOOKIE proves possession of the cookie without sending it,
//! using an HMAC-SHA256 challenge in each direction.

use crate::error::{Result, TorCtrlError};
use crate::protocol::Reply;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};

type HmacSha256 = Hmac<Sha256>;

/// Authentication methods advertised by PROTOCOLINFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No authentication required.
    Null,
    /// Password authentication.
    HashedPassword,
    /// Cookie file authentication.
    Cookie,
    /// HMAC challenge-response over the cookie.
    SafeCookie,
}

impl AuthMethod {
    /// Parse a method keyword from a METHODS= list.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NULL" => Some(AuthMethod::Null),
            "HASHEDPASSWORD" => Some(AuthMethod::HashedPassword),
            "COOKIE" => Some(AuthMethod::Cookie),
            "SAFECOOKIE" => Some(AuthMethod::SafeCookie),
            _ => None,
        }
    }
}

/// Information from a PROTOCOLINFO reply.
#[derive(Debug, Clone)]
pub struct ProtocolInfo {
    /// Protocol version (currently always 1).
    pub protocol_version: u32,
    /// Daemon version string, e.g. `0.4.8.12`.
    pub tor_version: String,
    /// Supported authentication methods.
    pub auth_methods: Vec<AuthMethod>,
    /// Path to the cookie file, when cookie auth is available.
    pub cookie_file: Option<PathBuf>,
}

impl ProtocolInfo {
    /// Parse a PROTOCOLINFO reply.
    pub fn from_reply(reply: &Reply) -> Result<Self> {
        let mut protocol_version = 1;
        let mut tor_version = String::new();
        let mut auth_methods = Vec::new();
        let mut cookie_file = None;

        for line in reply.lines() {
            let text = line.text.trim();

            if let Some(rest) = text.strip_prefix("PROTOCOLINFO ") {
                protocol_version = rest.trim().parse().unwrap_or(1);
            } else if let Some(rest) = text.strip_prefix("AUTH ") {
                // AUTH METHODS=NULL,COOKIE,SAFECOOKIE COOKIEFILE="..."
                for part in rest.split_whitespace() {
                    if let Some(methods) = part.strip_prefix("METHODS=") {
                        auth_methods.extend(methods.split(',').filter_map(AuthMethod::parse));
                    } else if let Some(file) = part.strip_prefix("COOKIEFILE=") {
                        cookie_file = Some(PathBuf::from(file.trim_matches('"')));
                    }
                }
            } else if let Some(rest) = text.strip_prefix("VERSION ") {
                if let Some(ver) = rest.strip_prefix("Tor=") {
                    tor_version = ver.trim_matches('"').to_string();
                }
            }
        }

        Ok(ProtocolInfo {
            protocol_version,
            tor_version,
            auth_methods,
            cookie_file,
        })
    }

    /// Whether the NULL method is available.
    pub fn supports_null(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::Null)
    }

    /// Whether password authentication is available.
    pub fn supports_password(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::HashedPassword)
    }

    /// Whether cookie authentication is available.
    pub fn supports_cookie(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::Cookie)
    }

    /// Whether SAFECOOKIE authentication is available.
    pub fn supports_safe_cookie(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::SafeCookie)
    }
}

/// Credentials used to authenticate the connection.
#[derive(Debug, Clone, Default)]
pub enum AuthCredential {
    /// No authentication (NULL method).
    #[default]
    None,
    /// Password for HASHEDPASSWORD.
    Password(String),
    /// Cookie file path, read at authentication time.
    CookieFile(PathBuf),
    /// Raw cookie bytes (32 bytes).
    CookieData(Vec<u8>),
    /// SAFECOOKIE with the cookie read from this path.
    SafeCookie {
        /// Path to the cookie file.
        cookie_path: PathBuf,
    },
}

impl AuthCredential {
    /// Password credentials.
    pub fn password(password: impl Into<String>) -> Self {
        AuthCredential::Password(password.into())
    }

    /// Cookie file credentials.
    pub fn cookie_file(path: impl Into<PathBuf>) -> Self {
        AuthCredential::CookieFile(path.into())
    }

    /// SAFECOOKIE credentials.
    pub fn safe_cookie(cookie_path: impl Into<PathBuf>) -> Self {
        AuthCredential::SafeCookie {
            cookie_path: cookie_path.into(),
        }
    }
}

/// Read the 32-byte authentication cookie from a file.
pub fn read_cookie_file(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path).map_err(|e| {
        TorCtrlError::AuthenticationFailed(format!(
            "failed to read cookie file '{}': {e}",
            path.display()
        ))
    })?;

    if data.len() != 32 {
        return Err(TorCtrlError::AuthenticationFailed(format!(
            "cookie file has invalid length {} (expected 32)",
            data.len()
        )));
    }

    Ok(data)
}

/// Generate a random client nonce for SAFECOOKIE.
pub fn generate_client_nonce() -> [u8; 32] {
    use rand::Rng;
    let mut nonce = [0u8; 32];
    rand::rng().fill(&mut nonce);
    nonce
}

fn hmac_hash(key: &[u8], cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(cookie);
    mac.update(client_nonce);
    mac.update(server_nonce);

    let mut hash = [0u8; 32];
    hash.copy_from_slice(&mac.finalize().into_bytes());
    hash
}

/// Compute the hash the server must present in AUTHCHALLENGE.
pub fn compute_server_hash(cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> [u8; 32] {
    hmac_hash(
        b"Tor safe cookie authentication server-to-controller hash",
        cookie,
        client_nonce,
        server_nonce,
    )
}

/// Compute the hash the client sends in AUTHENTICATE.
pub fn compute_client_hash(cookie: &[u8], client_nonce: &[u8], server_nonce: &[u8]) -> [u8; 32] {
    hmac_hash(
        b"Tor safe cookie authentication controller-to-server hash",
        cookie,
        client_nonce,
        server_nonce,
    )
}

/// Encode cookie or hash bytes as hex for the wire.
pub fn encode_cookie(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Extract SERVERHASH and SERVERNONCE from an AUTHCHALLENGE reply line.
pub fn parse_auth_challenge(text: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut server_hash = None;
    let mut server_nonce = None;

    for part in text.split_whitespace() {
        if let Some(hash) = part.strip_prefix("SERVERHASH=") {
            server_hash = Some(hex::decode(hash).map_err(|e| {
                TorCtrlError::ProtocolViolation(format!("invalid SERVERHASH hex: {e}"))
            })?);
        } else if let Some(nonce) = part.strip_prefix("SERVERNONCE=") {
            server_nonce = Some(hex::decode(nonce).map_err(|e| {
                TorCtrlError::ProtocolViolation(format!("invalid SERVERNONCE hex: {e}"))
            })?);
        }
    }

    let server_hash = server_hash
        .ok_or_else(|| TorCtrlError::ProtocolViolation("missing SERVERHASH".to_string()))?;
    let server_nonce = server_nonce
        .ok_or_else(|| TorCtrlError::ProtocolViolation("missing SERVERNONCE".to_string()))?;

    if server_hash.len() != 32 {
        return Err(TorCtrlError::ProtocolViolation(format!(
            "invalid SERVERHASH length: {}",
            server_hash.len()
        )));
    }
    if server_nonce.len() != 32 {
        return Err(TorCtrlError::ProtocolViolation(format!(
            "invalid SERVERNONCE length: {}",
            server_nonce.len()
        )));
    }

    Ok((server_hash, server_nonce))
}

/// Check the server's AUTHCHALLENGE hash against our cookie.
pub fn verify_server_hash(
    cookie: &[u8],
    client_nonce: &[u8],
    server_nonce: &[u8],
    expected_hash: &[u8],
) -> bool {
    let computed = compute_server_hash(cookie, client_nonce, server_nonce);
    constant_time_compare(&computed, expected_hash)
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
