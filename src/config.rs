//! Connection configuration.

use crate::auth::AuthCredential;
use crate::error::{Result, TorCtrlError};
use crate::uncaught;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where the control listener lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtrlAddress {
    /// A TCP control port.
    Tcp(SocketAddr),
    /// A unix domain socket (ControlSocket).
    Unix(PathBuf),
}

impl CtrlAddress {
    /// Parse an address string. `unix:/path/to/socket` selects a unix
    /// socket; anything else must be a `host:port` socket address.
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix:") {
            return Ok(CtrlAddress::Unix(PathBuf::from(path)));
        }
        let addr = SocketAddr::from_str(s).map_err(|e| {
            TorCtrlError::ConfigurationError(format!("invalid control address '{s}': {e}"))
        })?;
        Ok(CtrlAddress::Tcp(addr))
    }
}

impl Default for CtrlAddress {
    fn default() -> Self {
        CtrlAddress::Tcp(SocketAddr::from(([127, 0, 0, 1], 9051)))
    }
}

impl fmt::Display for CtrlAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtrlAddress::Tcp(addr) => write!(f, "{addr}"),
            CtrlAddress::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Configuration for a control connection.
#[derive(Clone)]
pub struct CtrlConfig {
    /// Address of the control listener.
    pub address: CtrlAddress,
    /// Credentials used by [`authenticate`](crate::TorCtrl::authenticate).
    pub auth: AuthCredential,
    /// Timeout for establishing the transport connection.
    pub connect_timeout: Duration,
    /// Sink for observer callback failures.
    pub uncaught: uncaught::Handler,
}

impl CtrlConfig {
    /// Start from the defaults: TCP 127.0.0.1:9051, no credentials, a
    /// 10 second connect timeout, failures logged at error level.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the control listener address.
    pub fn address(mut self, address: CtrlAddress) -> Self {
        self.address = address;
        self
    }

    /// Set the authentication credentials.
    pub fn auth(mut self, auth: AuthCredential) -> Self {
        self.auth = auth;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the sink for observer callback failures.
    pub fn uncaught(mut self, handler: uncaught::Handler) -> Self {
        self.uncaught = handler;
        self
    }
}

impl Default for CtrlConfig {
    fn default() -> Self {
        CtrlConfig {
            address: CtrlAddress::default(),
            auth: AuthCredential::None,
            connect_timeout: Duration::from_secs(10),
            uncaught: uncaught::print(),
        }
    }
}

impl fmt::Debug for CtrlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CtrlConfig")
            .field("address", &self.address)
            .field("auth", &self.auth)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}
