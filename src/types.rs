//! Shared value types used across commands and replies.

use crate::error::TorCtrlError;
use std::fmt;
use std::str::FromStr;

/// Signals accepted by the SIGNAL command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Reload configuration (like SIGHUP).
    Reload,
    /// Controlled shutdown; a relay waits ShutdownWaitLength first.
    Shutdown,
    /// Dump stats to the log.
    Dump,
    /// Switch log level to debug.
    Debug,
    /// Immediate shutdown (like SIGTERM).
    Halt,
    /// Switch to clean circuits so new requests don't share old ones.
    NewNym,
    /// Forget all cached DNS results.
    ClearDnsCache,
    /// Write an unscheduled heartbeat to the log.
    Heartbeat,
    /// Leave dormant mode.
    Active,
    /// Enter dormant mode.
    Dormant,
}

impl Signal {
    /// The wire keyword for this signal.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Reload => "RELOAD",
            Signal::Shutdown => "SHUTDOWN",
            Signal::Dump => "DUMP",
            Signal::Debug => "DEBUG",
            Signal::Halt => "HALT",
            Signal::NewNym => "NEWNYM",
            Signal::ClearDnsCache => "CLEARDNSCACHE",
            Signal::Heartbeat => "HEARTBEAT",
            Signal::Active => "ACTIVE",
            Signal::Dormant => "DORMANT",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed daemon version, e.g. `0.4.8.12`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TorVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Micro version.
    pub micro: u32,
    /// Patch level.
    pub patch: u32,
}

impl FromStr for TorVersion {
    type Err = TorCtrlError;

    /// Parse from a version string, tolerating a trailing status tag or
    /// git suffix such as `0.4.8.12 (git-abcdef)` or `0.4.9.1-alpha`.
    fn from_str(s: &str) -> Result<Self, TorCtrlError> {
        let core = s
            .split_whitespace()
            .next()
            .unwrap_or("")
            .split('-')
            .next()
            .unwrap_or("");
        let mut parts = core.split('.');

        let mut next = |name: &str| -> Result<u32, TorCtrlError> {
            parts
                .next()
                .ok_or_else(|| TorCtrlError::ParseError(format!("version missing {name}: {s}")))?
                .parse()
                .map_err(|_| TorCtrlError::ParseError(format!("invalid version component: {s}")))
        };

        Ok(TorVersion {
            major: next("major")?,
            minor: next("minor")?,
            micro: next("micro")?,
            patch: next("patch")?,
        })
    }
}

impl fmt::Display for TorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.micro, self.patch)
    }
}

/// A v3 onion service address without the `.onion` suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OnionAddress(String);

impl OnionAddress {
    /// Wrap an address, stripping a `.onion` suffix if present.
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let service_id = address
            .strip_suffix(".onion")
            .unwrap_or(&address)
            .to_string();
        OnionAddress(service_id)
    }

    /// The bare service id, without `.onion`.
    pub fn service_id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.onion", self.0)
    }
}

/// Result of a successful ADD_ONION.
#[derive(Debug, Clone)]
pub struct CreatedOnionService {
    /// The service address.
    pub address: OnionAddress,
    /// The private key, unless key material was discarded or supplied
    /// by the caller.
    pub private_key: Option<String>,
}
