//! Typed commands and their reply decoders.
//!
//! Each command knows how to render itself to the wire and how to turn
//! a successful reply into a typed value. The engine owns the failure
//! path: a non-2xx reply is turned into
//! [`TorCtrlError::CommandRejected`](crate::error::TorCtrlError::CommandRejected)
//! before the decoder is ever consulted.

use crate::auth::{self, ProtocolInfo};
use crate::error::{Result, TorCtrlError};
use crate::events::EventType;
use crate::protocol::{quote_string, Command, Reply};
use crate::types::{CreatedOnionService, OnionAddress, Signal};

/// A command the engine can enqueue.
///
/// `parse_reply` is only invoked for successful replies.
pub trait TorCmd: Send {
    /// The decoded result type.
    type Output: Send + 'static;

    /// Render the command for the wire.
    fn command(&self) -> Command;

    /// Decode a successful reply.
    fn parse_reply(&self, reply: &Reply) -> Result<Self::Output>;
}

/// GETINFO for a single key.
#[derive(Debug, Clone)]
pub struct GetInfo {
    key: String,
}

impl GetInfo {
    /// Request the value of `key`.
    pub fn new(key: impl Into<String>) -> Self {
        GetInfo { key: key.into() }
    }
}

impl TorCmd for GetInfo {
    type Output = String;

    fn command(&self) -> Command {
        Command::new("GETINFO").arg(&self.key)
    }

    fn parse_reply(&self, reply: &Reply) -> Result<String> {
        let prefix = format!("{}=", self.key);
        for line in reply.lines() {
            if let Some(value) = line.text.strip_prefix(&prefix) {
                // Multi-line values arrive as a data payload after a
                // bare "key=" line.
                return Ok(match &line.data {
                    Some(data) => data.clone(),
                    None => value.to_string(),
                });
            }
        }
        Err(TorCtrlError::ParseError(format!(
            "GETINFO reply missing key '{}'",
            self.key
        )))
    }
}

/// GETCONF for a single option.
#[derive(Debug, Clone)]
pub struct GetConf {
    name: String,
}

impl GetConf {
    /// Request the value of configuration option `name`.
    pub fn new(name: impl Into<String>) -> Self {
        GetConf { name: name.into() }
    }
}

impl TorCmd for GetConf {
    type Output = Option<String>;

    fn command(&self) -> Command {
        Command::new("GETCONF").arg(&self.name)
    }

    fn parse_reply(&self, reply: &Reply) -> Result<Option<String>> {
        let prefix = format!("{}=", self.name);
        for line in reply.lines() {
            if let Some(value) = line.text.strip_prefix(&prefix) {
                return Ok(Some(value.to_string()));
            }
            // An option at its default is reported as the bare name.
            if line.text.eq_ignore_ascii_case(&self.name) {
                return Ok(None);
            }
        }
        Err(TorCtrlError::ParseError(format!(
            "GETCONF reply missing option '{}'",
            self.name
        )))
    }
}

fn render_conf_pairs(keyword: &str, pairs: &[(String, Option<String>)]) -> Command {
    let mut cmd = Command::new(keyword);
    for (key, value) in pairs {
        match value {
            Some(value) => cmd = cmd.arg(format!("{key}={}", quote_string(value))),
            None => cmd = cmd.arg(key),
        }
    }
    cmd
}

/// SETCONF for one or more options.
#[derive(Debug, Clone, Default)]
pub struct SetConf {
    pairs: Vec<(String, Option<String>)>,
}

impl SetConf {
    /// Start an empty SETCONF.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option to a value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), Some(value.into())));
        self
    }

    /// Reset an option to its default.
    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.pairs.push((key.into(), None));
        self
    }
}

impl TorCmd for SetConf {
    type Output = ();

    fn command(&self) -> Command {
        render_conf_pairs("SETCONF", &self.pairs)
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// RESETCONF for one or more options.
#[derive(Debug, Clone, Default)]
pub struct ResetConf {
    pairs: Vec<(String, Option<String>)>,
}

impl ResetConf {
    /// Start an empty RESETCONF.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset an option to its default.
    pub fn reset(mut self, key: impl Into<String>) -> Self {
        self.pairs.push((key.into(), None));
        self
    }

    /// Reset an option to an explicit value.
    pub fn reset_to(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), Some(value.into())));
        self
    }
}

impl TorCmd for ResetConf {
    type Output = ();

    fn command(&self) -> Command {
        render_conf_pairs("RESETCONF", &self.pairs)
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// SAVECONF, optionally forcing a write over %include directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveConf {
    /// Write the file even when the configuration uses %include.
    pub force: bool,
}

impl TorCmd for SaveConf {
    type Output = ();

    fn command(&self) -> Command {
        let cmd = Command::new("SAVECONF");
        if self.force {
            cmd.arg("FORCE")
        } else {
            cmd
        }
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// LOADCONF: replace the configuration with the given text.
#[derive(Debug, Clone)]
pub struct LoadConf {
    text: String,
}

impl LoadConf {
    /// Load `text` as the complete configuration file.
    pub fn new(text: impl Into<String>) -> Self {
        LoadConf { text: text.into() }
    }
}

impl TorCmd for LoadConf {
    type Output = ();

    fn command(&self) -> Command {
        Command::new("LOADCONF").payload(&self.text)
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// SIGNAL.
#[derive(Debug, Clone, Copy)]
pub struct SendSignal(pub Signal);

impl TorCmd for SendSignal {
    type Output = ();

    fn command(&self) -> Command {
        Command::new("SIGNAL").arg(self.0.as_str())
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// SETEVENTS: replace the set of subscribed event types.
#[derive(Debug, Clone, Default)]
pub struct SetEvents {
    events: Vec<EventType>,
}

impl SetEvents {
    /// Subscribe to exactly these event types (empty clears all).
    pub fn new(events: impl IntoIterator<Item = EventType>) -> Self {
        SetEvents {
            events: events.into_iter().collect(),
        }
    }
}

impl TorCmd for SetEvents {
    type Output = ();

    fn command(&self) -> Command {
        Command::new("SETEVENTS").args(self.events.iter().map(EventType::as_str))
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// AUTHENTICATE with a pre-rendered token argument.
///
/// The token is the wire form: a quoted password, hex cookie bytes, or
/// absent for NULL authentication.
#[derive(Debug, Clone, Default)]
pub struct Authenticate {
    /// The rendered token, if any.
    pub token: Option<String>,
}

impl TorCmd for Authenticate {
    type Output = ();

    fn command(&self) -> Command {
        match &self.token {
            Some(token) => Command::new("AUTHENTICATE").arg(token),
            None => Command::new("AUTHENTICATE"),
        }
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// AUTHCHALLENGE for SAFECOOKIE; yields (server hash, server nonce).
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    client_nonce_hex: String,
}

impl AuthChallenge {
    /// Challenge with a hex-encoded client nonce.
    pub fn new(client_nonce: &[u8]) -> Self {
        AuthChallenge {
            client_nonce_hex: auth::encode_cookie(client_nonce),
        }
    }
}

impl TorCmd for AuthChallenge {
    type Output = (Vec<u8>, Vec<u8>);

    fn command(&self) -> Command {
        Command::new("AUTHCHALLENGE")
            .arg("SAFECOOKIE")
            .arg(&self.client_nonce_hex)
    }

    fn parse_reply(&self, reply: &Reply) -> Result<(Vec<u8>, Vec<u8>)> {
        auth::parse_auth_challenge(reply.first_line())
    }
}

/// PROTOCOLINFO.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryProtocolInfo;

impl TorCmd for QueryProtocolInfo {
    type Output = ProtocolInfo;

    fn command(&self) -> Command {
        Command::new("PROTOCOLINFO").arg("1")
    }

    fn parse_reply(&self, reply: &Reply) -> Result<ProtocolInfo> {
        ProtocolInfo::from_reply(reply)
    }
}

/// TAKEOWNERSHIP: tie the daemon's lifetime to this connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TakeOwnership;

impl TorCmd for TakeOwnership {
    type Output = ();

    fn command(&self) -> Command {
        Command::new("TAKEOWNERSHIP")
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// DROPOWNERSHIP: release ownership taken with TAKEOWNERSHIP.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropOwnership;

impl TorCmd for DropOwnership {
    type Output = ();

    fn command(&self) -> Command {
        Command::new("DROPOWNERSHIP")
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// DROPGUARDS: discard the current guard nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropGuards;

impl TorCmd for DropGuards {
    type Output = ();

    fn command(&self) -> Command {
        Command::new("DROPGUARDS")
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// ADD_ONION: create an ephemeral onion service.
#[derive(Debug, Clone)]
pub struct AddOnion {
    key: String,
    flags: Vec<String>,
    ports: Vec<(u16, Option<String>)>,
}

impl AddOnion {
    /// Create a service with a fresh ED25519-V3 key.
    pub fn new_key() -> Self {
        AddOnion {
            key: "NEW:ED25519-V3".to_string(),
            flags: Vec::new(),
            ports: Vec::new(),
        }
    }

    /// Create a service from an existing key blob, e.g.
    /// `ED25519-V3:<base64>`.
    pub fn with_key(key: impl Into<String>) -> Self {
        AddOnion {
            key: key.into(),
            flags: Vec::new(),
            ports: Vec::new(),
        }
    }

    /// Add a flag such as `DiscardPK` or `Detach`.
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// Map a virtual port to a local target; `None` targets
    /// `127.0.0.1:<virt_port>`.
    pub fn port(mut self, virt_port: u16, target: Option<String>) -> Self {
        self.ports.push((virt_port, target));
        self
    }
}

impl TorCmd for AddOnion {
    type Output = CreatedOnionService;

    fn command(&self) -> Command {
        let mut cmd = Command::new("ADD_ONION").arg(&self.key);
        if !self.flags.is_empty() {
            cmd = cmd.arg(format!("Flags={}", self.flags.join(",")));
        }
        for (virt_port, target) in &self.ports {
            match target {
                Some(target) => cmd = cmd.arg(format!("Port={virt_port},{target}")),
                None => cmd = cmd.arg(format!("Port={virt_port}")),
            }
        }
        cmd
    }

    fn parse_reply(&self, reply: &Reply) -> Result<CreatedOnionService> {
        let mut address = None;
        let mut private_key = None;

        for line in reply.lines() {
            if let Some(id) = line.text.strip_prefix("ServiceID=") {
                address = Some(OnionAddress::new(id));
            } else if let Some(key) = line.text.strip_prefix("PrivateKey=") {
                private_key = Some(key.to_string());
            }
        }

        let address = address.ok_or_else(|| {
            TorCtrlError::ParseError("ADD_ONION reply missing ServiceID".to_string())
        })?;
        Ok(CreatedOnionService {
            address,
            private_key,
        })
    }
}

/// DEL_ONION: remove an ephemeral onion service.
#[derive(Debug, Clone)]
pub struct DelOnion {
    address: OnionAddress,
}

impl DelOnion {
    /// Remove the service with this address.
    pub fn new(address: OnionAddress) -> Self {
        DelOnion { address }
    }
}

impl TorCmd for DelOnion {
    type Output = ();

    fn command(&self) -> Command {
        Command::new("DEL_ONION").arg(self.address.service_id())
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// QUIT: ask the daemon to close the connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quit;

impl TorCmd for Quit {
    type Output = ();

    fn command(&self) -> Command {
        Command::new("QUIT")
    }

    fn parse_reply(&self, _reply: &Reply) -> Result<()> {
        Ok(())
    }
}

/// An arbitrary command whose reply is returned undecoded.
#[derive(Debug, Clone)]
pub struct Raw(pub Command);

impl TorCmd for Raw {
    type Output = Reply;

    fn command(&self) -> Command {
        self.0.clone()
    }

    fn parse_reply(&self, reply: &Reply) -> Result<Reply> {
        Ok(reply.clone())
    }
}
