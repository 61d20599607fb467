//! Test helpers: a scriptable in-memory control port and reply
//! builders.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! tor-ctrl = { version = "0.2", features = ["test-utils"] }
//! ```
//!
//! ```rust,ignore
//! use tor_ctrl::test_utils::MockControlPort;
//! use tor_ctrl::{uncaught, TorCtrl};
//!
//! #[tokio::test]
//! async fn round_trip() {
//!     let (ctrl, mut port) = MockControlPort::launch();
//!     let handle = ctrl.enqueue(GetInfo::new("version")).unwrap();
//!     port.expect_line("GETINFO version").await;
//!     port.send("250-version=0.4.8.12\r\n250 OK\r\n").await;
//!     assert_eq!(handle.await.unwrap(), "0.4.8.12");
//! }
//! ```

use crate::conn::TorCtrl;
use crate::uncaught;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// The server side of an in-memory control connection.
///
/// Tests script it line by line: assert what the engine wrote with
/// [`expect_line`](Self::expect_line), answer with
/// [`send`](Self::send). Dropping it ends the stream, which the engine
/// treats as a lost connection.
pub struct MockControlPort {
    io: BufReader<DuplexStream>,
}

impl MockControlPort {
    /// Launch an engine over an in-memory pipe and return both ends.
    pub fn launch() -> (TorCtrl, MockControlPort) {
        Self::launch_with_handler(uncaught::ignore())
    }

    /// Like [`launch`](Self::launch), with an explicit sink for
    /// observer failures.
    pub fn launch_with_handler(handler: uncaught::Handler) -> (TorCtrl, MockControlPort) {
        let (client, server) = tokio::io::duplex(8192);
        let ctrl = TorCtrl::launch(client, handler);
        (
            ctrl,
            MockControlPort {
                io: BufReader::new(server),
            },
        )
    }

    /// Read the next command line the engine wrote, without its CRLF.
    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.io
            .read_line(&mut line)
            .await
            .expect("mock port read failed");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Read the next command line and assert its content.
    pub async fn expect_line(&mut self, expected: &str) {
        let line = self.read_line().await;
        assert_eq!(line, expected, "engine wrote an unexpected command");
    }

    /// Write raw bytes to the engine, e.g. a pre-built reply.
    pub async fn send(&mut self, text: &str) {
        self.io
            .get_mut()
            .write_all(text.as_bytes())
            .await
            .expect("mock port write failed");
    }

    /// Reply `250 OK`.
    pub async fn send_ok(&mut self) {
        self.send("250 OK\r\n").await;
    }

    /// Inject an asynchronous event, e.g. `BW 1024 2048`.
    pub async fn send_event(&mut self, event: &str) {
        self.send(&format!("650 {event}\r\n")).await;
    }
}

/// Builds properly framed reply blocks for tests.
#[derive(Debug, Clone, Default)]
pub struct ReplyBuilder {
    lines: Vec<String>,
}

impl ReplyBuilder {
    /// Start an empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bare `250 OK` block.
    pub fn ok() -> Self {
        ReplyBuilder {
            lines: vec!["250 OK".to_string()],
        }
    }

    /// A single-line error block.
    pub fn error(code: u16, message: &str) -> Self {
        ReplyBuilder {
            lines: vec![format!("{code} {message}")],
        }
    }

    /// Add a `250-` continuation line.
    pub fn line(mut self, text: &str) -> Self {
        self.lines.push(format!("250-{text}"));
        self
    }

    /// Add a `250+` line with its dot-terminated payload.
    pub fn data(mut self, key: &str, payload: &str) -> Self {
        self.lines.push(format!("250+{key}="));
        for line in payload.lines() {
            if line.starts_with('.') {
                self.lines.push(format!(".{line}"));
            } else {
                self.lines.push(line.to_string());
            }
        }
        self.lines.push(".".to_string());
        self
    }

    /// Close the block with `250 OK`.
    pub fn finish(mut self) -> Self {
        self.lines.push("250 OK".to_string());
        self
    }

    /// Render as wire bytes with CRLF terminators.
    pub fn build(&self) -> String {
        self.lines.iter().map(|l| format!("{l}\r\n")).collect()
    }
}

/// Canned wire samples.
pub mod fixtures {
    /// A PROTOCOLINFO reply advertising NULL, COOKIE, and SAFECOOKIE.
    pub fn protocolinfo_reply() -> &'static str {
        "250-PROTOCOLINFO 1\r\n\
         250-AUTH METHODS=NULL,COOKIE,SAFECOOKIE COOKIEFILE=\"/var/run/tor/control.authcookie\"\r\n\
         250-VERSION Tor=\"0.4.8.12\"\r\n\
         250 OK\r\n"
    }

    /// A GETINFO version reply.
    pub fn version_reply() -> &'static str {
        "250-version=0.4.8.12 (git-abc123)\r\n250 OK\r\n"
    }

    /// A GETCONF SocksPort reply.
    pub fn socksport_reply() -> &'static str {
        "250 SocksPort=9050\r\n"
    }

    /// A CIRC built event.
    pub fn circuit_built_event() -> &'static str {
        "650 CIRC 12345 BUILT $9695DFC35FFEB861329B9F1AB04C46397020CE31~Relay1\r\n"
    }

    /// A BW event.
    pub fn bandwidth_event() -> &'static str {
        "650 BW 1024 2048\r\n"
    }

    /// An error reply.
    pub fn error_reply() -> &'static str {
        "552 Unknown option\r\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_builder_ok() {
        assert_eq!(ReplyBuilder::ok().build(), "250 OK\r\n");
    }

    #[test]
    fn reply_builder_multi_line() {
        let wire = ReplyBuilder::new()
            .line("version=0.4.8.12")
            .line("config-file=/etc/tor/torrc")
            .finish()
            .build();
        assert_eq!(
            wire,
            "250-version=0.4.8.12\r\n250-config-file=/etc/tor/torrc\r\n250 OK\r\n"
        );
    }

    #[test]
    fn reply_builder_data_escapes_dots() {
        let wire = ReplyBuilder::new()
            .data("config-text", "SocksPort 9050\n.hidden")
            .finish()
            .build();
        assert_eq!(
            wire,
            "250+config-text=\r\nSocksPort 9050\r\n..hidden\r\n.\r\n250 OK\r\n"
        );
    }

    #[test]
    fn reply_builder_error() {
        assert_eq!(
            ReplyBuilder::error(552, "Unknown option").build(),
            "552 Unknown option\r\n"
        );
    }

    #[tokio::test]
    async fn mock_port_round_trip() {
        let (ctrl, mut port) = MockControlPort::launch();
        let handle = ctrl.enqueue(crate::cmd::GetInfo::new("version")).unwrap();
        port.expect_line("GETINFO version").await;
        port.send(fixtures::version_reply()).await;
        assert_eq!(handle.await.unwrap(), "0.4.8.12 (git-abc123)");
        ctrl.destroy().await;
    }
}
