//! Assembles raw transport bytes into complete reply blocks.
//!
//! The framer reads CRLF-terminated lines and groups them into blocks:
//! `'-'` lines continue the block, a `'+'` line pulls in a raw payload
//! until a line containing only `"."`, and a `' '` line completes the
//! block. Any malformed line is fatal; the stream cannot be
//! resynchronized afterwards.

use crate::error::{Result, TorCtrlError};
use crate::protocol::{Reply, ReplyLine, Separator};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::trace;

/// Reads reply blocks from a buffered byte stream.
///
/// The sequence of blocks is restartable per connection only; after an
/// error or end-of-stream the framer must be discarded along with its
/// transport.
pub struct Framer<R> {
    reader: R,
    buf: String,
}

impl<R: AsyncBufRead + Unpin> Framer<R> {
    /// Wrap a buffered reader.
    pub fn new(reader: R) -> Self {
        Framer {
            reader,
            buf: String::new(),
        }
    }

    /// Read the next complete reply block.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly at a block
    /// boundary. End-of-stream inside a block, and any malformed line,
    /// are errors.
    pub async fn next_block(&mut self) -> Result<Option<Reply>> {
        let mut lines: Vec<ReplyLine> = Vec::new();

        loop {
            let Some(raw) = self.read_line().await? else {
                if lines.is_empty() {
                    return Ok(None);
                }
                return Err(TorCtrlError::ConnectionClosed);
            };

            let mut line = ReplyLine::parse(&raw)?;
            if line.separator == Separator::Data {
                line.data = Some(self.read_payload().await?);
            }

            let is_final = line.is_final();
            lines.push(line);
            if is_final {
                return Reply::new(lines).map(Some);
            }
        }
    }

    /// Read one CRLF-terminated line, or `None` on end-of-stream.
    async fn read_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let n = self.reader.read_line(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        let line = self.buf.trim_end_matches(['\r', '\n']);
        trace!("<< {line}");
        Ok(Some(line.to_string()))
    }

    /// Read raw payload lines verbatim until a line containing only
    /// `"."`, un-escaping leading double dots.
    async fn read_payload(&mut self) -> Result<String> {
        let mut payload = String::new();

        loop {
            let Some(raw) = self.read_line().await? else {
                return Err(TorCtrlError::ConnectionClosed);
            };
            if raw == "." {
                break;
            }

            let line = if raw.starts_with("..") { &raw[1..] } else { &raw };
            if !payload.is_empty() {
                payload.push('\n');
            }
            payload.push_str(line);
        }

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn framer(wire: &str) -> Framer<BufReader<&[u8]>> {
        Framer::new(BufReader::new(wire.as_bytes()))
    }

    #[tokio::test]
    async fn single_line_block() {
        let mut f = framer("250 OK\r\n");
        let reply = f.next_block().await.unwrap().unwrap();
        assert_eq!(reply.code(), 250);
        assert_eq!(reply.first_line(), "OK");
        assert!(f.next_block().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn multi_line_block() {
        let mut f = framer("250-version=0.4.8.12\r\n250-config-file=/etc/tor/torrc\r\n250 OK\r\n");
        let reply = f.next_block().await.unwrap().unwrap();
        assert_eq!(reply.lines().len(), 3);
        assert_eq!(reply.first_line(), "version=0.4.8.12");
        assert!(reply.is_success());
    }

    #[tokio::test]
    async fn data_payload_block() {
        let mut f = framer("250+circuit-status=\r\n1 BUILT\r\n2 LAUNCHED\r\n.\r\n250 OK\r\n");
        let reply = f.next_block().await.unwrap().unwrap();
        assert_eq!(reply.data(), Some("1 BUILT\n2 LAUNCHED"));
        assert_eq!(reply.code(), 250);
    }

    #[tokio::test]
    async fn payload_terminates_at_first_lone_dot() {
        // An embedded "." ends the payload right there; what follows is
        // the rest of the block.
        let mut f = framer("250+info=\r\nbefore\r\n.\r\n250 OK\r\n");
        let reply = f.next_block().await.unwrap().unwrap();
        assert_eq!(reply.data(), Some("before"));
        assert_eq!(reply.lines().len(), 2);
    }

    #[tokio::test]
    async fn payload_unescapes_leading_dots() {
        let mut f = framer("250+doc=\r\n..dotted\r\nplain\r\n.\r\n250 OK\r\n");
        let reply = f.next_block().await.unwrap().unwrap();
        assert_eq!(reply.data(), Some(".dotted\nplain"));
    }

    #[tokio::test]
    async fn consecutive_blocks() {
        let mut f = framer("650 BW 1024 2048\r\n250 OK\r\n");
        let first = f.next_block().await.unwrap().unwrap();
        assert!(first.is_event());
        let second = f.next_block().await.unwrap().unwrap();
        assert_eq!(second.code(), 250);
        assert!(f.next_block().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_line_is_fatal() {
        let mut f = framer("garbage\r\n");
        assert!(matches!(
            f.next_block().await,
            Err(TorCtrlError::Framing(_))
        ));
    }

    #[tokio::test]
    async fn eof_mid_block_is_error() {
        let mut f = framer("250-partial\r\n");
        assert!(matches!(
            f.next_block().await,
            Err(TorCtrlError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn eof_mid_payload_is_error() {
        let mut f = framer("250+data=\r\nline\r\n");
        assert!(matches!(
            f.next_block().await,
            Err(TorCtrlError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn bare_lf_lines_are_tolerated() {
        let mut f = framer("250 OK\n");
        let reply = f.next_block().await.unwrap().unwrap();
        assert_eq!(reply.code(), 250);
    }
}
