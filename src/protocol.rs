//! Wire-level protocol units: reply lines, reply blocks, and command
//! encoding.
//!
//! Reply lines are `CODE SEP TEXT` where CODE is three ASCII digits and
//! SEP is `' '` (final line of a block), `'-'` (more lines follow), or
//! `'+'` (a dot-terminated data payload follows). Request lines are
//! `KEYWORD arg1 arg2\r\n`, optionally preceded by `'+'` and followed by
//! a dot-terminated payload.

use crate::error::{is_success_code, Result, StatusCode, TorCtrlError};
use std::collections::HashMap;
use std::fmt;

/// The separator character of a reply line, deciding how a block continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// `' '` - final line, the block is complete.
    Final,
    /// `'-'` - more lines follow in this block.
    More,
    /// `'+'` - a multi-line data payload follows, terminated by `"."`.
    Data,
}

impl Separator {
    /// Map a wire character to a separator.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            ' ' => Some(Separator::Final),
            '-' => Some(Separator::More),
            '+' => Some(Separator::Data),
            _ => None,
        }
    }

    /// The wire character for this separator.
    pub fn as_char(&self) -> char {
        match self {
            Separator::Final => ' ',
            Separator::More => '-',
            Separator::Data => '+',
        }
    }
}

/// A single decoded reply line.
#[derive(Debug, Clone)]
pub struct ReplyLine {
    /// The 3-digit status code.
    pub code: u16,
    /// How the block continues after this line.
    pub separator: Separator,
    /// The text content after the separator.
    pub text: String,
    /// The dot-terminated payload, present only on [`Separator::Data`]
    /// lines and filled in by the framer.
    pub data: Option<String>,
}

impl ReplyLine {
    /// Decode one reply line (without its CRLF terminator).
    ///
    /// Returns [`TorCtrlError::Framing`] on any malformation; the caller
    /// must treat that as fatal to the connection.
    pub fn parse(line: &str) -> Result<Self> {
        let bytes = line.as_bytes();
        if bytes.len() < 4 {
            return Err(TorCtrlError::Framing(format!(
                "reply line too short: '{line}'"
            )));
        }

        let digits = &bytes[..3];
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(TorCtrlError::Framing(format!(
                "invalid status code in: '{line}'"
            )));
        }
        let code = (digits[0] - b'0') as u16 * 100
            + (digits[1] - b'0') as u16 * 10
            + (digits[2] - b'0') as u16;

        let separator = Separator::from_char(bytes[3] as char).ok_or_else(|| {
            TorCtrlError::Framing(format!("invalid separator in: '{line}'"))
        })?;

        // bytes[3] is ASCII, so index 4 is a char boundary.
        Ok(ReplyLine {
            code,
            separator,
            text: line[4..].to_string(),
            data: None,
        })
    }

    /// Whether this line terminates its block.
    pub fn is_final(&self) -> bool {
        self.separator == Separator::Final
    }

    /// The status code as an enum.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code)
    }
}

/// A complete reply block: one or more lines terminated by a final line.
#[derive(Debug, Clone)]
pub struct Reply {
    lines: Vec<ReplyLine>,
}

impl Reply {
    /// Assemble a block from its lines. Fails on an empty line list.
    pub fn new(lines: Vec<ReplyLine>) -> Result<Self> {
        if lines.is_empty() {
            return Err(TorCtrlError::Framing("empty reply block".to_string()));
        }
        Ok(Reply { lines })
    }

    /// All lines of the block.
    pub fn lines(&self) -> &[ReplyLine] {
        &self.lines
    }

    /// The status code of the block, taken from its final line.
    pub fn code(&self) -> u16 {
        self.lines.last().map(|l| l.code).unwrap_or(0)
    }

    /// The status code as an enum.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code())
    }

    /// Whether this block reports success (2xx).
    pub fn is_success(&self) -> bool {
        is_success_code(self.code())
    }

    /// Whether this block is an asynchronous event notification (650).
    pub fn is_event(&self) -> bool {
        self.code() == 650
    }

    /// The text of the first line.
    pub fn first_line(&self) -> &str {
        self.lines.first().map(|l| l.text.as_str()).unwrap_or("")
    }

    /// All line texts joined with newlines.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The first dot-terminated payload in the block, if any.
    pub fn data(&self) -> Option<&str> {
        self.lines.iter().find_map(|l| l.data.as_deref())
    }

    /// Convert into a `Result`, rejecting non-2xx blocks with the raw
    /// block text preserved.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TorCtrlError::CommandRejected {
                code: self.code(),
                message: self.text(),
            })
        }
    }
}

/// An immutable request value: keyword, ordered arguments, and an
/// optional multi-line payload.
#[derive(Debug, Clone)]
pub struct Command {
    keyword: String,
    args: Vec<String>,
    payload: Option<String>,
}

impl Command {
    /// Start a command with the given keyword.
    pub fn new(keyword: impl Into<String>) -> Self {
        Command {
            keyword: keyword.into(),
            args: Vec::new(),
            payload: None,
        }
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Attach a multi-line payload, sent dot-terminated after the
    /// request line.
    pub fn payload(mut self, data: impl Into<String>) -> Self {
        self.payload = Some(data.into());
        self
    }

    /// The command keyword.
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Encode to wire bytes, including the trailing CRLF and, when a
    /// payload is present, the `'+'` prefix, dot escaping, and the
    /// terminating `".\r\n"`.
    pub fn encode(&self) -> String {
        let mut wire = String::new();
        if self.payload.is_some() {
            wire.push('+');
        }
        wire.push_str(&self.keyword);
        for arg in &self.args {
            wire.push(' ');
            wire.push_str(arg);
        }
        wire.push_str("\r\n");

        if let Some(payload) = &self.payload {
            for line in payload.lines() {
                if line.starts_with('.') {
                    wire.push('.');
                }
                wire.push_str(line);
                wire.push_str("\r\n");
            }
            wire.push_str(".\r\n");
        }

        wire
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Quote a string for use as a command argument if it needs quoting.
pub fn quote_string(s: &str) -> String {
    if s.is_empty() {
        return "\"\"".to_string();
    }

    let needs_quoting = s
        .chars()
        .any(|c| c.is_whitespace() || c == '"' || c == '\\' || !(' '..='~').contains(&c));
    if !needs_quoting {
        return s.to_string();
    }

    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Parse `key=value` pairs from reply or event text. Values may be
/// quoted with backslash escapes.
pub fn parse_key_value_pairs(text: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    let mut remaining = text;

    loop {
        remaining = remaining.trim_start();
        if remaining.is_empty() {
            break;
        }

        let Some(eq) = remaining.find('=') else { break };
        let key = remaining[..eq].to_string();
        remaining = &remaining[eq + 1..];

        let (value, rest) = if remaining.starts_with('"') {
            parse_quoted_string(remaining)
        } else {
            let end = remaining.find(' ').unwrap_or(remaining.len());
            (remaining[..end].to_string(), &remaining[end..])
        };

        pairs.insert(key, value);
        remaining = rest;
    }

    pairs
}

/// Parse a leading quoted string, handling backslash escapes. Returns
/// the unescaped value and the rest of the input.
fn parse_quoted_string(s: &str) -> (String, &str) {
    if !s.starts_with('"') {
        return (String::new(), s);
    }

    let mut value = String::new();
    let mut chars = s[1..].chars().peekable();
    let mut consumed = 1;

    while let Some(c) = chars.next() {
        consumed += c.len_utf8();
        if c == '"' {
            break;
        }
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                consumed += next.len_utf8();
                chars.next();
                match next {
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    other => value.push(other),
                }
            }
        } else {
            value.push(c);
        }
    }

    (value, &s[consumed..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_line_parsing() {
        let line = ReplyLine::parse("250 OK").unwrap();
        assert_eq!(line.code, 250);
        assert_eq!(line.separator, Separator::Final);
        assert_eq!(line.text, "OK");
        assert!(line.is_final());

        let mid = ReplyLine::parse("250-version=0.4.8.10").unwrap();
        assert_eq!(mid.separator, Separator::More);

        let data = ReplyLine::parse("250+config-text=").unwrap();
        assert_eq!(data.separator, Separator::Data);
    }

    #[test]
    fn reply_line_too_short() {
        assert!(ReplyLine::parse("").is_err());
        assert!(ReplyLine::parse("25").is_err());
        assert!(ReplyLine::parse("250").is_err());
    }

    #[test]
    fn reply_line_invalid_code() {
        assert!(ReplyLine::parse("ABC OK").is_err());
        assert!(ReplyLine::parse("2x0 OK").is_err());
    }

    #[test]
    fn reply_line_invalid_separator() {
        assert!(ReplyLine::parse("250/OK").is_err());
    }

    #[test]
    fn reply_line_empty_text() {
        let line = ReplyLine::parse("250 ").unwrap();
        assert_eq!(line.code, 250);
        assert!(line.text.is_empty());
    }

    #[test]
    fn reply_line_non_ascii_is_framing_error() {
        assert!(ReplyLine::parse("2§0 OK").is_err());
    }

    #[test]
    fn reply_block_status_from_final_line() {
        let reply = Reply::new(vec![
            ReplyLine::parse("250-version=0.4.8.12").unwrap(),
            ReplyLine::parse("250 OK").unwrap(),
        ])
        .unwrap();
        assert_eq!(reply.code(), 250);
        assert!(reply.is_success());
        assert!(!reply.is_event());
        assert_eq!(reply.text(), "version=0.4.8.12\nOK");
        assert_eq!(reply.first_line(), "version=0.4.8.12");
    }

    #[test]
    fn reply_block_rejects_empty() {
        assert!(Reply::new(vec![]).is_err());
    }

    #[test]
    fn reply_event_detection() {
        let reply = Reply::new(vec![ReplyLine::parse("650 CIRC 1 BUILT").unwrap()]).unwrap();
        assert!(reply.is_event());
        assert!(!reply.is_success());
    }

    #[test]
    fn reply_into_result_preserves_raw_text() {
        let reply = Reply::new(vec![ReplyLine::parse("552 Unknown option").unwrap()]).unwrap();
        match reply.into_result() {
            Err(TorCtrlError::CommandRejected { code, message }) => {
                assert_eq!(code, 552);
                assert_eq!(message, "Unknown option");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn command_encoding() {
        let cmd = Command::new("SETCONF").arg("SOCKSPort=9050");
        assert_eq!(cmd.encode(), "SETCONF SOCKSPort=9050\r\n");

        let bare = Command::new("TAKEOWNERSHIP");
        assert_eq!(bare.encode(), "TAKEOWNERSHIP\r\n");
    }

    #[test]
    fn command_payload_encoding() {
        let cmd = Command::new("LOADCONF").payload("SocksPort 9050\n.hidden");
        let wire = cmd.encode();
        assert!(wire.starts_with("+LOADCONF\r\n"));
        assert!(wire.contains("SocksPort 9050\r\n"));
        assert!(wire.contains("..hidden\r\n"));
        assert!(wire.ends_with(".\r\n"));
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_string("simple"), "simple");
        assert_eq!(quote_string(""), "\"\"");
        assert_eq!(quote_string("with space"), "\"with space\"");
        assert_eq!(quote_string("with\"quote"), "\"with\\\"quote\"");
        assert_eq!(quote_string("tab\there"), "\"tab\\there\"");
    }

    #[test]
    fn key_value_parsing() {
        let pairs = parse_key_value_pairs("KEY1=value1 KEY2=\"quoted value\"");
        assert_eq!(pairs.get("KEY1"), Some(&"value1".to_string()));
        assert_eq!(pairs.get("KEY2"), Some(&"quoted value".to_string()));

        assert!(parse_key_value_pairs("").is_empty());
    }

    #[test]
    fn key_value_escapes() {
        let pairs = parse_key_value_pairs(r#"MSG="line1\nline2" PATH="C:\\tor""#);
        assert_eq!(pairs.get("MSG"), Some(&"line1\nline2".to_string()));
        assert_eq!(pairs.get("PATH"), Some(&"C:\\tor".to_string()));
    }
}
