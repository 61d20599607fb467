//! Error types for the Tor control connection engine.
//!
//! The variants map onto the failure categories the engine distinguishes:
//! fatal connection-level failures (framing, protocol violation, I/O,
//! end-of-stream), job-local failures (a rejected command), and synchronous
//! usage errors (enqueueing on a destroyed connection).

use std::io;
use thiserror::Error;

/// The main error type for all control-port operations.
#[derive(Error, Debug)]
pub enum TorCtrlError {
    /// I/O error occurred on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Establishing the transport connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A reply line could not be decoded. Fatal: a line-oriented protocol
    /// cannot be resynchronized after corruption.
    #[error("framing error: {0}")]
    Framing(String),

    /// The daemon sent a reply the engine cannot account for, such as a
    /// non-event reply block while no command was awaiting one. Fatal.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The command was rejected by the daemon. Local to the affected job;
    /// the raw reply text is preserved for diagnostics.
    #[error("command rejected (code {code}): {message}")]
    CommandRejected {
        /// The status code of the final reply line.
        code: u16,
        /// The full reply block text.
        message: String,
    },

    /// Authentication with the daemon failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A well-formed reply could not be interpreted as the expected result.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Invalid argument provided to a command.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The connection died while this job was queued or in flight.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The job was cancelled before a reply was received.
    #[error("job cancelled")]
    Cancelled,

    /// The connection has been destroyed; no further commands are accepted.
    #[error("connection already destroyed")]
    Destroyed,
}

/// Result type alias for control-port operations.
pub type Result<T> = std::result::Result<T, TorCtrlError>;

/// Reply status codes defined by the control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 250 - OK
    Ok = 250,
    /// 251 - Operation was unnecessary
    OperationUnnecessary = 251,
    /// 252 - Resource exhausted (with additional info)
    ResourceExhaustedInfo = 252,
    /// 451 - Resource exhausted
    ResourceExhausted = 451,
    /// 500 - Syntax error: protocol
    SyntaxErrorProtocol = 500,
    /// 510 - Unrecognized command
    UnrecognizedCommand = 510,
    /// 511 - Unimplemented command
    UnimplementedCommand = 511,
    /// 512 - Syntax error in command argument
    SyntaxErrorArgument = 512,
    /// 513 - Unrecognized command argument
    UnrecognizedArgument = 513,
    /// 514 - Authentication required
    AuthenticationRequired = 514,
    /// 515 - Bad authentication
    BadAuthentication = 515,
    /// 550 - Unspecified daemon error
    UnspecifiedError = 550,
    /// 551 - Internal error
    InternalError = 551,
    /// 552 - Unrecognized entity
    UnrecognizedEntity = 552,
    /// 553 - Invalid configuration value
    InvalidConfigValue = 553,
    /// 554 - Invalid descriptor
    InvalidDescriptor = 554,
    /// 555 - Unmanaged entity
    UnmanagedEntity = 555,
    /// 650 - Asynchronous event notification
    AsyncEvent = 650,
    /// Unknown status code
    Unknown = 0,
}

impl StatusCode {
    /// Parse a status code from its numeric value.
    pub fn from_u16(code: u16) -> Self {
        match code {
            250 => StatusCode::Ok,
            251 => StatusCode::OperationUnnecessary,
            252 => StatusCode::ResourceExhaustedInfo,
            451 => StatusCode::ResourceExhausted,
            500 => StatusCode::SyntaxErrorProtocol,
            510 => StatusCode::UnrecognizedCommand,
            511 => StatusCode::UnimplementedCommand,
            512 => StatusCode::SyntaxErrorArgument,
            513 => StatusCode::UnrecognizedArgument,
            514 => StatusCode::AuthenticationRequired,
            515 => StatusCode::BadAuthentication,
            550 => StatusCode::UnspecifiedError,
            551 => StatusCode::InternalError,
            552 => StatusCode::UnrecognizedEntity,
            553 => StatusCode::InvalidConfigValue,
            554 => StatusCode::InvalidDescriptor,
            555 => StatusCode::UnmanagedEntity,
            650 => StatusCode::AsyncEvent,
            _ => StatusCode::Unknown,
        }
    }

    /// Whether this status code indicates success (2xx).
    pub fn is_success(&self) -> bool {
        is_success_code(*self as u16)
    }

    /// Whether this status code indicates a command failure.
    pub fn is_error(&self) -> bool {
        !self.is_success() && *self != StatusCode::AsyncEvent
    }

    /// The numeric value of this status code.
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode::from_u16(code)
    }
}

/// Whether a numeric reply code indicates success (2xx).
pub fn is_success_code(code: u16) -> bool {
    (200..300).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_parsing() {
        assert_eq!(StatusCode::from_u16(250), StatusCode::Ok);
        assert_eq!(StatusCode::from_u16(515), StatusCode::BadAuthentication);
        assert_eq!(StatusCode::from_u16(650), StatusCode::AsyncEvent);
        assert_eq!(StatusCode::from_u16(9999), StatusCode::Unknown);
    }

    #[test]
    fn status_code_success() {
        assert!(StatusCode::Ok.is_success());
        assert!(StatusCode::OperationUnnecessary.is_success());
        assert!(!StatusCode::BadAuthentication.is_success());
        assert!(!StatusCode::AsyncEvent.is_error());
    }

    #[test]
    fn numeric_success_range() {
        assert!(is_success_code(250));
        assert!(is_success_code(299));
        assert!(!is_success_code(199));
        assert!(!is_success_code(451));
        assert!(!is_success_code(650));
    }
}
