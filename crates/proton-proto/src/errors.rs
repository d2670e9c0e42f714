//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while framing or parsing protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Buffered bytes exceeded the frame size limit without a terminator.
    ///
    /// The stream cannot be resynchronized, so this is fatal for the
    /// connection.
    #[error("frame too large: {size} bytes buffered without terminator (max {max})")]
    FrameTooLarge {
        /// Bytes buffered so far
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Frame body was not a JSON object.
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// JSON was well-formed but violated the request/response structure.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Frame could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Underlying I/O failure surfaced through the codec traits.
    #[error("io error: {0}")]
    Io(String),
}

impl ProtocolError {
    /// Returns true if the connection can keep going after this error.
    ///
    /// Parse failures only poison a single frame; the terminator boundary is
    /// still known. Oversized input and I/O failures leave the stream in an
    /// unknown state.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidJson(_) | Self::Syntax(_))
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
