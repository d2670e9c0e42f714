//! Error types for the Proton connection core.
//!
//! Every variant is terminal for the connection that raised it. Recoverable
//! parse failures never reach this type: they become `SYNTAX ERROR`
//! responses before the connection sees them.

use std::io;

use proton_proto::ProtocolError;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors that can occur during connection state machine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Invalid state transition attempted
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: String,
    },

    /// Peer presented no certificate identity
    #[error("peer certificate carries no common name")]
    IdentityMissing,

    /// Peer certificate identity is not the expected service identity
    #[error("peer identity {actual:?} does not match expected {expected:?}")]
    IdentityMismatch {
        /// Identity the server accepts
        expected: String,
        /// Identity the peer presented
        actual: String,
    },

    /// Framing failure that leaves the stream unrecoverable
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Underlying transport error
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Returns true if the peer was rejected during the handshake.
    ///
    /// Rejected peers are closed without any response frame.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::IdentityMissing | Self::IdentityMismatch { .. })
    }
}

/// Convert `io::Error` to `ConnectionError` (for transport errors)
impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
