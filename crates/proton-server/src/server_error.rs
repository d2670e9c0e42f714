//! Driver error types.
//!
//! Provides strongly-typed errors for driver operations:
//! - Connection management (accept, lookup)
//! - Request servicing (storage, response encoding)
//! - Action execution (send, close)

use std::fmt;

use crate::storage::StorageError;

/// Errors that can occur while the driver processes an event.
#[derive(Debug)]
pub enum ServerError {
    /// Connection already registered.
    ///
    /// The runtime handed out a connection id that is still live. This is a
    /// logic bug - connection ids should be unique. Fatal - report as issue.
    ConnectionAlreadyExists(u64),

    /// Storage operation failed outside of a request.
    ///
    /// Failures inside a request become `SERVER ERROR` responses and never
    /// surface here.
    Storage(StorageError),

    /// Servicing one connection failed.
    ///
    /// Only that connection is affected; it receives `SERVER ERROR`.
    ConnectionFailed {
        /// Connection that failed
        connection_id: u64,
        /// Error message
        reason: String,
    },

    /// Frame encoding error.
    ///
    /// A response could not be serialized. Scoped to one connection.
    Protocol {
        /// Connection the frame was for
        connection_id: u64,
        /// Error message
        reason: String,
    },

    /// Internal error with no attributable connection.
    ///
    /// Should never happen in correct implementation. The event loop treats
    /// it as fatal.
    Internal(String),
}

impl ServerError {
    /// Connection the error is scoped to. `None` if it is not attributable.
    pub fn connection_id(&self) -> Option<u64> {
        match self {
            Self::ConnectionAlreadyExists(id)
            | Self::ConnectionFailed { connection_id: id, .. }
            | Self::Protocol { connection_id: id, .. } => Some(*id),
            Self::Storage(_) | Self::Internal(_) => None,
        }
    }

    /// Whether the event loop must shut down.
    pub fn is_fatal(&self) -> bool {
        self.connection_id().is_none()
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionAlreadyExists(id) => write!(f, "connection already exists: {id}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::ConnectionFailed { connection_id, reason } => {
                write!(f, "connection {connection_id} failed: {reason}")
            },
            Self::Protocol { connection_id, reason } => {
                write!(f, "protocol error on connection {connection_id}: {reason}")
            },
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

/// Errors from action execution.
#[derive(Debug)]
pub enum ExecutorError {
    /// Send to connection failed.
    ///
    /// The connection's writer is gone (peer closed or write failed). The
    /// reader will report the closure; nothing else to do.
    SendFailed {
        /// Connection that failed
        connection_id: u64,
        /// Error message
        reason: String,
    },

    /// Transport error.
    ///
    /// Low-level socket/TLS error. May be transient (network issues) or
    /// fatal (connection closed). Check error message for details.
    Transport(String),
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendFailed { connection_id, reason } => {
                write!(f, "send failed for connection {connection_id}: {reason}")
            },
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for ExecutorError {}
