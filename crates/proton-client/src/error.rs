//! Client error types.

use proton_proto::ProtocolError;
use thiserror::Error;

/// Errors that can occur while talking to a Proton server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// PEM file could not be read or parsed.
    #[error("failed to load '{path}': {reason}")]
    Pem {
        /// File path
        path: String,
        /// What went wrong
        reason: String,
    },

    /// TLS configuration or handshake failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// Server name is not a valid DNS name or IP address.
    #[error("invalid server name '{0}'")]
    InvalidServerName(String),

    /// Socket failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server closed the connection before answering.
    #[error("connection closed by server")]
    Closed,

    /// No response within the configured timeout.
    #[error("request timed out")]
    Timeout,
}
