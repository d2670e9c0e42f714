//! Cipher error types.

use thiserror::Error;

/// Errors from password encryption and decryption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// Secret material was empty.
    #[error("secret key must not be empty")]
    EmptySecret,

    /// Stored ciphertext was not valid base64 or was too short.
    #[error("malformed ciphertext: {reason}")]
    Malformed {
        /// What was wrong with the input
        reason: String,
    },

    /// Authentication tag did not verify (wrong key or tampered data).
    #[error("decryption failed")]
    DecryptionFailed,
}
