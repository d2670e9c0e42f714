//! Proton Cryptographic Primitives
//!
//! Two building blocks used by the server:
//!
//! - [`PasswordCipher`]: reversible password encryption keyed by a deployment
//!   secret. `XChaCha20-Poly1305` under a key derived with HKDF-SHA256 from
//!   `secret || salt`. Ciphertext travels as base64 text so it can live in a
//!   text column.
//! - [`generate_token`]: opaque session tokens, 40 ASCII letters drawn
//!   uniformly by rejection sampling.
//!
//! All functions are pure. Callers provide random bytes (nonces, token
//! entropy) so tests stay deterministic.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cipher;
mod error;
mod token;

pub use cipher::{NONCE_SIZE, PasswordCipher};
pub use error::CipherError;
pub use token::{TOKEN_ALPHABET, TOKEN_LENGTH, generate_token, is_well_formed_token};
