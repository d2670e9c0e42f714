//! Password encryption using `XChaCha20-Poly1305`.
//!
//! Stored form: `base64(nonce || ciphertext || tag)`.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CipherError;

/// Size of the `XChaCha20` nonce (24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
const POLY1305_TAG_SIZE: usize = 16;

/// HKDF info label for the password key
const PASSWORD_KEY_LABEL: &[u8] = b"protonPasswordV1";

/// Symmetric cipher for user passwords.
///
/// The key is derived once from the deployment secret and salt, and zeroized
/// on drop.
pub struct PasswordCipher {
    key: [u8; 32],
}

impl PasswordCipher {
    /// Derive the cipher key from `secret` and `salt`.
    ///
    /// # Errors
    ///
    /// - `CipherError::EmptySecret` if `secret` is empty
    pub fn from_secret(secret: &[u8], salt: &[u8]) -> Result<Self, CipherError> {
        if secret.is_empty() {
            return Err(CipherError::EmptySecret);
        }

        let hkdf = Hkdf::<Sha256>::new(Some(salt), secret);

        let mut key = [0u8; 32];
        let Ok(()) = hkdf.expand(PASSWORD_KEY_LABEL, &mut key) else {
            unreachable!("32 bytes is a valid HKDF-SHA256 output length");
        };

        Ok(Self { key })
    }

    /// Encrypt `plaintext` under a caller-provided nonce.
    ///
    /// Caller MUST provide a fresh random nonce for every call in production.
    pub fn encrypt(&self, plaintext: &[u8], nonce: [u8; NONCE_SIZE]) -> String {
        let cipher = XChaCha20Poly1305::new((&self.key).into());

        let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext) else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        STANDARD.encode(sealed)
    }

    /// Recover the plaintext from a stored ciphertext.
    ///
    /// # Errors
    ///
    /// - `CipherError::Malformed` if the input is not base64 or is shorter than
    ///   nonce plus tag
    /// - `CipherError::DecryptionFailed` if authentication fails
    pub fn decrypt(&self, stored: &str) -> Result<Vec<u8>, CipherError> {
        let sealed = STANDARD
            .decode(stored)
            .map_err(|e| CipherError::Malformed { reason: e.to_string() })?;

        if sealed.len() < NONCE_SIZE + POLY1305_TAG_SIZE {
            return Err(CipherError::Malformed {
                reason: format!("{} bytes is shorter than nonce and tag", sealed.len()),
            });
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let cipher = XChaCha20Poly1305::new((&self.key).into());

        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::DecryptionFailed)
    }

    /// Whether `stored` decrypts to exactly `plaintext`.
    ///
    /// Undecryptable input compares unequal.
    pub fn compare(&self, plaintext: &[u8], stored: &str) -> bool {
        self.decrypt(stored).is_ok_and(|mut recovered| {
            let equal = recovered == plaintext;
            recovered.zeroize();
            equal
        })
    }
}

impl fmt::Debug for PasswordCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCipher").finish_non_exhaustive()
    }
}

impl Drop for PasswordCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
