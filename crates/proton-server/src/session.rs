//! Session Manager
//!
//! Issues, refreshes, validates and revokes session tokens. Tokens live in the
//! `auth_token` table with an absolute expiry in wall-clock seconds. Expiry is
//! sliding: every login pushes it out to `now + ttl`.
//!
//! Invariant: at most one token row per user. Issuing reuses the live row,
//! and any expired or duplicate rows for the user are removed first.
//!
//! The manager holds no state besides its TTL. Storage and time are passed in
//! so the driver's event loop serializes every token operation.

use std::time::Duration;

use proton_core::Environment;
use proton_crypto::{generate_token, is_well_formed_token};
use thiserror::Error;

use crate::storage::{FieldValue, Fields, Storage, StorageError, StoredRecord, Table, fields};

/// Default session lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Errors from token validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No such token (or not a token at all)
    #[error("unknown session token")]
    Unauthorized,

    /// Token existed but its expiry has passed; it has been revoked
    #[error("session token expired")]
    Expired,

    /// Storage error occurred
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Token lifecycle over the `auth_token` table.
#[derive(Debug, Clone)]
pub struct SessionManager {
    ttl: Duration,
}

impl SessionManager {
    /// Create a manager issuing tokens valid for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// Session lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live token for `user_id`, extended to `now + ttl`, or a fresh one.
    ///
    /// Returns the token row (`token`, `user_id`, `expires`).
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn issue_or_refresh<E: Environment>(
        &self,
        env: &E,
        storage: &impl Storage,
        user_id: u64,
    ) -> Result<StoredRecord, StorageError> {
        let now = env.wall_clock_secs();
        let expires = now.saturating_add(self.ttl.as_secs());

        let owned =
            storage.filter(Table::AuthToken, &fields([("user_id", FieldValue::Integer(user_id))]))?;

        let mut live = None;
        for row in owned {
            let expires = row.get("expires").and_then(FieldValue::as_timestamp);
            let expired = expires.is_none_or(|at| now >= at);

            if live.is_none() && !expired {
                live = Some(row);
            } else {
                storage.delete(Table::AuthToken, row.id)?;
            }
        }

        if let Some(row) = live {
            let refreshed = storage.update(
                Table::AuthToken,
                row.id,
                fields([("expires", FieldValue::Timestamp(expires))]),
            )?;

            if let Some(refreshed) = refreshed {
                return Ok(refreshed);
            }
        }

        let token = generate_token(|buf| env.random_bytes(buf));
        storage.create(
            Table::AuthToken,
            fields([
                ("token", FieldValue::Text(token)),
                ("user_id", FieldValue::Integer(user_id)),
                ("expires", FieldValue::Timestamp(expires)),
            ]),
        )
    }

    /// User id owning `token`.
    ///
    /// A token whose expiry is at or before now is deleted and reported as
    /// [`SessionError::Expired`].
    ///
    /// # Errors
    ///
    /// - `SessionError::Unauthorized` if the token is malformed or unknown
    /// - `SessionError::Expired` if it has expired
    /// - `SessionError::Storage` on storage failure
    pub fn validate<E: Environment>(
        &self,
        env: &E,
        storage: &impl Storage,
        token: &str,
    ) -> Result<u64, SessionError> {
        if !is_well_formed_token(token) {
            return Err(SessionError::Unauthorized);
        }

        let Some(row) = storage.first(Table::AuthToken, &token_predicate(token))? else {
            return Err(SessionError::Unauthorized);
        };

        let expires = row.get("expires").and_then(FieldValue::as_timestamp);
        if expires.is_none_or(|at| env.wall_clock_secs() >= at) {
            storage.delete(Table::AuthToken, row.id)?;
            return Err(SessionError::Expired);
        }

        row.get("user_id").and_then(FieldValue::as_integer).ok_or(SessionError::Unauthorized)
    }

    /// Delete `token`. Returns whether a row was removed.
    ///
    /// Revoking an unknown token is not an error.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn revoke(&self, storage: &impl Storage, token: &str) -> Result<bool, StorageError> {
        let mut removed = false;
        for row in storage.filter(Table::AuthToken, &token_predicate(token))? {
            removed |= storage.delete(Table::AuthToken, row.id)?.is_some();
        }
        Ok(removed)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}

fn token_predicate(token: &str) -> Fields {
    fields([("token", FieldValue::Text(token.to_string()))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        storage::MemoryStorage,
        test_support::TestEnv,
    };

    fn token_of(row: &StoredRecord) -> String {
        row.get("token").and_then(FieldValue::as_text).expect("token field").to_string()
    }

    #[test]
    fn issue_then_validate() {
        let env = TestEnv::at(1_000);
        let storage = MemoryStorage::new();
        let sessions = SessionManager::default();

        let row = sessions.issue_or_refresh(&env, &storage, 7).expect("issue failed");
        let token = token_of(&row);

        assert!(is_well_formed_token(&token));
        assert_eq!(row.get("expires"), Some(&FieldValue::Timestamp(1_000 + 900)));
        assert_eq!(sessions.validate(&env, &storage, &token), Ok(7));
    }

    #[test]
    fn second_issue_refreshes_same_token() {
        let env = TestEnv::at(1_000);
        let storage = MemoryStorage::new();
        let sessions = SessionManager::default();

        let first = sessions.issue_or_refresh(&env, &storage, 7).expect("issue failed");
        env.advance_secs(60);
        let second = sessions.issue_or_refresh(&env, &storage, 7).expect("refresh failed");

        assert_eq!(first.id, second.id);
        assert_eq!(token_of(&first), token_of(&second));
        assert_eq!(second.get("expires"), Some(&FieldValue::Timestamp(1_060 + 900)));
        assert_eq!(storage.record_count(Table::AuthToken).expect("count failed"), 1);
    }

    #[test]
    fn expired_leftover_is_replaced() {
        let env = TestEnv::at(1_000);
        let storage = MemoryStorage::new();
        let sessions = SessionManager::default();

        let first = sessions.issue_or_refresh(&env, &storage, 7).expect("issue failed");
        env.advance_secs(900);
        let second = sessions.issue_or_refresh(&env, &storage, 7).expect("issue failed");

        assert_ne!(first.id, second.id);
        assert_eq!(storage.record_count(Table::AuthToken).expect("count failed"), 1);
    }

    #[test]
    fn token_validity_boundary() {
        let env = TestEnv::at(10_000);
        let storage = MemoryStorage::new();
        let sessions = SessionManager::default();

        let stale = "a".repeat(40);
        let fresh = "b".repeat(40);
        for (token, expires) in [(&stale, 10_000 - 1), (&fresh, 10_000 + 3_600)] {
            storage
                .create(
                    Table::AuthToken,
                    fields([
                        ("token", FieldValue::Text(token.clone())),
                        ("user_id", FieldValue::Integer(1)),
                        ("expires", FieldValue::Timestamp(expires)),
                    ]),
                )
                .expect("create failed");
        }

        assert_eq!(sessions.validate(&env, &storage, &stale), Err(SessionError::Expired));
        assert_eq!(sessions.validate(&env, &storage, &fresh), Ok(1));

        // Expired token was revoked during validation
        assert_eq!(sessions.validate(&env, &storage, &stale), Err(SessionError::Unauthorized));
    }

    #[test]
    fn expiry_instant_itself_is_invalid() {
        let env = TestEnv::at(5_000);
        let storage = MemoryStorage::new();
        let sessions = SessionManager::new(Duration::from_secs(10));

        let token = token_of(&sessions.issue_or_refresh(&env, &storage, 1).expect("issue failed"));
        env.advance_secs(10);

        assert_eq!(sessions.validate(&env, &storage, &token), Err(SessionError::Expired));
    }

    #[test]
    fn malformed_and_unknown_tokens_are_unauthorized() {
        let env = TestEnv::at(0);
        let storage = MemoryStorage::new();
        let sessions = SessionManager::default();

        assert_eq!(sessions.validate(&env, &storage, "short"), Err(SessionError::Unauthorized));
        assert_eq!(
            sessions.validate(&env, &storage, &"z".repeat(40)),
            Err(SessionError::Unauthorized)
        );
    }

    #[test]
    fn revoke_is_idempotent() {
        let env = TestEnv::at(0);
        let storage = MemoryStorage::new();
        let sessions = SessionManager::default();

        let token = token_of(&sessions.issue_or_refresh(&env, &storage, 3).expect("issue failed"));

        assert_eq!(sessions.revoke(&storage, &token), Ok(true));
        assert_eq!(sessions.revoke(&storage, &token), Ok(false));
        assert_eq!(sessions.validate(&env, &storage, &token), Err(SessionError::Unauthorized));
        assert_eq!(storage.record_count(Table::AuthToken).expect("count failed"), 0);
    }

    #[test]
    fn users_get_distinct_tokens() {
        let env = TestEnv::at(0);
        let storage = MemoryStorage::new();
        let sessions = SessionManager::default();

        let a = token_of(&sessions.issue_or_refresh(&env, &storage, 1).expect("issue failed"));
        let b = token_of(&sessions.issue_or_refresh(&env, &storage, 2).expect("issue failed"));

        assert_ne!(a, b);
        assert_eq!(sessions.validate(&env, &storage, &a), Ok(1));
        assert_eq!(sessions.validate(&env, &storage, &b), Ok(2));
    }
}
