//! Token authentication against salted credential hashes.
//!
//! A stored credential has the form `<algorithm>$<salt>$<digest>` and is
//! keyed by the caller identity and the account it was issued for. The
//! presented token is re-hashed with the stored salt and the complete hash
//! strings are compared without exiting early on the first differing byte.

use crate::error::{BrokerError, Result};
use rand::Rng;
use sha2::{Digest, Sha512};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Separator between the fields of a stored hash
pub const HASH_DELIMITER: char = '$';

/// Algorithm tag written as the first field of a stored hash
pub const HASH_ALGORITHM: &str = "sha512";

/// Random bytes in a freshly generated salt
pub const SALT_LEN: usize = 16;

/// Read-only lookup of stored credential hashes
pub trait CredentialStore: Send + Sync {
    /// Stored hash for `(caller, account_id)`, if the caller was ever paired
    fn stored_hash(&self, caller: &str, account_id: &str) -> Option<String>;
}

/// Immutable in-memory credential store
#[derive(Debug, Default, Clone)]
pub struct MemoryCredentialStore {
    entries: HashMap<(String, String), String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stored hash for a caller/account pair
    pub fn with_credential(
        mut self,
        caller: impl Into<String>,
        account_id: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        self.entries
            .insert((caller.into(), account_id.into()), hash.into());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn stored_hash(&self, caller: &str, account_id: &str) -> Option<String> {
        self.entries
            .get(&(caller.to_string(), account_id.to_string()))
            .cloned()
    }
}

/// Validates presented tokens for a set of caller identities
#[derive(Clone)]
pub struct TokenAuthenticator {
    store: Arc<dyn CredentialStore>,
}

impl TokenAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Returns `Ok(true)` as soon as one identity holds a credential matching
    /// `token` for `account_id`.
    ///
    /// Identities without a credential are skipped. A stored hash without a
    /// delimiter is corrupted credential state and fails with `InvalidToken`.
    #[instrument(skip(self, identities, token), fields(account = %account_id, identities = identities.len()))]
    pub fn is_authorized(&self, identities: &[String], account_id: &str, token: &str) -> Result<bool> {
        for identity in identities {
            let stored = match self.store.stored_hash(identity, account_id) {
                Some(hash) if !hash.is_empty() => hash,
                _ => continue,
            };

            if validate_token(&stored, token)? {
                debug!(caller = %identity, "Token accepted");
                return Ok(true);
            }
        }

        warn!("No caller identity presented a valid token");
        Ok(false)
    }
}

/// Check `token` against one stored hash.
pub fn validate_token(stored: &str, token: &str) -> Result<bool> {
    let salt = stored
        .split(HASH_DELIMITER)
        .nth(1)
        .ok_or(BrokerError::InvalidToken)?;

    let recomputed = hash_token(token, salt);
    Ok(constant_time_eq(stored.as_bytes(), recomputed.as_bytes()))
}

/// Hash `token` with `salt` into the stored representation.
///
/// `salt` must not contain the delimiter.
pub fn hash_token(token: &str, salt: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(salt.as_bytes());
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();

    format!(
        "{HASH_ALGORITHM}{HASH_DELIMITER}{salt}{HASH_DELIMITER}{}",
        hex::encode(digest)
    )
}

/// Generate a random hex salt for a new credential
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill(&mut salt);
    hex::encode(salt)
}

/// Byte equality whose running time does not depend on where the first
/// difference is. Length mismatch returns early.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    match scan_difference(a, b) {
        Some((diff, _)) => diff == 0,
        None => false,
    }
}

/// OR of all positionwise XORs plus the number of byte pairs visited, or
/// `None` when the lengths differ.
pub(crate) fn scan_difference(a: &[u8], b: &[u8]) -> Option<(u8, usize)> {
    if a.len() != b.len() {
        return None;
    }

    let mut diff = 0u8;
    let mut scanned = 0usize;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
        scanned += 1;
    }
    Some((diff, scanned))
}
