use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RevocationError {
    #[error("revocation backend unavailable: {0}")]
    Unavailable(String),
}

/// A token id invalidated before its natural expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationEntry {
    pub jti: String,
    pub revoked_at: DateTime<Utc>,
    /// Expiry of the revoked token when known; the entry may be purged after it.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Backend consulted on every verification.
///
/// A `revoke` that has returned must be visible to any `is_revoked` call that
/// starts afterwards.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn is_revoked(&self, jti: &str) -> Result<bool, RevocationError>;

    /// Idempotent; revoking an id twice keeps the first entry.
    async fn revoke(&self, entry: RevocationEntry) -> Result<(), RevocationError>;

    /// Removes entries whose token has expired by `now`. Returns how many.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, RevocationError>;
}

/// Sharded in-process store; revokes of different ids do not contend.
#[derive(Clone, Default)]
pub struct InMemoryRevocationStore {
    entries: Arc<DashMap<String, RevocationEntry>>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, jti: &str) -> Option<RevocationEntry> {
        self.entries.get(jti).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn is_revoked(&self, jti: &str) -> Result<bool, RevocationError> {
        Ok(self.entries.contains_key(jti))
    }

    async fn revoke(&self, entry: RevocationEntry) -> Result<(), RevocationError> {
        let expires_at = entry.expires_at;
        self.entries
            .entry(entry.jti.clone())
            .and_modify(|existing| {
                if existing.expires_at.is_none() {
                    existing.expires_at = expires_at;
                }
            })
            .or_insert(entry);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, RevocationError> {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.expires_at.map_or(true, |expires_at| expires_at > now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}
