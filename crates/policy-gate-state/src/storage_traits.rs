//! Storage trait definitions for policy-gate
//!
//! These traits define the storage seams of the evaluator:
//! - `ViolationStore`: per-merge-request violation records (one per policy)
//! - `CommentStore`: the single bot comment of a merge request
//! - `EvaluationLock`: short-lived exclusive locks keyed by string
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! via the `fakes` module.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;
use crate::records::ViolationRecord;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ViolationStore
// ---------------------------------------------------------------------------

/// Violation records of merge requests.
///
/// Guarantees:
/// - At most one record per (merge_request_id, policy_id); `upsert` replaces.
/// - `list` returns records ordered by `policy_id`.
/// - `delete` of a missing record is a no-op returning `false`.
#[async_trait]
pub trait ViolationStore: Send + Sync {
    /// All records of a merge request, ordered by policy id.
    async fn list(&self, merge_request_id: u64) -> StorageResult<Vec<ViolationRecord>>;

    /// Insert or replace the record for its (merge request, policy) pair.
    async fn upsert(&self, record: ViolationRecord) -> StorageResult<()>;

    /// Remove the record for a policy. Returns whether a record existed.
    async fn delete(&self, merge_request_id: u64, policy_id: u64) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// CommentStore
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a comment body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BodyDigest(String);

impl BodyDigest {
    /// Compute the digest of a comment body.
    pub fn from_body(body: &str) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(body.as_bytes());
        BodyDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for BodyDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The bot comment attached to a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotComment {
    pub merge_request_id: u64,
    pub body: String,
    pub digest: BodyDigest,
}

impl BotComment {
    pub fn new(merge_request_id: u64, body: String) -> Self {
        let digest = BodyDigest::from_body(&body);
        Self {
            merge_request_id,
            body,
            digest,
        }
    }
}

/// Bot comment storage. A merge request has zero or one bot comment; it is
/// updated in place and never deleted by the evaluator.
#[async_trait]
pub trait CommentStore: Send + Sync {
    /// The current bot comment, if one was ever posted.
    async fn find(&self, merge_request_id: u64) -> StorageResult<Option<BotComment>>;

    /// Create or replace the bot comment body.
    async fn upsert(&self, merge_request_id: u64, body: String) -> StorageResult<BotComment>;
}

// ---------------------------------------------------------------------------
// EvaluationLock
// ---------------------------------------------------------------------------

/// Proof of holding a lock key until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub key: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl LockToken {
    pub fn new(key: &str, ttl: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key: key.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Exclusive, expiring locks.
///
/// Guarantees:
/// - `try_acquire` never blocks: it returns `None` while another live token
///   holds the key.
/// - An expired token no longer holds its key.
/// - `release` by a token that does not hold the key fails with
///   `StorageError::LockNotHeld` and leaves the current holder untouched.
#[async_trait]
pub trait EvaluationLock: Send + Sync {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> StorageResult<Option<LockToken>>;

    async fn release(&self, token: &LockToken) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_digest_is_stable() {
        let a = BodyDigest::from_body("hello");
        let b = BodyDigest::from_body("hello");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
        assert_ne!(a, BodyDigest::from_body("hello!"));
    }

    #[test]
    fn test_lock_token_expiry() {
        let token = LockToken::new("k", Duration::from_secs(60));
        assert!(!token.is_expired(Utc::now()));
        assert!(token.is_expired(token.expires_at));
    }
}
