//! In-memory implementations of the storage traits
//!
//! Provides `MemoryViolationStore`, `MemoryCommentStore` and
//! `MemoryEvaluationLock`. They satisfy the trait contracts without any
//! external dependencies and back both the test suites and the CLI.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::records::ViolationRecord;
use crate::storage_traits::*;

fn guard<T>(mutex: &Mutex<T>) -> StorageResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StorageError::Backend("in-memory store mutex poisoned".to_string()))
}

// ---------------------------------------------------------------------------
// MemoryViolationStore
// ---------------------------------------------------------------------------

/// In-memory violation store backed by `HashMap<mr_id, BTreeMap<policy_id, record>>`.
#[derive(Debug, Default)]
pub struct MemoryViolationStore {
    records: Mutex<HashMap<u64, BTreeMap<u64, ViolationRecord>>>,
}

impl MemoryViolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = ViolationRecord>) -> Self {
        let mut map: HashMap<u64, BTreeMap<u64, ViolationRecord>> = HashMap::new();
        for record in records {
            map.entry(record.merge_request_id)
                .or_default()
                .insert(record.policy_id, record);
        }
        Self {
            records: Mutex::new(map),
        }
    }
}

#[async_trait]
impl ViolationStore for MemoryViolationStore {
    async fn list(&self, merge_request_id: u64) -> StorageResult<Vec<ViolationRecord>> {
        let records = guard(&self.records)?;
        Ok(records
            .get(&merge_request_id)
            .map(|by_policy| by_policy.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert(&self, record: ViolationRecord) -> StorageResult<()> {
        let mut records = guard(&self.records)?;
        records
            .entry(record.merge_request_id)
            .or_default()
            .insert(record.policy_id, record);
        Ok(())
    }

    async fn delete(&self, merge_request_id: u64, policy_id: u64) -> StorageResult<bool> {
        let mut records = guard(&self.records)?;
        Ok(records
            .get_mut(&merge_request_id)
            .and_then(|by_policy| by_policy.remove(&policy_id))
            .is_some())
    }
}

// ---------------------------------------------------------------------------
// MemoryCommentStore
// ---------------------------------------------------------------------------

/// In-memory bot comment store backed by `HashMap<mr_id, BotComment>`.
#[derive(Debug, Default)]
pub struct MemoryCommentStore {
    comments: Mutex<HashMap<u64, BotComment>>,
}

impl MemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding an existing comment body for one merge request.
    pub fn with_comment(merge_request_id: u64, body: String) -> Self {
        let store = Self::default();
        if let Ok(mut comments) = store.comments.lock() {
            comments.insert(merge_request_id, BotComment::new(merge_request_id, body));
        }
        store
    }
}

#[async_trait]
impl CommentStore for MemoryCommentStore {
    async fn find(&self, merge_request_id: u64) -> StorageResult<Option<BotComment>> {
        let comments = guard(&self.comments)?;
        Ok(comments.get(&merge_request_id).cloned())
    }

    async fn upsert(&self, merge_request_id: u64, body: String) -> StorageResult<BotComment> {
        let comment = BotComment::new(merge_request_id, body);
        let mut comments = guard(&self.comments)?;
        comments.insert(merge_request_id, comment.clone());
        Ok(comment)
    }
}

// ---------------------------------------------------------------------------
// MemoryEvaluationLock
// ---------------------------------------------------------------------------

/// In-memory lock table backed by `HashMap<key, LockToken>`.
///
/// Expired tokens are replaced lazily on the next `try_acquire`.
#[derive(Debug, Default)]
pub struct MemoryEvaluationLock {
    held: Mutex<HashMap<String, LockToken>>,
}

impl MemoryEvaluationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live token currently holds `key`.
    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .map(|held| {
                held.get(key)
                    .map(|t| !t.is_expired(Utc::now()))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl EvaluationLock for MemoryEvaluationLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> StorageResult<Option<LockToken>> {
        let mut held = guard(&self.held)?;
        if let Some(current) = held.get(key) {
            if !current.is_expired(Utc::now()) {
                return Ok(None);
            }
            tracing::debug!(key = %key, "replacing expired lock");
        }
        let token = LockToken::new(key, ttl);
        held.insert(key.to_string(), token.clone());
        Ok(Some(token))
    }

    async fn release(&self, token: &LockToken) -> StorageResult<()> {
        let mut held = guard(&self.held)?;
        match held.get(&token.key) {
            Some(current) if current.token == token.token => {
                held.remove(&token.key);
                Ok(())
            }
            _ => Err(StorageError::LockNotHeld {
                key: token.key.clone(),
                token: token.token.clone(),
            }),
        }
    }
}
