//! Error types for policy-gate-state

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No violation stored for the given merge request and policy
    #[error("Violation not found: merge request {merge_request_id}, policy {policy_id}")]
    ViolationNotFound {
        merge_request_id: u64,
        policy_id: u64,
    },

    /// Lock token no longer owns the key (expired or stolen)
    #[error("Lock {key} is not held by token {token}")]
    LockNotHeld { key: String, token: String },

    /// A record failed validation before being written
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Backend failure (connection, poisoned state, ...)
    #[error("Storage backend failed: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
