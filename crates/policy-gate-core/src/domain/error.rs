//! Domain-level error taxonomy for policy evaluation.

use policy_gate_state::StorageError;

/// Policy gate errors.
#[derive(Debug, thiserror::Error)]
pub enum PolicyGateError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rule {rule_id} references unknown policy {policy_id}")]
    UnknownPolicy { rule_id: u64, policy_id: u64 },

    #[error("unknown report type: {0}")]
    UnknownReportType(String),

    /// Another evaluation holds the change's lock. Retrying later is safe.
    #[error("could not acquire lock {key} after {attempts} attempts")]
    LockNotAcquired { key: String, attempts: u32 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PolicyGateError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PolicyGateError::LockNotAcquired { .. })
    }
}

/// Result type for policy gate operations.
pub type Result<T> = std::result::Result<T, PolicyGateError>;
