//! Policy-Gate State: persisted violation records and storage seams
//!
//! This crate is the persistence layer of the approval policy evaluator. It
//! owns the shape of what gets stored per merge request and the async traits
//! the evaluator reads and writes through.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: record shape, idempotent upserts, and short-lived exclusive locks.
//!
//! ## Key Components
//!
//! - `ViolationRecord` / `ViolationData`: one record per (merge request, policy)
//! - `ViolationStore`, `CommentStore`, `EvaluationLock`: backend-agnostic traits
//! - `fakes`: in-memory implementations used by tests and the CLI

mod error;
pub mod fakes;
mod records;
pub mod storage_traits;

pub use error::StorageError;
pub use records::{
    AnyMergeRequestCommits, AnyMergeRequestViolation, ReportViolations, ScanFindingUuids,
    ScanFindingViolation, ViolationContext, ViolationData, ViolationError, ViolationRecord,
    ViolationStatus,
};
pub use storage_traits::{
    BodyDigest, BotComment, CommentStore, EvaluationLock, LockToken, StorageResult,
    ViolationStore,
};
