//! Policy-Gate Core: approval policy evaluation for merge requests
//!
//! Decides, per approval rule, whether a change violates its security
//! approval policy and how many approvals the rule should require. Results
//! are persisted as per-policy violation records and summarized in a single
//! bot comment on the merge request.
//!
//! ## Layers
//!
//! - `engine`: pure evaluation of an [`EvaluationInput`]
//! - `violations`, `details`, `comment`: what gets stored and rendered
//! - `service`: async orchestration over the `policy-gate-state` traits

pub mod any_merge_request;
pub mod comment;
pub mod config;
pub mod details;
pub mod domain;
pub mod engine;
pub mod evaluation;
pub mod findings;
pub mod lease;
pub mod license_finding;
pub mod metrics;
pub mod obs;
pub mod preexisting;
pub mod scan_finding;
pub mod service;
pub mod telemetry;
pub mod violations;

pub use comment::PolicyViolationComment;
pub use config::{LockConfig, PolicyGateConfig};
pub use details::PolicyViolationDetails;
pub use domain::{
    ApprovalRule, ChangeState, ChangeUnderReview, Commit, EvaluationInput, FailMode, Finding,
    FindingUuid, LicenseList, LicenseState, PipelineReport, PipelineStatus, PolicyGateError,
    ReportType, Result, ScanResultPolicyRead, ScanType, Severity, Vulnerability,
    VulnerabilityState,
};
pub use engine::{
    evaluate, skip_evaluation, CommentDirective, EvaluationOutcome, RuleUpdate, SkipReason,
};
pub use evaluation::RuleEvaluation;
pub use lease::with_exclusive_lease;
pub use metrics::METRICS;
pub use service::{CommentAction, EvaluationReport, PolicyEvaluationService};
pub use telemetry::init_tracing;
pub use violations::{AuditEvent, ErrorCode, ViolationChangeSet, ViolationCollector};

pub use policy_gate_state::{
    BodyDigest, BotComment, CommentStore, EvaluationLock, ViolationRecord, ViolationStatus,
    ViolationStore,
};
