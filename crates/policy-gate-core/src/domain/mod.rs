//! Domain types for merge request approval policy evaluation.

pub mod change;
pub mod error;
pub mod finding;
pub mod input;
pub mod pipeline;
pub mod policy;
pub mod rule;

pub use change::{ChangeState, ChangeUnderReview, Commit};
pub use error::{PolicyGateError, Result};
pub use finding::{Finding, FindingUuid, ScanType, Severity, Vulnerability, VulnerabilityState};
pub use input::EvaluationInput;
pub use pipeline::{completed_scans, pipeline_ids, LicenseUsage, PipelineReport, PipelineStatus};
pub use policy::{
    AgeInterval, AgeOperator, BotMessage, CommitsRule, FailMode, FallbackBehavior, LicenseList,
    LicenseState, PolicyTuning, ScanResultPolicyRead, VulnerabilityAge, VulnerabilityAttributes,
};
pub use rule::{ApprovalRule, ReportType};
