//! Shared inputs and outputs of the per-report-type rule evaluators.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use policy_gate_state::{ReportViolations, ViolationContext, ViolationError};

use crate::config::PolicyGateConfig;
use crate::domain::{
    pipeline_ids, ApprovalRule, EvaluationInput, FindingUuid, PipelineStatus, ReportType, ScanType,
};
use crate::findings::VulnerabilityIndex;
use crate::violations::ErrorCode;

/// Read-only view of one evaluation run.
pub struct EvaluationContext<'a> {
    pub input: &'a EvaluationInput,
    pub config: &'a PolicyGateConfig,
    pub vulnerabilities: VulnerabilityIndex<'a>,
    pub pipeline_ids: Vec<u64>,
    pub target_pipeline_ids: Vec<u64>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(input: &'a EvaluationInput, config: &'a PolicyGateConfig) -> Self {
        Self {
            input,
            config,
            vulnerabilities: input.vulnerability_index(),
            pipeline_ids: pipeline_ids(&input.source_pipelines),
            target_pipeline_ids: pipeline_ids(&input.target_pipelines),
        }
    }

    pub fn violation_context(&self) -> ViolationContext {
        ViolationContext {
            pipeline_ids: self.pipeline_ids.clone(),
            target_pipeline_ids: self.target_pipeline_ids.clone(),
        }
    }

    /// Whether any source pipeline produced security reports.
    pub fn security_reports_available(&self) -> bool {
        self.input
            .source_pipelines
            .iter()
            .any(|p| p.can_store_security_reports)
    }

    pub fn sbom_available(&self) -> bool {
        self.input.source_pipelines.iter().any(|p| p.sbom_available)
    }

    pub fn target_sbom_available(&self) -> bool {
        self.input.target_pipelines.iter().any(|p| p.sbom_available)
    }

    /// Error code for reports that are missing from the source side.
    pub fn missing_reports_error(&self) -> ErrorCode {
        match self.input.primary_pipeline() {
            Some(p) if p.status == PipelineStatus::Failed => ErrorCode::PipelineFailed,
            _ => ErrorCode::ArtifactsMissing,
        }
    }
}

/// Outcome of evaluating one approval rule, before fail-open/closed semantics
/// decide whether approval is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule_id: u64,
    pub policy_id: u64,
    pub report_type: ReportType,
    pub violated: bool,
    pub newly_detected: BTreeSet<FindingUuid>,
    pub previously_existing: BTreeSet<FindingUuid>,
    /// Data stored when `violated`.
    #[serde(default, skip_serializing_if = "ReportViolations::is_empty")]
    pub violations: ReportViolations,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_scans: Vec<ScanType>,
    /// Scans removed by the change are enforced by scan execution policies.
    #[serde(default)]
    pub unblocked_by_execution_policy: bool,
    /// Whether approval is required after fail semantics were applied.
    #[serde(default)]
    pub requires_approval: bool,
}

impl RuleEvaluation {
    pub fn clean(rule: &ApprovalRule) -> Self {
        Self {
            rule_id: rule.id,
            policy_id: rule.policy_id,
            report_type: rule.report_type,
            violated: false,
            newly_detected: BTreeSet::new(),
            previously_existing: BTreeSet::new(),
            violations: ReportViolations::default(),
            error: None,
            missing_scans: Vec::new(),
            unblocked_by_execution_policy: false,
            requires_approval: false,
        }
    }

    pub fn violated(rule: &ApprovalRule, violations: ReportViolations) -> Self {
        Self {
            violated: true,
            violations,
            ..Self::clean(rule)
        }
    }

    pub fn errored(rule: &ApprovalRule, code: ErrorCode) -> Self {
        Self {
            error: Some(code),
            ..Self::clean(rule)
        }
    }

    pub fn with_missing_scans(mut self, scans: Vec<ScanType>) -> Self {
        self.missing_scans = scans;
        self
    }

    /// The stored form of `error`, if any.
    pub fn violation_error(&self) -> Option<ViolationError> {
        self.error.map(|code| {
            code.to_error().with_missing_scans(
                self.missing_scans
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            )
        })
    }

    /// Violated, or could not be evaluated.
    pub fn reportable(&self) -> bool {
        self.violated || self.error.is_some()
    }
}
