//! Structured observability hooks for approval policy evaluation.
//!
//! Every event carries `workflow = "approval_policy_evaluation"` so log
//! pipelines can isolate evaluation traffic. Events that change a rule's
//! required approvals also carry `event = "update_approvals"`.
//!
//! Verbosity is controlled with `RUST_LOG`; JSON output via
//! [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::domain::{ApprovalRule, ChangeUnderReview};
use crate::violations::AuditEvent;

pub const WORKFLOW: &str = "approval_policy_evaluation";

/// RAII guard that enters a change-scoped span for one evaluation.
pub struct EvaluationSpan {
    _span: tracing::span::EnteredSpan,
}

impl EvaluationSpan {
    pub fn enter(change: &ChangeUnderReview) -> Self {
        let span = tracing::info_span!(
            "policy_gate.evaluation",
            merge_request_id = change.id,
            merge_request_iid = change.iid,
            project_path = %change.project_path,
        );
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_evaluation_started(
    change: &ChangeUnderReview,
    pipeline_ids: &[u64],
    target_pipeline_ids: &[u64],
) {
    info!(
        workflow = WORKFLOW,
        message = "Evaluating scan_finding rules from approval policies",
        merge_request_id = change.id,
        merge_request_iid = change.iid,
        project_path = %change.project_path,
        pipeline_ids = ?pipeline_ids,
        target_pipeline_ids = ?target_pipeline_ids,
    );
}

pub fn emit_evaluation_skipped(change: &ChangeUnderReview, reason: &str) {
    info!(
        workflow = WORKFLOW,
        merge_request_id = change.id,
        reason = %reason,
        "evaluation skipped"
    );
}

pub fn emit_reports_missing(change: &ChangeUnderReview, pipeline_ids: &[u64]) {
    info!(
        workflow = WORKFLOW,
        message = "No security reports found for the pipeline",
        merge_request_id = change.id,
        pipeline_ids = ?pipeline_ids,
    );
}

/// A rule's approvals are being changed.
pub fn emit_rule_updated(
    change: &ChangeUnderReview,
    rule: &ApprovalRule,
    approvals_required: u32,
    reason: &str,
) {
    info!(
        workflow = WORKFLOW,
        event = "update_approvals",
        message = "Updating MR approval rule",
        merge_request_id = change.id,
        merge_request_iid = change.iid,
        approval_rule_id = rule.id,
        approval_rule_name = %rule.name,
        approvals_required = approvals_required,
        reason = %reason,
    );
}

pub fn emit_scan_removed(change: &ChangeUnderReview, rule: &ApprovalRule, missing_scans: &[String]) {
    info!(
        workflow = WORKFLOW,
        event = "update_approvals",
        merge_request_id = change.id,
        approval_rule_id = rule.id,
        approval_rule_name = %rule.name,
        reason = "Scanner removed by MR",
        missing_scans = ?missing_scans,
    );
}

/// A fail-open policy let an unevaluable rule through.
pub fn emit_fail_open_bypass(change: &ChangeUnderReview, policy_id: u64, error: &str) {
    warn!(
        workflow = WORKFLOW,
        event = "fail_open_bypass",
        merge_request_id = change.id,
        policy_id = policy_id,
        error = %error,
    );
}

pub fn emit_comment_written(merge_request_id: u64, action: &str, digest: &str) {
    info!(
        workflow = WORKFLOW,
        event = "policy_violation_comment",
        merge_request_id = merge_request_id,
        action = %action,
        digest = %digest,
    );
}

/// Audit trail entry; the payload is the event serialized as JSON.
pub fn emit_audit_event(event: &AuditEvent) {
    let payload = serde_json::to_string(event).unwrap_or_default();
    info!(
        workflow = WORKFLOW,
        event = "audit",
        audit_event = event.name(),
        payload = %payload,
    );
}

pub fn emit_lock_contended(key: &str, attempt: u32) {
    tracing::debug!(workflow = WORKFLOW, key = %key, attempt = attempt, "lock busy, retrying");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeState;

    #[test]
    fn test_evaluation_span_create() {
        let change = ChangeUnderReview {
            id: 1,
            iid: 2,
            project_path: "g/p".into(),
            web_url: None,
            source_branch: "f".into(),
            target_branch: "main".into(),
            diff_head_sha: "abc".into(),
            state: ChangeState::Opened,
            commits: vec![],
        };
        let _span = EvaluationSpan::enter(&change);
        emit_evaluation_skipped(&change, "test");
    }
}
