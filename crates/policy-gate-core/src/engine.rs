//! Approval policy evaluation engine.
//!
//! [`evaluate`] is a pure function of an [`EvaluationInput`]: it decides per
//! rule whether the policy is violated, applies fail-open/fail-closed
//! semantics, and reports the approvals each rule should require. Nothing
//! is written here; see [`crate::service`] for persistence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::PolicyGateConfig;
use crate::domain::{ApprovalRule, EvaluationInput, ReportType, Result, ScanResultPolicyRead};
use crate::evaluation::{EvaluationContext, RuleEvaluation};
use crate::metrics::METRICS;
use crate::obs;
use crate::violations::{AuditEvent, ErrorCode, ViolationCollector};
use crate::{any_merge_request, license_finding, preexisting, scan_finding};

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Why a whole evaluation was a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotOpen,
    StalePipeline,
}

impl SkipReason {
    pub fn describe(&self) -> &'static str {
        match self {
            SkipReason::NotOpen => "merge request is not open",
            SkipReason::StalePipeline => "pipeline is not for the latest commit",
        }
    }
}

/// New required approvals for one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUpdate {
    pub rule_id: u64,
    pub rule_name: String,
    pub previous: u32,
    pub approvals_required: u32,
    pub reason: String,
}

impl RuleUpdate {
    pub fn changed(&self) -> bool {
        self.previous != self.approvals_required
    }
}

/// How the bot comment should change for one report type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentDirective {
    pub report_type: ReportType,
    pub violated: bool,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub merge_request_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    pub evaluations: Vec<RuleEvaluation>,
    pub rule_updates: Vec<RuleUpdate>,
    #[serde(skip)]
    pub collector: Option<ViolationCollector>,
    pub comment_directives: Vec<CommentDirective>,
    pub audit_events: Vec<AuditEvent>,
}

impl EvaluationOutcome {
    fn skipped(merge_request_id: u64, reason: SkipReason) -> Self {
        Self {
            merge_request_id,
            skipped: Some(reason),
            evaluations: Vec::new(),
            rule_updates: Vec::new(),
            collector: None,
            comment_directives: Vec::new(),
            audit_events: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    /// Whether any rule still requires approval.
    pub fn requires_approval(&self) -> bool {
        self.rule_updates.iter().any(|u| u.approvals_required > 0)
    }

    pub fn violated_rule_ids(&self) -> Vec<u64> {
        self.evaluations
            .iter()
            .filter(|e| e.violated)
            .map(|e| e.rule_id)
            .collect()
    }

    pub fn rule_update(&self, rule_id: u64) -> Option<&RuleUpdate> {
        self.rule_updates.iter().find(|u| u.rule_id == rule_id)
    }

    pub fn evaluation(&self, rule_id: u64) -> Option<&RuleEvaluation> {
        self.evaluations.iter().find(|e| e.rule_id == rule_id)
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

struct Run<'a> {
    ctx: EvaluationContext<'a>,
    collector: ViolationCollector,
    evaluations: Vec<RuleEvaluation>,
    rule_updates: Vec<RuleUpdate>,
    audit_events: Vec<AuditEvent>,
    /// Report type to (reportable, requires approval, bot message enabled).
    report_types: BTreeMap<ReportType, (bool, bool, bool)>,
}

impl<'a> Run<'a> {
    fn new(input: &'a EvaluationInput, config: &'a PolicyGateConfig) -> Self {
        Self {
            ctx: EvaluationContext::new(input, config),
            collector: ViolationCollector::new(input.change.id, config),
            evaluations: Vec::new(),
            rule_updates: Vec::new(),
            audit_events: Vec::new(),
            report_types: BTreeMap::new(),
        }
    }

    fn warn_mode(&self, policy: &ScanResultPolicyRead) -> bool {
        policy.warn_mode && self.ctx.config.warn_mode_enabled
    }

    /// Apply fail semantics to `eval` and record the result.
    fn resolve(
        &mut self,
        rule: &ApprovalRule,
        policy: &ScanResultPolicyRead,
        mut eval: RuleEvaluation,
    ) {
        let input = self.ctx.input;
        let context = Some(self.ctx.violation_context());

        let (requires_approval, reason) = if let Some(error) = eval.violation_error() {
            let code = error.error.clone();
            self.collector.add_error(policy, error, context);
            if policy.fail_open() {
                self.record_bypass(policy, &code);
                (false, format!("{code}: policy fails open"))
            } else {
                (true, format!("{code}: policy fails closed"))
            }
        } else if eval.violated {
            self.collector.add_violation(policy, &eval.violations, context);
            METRICS.add_rules_violated(1);
            (
                !self.warn_mode(policy),
                format!("{} rule violated", rule.report_type),
            )
        } else {
            self.collector.remove_violation(policy.id);
            let reason = if eval.unblocked_by_execution_policy {
                "removed scans are enforced by scan execution policies".to_string()
            } else {
                format!("{} rule not violated", rule.report_type)
            };
            (false, reason)
        };

        eval.requires_approval = requires_approval;
        let approvals_required = if requires_approval {
            rule.policy_approvals_required
        } else {
            0
        };
        if approvals_required != rule.approvals_required {
            obs::emit_rule_updated(&input.change, rule, approvals_required, &reason);
        }

        let entry = self
            .report_types
            .entry(rule.report_type)
            .or_insert((false, false, false));
        entry.0 |= eval.reportable();
        entry.1 |= requires_approval;
        entry.2 |= !policy.bot_message_disabled();

        self.rule_updates.push(RuleUpdate {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            previous: rule.approvals_required,
            approvals_required,
            reason,
        });
        self.evaluations.push(eval);
    }

    fn record_bypass(&mut self, policy: &ScanResultPolicyRead, code: &str) {
        let event = AuditEvent::FailOpenBypass {
            merge_request_id: self.ctx.input.change.id,
            policy_id: policy.id,
            policy_name: policy.name.clone(),
            error: code.to_string(),
        };
        if self.audit_events.contains(&event) {
            return;
        }
        METRICS.inc_fail_open_bypasses();
        obs::emit_fail_open_bypass(&self.ctx.input.change, policy.id, code);
        self.audit_events.push(event);
    }

    /// A rule whose branches exclude the target: no approvals, no violation.
    fn not_applicable(&mut self, rule: &ApprovalRule, policy: &ScanResultPolicyRead) {
        self.collector.remove_violation(policy.id);
        self.report_types
            .entry(rule.report_type)
            .or_insert((false, false, false));
        self.rule_updates.push(RuleUpdate {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            previous: rule.approvals_required,
            approvals_required: 0,
            reason: "rule does not apply to the target branch".to_string(),
        });
    }

    fn finish(self) -> EvaluationOutcome {
        let comment_directives = if self.ctx.config.bot_comments_enabled {
            self.report_types
                .iter()
                .map(|(report_type, (reportable, requires_approval, bot_enabled))| {
                    CommentDirective {
                        report_type: *report_type,
                        violated: *reportable && *bot_enabled,
                        requires_approval: *requires_approval,
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        EvaluationOutcome {
            merge_request_id: self.ctx.input.change.id,
            skipped: None,
            evaluations: self.evaluations,
            rule_updates: self.rule_updates,
            collector: Some(self.collector),
            comment_directives,
            audit_events: self.audit_events,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

fn skip_reason(input: &EvaluationInput) -> Option<SkipReason> {
    if !input.change.is_open() {
        return Some(SkipReason::NotOpen);
    }
    match input.primary_pipeline() {
        Some(p) if p.sha != input.change.diff_head_sha => Some(SkipReason::StalePipeline),
        _ => None,
    }
}

fn evaluate_rule(
    ctx: &EvaluationContext<'_>,
    rule: &ApprovalRule,
    policy: &ScanResultPolicyRead,
) -> RuleEvaluation {
    match rule.report_type {
        ReportType::ScanFinding if rule.is_preexisting_state_rule() => {
            preexisting::evaluate_rule(ctx, rule, policy)
        }
        ReportType::ScanFinding => scan_finding::evaluate_rule(ctx, rule, policy),
        ReportType::LicenseScanning => license_finding::evaluate_rule(ctx, rule, policy),
        ReportType::AnyMergeRequest => any_merge_request::evaluate_rule(ctx, rule, policy),
    }
}

/// Evaluate every rule of the change.
pub fn evaluate(input: &EvaluationInput, config: &PolicyGateConfig) -> Result<EvaluationOutcome> {
    input.validate()?;
    METRICS.inc_evaluations();
    let _span = obs::EvaluationSpan::enter(&input.change);

    if let Some(reason) = skip_reason(input) {
        obs::emit_evaluation_skipped(&input.change, reason.describe());
        return Ok(EvaluationOutcome::skipped(input.change.id, reason));
    }

    let mut run = Run::new(input, config);
    obs::emit_evaluation_started(
        &input.change,
        &run.ctx.pipeline_ids,
        &run.ctx.target_pipeline_ids,
    );

    let scan_rules = input
        .rules
        .iter()
        .any(|r| r.report_type == ReportType::ScanFinding && !r.is_preexisting_state_rule());
    if scan_rules && !run.ctx.security_reports_available() {
        obs::emit_reports_missing(&input.change, &run.ctx.pipeline_ids);
    }

    for rule in &input.rules {
        let policy = input.policy_for(rule)?;
        if !rule.applies_to_branch(&input.change.target_branch) {
            run.not_applicable(rule, policy);
            continue;
        }
        let eval = evaluate_rule(&run.ctx, rule, policy);
        run.resolve(rule, policy, eval);
    }

    Ok(run.finish())
}

/// Mark every applicable policy as not evaluated in time.
///
/// Used when reports never arrived within the evaluation window.
pub fn skip_evaluation(
    input: &EvaluationInput,
    config: &PolicyGateConfig,
) -> Result<EvaluationOutcome> {
    input.validate()?;
    let _span = obs::EvaluationSpan::enter(&input.change);

    if !input.change.is_open() {
        obs::emit_evaluation_skipped(&input.change, SkipReason::NotOpen.describe());
        return Ok(EvaluationOutcome::skipped(input.change.id, SkipReason::NotOpen));
    }

    let mut run = Run::new(input, config);
    for rule in &input.rules {
        let policy = input.policy_for(rule)?;
        if !rule.applies_to_branch(&input.change.target_branch) {
            run.not_applicable(rule, policy);
            continue;
        }
        let eval = RuleEvaluation::errored(rule, ErrorCode::EvaluationSkipped);
        run.resolve(rule, policy, eval);
    }

    Ok(run.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ChangeState, ChangeUnderReview, FailMode, Finding, FindingUuid, PipelineReport, ScanType,
        Severity,
    };
    use chrono::Utc;
    use policy_gate_state::ViolationStatus;
    use std::collections::BTreeSet;

    fn finding(uuid: &str) -> Finding {
        Finding {
            uuid: FindingUuid::new(uuid),
            scan_type: ScanType::Sast,
            severity: Severity::High,
            name: String::new(),
            false_positive: false,
            fix_available: false,
        }
    }

    fn input(source: &[&str], target: &[&str]) -> EvaluationInput {
        let mut src = PipelineReport::new(2, "abc").with_scan(ScanType::Sast);
        for f in source {
            src = src.with_finding(finding(f));
        }
        let mut tgt = PipelineReport::new(1, "def").with_scan(ScanType::Sast);
        for f in target {
            tgt = tgt.with_finding(finding(f));
        }
        EvaluationInput {
            change: ChangeUnderReview {
                id: 5,
                iid: 1,
                project_path: "g/p".into(),
                web_url: None,
                source_branch: "feature".into(),
                target_branch: "main".into(),
                diff_head_sha: "abc".into(),
                state: ChangeState::Opened,
                commits: vec![],
            },
            rules: vec![ApprovalRule::new(1, ReportType::ScanFinding, 10, 2)],
            policies: vec![ScanResultPolicyRead::new(10, "Scan")],
            source_pipelines: vec![src],
            target_pipelines: vec![tgt],
            vulnerabilities: vec![],
            enforced_scans: BTreeSet::new(),
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn test_violation_restores_approvals() {
        let mut i = input(&["A", "B"], &["A"]);
        i.rules[0].approvals_required = 0;
        let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
        let update = outcome.rule_update(1).unwrap();
        assert_eq!(update.approvals_required, 2);
        assert!(update.changed());
        assert!(outcome.requires_approval());
    }

    #[test]
    fn test_clean_rule_gets_zero_approvals() {
        let outcome = evaluate(&input(&["A"], &["A"]), &PolicyGateConfig::default()).unwrap();
        assert_eq!(outcome.rule_update(1).unwrap().approvals_required, 0);
        assert!(outcome.violated_rule_ids().is_empty());
        assert_eq!(
            outcome.collector.as_ref().unwrap().resolved_policy_ids(),
            vec![10]
        );
    }

    #[test]
    fn test_closed_change_is_noop() {
        let mut i = input(&["A", "B"], &["A"]);
        i.change.state = ChangeState::Merged;
        let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
        assert_eq!(outcome.skipped, Some(SkipReason::NotOpen));
        assert!(outcome.rule_updates.is_empty());
    }

    #[test]
    fn test_stale_pipeline_is_noop() {
        let mut i = input(&["A", "B"], &["A"]);
        i.change.diff_head_sha = "newer".into();
        let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
        assert_eq!(outcome.skipped, Some(SkipReason::StalePipeline));
    }

    #[test]
    fn test_branch_mismatch_is_not_applicable() {
        let mut i = input(&["A", "B"], &["A"]);
        i.rules[0].branches = vec!["release".into()];
        let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
        assert_eq!(outcome.rule_update(1).unwrap().approvals_required, 0);
        assert!(outcome.evaluations.is_empty());
    }

    #[test]
    fn test_warn_mode_never_requires_approval() {
        let mut i = input(&["A", "B"], &["A"]);
        i.policies[0].warn_mode = true;
        let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
        assert_eq!(outcome.rule_update(1).unwrap().approvals_required, 0);
        let collector = outcome.collector.as_ref().unwrap();
        assert_eq!(collector.status(10), Some(ViolationStatus::Warn));
        assert_eq!(
            outcome.comment_directives,
            vec![CommentDirective {
                report_type: ReportType::ScanFinding,
                violated: true,
                requires_approval: false,
            }]
        );
    }

    #[test]
    fn test_skip_evaluation_fail_open_and_closed() {
        let mut i = input(&[], &[]);
        i.rules.push(ApprovalRule::new(2, ReportType::ScanFinding, 11, 1));
        i.policies
            .push(ScanResultPolicyRead::new(11, "Open").with_fail_mode(FailMode::Open));
        let outcome = skip_evaluation(&i, &PolicyGateConfig::default()).unwrap();
        let collector = outcome.collector.as_ref().unwrap();
        assert_eq!(collector.status(10), Some(ViolationStatus::Skipped));
        assert_eq!(collector.status(11), Some(ViolationStatus::Warn));
        assert_eq!(outcome.rule_update(1).unwrap().approvals_required, 2);
        assert_eq!(outcome.rule_update(2).unwrap().approvals_required, 0);
        assert_eq!(outcome.audit_events.len(), 1);
    }

    #[test]
    fn test_bot_comments_disabled_produces_no_directives() {
        let config = PolicyGateConfig {
            bot_comments_enabled: false,
            ..Default::default()
        };
        let outcome = evaluate(&input(&["A", "B"], &["A"]), &config).unwrap();
        assert!(outcome.comment_directives.is_empty());
    }

    #[test]
    fn test_bot_message_disabled_policy_suppresses_report() {
        let mut i = input(&["A", "B"], &["A"]);
        i.policies[0].send_bot_message.enabled = false;
        let outcome = evaluate(&i, &PolicyGateConfig::default()).unwrap();
        assert!(!outcome.comment_directives[0].violated);
        assert_eq!(outcome.rule_update(1).unwrap().approvals_required, 2);
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let mut i = input(&[], &[]);
        i.rules[0].policy_id = 404;
        assert!(evaluate(&i, &PolicyGateConfig::default()).is_err());
    }
}
