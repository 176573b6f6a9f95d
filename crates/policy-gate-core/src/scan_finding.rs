//! scan_finding rules: findings introduced by the change, optionally
//! together with vulnerabilities that already existed.

use std::collections::BTreeSet;

use policy_gate_state::{ReportViolations, ScanFindingUuids, ScanFindingViolation};

use crate::domain::{completed_scans, ApprovalRule, FindingUuid, ScanResultPolicyRead, ScanType};
use crate::evaluation::{EvaluationContext, RuleEvaluation};
use crate::findings::{counted_new_uuids, previously_existing_uuids, FindingSets};
use crate::obs;
use crate::violations::ErrorCode;

/// Scans the rule needs that no source pipeline ran.
///
/// A rule without scanners requires every scan the target ran. With a
/// target pipeline, only scans the target ran count as removed; without
/// one, every listed scanner is required.
pub fn missing_scans(ctx: &EvaluationContext<'_>, rule: &ApprovalRule) -> Vec<ScanType> {
    let has_target = !ctx.input.target_pipelines.is_empty();
    let target_scans = completed_scans(&ctx.input.target_pipelines);
    let source_scans = completed_scans(&ctx.input.source_pipelines);
    let required: BTreeSet<ScanType> = if rule.scanners.is_empty() {
        target_scans.clone()
    } else {
        rule.scanners.iter().copied().collect()
    };

    required
        .into_iter()
        .filter(|s| (!has_target || target_scans.contains(s)) && !source_scans.contains(s))
        .collect()
}

fn unblocked_by_execution_policies(
    ctx: &EvaluationContext<'_>,
    rule: &ApprovalRule,
    policy: &ScanResultPolicyRead,
    missing: &[ScanType],
) -> bool {
    policy.unblock_rules_using_execution_policies()
        && rule.only_newly_detected()
        && missing.iter().all(|s| ctx.input.enforced_scans.contains(s))
}

fn to_strings(uuids: &BTreeSet<FindingUuid>) -> Vec<String> {
    uuids.iter().map(|u| u.as_str().to_string()).collect()
}

pub fn evaluate_rule(
    ctx: &EvaluationContext<'_>,
    rule: &ApprovalRule,
    policy: &ScanResultPolicyRead,
) -> RuleEvaluation {
    if !ctx.security_reports_available() {
        return RuleEvaluation::errored(rule, ctx.missing_reports_error());
    }

    let missing = missing_scans(ctx, rule);
    if !missing.is_empty() {
        if unblocked_by_execution_policies(ctx, rule, policy, &missing) {
            return RuleEvaluation {
                unblocked_by_execution_policy: true,
                ..RuleEvaluation::clean(rule)
            };
        }
        let names: Vec<String> = missing.iter().map(|s| s.as_str().to_string()).collect();
        obs::emit_scan_removed(&ctx.input.change, rule, &names);
        return RuleEvaluation::errored(rule, ErrorCode::ScanRemoved).with_missing_scans(missing);
    }

    let sets = FindingSets::compute(
        &ctx.input.source_pipelines,
        &ctx.input.target_pipelines,
        rule,
        policy,
    );
    let newly_detected = counted_new_uuids(rule, &sets.new_uuids, &ctx.vulnerabilities);
    let previously_existing = if rule.only_newly_detected() {
        BTreeSet::new()
    } else {
        previously_existing_uuids(
            &sets,
            rule,
            policy,
            &ctx.vulnerabilities,
            ctx.input.evaluated_at,
        )
    };

    let total = newly_detected.len() + previously_existing.len();
    if total <= rule.vulnerabilities_allowed as usize {
        return RuleEvaluation::clean(rule);
    }

    let violations = ReportViolations {
        scan_finding: Some(ScanFindingViolation {
            uuids: ScanFindingUuids {
                newly_detected: to_strings(&newly_detected),
                previously_existing: to_strings(&previously_existing),
            },
        }),
        ..Default::default()
    };
    RuleEvaluation {
        newly_detected,
        previously_existing,
        ..RuleEvaluation::violated(rule, violations)
    }
}
