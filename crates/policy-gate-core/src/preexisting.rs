//! scan_finding rules that only select previously existing vulnerabilities.
//!
//! These are judged against the project's vulnerability records, not the
//! pipelines, so missing reports or removed scans do not affect them.

use std::collections::BTreeSet;

use policy_gate_state::{ReportViolations, ScanFindingUuids, ScanFindingViolation};

use crate::domain::{ApprovalRule, FindingUuid, ScanResultPolicyRead};
use crate::evaluation::{EvaluationContext, RuleEvaluation};
use crate::findings::vulnerability_matches;

pub fn evaluate_rule(
    ctx: &EvaluationContext<'_>,
    rule: &ApprovalRule,
    policy: &ScanResultPolicyRead,
) -> RuleEvaluation {
    let now = ctx.input.evaluated_at;
    let matching: BTreeSet<FindingUuid> = ctx
        .input
        .vulnerabilities
        .iter()
        .filter(|v| vulnerability_matches(v, rule, policy, now))
        .map(|v| v.uuid.clone())
        .collect();

    if matching.len() <= rule.vulnerabilities_allowed as usize {
        return RuleEvaluation::clean(rule);
    }

    let violations = ReportViolations {
        scan_finding: Some(ScanFindingViolation {
            uuids: ScanFindingUuids {
                newly_detected: Vec::new(),
                previously_existing: matching.iter().map(|u| u.as_str().to_string()).collect(),
            },
        }),
        ..Default::default()
    };
    RuleEvaluation {
        previously_existing: matching,
        ..RuleEvaluation::violated(rule, violations)
    }
}
