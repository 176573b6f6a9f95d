//! any_merge_request rules: require approval for every change, or for
//! changes carrying unsigned commits.

use policy_gate_state::{AnyMergeRequestCommits, AnyMergeRequestViolation, ReportViolations};

use crate::domain::{ApprovalRule, CommitsRule, ScanResultPolicyRead};
use crate::evaluation::{EvaluationContext, RuleEvaluation};

pub fn evaluate_rule(
    ctx: &EvaluationContext<'_>,
    rule: &ApprovalRule,
    policy: &ScanResultPolicyRead,
) -> RuleEvaluation {
    let change = &ctx.input.change;
    let commits = match policy.commits {
        Some(CommitsRule::Any) if !change.commits.is_empty() => AnyMergeRequestCommits::Any(true),
        Some(CommitsRule::Unsigned) => {
            let unsigned = change.unsigned_commits();
            if unsigned.is_empty() {
                return RuleEvaluation::clean(rule);
            }
            AnyMergeRequestCommits::Shas(unsigned.into_iter().map(str::to_string).collect())
        }
        _ => return RuleEvaluation::clean(rule),
    };

    RuleEvaluation::violated(
        rule,
        ReportViolations {
            any_merge_request: Some(AnyMergeRequestViolation { commits }),
            ..Default::default()
        },
    )
}
