//! license_scanning rules: licenses used by the change's dependencies
//! checked against a policy's allowed or denied list.

use std::collections::{BTreeMap, BTreeSet};

use policy_gate_state::ReportViolations;

use crate::domain::{ApprovalRule, PipelineReport, ScanResultPolicyRead};
use crate::evaluation::{EvaluationContext, RuleEvaluation};
use crate::violations::ErrorCode;

/// License name to the dependencies using it, across all pipelines.
pub fn licenses_in(pipelines: &[PipelineReport]) -> BTreeMap<String, BTreeSet<String>> {
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for usage in pipelines.iter().flat_map(|p| &p.licenses) {
        out.entry(usage.name.clone())
            .or_default()
            .extend(usage.dependencies.iter().cloned());
    }
    out
}

pub fn evaluate_rule(
    ctx: &EvaluationContext<'_>,
    rule: &ApprovalRule,
    policy: &ScanResultPolicyRead,
) -> RuleEvaluation {
    let Some(list) = &policy.licenses else {
        return RuleEvaluation::clean(rule);
    };

    if !ctx.sbom_available() {
        return RuleEvaluation::errored(rule, ctx.missing_reports_error());
    }
    let only_new = policy.only_newly_detected_licenses();
    if only_new && !ctx.target_sbom_available() {
        return RuleEvaluation::errored(rule, ErrorCode::TargetPipelineMissing);
    }

    let source = licenses_in(&ctx.input.source_pipelines);
    let target = licenses_in(&ctx.input.target_pipelines);

    let violating: BTreeMap<String, Vec<String>> = source
        .into_iter()
        .filter(|(name, _)| !only_new || !target.contains_key(name))
        .filter(|(name, _)| list.violates(name))
        .map(|(name, deps)| (name, deps.into_iter().collect()))
        .collect();

    if violating.is_empty() {
        return RuleEvaluation::clean(rule);
    }

    RuleEvaluation::violated(
        rule,
        ReportViolations {
            license_scanning: Some(violating),
            ..Default::default()
        },
    )
}
