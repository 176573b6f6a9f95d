//! Finding set computations shared by the scan_finding evaluators.
//!
//! All sets are `BTreeSet`s: identifiers are deduplicated and the result of
//! a difference does not depend on the order findings were reported in.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::domain::{
    ApprovalRule, Finding, FindingUuid, PipelineReport, ScanResultPolicyRead, Vulnerability,
    VulnerabilityState,
};

pub type VulnerabilityIndex<'a> = BTreeMap<&'a FindingUuid, &'a Vulnerability>;

/// Uuids of the findings passing the rule's scanner and severity filters and
/// the policy's attribute filters.
pub fn filter_findings<'a, I>(
    findings: I,
    rule: &ApprovalRule,
    policy: &ScanResultPolicyRead,
) -> BTreeSet<FindingUuid>
where
    I: IntoIterator<Item = &'a Finding>,
{
    findings
        .into_iter()
        .filter(|f| rule.matches_scanner(f.scan_type))
        .filter(|f| rule.matches_severity(f.severity))
        .filter(|f| {
            policy
                .vulnerability_attributes
                .matches(f.false_positive, f.fix_available)
        })
        .map(|f| f.uuid.clone())
        .collect()
}

/// Filtered uuids across every pipeline on one side of the comparison.
pub fn pipeline_findings(
    pipelines: &[PipelineReport],
    rule: &ApprovalRule,
    policy: &ScanResultPolicyRead,
) -> BTreeSet<FindingUuid> {
    filter_findings(pipelines.iter().flat_map(|p| &p.findings), rule, policy)
}

/// The source, target and newly introduced uuids for one rule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindingSets {
    pub pipeline_uuids: BTreeSet<FindingUuid>,
    pub target_uuids: BTreeSet<FindingUuid>,
    pub new_uuids: BTreeSet<FindingUuid>,
}

impl FindingSets {
    pub fn compute(
        source: &[PipelineReport],
        target: &[PipelineReport],
        rule: &ApprovalRule,
        policy: &ScanResultPolicyRead,
    ) -> Self {
        Self::from_sets(
            pipeline_findings(source, rule, policy),
            pipeline_findings(target, rule, policy),
        )
    }

    pub fn from_sets(
        pipeline_uuids: BTreeSet<FindingUuid>,
        target_uuids: BTreeSet<FindingUuid>,
    ) -> Self {
        let new_uuids = pipeline_uuids.difference(&target_uuids).cloned().collect();
        Self {
            pipeline_uuids,
            target_uuids,
            new_uuids,
        }
    }

    /// Uuids seen on either side that the change did not introduce.
    pub fn existing_uuids(&self) -> BTreeSet<FindingUuid> {
        self.pipeline_uuids
            .union(&self.target_uuids)
            .filter(|u| !self.new_uuids.contains(*u))
            .cloned()
            .collect()
    }
}

/// Split new uuids into `(new_needs_triage, new_dismissed)`.
///
/// A new uuid is `new_dismissed` when its vulnerability record was dismissed.
pub fn split_newly_detected(
    new_uuids: &BTreeSet<FindingUuid>,
    index: &VulnerabilityIndex<'_>,
) -> (BTreeSet<FindingUuid>, BTreeSet<FindingUuid>) {
    new_uuids.iter().cloned().partition(|uuid| {
        !index
            .get(uuid)
            .map_or(false, |v| v.state == VulnerabilityState::Dismissed)
    })
}

/// New uuids counted by the rule's newly detected states.
pub fn counted_new_uuids(
    rule: &ApprovalRule,
    new_uuids: &BTreeSet<FindingUuid>,
    index: &VulnerabilityIndex<'_>,
) -> BTreeSet<FindingUuid> {
    let states = rule.newly_detected_states();
    let (needs_triage, dismissed) = split_newly_detected(new_uuids, index);
    let mut counted = BTreeSet::new();
    if states.contains(&VulnerabilityState::NewNeedsTriage) {
        counted.extend(needs_triage);
    }
    if states.contains(&VulnerabilityState::NewDismissed) {
        counted.extend(dismissed);
    }
    counted
}

/// Whether a stored vulnerability passes the rule's filters and the policy's
/// attribute and age filters.
pub fn vulnerability_matches(
    vulnerability: &Vulnerability,
    rule: &ApprovalRule,
    policy: &ScanResultPolicyRead,
    now: DateTime<Utc>,
) -> bool {
    rule.previously_existing_states().contains(&vulnerability.state)
        && rule.matches_scanner(vulnerability.scan_type)
        && rule.matches_severity(vulnerability.severity)
        && policy
            .vulnerability_attributes
            .matches(vulnerability.false_positive, vulnerability.fix_available)
        && policy
            .vulnerability_age
            .map_or(true, |age| age.matches(vulnerability.created_at, now))
}

/// Existing uuids whose vulnerability record matches the rule's previously
/// existing states.
pub fn previously_existing_uuids(
    sets: &FindingSets,
    rule: &ApprovalRule,
    policy: &ScanResultPolicyRead,
    index: &VulnerabilityIndex<'_>,
    now: DateTime<Utc>,
) -> BTreeSet<FindingUuid> {
    sets.existing_uuids()
        .into_iter()
        .filter(|uuid| {
            index
                .get(uuid)
                .map_or(false, |v| vulnerability_matches(v, rule, policy, now))
        })
        .collect()
}
