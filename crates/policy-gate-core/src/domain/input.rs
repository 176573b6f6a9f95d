//! The snapshot an evaluation runs against.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change::ChangeUnderReview;
use super::error::{PolicyGateError, Result};
use super::finding::{FindingUuid, ScanType, Vulnerability};
use super::pipeline::PipelineReport;
use super::policy::ScanResultPolicyRead;
use super::rule::ApprovalRule;

/// Everything a single evaluation reads.
///
/// The first source pipeline is the change's head pipeline; any further
/// entries are related pipelines for the same sha. An empty target list
/// means no comparison pipeline exists on the target branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub change: ChangeUnderReview,
    pub rules: Vec<ApprovalRule>,
    pub policies: Vec<ScanResultPolicyRead>,
    #[serde(default)]
    pub source_pipelines: Vec<PipelineReport>,
    #[serde(default)]
    pub target_pipelines: Vec<PipelineReport>,
    /// Vulnerability records already present on the project.
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
    /// Scans enforced on the source branch by scan execution policies.
    #[serde(default)]
    pub enforced_scans: BTreeSet<ScanType>,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationInput {
    pub fn primary_pipeline(&self) -> Option<&PipelineReport> {
        self.source_pipelines.first()
    }

    pub fn policy(&self, id: u64) -> Option<&ScanResultPolicyRead> {
        self.policies.iter().find(|p| p.id == id)
    }

    pub fn policy_for(&self, rule: &ApprovalRule) -> Result<&ScanResultPolicyRead> {
        self.policy(rule.policy_id)
            .ok_or(PolicyGateError::UnknownPolicy {
                rule_id: rule.id,
                policy_id: rule.policy_id,
            })
    }

    pub fn vulnerability_index(&self) -> BTreeMap<&FindingUuid, &Vulnerability> {
        self.vulnerabilities.iter().map(|v| (&v.uuid, v)).collect()
    }

    /// Check referential integrity before evaluating.
    pub fn validate(&self) -> Result<()> {
        for policy in &self.policies {
            policy.validate()?;
        }
        for rule in &self.rules {
            self.policy_for(rule)?;
        }
        Ok(())
    }
}
