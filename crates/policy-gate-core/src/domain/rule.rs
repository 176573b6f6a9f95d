//! Approval rules derived from approval policies.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::PolicyGateError;
use super::finding::{ScanType, Severity, VulnerabilityState};

/// Report type a rule evaluates, also used as the comment marker vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    ScanFinding,
    LicenseScanning,
    AnyMergeRequest,
}

impl ReportType {
    pub const ALL: [ReportType; 3] = [
        ReportType::ScanFinding,
        ReportType::LicenseScanning,
        ReportType::AnyMergeRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::ScanFinding => "scan_finding",
            ReportType::LicenseScanning => "license_scanning",
            ReportType::AnyMergeRequest => "any_merge_request",
        }
    }

    /// Section title in the comparison pipelines list.
    pub fn title(&self) -> &'static str {
        match self {
            ReportType::ScanFinding => "Scan finding",
            ReportType::LicenseScanning => "License scanning",
            ReportType::AnyMergeRequest => "Any merge request",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = PolicyGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "scan_finding" => Ok(ReportType::ScanFinding),
            "license_scanning" => Ok(ReportType::LicenseScanning),
            "any_merge_request" => Ok(ReportType::AnyMergeRequest),
            other => Err(PolicyGateError::UnknownReportType(other.to_string())),
        }
    }
}

/// An approval rule attached to the change under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: u64,
    pub name: String,
    pub report_type: ReportType,
    /// `ScanResultPolicyRead::id` this rule was synced from.
    pub policy_id: u64,
    /// Currently required approvals; zeroed when the rule is not violated.
    pub approvals_required: u32,
    /// Value restored when the rule blocks again.
    pub policy_approvals_required: u32,
    #[serde(default)]
    pub vulnerabilities_allowed: u32,
    /// Empty means every scanner.
    #[serde(default)]
    pub scanners: Vec<ScanType>,
    /// Empty means every severity.
    #[serde(default)]
    pub severity_levels: Vec<Severity>,
    #[serde(default)]
    pub vulnerability_states: Vec<VulnerabilityState>,
    /// Protected target branches; empty means all.
    #[serde(default)]
    pub branches: Vec<String>,
}

impl ApprovalRule {
    pub fn new(id: u64, report_type: ReportType, policy_id: u64, approvals: u32) -> Self {
        Self {
            id,
            name: format!("rule-{}", id),
            report_type,
            policy_id,
            approvals_required: approvals,
            policy_approvals_required: approvals,
            vulnerabilities_allowed: 0,
            scanners: Vec::new(),
            severity_levels: Vec::new(),
            vulnerability_states: Vec::new(),
            branches: Vec::new(),
        }
    }

    /// States the rule selects; an empty list means the newly detected states.
    pub fn effective_vulnerability_states(&self) -> BTreeSet<VulnerabilityState> {
        if self.vulnerability_states.is_empty() {
            VulnerabilityState::NEWLY_DETECTED.into_iter().collect()
        } else {
            self.vulnerability_states.iter().copied().collect()
        }
    }

    pub fn newly_detected_states(&self) -> BTreeSet<VulnerabilityState> {
        self.effective_vulnerability_states()
            .into_iter()
            .filter(VulnerabilityState::is_newly_detected)
            .collect()
    }

    pub fn previously_existing_states(&self) -> BTreeSet<VulnerabilityState> {
        self.effective_vulnerability_states()
            .into_iter()
            .filter(|s| !s.is_newly_detected())
            .collect()
    }

    pub fn only_newly_detected(&self) -> bool {
        self.previously_existing_states().is_empty()
    }

    /// A scan_finding rule that only selects previously existing states.
    pub fn is_preexisting_state_rule(&self) -> bool {
        self.report_type == ReportType::ScanFinding && self.newly_detected_states().is_empty()
    }

    pub fn applies_to_branch(&self, target_branch: &str) -> bool {
        self.branches.is_empty() || self.branches.iter().any(|b| b == target_branch)
    }

    pub fn matches_scanner(&self, scan: ScanType) -> bool {
        self.scanners.is_empty() || self.scanners.contains(&scan)
    }

    pub fn matches_severity(&self, severity: Severity) -> bool {
        self.severity_levels.is_empty() || self.severity_levels.contains(&severity)
    }
}
