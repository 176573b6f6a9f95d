//! Persisted record shapes.
//!
//! A [`ViolationRecord`] exists per (merge request, policy) pair whenever the
//! last evaluation found the policy violated or unevaluable. Its
//! [`ViolationData`] mirrors the JSON layout consumers already read:
//!
//! ```json
//! {
//!   "violations": { "scan_finding": { "uuids": { "newly_detected": ["B"] } } },
//!   "errors": [{ "error": "SCAN_REMOVED", "missing_scans": ["sast"] }],
//!   "context": { "pipeline_ids": [2], "target_pipeline_ids": [1] }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Lifecycle status of a stored violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationStatus {
    /// Policy violated, or unevaluable under a fail-closed policy.
    Failed,
    /// Unevaluable under a fail-open policy. Never blocks.
    Warn,
    /// Evaluation did not happen in time under a fail-closed policy.
    Skipped,
}

impl ViolationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationStatus::Failed => "failed",
            ViolationStatus::Warn => "warn",
            ViolationStatus::Skipped => "skipped",
        }
    }
}

fn union_sorted(into: &mut Vec<String>, other: &[String]) {
    let merged: BTreeSet<String> = into.iter().chain(other.iter()).cloned().collect();
    *into = merged.into_iter().collect();
}

/// Finding identifiers behind a scan_finding violation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanFindingUuids {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub newly_detected: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previously_existing: Vec<String>,
}

impl ScanFindingUuids {
    pub fn is_empty(&self) -> bool {
        self.newly_detected.is_empty() && self.previously_existing.is_empty()
    }

    fn merge(&mut self, other: &ScanFindingUuids) {
        union_sorted(&mut self.newly_detected, &other.newly_detected);
        union_sorted(&mut self.previously_existing, &other.previously_existing);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanFindingViolation {
    pub uuids: ScanFindingUuids,
}

/// `true` when any commit violates the rule, or the offending commit SHAs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyMergeRequestCommits {
    Any(bool),
    Shas(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyMergeRequestViolation {
    pub commits: AnyMergeRequestCommits,
}

/// Violations keyed by report type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportViolations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_finding: Option<ScanFindingViolation>,
    /// License name to the dependencies using it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_scanning: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_merge_request: Option<AnyMergeRequestViolation>,
}

impl ReportViolations {
    pub fn is_empty(&self) -> bool {
        self.scan_finding.is_none()
            && self.license_scanning.is_none()
            && self.any_merge_request.is_none()
    }

    /// Number of report types carrying a violation.
    pub fn count(&self) -> usize {
        usize::from(self.scan_finding.is_some())
            + usize::from(self.license_scanning.is_some())
            + usize::from(self.any_merge_request.is_some())
    }

    /// Deep-merge `other` into `self`, report type by report type.
    pub fn merge(&mut self, other: &ReportViolations) {
        if let Some(incoming) = &other.scan_finding {
            self.scan_finding
                .get_or_insert_with(ScanFindingViolation::default)
                .uuids
                .merge(&incoming.uuids);
        }
        if let Some(incoming) = &other.license_scanning {
            let licenses = self.license_scanning.get_or_insert_with(BTreeMap::new);
            for (license, dependencies) in incoming {
                union_sorted(licenses.entry(license.clone()).or_default(), dependencies);
            }
        }
        if let Some(incoming) = &other.any_merge_request {
            self.any_merge_request = Some(incoming.clone());
        }
    }
}

/// A single evaluation error, identified by an upper-case code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_scans: Vec<String>,
}

impl ViolationError {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            error: code.into(),
            missing_scans: Vec::new(),
        }
    }

    pub fn with_missing_scans(mut self, scans: Vec<String>) -> Self {
        self.missing_scans = scans;
        self
    }
}

/// Pipelines the decision was based on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViolationContext {
    #[serde(default)]
    pub pipeline_ids: Vec<u64>,
    #[serde(default)]
    pub target_pipeline_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViolationData {
    #[serde(default, skip_serializing_if = "ReportViolations::is_empty")]
    pub violations: ReportViolations,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ViolationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ViolationContext>,
}

impl ViolationData {
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_violations() && !self.has_errors() && self.context.is_none()
    }

    /// Append an error unless an identical one is already recorded.
    pub fn push_error(&mut self, error: ViolationError) {
        if !self.errors.contains(&error) {
            self.errors.push(error);
        }
    }
}

/// One stored violation per (merge request, policy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub merge_request_id: u64,
    pub policy_id: u64,
    pub status: ViolationStatus,
    /// `None` while the policy has not been evaluated yet.
    #[serde(default)]
    pub data: Option<ViolationData>,
}

impl ViolationRecord {
    /// Whether the record blocks the merge request.
    pub fn is_blocking(&self) -> bool {
        matches!(self.status, ViolationStatus::Failed | ViolationStatus::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scan_finding_merge_unions_uuids() {
        let mut a = ReportViolations {
            scan_finding: Some(ScanFindingViolation {
                uuids: ScanFindingUuids {
                    newly_detected: vec!["b".into()],
                    previously_existing: vec![],
                },
            }),
            ..Default::default()
        };
        let b = ReportViolations {
            scan_finding: Some(ScanFindingViolation {
                uuids: ScanFindingUuids {
                    newly_detected: vec!["a".into(), "b".into()],
                    previously_existing: vec!["c".into()],
                },
            }),
            ..Default::default()
        };
        a.merge(&b);
        let uuids = &a.scan_finding.unwrap().uuids;
        assert_eq!(uuids.newly_detected, vec!["a", "b"]);
        assert_eq!(uuids.previously_existing, vec!["c"]);
    }

    #[test]
    fn test_license_merge_combines_dependencies() {
        let mut a = ReportViolations {
            license_scanning: Some(BTreeMap::from([("MIT".into(), vec!["B".into()])])),
            ..Default::default()
        };
        let b = ReportViolations {
            license_scanning: Some(BTreeMap::from([
                ("MIT".into(), vec!["A".into()]),
                ("w3m".into(), vec!["A".into()]),
            ])),
            ..Default::default()
        };
        a.merge(&b);
        let licenses = a.license_scanning.unwrap();
        assert_eq!(licenses["MIT"], vec!["A", "B"]);
        assert_eq!(licenses["w3m"], vec!["A"]);
    }

    #[test]
    fn test_violation_data_json_layout() {
        let data = ViolationData {
            violations: ReportViolations {
                any_merge_request: Some(AnyMergeRequestViolation {
                    commits: AnyMergeRequestCommits::Shas(vec!["abcd1234".into()]),
                }),
                ..Default::default()
            },
            errors: vec![ViolationError::new("SCAN_REMOVED").with_missing_scans(vec!["sast".into()])],
            context: Some(ViolationContext {
                pipeline_ids: vec![2],
                target_pipeline_ids: vec![],
            }),
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(
            value,
            json!({
                "violations": { "any_merge_request": { "commits": ["abcd1234"] } },
                "errors": [{ "error": "SCAN_REMOVED", "missing_scans": ["sast"] }],
                "context": { "pipeline_ids": [2], "target_pipeline_ids": [] }
            })
        );
    }

    #[test]
    fn test_commits_flag_deserializes_untagged() {
        let v: AnyMergeRequestViolation = serde_json::from_value(json!({ "commits": true })).unwrap();
        assert_eq!(v.commits, AnyMergeRequestCommits::Any(true));
    }

    #[test]
    fn test_push_error_is_idempotent() {
        let mut data = ViolationData::default();
        data.push_error(ViolationError::new("ARTIFACTS_MISSING"));
        data.push_error(ViolationError::new("ARTIFACTS_MISSING"));
        assert_eq!(data.errors.len(), 1);
    }

    #[test]
    fn test_blocking_statuses() {
        let mut record = ViolationRecord {
            merge_request_id: 1,
            policy_id: 1,
            status: ViolationStatus::Warn,
            data: None,
        };
        assert!(!record.is_blocking());
        record.status = ViolationStatus::Skipped;
        assert!(record.is_blocking());
    }
}
