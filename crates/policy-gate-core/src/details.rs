//! Read model over stored violations, used to render the bot comment.
//!
//! Everything here is derived from the evaluation input and the violation
//! records after a run; lists are sorted so rendering is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use policy_gate_state::{AnyMergeRequestCommits, ViolationRecord, ViolationStatus};

use crate::config::PolicyGateConfig;
use crate::domain::{
    ChangeUnderReview, EvaluationInput, Finding, FindingUuid, ReportType, ScanResultPolicyRead,
    ScanType, Severity,
};
use crate::violations::ErrorCode;

pub const UNKNOWN_ERROR: &str = "UNKNOWN";

pub const FAIL_OPEN_SCAN_REMOVED: &str =
    "Confirm that all scanners from the target branch are present on the source branch.";
pub const FAIL_OPEN_ARTIFACTS_MISSING: &str = "Confirm that scanners are properly configured and producing results. Vulnerability detection depends on successful execution of security scan jobs in the target and source branches.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySummary {
    pub policy_id: u64,
    pub name: String,
    pub report_type: ReportType,
    pub status: ViolationStatus,
}

/// A finding referenced by a violation, enriched from pipelines or
/// vulnerability records when available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FindingDetail {
    pub uuid: FindingUuid,
    pub name: String,
    pub severity: Severity,
    pub scan_type: Option<ScanType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseDetail {
    pub license: String,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnyMergeRequestDetail {
    pub policy_name: String,
    pub commits: AnyMergeRequestCommits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub policy_name: String,
    pub report_type: ReportType,
    /// Known error code, or [`UNKNOWN_ERROR`].
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonPipelines {
    pub report_type: ReportType,
    pub source: Vec<u64>,
    pub target: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarnModePolicy {
    pub name: String,
    pub edit_path: Option<String>,
}

pub struct PolicyViolationDetails<'a> {
    input: &'a EvaluationInput,
    records: Vec<&'a ViolationRecord>,
    config: &'a PolicyGateConfig,
}

impl<'a> PolicyViolationDetails<'a> {
    /// Records of other merge requests or unknown policies are ignored.
    pub fn new(
        input: &'a EvaluationInput,
        records: &'a [ViolationRecord],
        config: &'a PolicyGateConfig,
    ) -> Self {
        let mut records: Vec<&ViolationRecord> = records
            .iter()
            .filter(|r| r.merge_request_id == input.change.id)
            .filter(|r| input.policy(r.policy_id).is_some())
            .collect();
        records.sort_by_key(|r| r.policy_id);
        Self {
            input,
            records,
            config,
        }
    }

    pub fn change(&self) -> &ChangeUnderReview {
        &self.input.change
    }

    pub fn max_violations(&self) -> usize {
        self.config.max_violations
    }

    fn policy(&self, id: u64) -> Option<&'a ScanResultPolicyRead> {
        self.input.policy(id)
    }

    fn policy_name(&self, id: u64) -> String {
        self.policy(id).map(|p| p.name.clone()).unwrap_or_default()
    }

    /// Report type of the policy's rules; scan_finding if it has none.
    fn report_type_of(&self, policy_id: u64) -> ReportType {
        self.input
            .rules
            .iter()
            .find(|r| r.policy_id == policy_id)
            .map_or(ReportType::ScanFinding, |r| r.report_type)
    }

    fn is_fail_open_record(&self, record: &ViolationRecord) -> bool {
        record.status == ViolationStatus::Warn && self.policy(record.policy_id).map_or(false, |p| p.fail_open())
    }

    /// One entry per violated report type of each stored policy.
    pub fn violations(&self) -> Vec<PolicySummary> {
        let mut out = Vec::new();
        for record in &self.records {
            let name = self.policy_name(record.policy_id);
            let mut types = Vec::new();
            if let Some(data) = &record.data {
                let v = &data.violations;
                if v.scan_finding.is_some() {
                    types.push(ReportType::ScanFinding);
                }
                if v.license_scanning.is_some() {
                    types.push(ReportType::LicenseScanning);
                }
                if v.any_merge_request.is_some() {
                    types.push(ReportType::AnyMergeRequest);
                }
            }
            if types.is_empty() {
                types.push(self.report_type_of(record.policy_id));
            }
            out.extend(types.into_iter().map(|report_type| PolicySummary {
                policy_id: record.policy_id,
                name: name.clone(),
                report_type,
                status: record.status,
            }));
        }
        out
    }

    pub fn violations_count(&self) -> usize {
        self.violations().len()
    }

    fn finding_index(&self) -> BTreeMap<&'a FindingUuid, &'a Finding> {
        self.input
            .target_pipelines
            .iter()
            .chain(self.input.source_pipelines.iter())
            .flat_map(|p| &p.findings)
            .map(|f| (&f.uuid, f))
            .collect()
    }

    fn enrich(&self, uuids: BTreeSet<String>, prefer_records: bool) -> Vec<FindingDetail> {
        let findings = self.finding_index();
        let vulnerabilities = self.input.vulnerability_index();
        let mut out: Vec<FindingDetail> = uuids
            .into_iter()
            .map(|uuid| {
                let uuid = FindingUuid::new(uuid);
                let finding = findings.get(&uuid).map(|f| FindingDetail {
                    uuid: uuid.clone(),
                    name: f.name.clone(),
                    severity: f.severity,
                    scan_type: Some(f.scan_type),
                });
                let record = vulnerabilities.get(&uuid).map(|v| FindingDetail {
                    uuid: uuid.clone(),
                    name: v.name.clone(),
                    severity: v.severity,
                    scan_type: Some(v.scan_type),
                });
                let (first, second) = if prefer_records {
                    (record, finding)
                } else {
                    (finding, record)
                };
                first.or(second).unwrap_or(FindingDetail {
                    uuid,
                    name: String::new(),
                    severity: Severity::Unknown,
                    scan_type: None,
                })
            })
            .collect();
        out.sort_by(|a, b| a.severity.cmp(&b.severity).then_with(|| a.uuid.cmp(&b.uuid)));
        out
    }

    fn scan_uuids<F>(&self, select: F) -> BTreeSet<String>
    where
        F: Fn(&policy_gate_state::ScanFindingUuids) -> &Vec<String>,
    {
        self.records
            .iter()
            .filter_map(|r| r.data.as_ref())
            .filter_map(|d| d.violations.scan_finding.as_ref())
            .flat_map(|s| select(&s.uuids).iter().cloned())
            .collect()
    }

    /// Findings introduced by the change, most severe first.
    pub fn new_scan_finding_violations(&self) -> Vec<FindingDetail> {
        self.enrich(self.scan_uuids(|u| &u.newly_detected), false)
    }

    pub fn previous_scan_finding_violations(&self) -> Vec<FindingDetail> {
        self.enrich(self.scan_uuids(|u| &u.previously_existing), true)
    }

    /// Licenses in violation, merged across policies.
    pub fn license_scanning_violations(&self) -> Vec<LicenseDetail> {
        let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for licenses in self
            .records
            .iter()
            .filter_map(|r| r.data.as_ref())
            .filter_map(|d| d.violations.license_scanning.as_ref())
        {
            for (license, deps) in licenses {
                merged
                    .entry(license.clone())
                    .or_default()
                    .extend(deps.iter().cloned());
            }
        }
        merged
            .into_iter()
            .map(|(license, deps)| LicenseDetail {
                license,
                dependencies: deps.into_iter().collect(),
            })
            .collect()
    }

    pub fn any_merge_request_violations(&self) -> Vec<AnyMergeRequestDetail> {
        self.records
            .iter()
            .filter_map(|r| {
                let any = r.data.as_ref()?.violations.any_merge_request.as_ref()?;
                Some(AnyMergeRequestDetail {
                    policy_name: self.policy_name(r.policy_id),
                    commits: any.commits.clone(),
                })
            })
            .collect()
    }

    /// Unsigned commit SHAs across policies, deduplicated.
    pub fn unsigned_commits(&self) -> Vec<String> {
        let shas: BTreeSet<String> = self
            .any_merge_request_violations()
            .into_iter()
            .filter_map(|d| match d.commits {
                AnyMergeRequestCommits::Shas(shas) => Some(shas),
                AnyMergeRequestCommits::Any(_) => None,
            })
            .flatten()
            .collect();
        shas.into_iter().collect()
    }

    /// Errors of policies that did not fail open.
    pub fn errors(&self) -> Vec<ErrorDetail> {
        let mut out = Vec::new();
        for record in self.records.iter().filter(|r| !self.is_fail_open_record(r)) {
            let Some(data) = &record.data else { continue };
            let policy_name = self.policy_name(record.policy_id);
            let report_type = self.report_type_of(record.policy_id);
            for err in &data.errors {
                let (error, message) =
                    error_message(&err.error, &policy_name, report_type, &err.missing_scans);
                out.push(ErrorDetail {
                    policy_name: policy_name.clone(),
                    report_type,
                    error,
                    message,
                });
            }
        }
        out
    }

    /// Guidance for policies that failed open, in a fixed order.
    pub fn fail_open_messages(&self) -> Vec<&'static str> {
        let codes: BTreeSet<ErrorCode> = self
            .records
            .iter()
            .filter(|r| self.is_fail_open_record(r))
            .filter_map(|r| r.data.as_ref())
            .flat_map(|d| d.errors.iter())
            .filter_map(|e| ErrorCode::parse(&e.error))
            .collect();

        let mut out = Vec::new();
        if codes.contains(&ErrorCode::ScanRemoved) {
            out.push(FAIL_OPEN_SCAN_REMOVED);
        }
        if codes.iter().any(|c| {
            matches!(
                c,
                ErrorCode::ArtifactsMissing | ErrorCode::TargetPipelineMissing | ErrorCode::PipelineFailed
            )
        }) {
            out.push(FAIL_OPEN_ARTIFACTS_MISSING);
        }
        out
    }

    pub fn fail_open_policies(&self) -> Vec<String> {
        self.names(|d, r| d.is_fail_open_record(r) && r.data.as_ref().map_or(false, |x| x.has_errors()))
    }

    pub fn fail_closed_policies(&self) -> Vec<String> {
        self.names(|_, r| r.is_blocking() && r.data.as_ref().map_or(false, |x| x.has_errors()))
    }

    /// Names of policies with violation data of `report_type`.
    pub fn violated_policy_names(&self, report_type: Option<ReportType>) -> Vec<String> {
        self.names(|_, r| {
            let Some(data) = &r.data else { return false };
            let v = &data.violations;
            match report_type {
                None => !v.is_empty(),
                Some(ReportType::ScanFinding) => v.scan_finding.is_some(),
                Some(ReportType::LicenseScanning) => v.license_scanning.is_some(),
                Some(ReportType::AnyMergeRequest) => v.any_merge_request.is_some(),
            }
        })
    }

    fn names<F>(&self, keep: F) -> Vec<String>
    where
        F: Fn(&Self, &ViolationRecord) -> bool,
    {
        let names: BTreeSet<String> = self
            .records
            .iter()
            .filter(|r| keep(self, r))
            .map(|r| self.policy_name(r.policy_id))
            .collect();
        names.into_iter().collect()
    }

    pub fn warn_mode_policies(&self) -> Vec<WarnModePolicy> {
        if !self.config.warn_mode_enabled {
            return Vec::new();
        }
        let mut out: Vec<WarnModePolicy> = self
            .records
            .iter()
            .filter_map(|r| self.policy(r.policy_id))
            .filter(|p| p.warn_mode)
            .map(|p| WarnModePolicy {
                name: p.name.clone(),
                edit_path: p.edit_path.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out.dedup();
        out
    }

    /// Pipelines each report type was compared on.
    pub fn comparison_pipelines(&self) -> Vec<ComparisonPipelines> {
        let mut grouped: BTreeMap<ReportType, (BTreeSet<u64>, BTreeSet<u64>)> = BTreeMap::new();
        for record in &self.records {
            let Some(context) = record.data.as_ref().and_then(|d| d.context.as_ref()) else {
                continue;
            };
            let entry = grouped
                .entry(self.report_type_of(record.policy_id))
                .or_default();
            entry.0.extend(context.pipeline_ids.iter().copied());
            entry.1.extend(context.target_pipeline_ids.iter().copied());
        }
        grouped
            .into_iter()
            .filter(|(_, (source, target))| !source.is_empty() || !target.is_empty())
            .map(|(report_type, (source, target))| ComparisonPipelines {
                report_type,
                source: source.into_iter().collect(),
                target: target.into_iter().collect(),
            })
            .collect()
    }
}

/// `(code, message)` for a stored error code. Unknown codes map to
/// [`UNKNOWN_ERROR`].
pub fn error_message(
    code: &str,
    policy_name: &str,
    report_type: ReportType,
    missing_scans: &[String],
) -> (String, String) {
    let Some(known) = ErrorCode::parse(code) else {
        return (UNKNOWN_ERROR.to_string(), format!("Unknown error: {code}"));
    };
    let message = match known {
        ErrorCode::ScanRemoved => {
            let scans: Vec<String> = missing_scans.iter().map(|s| ScanType::label_for(s)).collect();
            format!(
                "There is a mismatch between the scans of the source and target pipelines. The following scans are missing: {}",
                scans.join(", ")
            )
        }
        ErrorCode::ArtifactsMissing => match report_type {
            ReportType::ScanFinding => format!(
                "Pipeline configuration error: Security reports required by policy `{policy_name}` could not be found."
            ),
            ReportType::LicenseScanning => format!(
                "Pipeline configuration error: SBOM reports required by policy `{policy_name}` could not be found."
            ),
            ReportType::AnyMergeRequest => format!(
                "Artifacts required by policy `{policy_name}` could not be found ({report_type})."
            ),
        },
        ErrorCode::TargetPipelineMissing => match report_type {
            ReportType::LicenseScanning => format!(
                "Pipeline configuration error: SBOM reports required by policy `{policy_name}` could not be found on the target branch."
            ),
            _ => format!(
                "Pipeline configuration error: Security reports required by policy `{policy_name}` could not be found on the target branch."
            ),
        },
        ErrorCode::EvaluationSkipped => format!(
            "Policy `{policy_name}` could not be evaluated within the specified timeframe and, as a result, approvals are required for the policy. Ensure that scanners are present in the latest pipeline."
        ),
        ErrorCode::PipelineFailed => format!(
            "Policy `{policy_name}` could not be evaluated because the latest pipeline failed. Ensure that the pipeline is configured properly and the scanners are present."
        ),
    };
    (known.as_str().to_string(), message)
}
