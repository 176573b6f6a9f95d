//! Per-policy violation bookkeeping.
//!
//! Evaluators report into a [`ViolationCollector`]; once a run is finished
//! the collector is diffed against the stored records to produce a
//! [`ViolationChangeSet`]. Policies the run never mentioned are left alone.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use policy_gate_state::{
    AnyMergeRequestCommits, AnyMergeRequestViolation, ReportViolations, ViolationContext,
    ViolationData, ViolationError, ViolationRecord, ViolationStatus,
};

use crate::config::PolicyGateConfig;
use crate::domain::ScanResultPolicyRead;

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Why a policy could not be evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ScanRemoved,
    ArtifactsMissing,
    TargetPipelineMissing,
    EvaluationSkipped,
    PipelineFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ScanRemoved => "SCAN_REMOVED",
            ErrorCode::ArtifactsMissing => "ARTIFACTS_MISSING",
            ErrorCode::TargetPipelineMissing => "TARGET_PIPELINE_MISSING",
            ErrorCode::EvaluationSkipped => "EVALUATION_SKIPPED",
            ErrorCode::PipelineFailed => "PIPELINE_FAILED",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "SCAN_REMOVED" => Some(ErrorCode::ScanRemoved),
            "ARTIFACTS_MISSING" => Some(ErrorCode::ArtifactsMissing),
            "TARGET_PIPELINE_MISSING" => Some(ErrorCode::TargetPipelineMissing),
            "EVALUATION_SKIPPED" => Some(ErrorCode::EvaluationSkipped),
            "PIPELINE_FAILED" => Some(ErrorCode::PipelineFailed),
            _ => None,
        }
    }

    pub fn to_error(self) -> ViolationError {
        ViolationError::new(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A fail-open policy let an unevaluable rule through.
    FailOpenBypass {
        merge_request_id: u64,
        policy_id: u64,
        policy_name: String,
        error: String,
    },
    PolicyViolationsDetected {
        merge_request_id: u64,
        policy_ids: Vec<u64>,
    },
    PolicyViolationsResolved {
        merge_request_id: u64,
    },
}

impl AuditEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::FailOpenBypass { .. } => "fail_open_bypass",
            AuditEvent::PolicyViolationsDetected { .. } => "policy_violations_detected",
            AuditEvent::PolicyViolationsResolved { .. } => "policy_violations_resolved",
        }
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct PolicyFlags {
    fail_open: bool,
    warn_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationCollector {
    merge_request_id: u64,
    max_violations: usize,
    warn_mode_enabled: bool,
    violated: BTreeSet<u64>,
    unviolated: BTreeSet<u64>,
    data: BTreeMap<u64, ViolationData>,
    flags: BTreeMap<u64, PolicyFlags>,
}

impl ViolationCollector {
    pub fn new(merge_request_id: u64, config: &PolicyGateConfig) -> Self {
        Self {
            merge_request_id,
            max_violations: config.max_violations,
            warn_mode_enabled: config.warn_mode_enabled,
            violated: BTreeSet::new(),
            unviolated: BTreeSet::new(),
            data: BTreeMap::new(),
            flags: BTreeMap::new(),
        }
    }

    pub fn merge_request_id(&self) -> u64 {
        self.merge_request_id
    }

    fn track(&mut self, policy: &ScanResultPolicyRead) {
        self.flags.insert(
            policy.id,
            PolicyFlags {
                fail_open: policy.fail_open(),
                warn_mode: policy.warn_mode && self.warn_mode_enabled,
            },
        );
    }

    fn entry(
        &mut self,
        policy: &ScanResultPolicyRead,
        context: Option<ViolationContext>,
    ) -> &mut ViolationData {
        self.track(policy);
        self.violated.insert(policy.id);
        let data = self.data.entry(policy.id).or_default();
        if context.is_some() {
            data.context = context;
        }
        data
    }

    /// Record violated and unviolated policies in one go.
    pub fn add(&mut self, violated: &[&ScanResultPolicyRead], unviolated: &[u64]) {
        for policy in violated {
            self.entry(policy, None);
        }
        self.unviolated.extend(unviolated.iter().copied());
    }

    /// Merge `violations` into the policy's data for this run.
    pub fn add_violation(
        &mut self,
        policy: &ScanResultPolicyRead,
        violations: &ReportViolations,
        context: Option<ViolationContext>,
    ) {
        self.entry(policy, context).violations.merge(violations);
    }

    pub fn add_error(
        &mut self,
        policy: &ScanResultPolicyRead,
        error: ViolationError,
        context: Option<ViolationContext>,
    ) {
        self.entry(policy, context).push_error(error);
    }

    /// Mark the policy as not evaluated in time.
    pub fn skip(&mut self, policy: &ScanResultPolicyRead) {
        self.add_error(policy, ErrorCode::EvaluationSkipped.to_error(), None);
    }

    pub fn remove_violation(&mut self, policy_id: u64) {
        self.unviolated.insert(policy_id);
    }

    pub fn is_violated(&self, policy_id: u64) -> bool {
        self.violated.contains(&policy_id)
    }

    pub fn violated_policy_ids(&self) -> Vec<u64> {
        self.violated.iter().copied().collect()
    }

    /// Policies found clean in this run and not violated by another rule.
    pub fn resolved_policy_ids(&self) -> Vec<u64> {
        self.unviolated.difference(&self.violated).copied().collect()
    }

    pub fn data(&self, policy_id: u64) -> Option<&ViolationData> {
        self.data.get(&policy_id)
    }

    pub fn status(&self, policy_id: u64) -> Option<ViolationStatus> {
        let data = self.data.get(&policy_id)?;
        let flags = self.flags.get(&policy_id).copied().unwrap_or(PolicyFlags {
            fail_open: false,
            warn_mode: false,
        });
        Some(derive_status(data, flags))
    }

    /// The record this run would store for `policy_id`.
    pub fn record(&self, policy_id: u64) -> Option<ViolationRecord> {
        let status = self.status(policy_id)?;
        let mut data = self.data.get(&policy_id)?.clone();
        // One entry past the limit tells the comment the list was cut.
        truncate_data(&mut data, self.max_violations + 1);
        Some(ViolationRecord {
            merge_request_id: self.merge_request_id,
            policy_id,
            status,
            data: Some(data),
        })
    }

    /// Diff this run against the stored records.
    pub fn apply(&self, existing: &[ViolationRecord]) -> ViolationChangeSet {
        let stored: BTreeMap<u64, &ViolationRecord> = existing
            .iter()
            .filter(|r| r.merge_request_id == self.merge_request_id)
            .map(|r| (r.policy_id, r))
            .collect();

        let mut upserts = Vec::new();
        let mut newly_failed = Vec::new();
        for policy_id in &self.violated {
            let Some(record) = self.record(*policy_id) else {
                continue;
            };
            let previous = stored.get(policy_id);
            if previous.map_or(true, |p| **p != record) {
                let was_failed = previous.map_or(false, |p| p.status == ViolationStatus::Failed);
                if record.status == ViolationStatus::Failed && !was_failed {
                    newly_failed.push(*policy_id);
                }
                upserts.push(record);
            }
        }

        let removals: Vec<u64> = self
            .resolved_policy_ids()
            .into_iter()
            .filter(|id| stored.contains_key(id))
            .collect();

        let remaining_blocking = stored
            .values()
            .filter(|r| !removals.contains(&r.policy_id) && !self.violated.contains(&r.policy_id))
            .any(|r| r.is_blocking())
            || self
                .violated
                .iter()
                .filter_map(|id| self.status(*id))
                .any(|s| matches!(s, ViolationStatus::Failed | ViolationStatus::Skipped));

        let removed_violations = removals.iter().any(|id| {
            stored
                .get(id)
                .and_then(|r| r.data.as_ref())
                .map_or(false, ViolationData::has_violations)
        });

        let mut audit_events = Vec::new();
        if !newly_failed.is_empty() {
            audit_events.push(AuditEvent::PolicyViolationsDetected {
                merge_request_id: self.merge_request_id,
                policy_ids: newly_failed,
            });
        }
        if removed_violations && !remaining_blocking {
            audit_events.push(AuditEvent::PolicyViolationsResolved {
                merge_request_id: self.merge_request_id,
            });
        }

        ViolationChangeSet {
            merge_request_id: self.merge_request_id,
            upserts,
            removals,
            audit_events,
        }
    }
}

fn derive_status(data: &ViolationData, flags: PolicyFlags) -> ViolationStatus {
    if data.has_violations() {
        return if flags.warn_mode {
            ViolationStatus::Warn
        } else {
            ViolationStatus::Failed
        };
    }
    if flags.fail_open {
        return ViolationStatus::Warn;
    }
    let only_skipped = !data.errors.is_empty()
        && data
            .errors
            .iter()
            .all(|e| e.error == ErrorCode::EvaluationSkipped.as_str());
    if only_skipped {
        ViolationStatus::Skipped
    } else {
        ViolationStatus::Failed
    }
}

fn truncate_data(data: &mut ViolationData, max: usize) {
    if let Some(scan) = data.violations.scan_finding.as_mut() {
        scan.uuids.newly_detected.truncate(max);
        scan.uuids.previously_existing.truncate(max);
    }
    if let Some(licenses) = data.violations.license_scanning.as_mut() {
        while licenses.len() > max {
            licenses.pop_last();
        }
    }
    if let Some(AnyMergeRequestViolation {
        commits: AnyMergeRequestCommits::Shas(shas),
    }) = data.violations.any_merge_request.as_mut()
    {
        shas.truncate(max);
    }
}

// ---------------------------------------------------------------------------
// Change set
// ---------------------------------------------------------------------------

/// Writes needed to bring stored violations in line with one run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViolationChangeSet {
    pub merge_request_id: u64,
    pub upserts: Vec<ViolationRecord>,
    /// Policy ids whose records should be deleted.
    pub removals: Vec<u64>,
    pub audit_events: Vec<AuditEvent>,
}

impl ViolationChangeSet {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }

    /// Stored records after the change set is written, ordered by policy.
    pub fn resulting(&self, existing: &[ViolationRecord]) -> Vec<ViolationRecord> {
        let mut by_policy: BTreeMap<u64, ViolationRecord> = existing
            .iter()
            .filter(|r| r.merge_request_id == self.merge_request_id)
            .map(|r| (r.policy_id, r.clone()))
            .collect();
        for id in &self.removals {
            by_policy.remove(id);
        }
        for record in &self.upserts {
            by_policy.insert(record.policy_id, record.clone());
        }
        by_policy.into_values().collect()
    }
}
