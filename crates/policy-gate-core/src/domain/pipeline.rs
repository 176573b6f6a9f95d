//! Pipeline reports of the source and target revisions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::finding::{Finding, ScanType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    Failed,
    Manual,
    Running,
    Canceled,
}

/// A license detected in a pipeline's dependency list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseUsage {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Security and SBOM results of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub id: u64,
    pub sha: String,
    pub status: PipelineStatus,
    /// Whether the pipeline produced security reports that could be stored.
    #[serde(default = "default_true")]
    pub can_store_security_reports: bool,
    /// Scans that completed in this pipeline.
    #[serde(default)]
    pub scans: BTreeSet<ScanType>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Whether the pipeline produced a dependency (SBOM) report.
    #[serde(default)]
    pub sbom_available: bool,
    #[serde(default)]
    pub licenses: Vec<LicenseUsage>,
}

fn default_true() -> bool {
    true
}

impl PipelineReport {
    pub fn new(id: u64, sha: impl Into<String>) -> Self {
        Self {
            id,
            sha: sha.into(),
            status: PipelineStatus::Success,
            can_store_security_reports: true,
            scans: BTreeSet::new(),
            findings: Vec::new(),
            sbom_available: false,
            licenses: Vec::new(),
        }
    }

    pub fn with_scan(mut self, scan: ScanType) -> Self {
        self.scans.insert(scan);
        self
    }

    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.scans.insert(finding.scan_type);
        self.findings.push(finding);
        self
    }

    pub fn with_license(mut self, name: &str, dependencies: &[&str]) -> Self {
        self.sbom_available = true;
        self.licenses.push(LicenseUsage {
            name: name.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        });
        self
    }

    pub fn with_status(mut self, status: PipelineStatus) -> Self {
        self.status = status;
        self
    }
}

/// Union of scans completed across a set of pipelines.
pub fn completed_scans(pipelines: &[PipelineReport]) -> BTreeSet<ScanType> {
    pipelines.iter().flat_map(|p| p.scans.iter().copied()).collect()
}

pub fn pipeline_ids(pipelines: &[PipelineReport]) -> Vec<u64> {
    pipelines.iter().map(|p| p.id).collect()
}
