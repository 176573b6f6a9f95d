//! Findings, vulnerability records and their classification enums.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a finding across pipelines.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FindingUuid(pub String);

impl FindingUuid {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FindingUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FindingUuid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
    Unknown,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::Info => "Info",
            Severity::Unknown => "Unknown",
        }
    }
}

/// Security scan (and report) type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Sast,
    SecretDetection,
    DependencyScanning,
    ContainerScanning,
    Dast,
    CoverageFuzzing,
    ApiFuzzing,
    ClusterImageScanning,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Sast => "sast",
            ScanType::SecretDetection => "secret_detection",
            ScanType::DependencyScanning => "dependency_scanning",
            ScanType::ContainerScanning => "container_scanning",
            ScanType::Dast => "dast",
            ScanType::CoverageFuzzing => "coverage_fuzzing",
            ScanType::ApiFuzzing => "api_fuzzing",
            ScanType::ClusterImageScanning => "cluster_image_scanning",
        }
    }

    /// Human label used in comments ("Dependency scanning").
    pub fn label(&self) -> &'static str {
        match self {
            ScanType::Sast => "SAST",
            ScanType::SecretDetection => "Secret detection",
            ScanType::DependencyScanning => "Dependency scanning",
            ScanType::ContainerScanning => "Container scanning",
            ScanType::Dast => "DAST",
            ScanType::CoverageFuzzing => "Coverage fuzzing",
            ScanType::ApiFuzzing => "API fuzzing",
            ScanType::ClusterImageScanning => "Cluster image scanning",
        }
    }

    /// Label for a stored scan name, falling back to the raw name.
    pub fn label_for(name: &str) -> String {
        serde_json::from_value::<ScanType>(serde_json::Value::String(name.to_string()))
            .map(|s| s.label().to_string())
            .unwrap_or_else(|_| name.to_string())
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Triage state a rule can select findings by.
///
/// `NewNeedsTriage` and `NewDismissed` describe findings introduced by the
/// change; the rest describe vulnerabilities already recorded on the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilityState {
    NewNeedsTriage,
    NewDismissed,
    Detected,
    Confirmed,
    Resolved,
    Dismissed,
}

impl VulnerabilityState {
    pub const NEWLY_DETECTED: [VulnerabilityState; 2] = [
        VulnerabilityState::NewNeedsTriage,
        VulnerabilityState::NewDismissed,
    ];

    pub fn is_newly_detected(&self) -> bool {
        matches!(
            self,
            VulnerabilityState::NewNeedsTriage | VulnerabilityState::NewDismissed
        )
    }
}

/// A finding reported by a scan in one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub uuid: FindingUuid,
    pub scan_type: ScanType,
    pub severity: Severity,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub false_positive: bool,
    #[serde(default)]
    pub fix_available: bool,
}

/// A vulnerability already recorded on the project for a finding uuid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub uuid: FindingUuid,
    /// One of the previously-existing states.
    pub state: VulnerabilityState,
    pub severity: Severity,
    pub scan_type: ScanType,
    #[serde(default)]
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub false_positive: bool,
    #[serde(default)]
    pub fix_available: bool,
}
