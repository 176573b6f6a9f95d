//! Materialized policy settings (`ScanResultPolicyRead`).
//!
//! A read is an immutable snapshot of one approval policy rule's evaluation
//! parameters, captured when rules were synced from the policy file.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::{PolicyGateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    Open,
    Closed,
}

/// What happens when a policy cannot be evaluated. Absent means closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FallbackBehavior {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<FailMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeOperator {
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeInterval {
    Day,
    Week,
    Month,
    Year,
}

impl AgeInterval {
    fn days(&self) -> i64 {
        match self {
            AgeInterval::Day => 1,
            AgeInterval::Week => 7,
            AgeInterval::Month => 30,
            AgeInterval::Year => 365,
        }
    }
}

/// Restricts previously existing vulnerabilities by how long ago they were recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerabilityAge {
    pub operator: AgeOperator,
    pub interval: AgeInterval,
    pub value: u32,
}

impl VulnerabilityAge {
    pub fn matches(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let threshold = Duration::days(self.interval.days() * i64::from(self.value));
        let age = now - created_at;
        match self.operator {
            AgeOperator::GreaterThan => age > threshold,
            AgeOperator::LessThan => age < threshold,
        }
    }
}

/// Optional attribute filters; `None` means "either".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VulnerabilityAttributes {
    #[serde(default)]
    pub false_positive: Option<bool>,
    #[serde(default)]
    pub fix_available: Option<bool>,
}

impl VulnerabilityAttributes {
    pub fn matches(&self, false_positive: bool, fix_available: bool) -> bool {
        self.false_positive.map_or(true, |want| want == false_positive)
            && self.fix_available.map_or(true, |want| want == fix_available)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseState {
    NewlyDetected,
    Detected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseList {
    Allowed(Vec<String>),
    Denied(Vec<String>),
}

impl LicenseList {
    /// Whether using `license` violates the list.
    pub fn violates(&self, license: &str) -> bool {
        match self {
            LicenseList::Allowed(allowed) => !allowed.iter().any(|l| l == license),
            LicenseList::Denied(denied) => denied.iter().any(|l| l == license),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            LicenseList::Allowed(l) | LicenseList::Denied(l) => l.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitsRule {
    Any,
    Unsigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotMessage {
    pub enabled: bool,
}

impl Default for BotMessage {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyTuning {
    #[serde(default)]
    pub unblock_rules_using_execution_policies: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResultPolicyRead {
    pub id: u64,
    pub name: String,
    /// Path to the policy in the policy editor, linked from comments.
    #[serde(default)]
    pub edit_path: Option<String>,
    #[serde(default)]
    pub fallback_behavior: FallbackBehavior,
    #[serde(default)]
    pub vulnerability_age: Option<VulnerabilityAge>,
    #[serde(default)]
    pub vulnerability_attributes: VulnerabilityAttributes,
    #[serde(default)]
    pub license_states: Vec<LicenseState>,
    #[serde(default)]
    pub licenses: Option<LicenseList>,
    #[serde(default)]
    pub commits: Option<CommitsRule>,
    #[serde(default)]
    pub send_bot_message: BotMessage,
    #[serde(default)]
    pub policy_tuning: PolicyTuning,
    /// Violations are reported but never require approval.
    #[serde(default)]
    pub warn_mode: bool,
}

impl ScanResultPolicyRead {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            edit_path: None,
            fallback_behavior: FallbackBehavior::default(),
            vulnerability_age: None,
            vulnerability_attributes: VulnerabilityAttributes::default(),
            license_states: Vec::new(),
            licenses: None,
            commits: None,
            send_bot_message: BotMessage::default(),
            policy_tuning: PolicyTuning::default(),
            warn_mode: false,
        }
    }

    pub fn with_fail_mode(mut self, mode: FailMode) -> Self {
        self.fallback_behavior.fail = Some(mode);
        self
    }

    pub fn fail_open(&self) -> bool {
        self.fallback_behavior.fail == Some(FailMode::Open)
    }

    pub fn fail_closed(&self) -> bool {
        !self.fail_open()
    }

    pub fn newly_detected_licenses(&self) -> bool {
        self.license_states.contains(&LicenseState::NewlyDetected)
    }

    pub fn only_newly_detected_licenses(&self) -> bool {
        self.newly_detected_licenses() && !self.license_states.contains(&LicenseState::Detected)
    }

    pub fn bot_message_disabled(&self) -> bool {
        !self.send_bot_message.enabled
    }

    pub fn unblock_rules_using_execution_policies(&self) -> bool {
        self.policy_tuning.unblock_rules_using_execution_policies
    }

    /// Reject settings the evaluator cannot interpret.
    pub fn validate(&self) -> Result<()> {
        if let Some(list) = &self.licenses {
            if list.is_empty() {
                return Err(PolicyGateError::InvalidInput(format!(
                    "policy {} declares an empty license list",
                    self.id
                )));
            }
        }
        if let Some(age) = &self.vulnerability_age {
            if age.value == 0 {
                return Err(PolicyGateError::InvalidInput(format!(
                    "policy {} declares a zero vulnerability age",
                    self.id
                )));
            }
        }
        Ok(())
    }
}
