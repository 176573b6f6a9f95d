//! Evaluation configuration.
//!
//! Resolution order (highest priority first):
//! 1. Environment variables (`POLICY_GATE_*`)
//! 2. Config file (`.toml` or `.json`, chosen by extension)
//! 3. Compiled defaults

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{PolicyGateError, Result};

/// Exclusive lock settings used while updating the bot comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub ttl_ms: u64,
    pub retry_sleep_ms: u64,
    pub max_attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 10_000,
            retry_sleep_ms: 100,
            max_attempts: 10,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_sleep(&self) -> Duration {
        Duration::from_millis(self.retry_sleep_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyGateConfig {
    /// Cap on identifiers stored per violation and rows rendered per comment list.
    pub max_violations: usize,
    /// When false, warn-mode policies are enforced like any other.
    pub warn_mode_enabled: bool,
    pub bot_comments_enabled: bool,
    pub lock: LockConfig,
}

impl Default for PolicyGateConfig {
    fn default() -> Self {
        Self {
            max_violations: 10,
            warn_mode_enabled: true,
            bot_comments_enabled: true,
            lock: LockConfig::default(),
        }
    }
}

impl PolicyGateConfig {
    /// Load from `path` (if given), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PolicyGateError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content),
        }
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| PolicyGateError::Config(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| PolicyGateError::Config(e.to_string()))
    }

    /// Apply `POLICY_GATE_*` overrides read through `lookup`.
    ///
    /// Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("POLICY_GATE_MAX_VIOLATIONS").and_then(|v| v.parse().ok()) {
            self.max_violations = v;
        }
        if let Some(v) = lookup("POLICY_GATE_WARN_MODE_ENABLED").and_then(|v| v.parse().ok()) {
            self.warn_mode_enabled = v;
        }
        if let Some(v) = lookup("POLICY_GATE_BOT_COMMENTS_ENABLED").and_then(|v| v.parse().ok()) {
            self.bot_comments_enabled = v;
        }
        if let Some(v) = lookup("POLICY_GATE_LOCK_TTL_MS").and_then(|v| v.parse().ok()) {
            self.lock.ttl_ms = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_violations == 0 {
            return Err(PolicyGateError::Config(
                "max_violations must be greater than 0".to_string(),
            ));
        }
        if self.lock.max_attempts == 0 {
            return Err(PolicyGateError::Config(
                "lock.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.lock.ttl_ms == 0 {
            return Err(PolicyGateError::Config(
                "lock.ttl_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
