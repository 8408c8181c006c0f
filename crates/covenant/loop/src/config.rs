//! Covenant configuration.
//!
//! ```toml
//! [tracing]
//! level = "info"
//! json = false
//!
//! [scope_policy]
//! write_suffixes = [":write", ":create"]
//! forbidden_patterns = ["payment", "transfer"]
//!
//! [envelope]
//! max_age_seconds = 300
//!
//! [approvals]
//! low = "one"
//! medium = "one"
//! high = "all"
//! default_ttl_minutes = 15
//!
//! [audit]
//! backend = "file"
//! dir = "/var/lib/covenant/audit"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use covenant_audit::{AuditChainStore, FileChainStore, MemoryChainStore};
use covenant_envelope::{EnvelopeConfig, EnvelopeValidator};
use covenant_store::StoreError;
use covenant_types::{RiskClass, ScopePolicy};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CovenantConfig {
    pub tracing: TracingConfig,
    pub scope_policy: ScopePolicy,
    pub envelope: EnvelopeConfig,
    pub approvals: ApprovalConfig,
    pub audit: AuditConfig,
}

impl CovenantConfig {
    /// Load from `path`, or defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: CovenantConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.envelope.max_age_seconds <= 0 {
            return Err(ConfigError::Invalid("envelope.max_age_seconds must be positive".into()));
        }
        if self.approvals.default_ttl_minutes <= 0 {
            return Err(ConfigError::Invalid(
                "approvals.default_ttl_minutes must be positive".into(),
            ));
        }
        if let AuditConfig::File { dir } = &self.audit {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("audit.dir is empty".into()));
            }
        }
        Ok(())
    }

    pub fn envelope_validator(&self) -> EnvelopeValidator {
        EnvelopeValidator::new(self.scope_policy.clone(), self.envelope.clone())
    }

    pub fn audit_store(&self) -> Result<Arc<dyn AuditChainStore>, StoreError> {
        Ok(match &self.audit {
            AuditConfig::Memory => Arc::new(MemoryChainStore::new()),
            AuditConfig::File { dir } => Arc::new(FileChainStore::open(dir.clone())?),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// How many required approvers must sign.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdRule {
    One,
    Majority,
    All,
}

impl ThresholdRule {
    /// Threshold for `approvers` required approvers, never below one.
    pub fn resolve(&self, approvers: usize) -> usize {
        let n = match self {
            ThresholdRule::One => 1,
            ThresholdRule::Majority => approvers / 2 + 1,
            ThresholdRule::All => approvers,
        };
        n.clamp(1, approvers.max(1))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub low: ThresholdRule,
    pub medium: ThresholdRule,
    pub high: ThresholdRule,
    /// Suggested validity for newly issued approvals.
    pub default_ttl_minutes: i64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            low: ThresholdRule::One,
            medium: ThresholdRule::One,
            high: ThresholdRule::All,
            default_ttl_minutes: 15,
        }
    }
}

impl ApprovalConfig {
    pub fn rule(&self, risk: RiskClass) -> ThresholdRule {
        match risk {
            RiskClass::Low => self.low,
            RiskClass::Medium => self.medium,
            RiskClass::High => self.high,
        }
    }

    pub fn threshold(&self, risk: RiskClass, approvers: usize) -> usize {
        self.rule(risk).resolve(approvers)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::minutes(self.default_ttl_minutes)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum AuditConfig {
    #[default]
    Memory,
    /// One JSONL chain file per owner under `dir`.
    File { dir: PathBuf },
}
