//! Deterministic action fingerprinting.
//!
//! The action hash is SHA-256 over fixed-order `key=value\n` lines:
//!
//! ```text
//! action_id=<id>
//! action_type=<type>
//! intersection_id=<id>
//! contract_version=<major.minor>
//! mode=<suggest_only|simulate|execute>
//! scopes=<ascending, comma separated>
//! param:<key>=<value>        (one line per parameter, keys ascending)
//! ```
//!
//! Backslashes and newlines inside values are escaped, so no value can
//! inject a line of its own.

use std::collections::{BTreeMap, BTreeSet};

use covenant_types::{ActionId, ContractVersion, IntersectionId, RunMode, Scope};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuthorityError, Result};

/// Lowercase hex SHA-256 of an action's canonical form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionHash(String);

impl ActionHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a hex digest received from elsewhere (an approval, an export).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

impl std::fmt::Display for ActionHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything that identifies one attempt at one action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFields {
    pub action_id: ActionId,
    pub action_type: String,
    pub intersection_id: IntersectionId,
    pub contract_version: ContractVersion,
    pub mode: RunMode,
    pub scopes: Vec<Scope>,
    pub parameters: BTreeMap<String, String>,
}

impl ActionFields {
    pub fn validate(&self) -> Result<()> {
        if self.action_id.is_empty() {
            return Err(AuthorityError::InvalidFields("action id is empty".into()));
        }
        if self.action_type.trim().is_empty() {
            return Err(AuthorityError::InvalidFields("action type is empty".into()));
        }
        if self.intersection_id.is_empty() {
            return Err(AuthorityError::InvalidFields("intersection id is empty".into()));
        }
        if self.scopes.iter().any(Scope::is_empty) {
            return Err(AuthorityError::InvalidFields("blank scope".into()));
        }
        Ok(())
    }

    /// Scopes in canonical (ascending, de-duplicated) order.
    pub fn sorted_scopes(&self) -> Vec<&Scope> {
        self.scopes.iter().collect::<BTreeSet<_>>().into_iter().collect()
    }

    pub fn canonical(&self) -> String {
        let mut out = String::new();
        push_line(&mut out, "action_id", self.action_id.as_str());
        push_line(&mut out, "action_type", &self.action_type);
        push_line(&mut out, "intersection_id", self.intersection_id.as_str());
        push_line(&mut out, "contract_version", &self.contract_version.to_string());
        push_line(&mut out, "mode", self.mode.as_str());
        let scopes = self
            .sorted_scopes()
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        push_line(&mut out, "scopes", &scopes);
        for (key, value) in &self.parameters {
            push_line(&mut out, &format!("param:{}", escape(key)), value);
        }
        out
    }
}

/// Fingerprint `fields`. Pure: the same fields always produce the same hash
/// regardless of scope or parameter insertion order.
pub fn compute_action_hash(fields: &ActionFields) -> ActionHash {
    let digest = Sha256::digest(fields.canonical().as_bytes());
    ActionHash(hex::encode(digest))
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn push_line(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push('=');
    out.push_str(&escape(value));
    out.push('\n');
}
