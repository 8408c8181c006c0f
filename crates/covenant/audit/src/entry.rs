//! Audit events and sealed, hash-linked entries.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use covenant_types::{CircleId, IntersectionId, TraceId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Previous-hash of the first entry in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash algorithm name carried in exports.
pub const HASH_ALGORITHM: &str = "sha256";

/// Result of the audited transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failed,
    Awaiting,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Failed => "failed",
            AuditOutcome::Awaiting => "awaiting",
        }
    }
}

/// An event before it is sealed into a chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEvent {
    pub event_type: String,
    pub circle_id: Option<CircleId>,
    pub intersection_id: Option<IntersectionId>,
    pub subject_id: Option<String>,
    pub outcome: AuditOutcome,
    pub trace_id: Option<TraceId>,
    pub details: BTreeMap<String, String>,
}

impl AuditEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            circle_id: None,
            intersection_id: None,
            subject_id: None,
            outcome: AuditOutcome::Success,
            trace_id: None,
            details: BTreeMap::new(),
        }
    }

    pub fn circle(mut self, circle: &CircleId) -> Self {
        self.circle_id = Some(circle.clone());
        self
    }

    pub fn intersection(mut self, intersection: &IntersectionId) -> Self {
        self.intersection_id = Some(intersection.clone());
        self
    }

    pub fn subject(mut self, subject: impl ToString) -> Self {
        self.subject_id = Some(subject.to_string());
        self
    }

    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn trace(mut self, trace: &TraceId) -> Self {
        self.trace_id = Some(trace.clone());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    /// Bind the event to a chain position and compute its hash.
    pub fn seal(
        self,
        owner: &str,
        sequence: u64,
        recorded_at: DateTime<Utc>,
        previous_hash: String,
    ) -> AuditEntry {
        let mut entry = AuditEntry {
            owner: owner.to_string(),
            sequence,
            event_type: self.event_type,
            circle_id: self.circle_id,
            intersection_id: self.intersection_id,
            subject_id: self.subject_id,
            outcome: self.outcome,
            trace_id: self.trace_id,
            details: self.details,
            recorded_at,
            previous_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        entry
    }
}

/// A sealed audit entry. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub owner: String,
    /// 1-based position in the owner's chain.
    pub sequence: u64,
    pub event_type: String,
    pub circle_id: Option<CircleId>,
    pub intersection_id: Option<IntersectionId>,
    pub subject_id: Option<String>,
    pub outcome: AuditOutcome,
    pub trace_id: Option<TraceId>,
    pub details: BTreeMap<String, String>,
    pub recorded_at: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

impl AuditEntry {
    /// Canonical byte form: fixed-order `key=value` lines, details sorted by key.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        push_line(&mut out, "owner", &self.owner);
        push_line(&mut out, "sequence", &self.sequence.to_string());
        push_line(&mut out, "event_type", &self.event_type);
        push_line(
            &mut out,
            "circle_id",
            self.circle_id.as_ref().map(|c| c.as_str()).unwrap_or(""),
        );
        push_line(
            &mut out,
            "intersection_id",
            self.intersection_id.as_ref().map(|i| i.as_str()).unwrap_or(""),
        );
        push_line(&mut out, "subject_id", self.subject_id.as_deref().unwrap_or(""));
        push_line(&mut out, "outcome", self.outcome.as_str());
        push_line(
            &mut out,
            "trace_id",
            self.trace_id.as_ref().map(|t| t.as_str()).unwrap_or(""),
        );
        push_line(
            &mut out,
            "recorded_at",
            &self
                .recorded_at
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
        );
        for (key, value) in &self.details {
            push_line(&mut out, &format!("detail:{key}"), value);
        }
        out
    }

    /// `SHA-256(previous_hash || canonical)`, lowercase hex.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.canonical().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// One-line human explanation, used in exports.
    pub fn explain(&self) -> String {
        let mut line = format!("#{} {} [{}]", self.sequence, self.event_type, self.outcome.as_str());
        if let Some(circle) = &self.circle_id {
            line.push_str(&format!(" by {circle}"));
        }
        if let Some(ix) = &self.intersection_id {
            line.push_str(&format!(" in {ix}"));
        }
        if let Some(subject) = &self.subject_id {
            line.push_str(&format!(" on {subject}"));
        }
        if let Some(reason) = self.details.get("reason") {
            line.push_str(&format!(": {reason}"));
        }
        line
    }
}

fn push_line(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push('=');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap()
    }

    fn sealed() -> AuditEntry {
        AuditEvent::new("proposal.accepted")
            .circle(&CircleId::new("bob"))
            .intersection(&IntersectionId::new("ix-1"))
            .subject("prop-1")
            .detail("state", "accepted")
            .seal(
                "ix-1",
                1,
                Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
                GENESIS_HASH.to_string(),
            )
    }

    #[test]
    fn seal_computes_hash() {
        let entry = sealed();
        assert_eq!(entry.hash.len(), 64);
        assert_eq!(entry.hash, entry.compute_hash());
    }

    #[test]
    fn hash_covers_previous_hash() {
        let a = sealed();
        let mut b = a.clone();
        b.previous_hash = "f".repeat(64);
        assert_ne!(a.hash, b.compute_hash());
    }

    #[test]
    fn newline_in_value_cannot_forge_a_field() {
        let a = AuditEvent::new("x")
            .subject("a\noutcome=denied")
            .seal("o", 1, t0(), GENESIS_HASH.into());
        assert!(a.canonical().contains("subject_id=a\\noutcome=denied\n"));
    }

    #[test]
    fn explain_mentions_actor_and_reason() {
        let entry = AuditEvent::new("authority.denied")
            .circle(&CircleId::new("alice"))
            .outcome(AuditOutcome::Denied)
            .detail("reason", "approval expired")
            .seal("alice", 4, t0(), GENESIS_HASH.into());
        assert_eq!(
            entry.explain(),
            "#4 authority.denied [denied] by circle:alice: approval expired"
        );
    }
}
