use chrono::{DateTime, Utc};
use covenant_types::{RunMode, Scope, ScopeClass, ScopePolicy};
use serde::{Deserialize, Serialize};

use crate::envelope::ExecutionEnvelope;
use crate::error::{EnvelopeError, Violation};

/// Envelope validation settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Oldest envelope accepted by [`EnvelopeValidator::validate_freshness`].
    pub max_age_seconds: i64,
    /// Tolerated forward clock skew.
    pub max_skew_seconds: i64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: 300,
            max_skew_seconds: 5,
        }
    }
}

/// Pure, synchronous envelope checks.
///
/// Every check runs and every violation is reported; a single violation
/// fails the call.
#[derive(Clone, Debug, Default)]
pub struct EnvelopeValidator {
    policy: ScopePolicy,
    config: EnvelopeConfig,
}

impl EnvelopeValidator {
    pub fn new(policy: ScopePolicy, config: EnvelopeConfig) -> Self {
        Self { policy, config }
    }

    pub fn policy(&self) -> &ScopePolicy {
        &self.policy
    }

    /// Read path: mode is `suggest_only` or `simulate` and every scope is read-only.
    pub fn validate_for_read(&self, envelope: &ExecutionEnvelope) -> Result<(), EnvelopeError> {
        let mut violations = structural(envelope);

        if envelope.mode == RunMode::Execute {
            violations.push(Violation::ModeNotReadable(envelope.mode));
        }

        for scope in envelope.scopes_used.iter().filter(|s| !s.is_empty()) {
            match self.policy.classify(scope) {
                ScopeClass::ReadOnly => {}
                ScopeClass::Write => violations.push(Violation::WriteScopeOnReadPath(scope.clone())),
                ScopeClass::Forbidden { pattern } => violations.push(Violation::ForbiddenScope {
                    scope: scope.clone(),
                    pattern,
                }),
            }
        }

        EnvelopeError::from_violations(violations)
    }

    /// Write path: mode is `execute`, a human approved with an artifact
    /// reference, and `required_scope` is declared.
    pub fn validate_for_write(
        &self,
        envelope: &ExecutionEnvelope,
        required_scope: &Scope,
    ) -> Result<(), EnvelopeError> {
        let mut violations = structural(envelope);

        if envelope.mode != RunMode::Execute {
            violations.push(Violation::ModeNotExecute(envelope.mode));
        }
        if !envelope.approval.human_approved {
            violations.push(Violation::ApprovalNotGranted);
        }
        if !envelope.approval.has_artifact() {
            violations.push(Violation::ApprovalArtifactMissing);
        }
        if !envelope.declares(required_scope) {
            violations.push(Violation::RequiredScopeMissing(required_scope.clone()));
        }

        EnvelopeError::from_violations(violations)
    }

    /// Reject envelopes older than the configured age or issued ahead of `now`.
    pub fn validate_freshness(
        &self,
        envelope: &ExecutionEnvelope,
        now: DateTime<Utc>,
    ) -> Result<(), EnvelopeError> {
        let age = (now - envelope.issued_at).num_seconds();
        let mut violations = Vec::new();
        if age > self.config.max_age_seconds {
            violations.push(Violation::Stale {
                age_seconds: age,
                max_age_seconds: self.config.max_age_seconds,
            });
        } else if -age > self.config.max_skew_seconds {
            violations.push(Violation::IssuedInFuture);
        }
        EnvelopeError::from_violations(violations)
    }
}

fn structural(envelope: &ExecutionEnvelope) -> Vec<Violation> {
    let mut violations = Vec::new();
    if envelope.trace_id.is_empty() {
        violations.push(Violation::MissingTraceId);
    }
    if envelope.actor.is_empty() {
        violations.push(Violation::MissingActor);
    }
    if envelope.intersection_id.is_empty() {
        violations.push(Violation::MissingIntersection);
    }
    if envelope.scopes_used.is_empty() {
        violations.push(Violation::NoScopes);
    } else if envelope.scopes_used.iter().any(Scope::is_empty) {
        violations.push(Violation::BlankScope);
    }
    violations
}
