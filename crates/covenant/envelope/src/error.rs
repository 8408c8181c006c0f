use covenant_types::{ErrorKind, RunMode, Scope};
use thiserror::Error;

/// One reason an envelope failed validation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("trace id is empty")]
    MissingTraceId,
    #[error("actor circle is empty")]
    MissingActor,
    #[error("intersection id is empty")]
    MissingIntersection,
    #[error("no scopes declared")]
    NoScopes,
    #[error("blank scope declared")]
    BlankScope,
    #[error("mode {0} is not permitted on a read path")]
    ModeNotReadable(RunMode),
    #[error("mode {0} is not execute")]
    ModeNotExecute(RunMode),
    #[error("scope {0} is a write scope")]
    WriteScopeOnReadPath(Scope),
    #[error("scope {scope} matches forbidden pattern {pattern}")]
    ForbiddenScope { scope: Scope, pattern: String },
    #[error("human approval flag is not set")]
    ApprovalNotGranted,
    #[error("approval artifact reference is missing")]
    ApprovalArtifactMissing,
    #[error("required scope {0} is not declared")]
    RequiredScopeMissing(Scope),
    #[error("envelope is {age_seconds}s old, limit is {max_age_seconds}s")]
    Stale { age_seconds: i64, max_age_seconds: i64 },
    #[error("envelope is issued in the future")]
    IssuedInFuture,
}

impl Violation {
    /// Structural problems make the envelope malformed rather than denied.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Violation::MissingTraceId
                | Violation::MissingActor
                | Violation::MissingIntersection
                | Violation::NoScopes
                | Violation::BlankScope
        )
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {}", join(.0))]
    Malformed(Vec<Violation>),

    #[error("envelope denied: {}", join(.0))]
    Denied(Vec<Violation>),
}

impl EnvelopeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnvelopeError::Malformed(_) => ErrorKind::Validation,
            EnvelopeError::Denied(_) => ErrorKind::AuthorizationDenied,
        }
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            EnvelopeError::Malformed(v) | EnvelopeError::Denied(v) => v,
        }
    }

    pub(crate) fn from_violations(violations: Vec<Violation>) -> Result<(), EnvelopeError> {
        if violations.is_empty() {
            Ok(())
        } else if violations.iter().any(Violation::is_structural) {
            Err(EnvelopeError::Malformed(violations))
        } else {
            Err(EnvelopeError::Denied(violations))
        }
    }
}
