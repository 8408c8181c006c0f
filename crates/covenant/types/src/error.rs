use serde::{Deserialize, Serialize};

/// The four failure families every Covenant error maps onto.
///
/// Nothing is retried automatically in any family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or incomplete input; never partially applied.
    Validation,
    /// Well-formed but not permitted (mode, scope, approval, threshold).
    AuthorizationDenied,
    /// Illegal transition, e.g. accepting a rejected proposal or replaying a spent approval.
    StateViolation,
    /// Executor, signature or storage failure.
    CollaboratorFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::AuthorizationDenied => "authorization_denied",
            ErrorKind::StateViolation => "state_violation",
            ErrorKind::CollaboratorFailure => "collaborator_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
