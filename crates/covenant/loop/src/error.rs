use covenant_audit::AuditError;
use covenant_authority::AuthorityError;
use covenant_negotiation::NegotiationError;
use covenant_store::StoreError;
use covenant_types::{ErrorKind, LoopId};
use thiserror::Error;

use crate::context::{LoopStatus, LoopStep};
use crate::executor::ExecutorError;

pub type Result<T> = std::result::Result<T, LoopError>;

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("unknown loop {0}")]
    UnknownLoop(LoopId),

    #[error("loop {loop_id} cannot {action} while {status}")]
    InvalidTransition {
        loop_id: LoopId,
        status: LoopStatus,
        action: &'static str,
    },

    #[error("loop {loop_id} cannot skip ahead to {requested}; next step is {next}")]
    CannotSkip {
        loop_id: LoopId,
        requested: LoopStep,
        next: LoopStep,
    },

    #[error("loop {loop_id} has no {what} at step {step}")]
    MissingPrerequisite {
        loop_id: LoopId,
        step: LoopStep,
        what: &'static str,
    },

    #[error("loop {0} already started its action; a fresh negotiation is required")]
    ReExecutionRefused(LoopId),

    #[error("approval does not name the action hash of loop {0}")]
    ApprovalMismatch(LoopId),

    #[error("loop {0} was aborted")]
    Aborted(LoopId),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error("executor failed: {0}")]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Delegate(#[from] DelegateError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl LoopError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoopError::InvalidIntent(_)
            | LoopError::UnknownLoop(_)
            | LoopError::ApprovalMismatch(_) => ErrorKind::Validation,
            LoopError::InvalidTransition { .. }
            | LoopError::CannotSkip { .. }
            | LoopError::MissingPrerequisite { .. }
            | LoopError::ReExecutionRefused(_)
            | LoopError::Aborted(_) => ErrorKind::StateViolation,
            LoopError::Negotiation(err) => err.kind(),
            LoopError::Authority(err) => err.kind(),
            LoopError::Executor(_) | LoopError::Delegate(_) => ErrorKind::CollaboratorFailure,
            LoopError::Audit(err) => err.kind(),
        }
    }
}

/// Failure reported by a settlement or memory delegate.
#[derive(Debug, Error)]
pub enum DelegateError {
    #[error("{delegate} failed: {reason}")]
    Failed {
        delegate: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("tracing already initialized: {0}")]
    Tracing(String),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Io(_) | ConfigError::Tracing(_) => ErrorKind::CollaboratorFailure,
            ConfigError::Parse(_) | ConfigError::Invalid(_) => ErrorKind::Validation,
        }
    }
}
