use covenant_audit::AuditError;
use covenant_envelope::EnvelopeError;
use covenant_store::StoreError;
use covenant_types::{ApprovalId, CircleId, ErrorKind};
use thiserror::Error;

use crate::action::ActionHash;
use crate::verify::{RejectedApproval, RejectionReason};

pub type Result<T> = std::result::Result<T, AuthorityError>;

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("invalid action fields: {0}")]
    InvalidFields(String),

    #[error("invalid threshold policy: {0}")]
    InvalidPolicy(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("envelope does not match action: {0}")]
    BindingMismatch(String),

    #[error("approval artifact {0} referenced by the envelope was not presented")]
    UnknownArtifactRef(String),

    #[error("approval {approval_id} rejected: {reason}")]
    ApprovalRejected {
        approval_id: ApprovalId,
        reason: RejectionReason,
    },

    #[error("approval threshold not met: {approvers} of {threshold} required approvers")]
    ThresholdNotMet {
        approvers: usize,
        threshold: usize,
        rejected: Vec<RejectedApproval>,
    },

    #[error("approval {approval_id} already spent for action {action_hash}")]
    AlreadySpent {
        action_hash: ActionHash,
        approval_id: ApprovalId,
    },

    #[error("approval {0} is already revoked")]
    AlreadyRevoked(ApprovalId),

    #[error("circle {by} cannot revoke approval {approval_id} issued by {approver}")]
    NotApprover {
        approval_id: ApprovalId,
        approver: CircleId,
        by: CircleId,
    },

    #[error("signature failure: {0}")]
    Signature(String),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthorityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthorityError::InvalidFields(_) | AuthorityError::InvalidPolicy(_) => {
                ErrorKind::Validation
            }
            AuthorityError::Envelope(err) => err.kind(),
            AuthorityError::BindingMismatch(_)
            | AuthorityError::UnknownArtifactRef(_)
            | AuthorityError::ApprovalRejected { .. }
            | AuthorityError::ThresholdNotMet { .. }
            | AuthorityError::NotApprover { .. } => ErrorKind::AuthorizationDenied,
            AuthorityError::AlreadySpent { .. } | AuthorityError::AlreadyRevoked(_) => {
                ErrorKind::StateViolation
            }
            AuthorityError::Signature(_) => ErrorKind::CollaboratorFailure,
            AuthorityError::Audit(err) => err.kind(),
            AuthorityError::Store(err) => err.kind(),
        }
    }
}
