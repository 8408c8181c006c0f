use covenant_audit::AuditError;
use covenant_authority::SignatureError;
use covenant_store::StoreError;
use covenant_types::{
    CircleId, ContractVersion, ErrorKind, IntersectionId, InviteId, ProposalId, Scope,
};
use thiserror::Error;

use crate::proposal::ProposalState;

pub type Result<T> = std::result::Result<T, NegotiationError>;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("invalid terms: {0}")]
    InvalidTerms(String),

    #[error("unknown intersection {0}")]
    UnknownIntersection(IntersectionId),

    #[error("unknown proposal {0}")]
    UnknownProposal(ProposalId),

    #[error("{circle} is not a party to {intersection}")]
    NotAParty {
        circle: CircleId,
        intersection: IntersectionId,
    },

    #[error("{circle} is not tracked by proposal {proposal}")]
    NotTracked { circle: CircleId, proposal: ProposalId },

    #[error("scope {0} is not granted by the contract")]
    ScopeNotGranted(Scope),

    #[error("amendment policy forbids {0}")]
    PolicyForbids(&'static str),

    #[error("cannot {action} proposal {proposal} in state {state}")]
    InvalidTransition {
        proposal: ProposalId,
        state: ProposalState,
        action: &'static str,
    },

    #[error("proposal {0} is already finalized")]
    AlreadyFinalized(ProposalId),

    #[error("contract version conflict: amendment based on {expected}, contract is at {actual}")]
    VersionConflict {
        expected: ContractVersion,
        actual: ContractVersion,
    },

    #[error("commitment terms expired")]
    CommitmentExpired,

    #[error("invite {0} has expired")]
    InviteExpired(InviteId),

    #[error("invite {0} was already accepted")]
    InviteAlreadyUsed(InviteId),

    #[error("invite is addressed to {expected}, not {actual}")]
    WrongInvitee { expected: CircleId, actual: CircleId },

    #[error("invite signature rejected: {0}")]
    InviteSignature(#[from] SignatureError),

    #[error("{circle} is already a party to {intersection}")]
    AlreadyParty {
        circle: CircleId,
        intersection: IntersectionId,
    },

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl NegotiationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NegotiationError::InvalidTerms(_)
            | NegotiationError::UnknownIntersection(_)
            | NegotiationError::UnknownProposal(_) => ErrorKind::Validation,
            NegotiationError::NotAParty { .. }
            | NegotiationError::NotTracked { .. }
            | NegotiationError::ScopeNotGranted(_)
            | NegotiationError::PolicyForbids(_)
            | NegotiationError::InviteExpired(_)
            | NegotiationError::WrongInvitee { .. }
            | NegotiationError::InviteSignature(_) => ErrorKind::AuthorizationDenied,
            NegotiationError::InvalidTransition { .. }
            | NegotiationError::AlreadyFinalized(_)
            | NegotiationError::VersionConflict { .. }
            | NegotiationError::CommitmentExpired
            | NegotiationError::InviteAlreadyUsed(_)
            | NegotiationError::AlreadyParty { .. } => ErrorKind::StateViolation,
            NegotiationError::Audit(err) => err.kind(),
            NegotiationError::Store(err) => err.kind(),
        }
    }
}
