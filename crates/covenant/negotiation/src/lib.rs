//! Multi-party negotiation over intersections.
//!
//! Circles join an intersection through signed invites, then change its
//! contract (amendments) or agree on actions (commitments) through proposals
//! that every party must accept before either side can finalize.

pub mod engine;
mod error;
pub mod invite;
pub mod proposal;

pub use engine::{IntersectionRecord, NegotiationEngine};
pub use error::{NegotiationError, Result};
pub use invite::InviteToken;
pub use proposal::{
    ActionSpec, AmendmentTerms, CeilingChange, Commitment, CommitmentTerms, Finalized, Proposal,
    ProposalKind, ProposalState, ProposalTerms,
};
