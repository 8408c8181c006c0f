//! Core type definitions for the Covenant governance substrate.
//!
//! This crate provides the shared vocabulary every Covenant crate speaks:
//! circle and intersection identities, versioned contracts, scopes, run modes,
//! the injected clock, and the per-entity lock used to serialize mutations on
//! one owner without blocking unrelated owners.
//!
//! No negotiation, authorization, or audit logic lives here; only types.

pub mod clock;
pub mod contract;
pub mod error;
pub mod ids;
pub mod intersection;
pub mod mode;
pub mod scope;
pub mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use contract::{AmendmentPolicy, Ceiling, CeilingKind, Contract, ContractVersion};
pub use error::ErrorKind;
pub use ids::{
    ActionId, ApprovalId, CircleId, CommitmentId, IntersectionId, InviteId, LoopId, ProposalId,
    TraceId,
};
pub use intersection::Intersection;
pub use mode::{RiskClass, RunMode};
pub use scope::{Scope, ScopeClass, ScopePolicy};
pub use sync::KeyedLocks;
