//! Action identity and approval binding.
//!
//! - [`compute_action_hash`] fingerprints one attempt at one action.
//! - [`ApprovalArtifact`] is a circle's ed25519-signed consent to exactly one
//!   hash, time-boxed and single-use.
//! - [`ApprovalVerifier`] checks single artifacts and multi-party thresholds.
//! - [`Authority`] combines these with the envelope contract into one
//!   audited authorization decision.

pub mod action;
pub mod approval;
pub mod authority;
mod error;
pub mod registry;
pub mod signer;
pub mod verify;

pub use action::{compute_action_hash, ActionFields, ActionHash};
pub use approval::ApprovalArtifact;
pub use authority::{AuthorizationGrant, AuthorizationRequest, Authority};
pub use error::{AuthorityError, Result};
pub use registry::{Revocation, RevocationList, SpendRecord, SpentApprovals, SpentSet};
pub use signer::{
    Ed25519Keyring, Ed25519Signer, PayloadSigner, SignatureError, SignatureVerifier,
};
pub use verify::{
    ApprovalVerifier, RejectedApproval, RejectionReason, ThresholdPolicy, ThresholdReport,
};
