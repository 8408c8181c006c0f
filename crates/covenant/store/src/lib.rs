//! Persistence seam for Covenant.
//!
//! Governance state is keyed by an owner id (an intersection, a circle, an
//! action hash). Everything above this crate talks to [`OwnerStore`] and never
//! to a concrete backend; ordered append-only storage for audit chains lives
//! next to the ledger in `covenant-audit`.

mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryOwnerStore;
pub use traits::OwnerStore;
