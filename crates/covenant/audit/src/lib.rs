//! Covenant audit ledger.
//!
//! Every governance transition (proposal moves, authorization grants and
//! denials, loop steps) lands here as an entry in its owner's chain:
//!
//! ```text
//! hash = SHA-256(previous_hash || canonical(entry))
//! ```
//!
//! Chains are append-only. [`AuditLedger::verify`] recomputes a chain from
//! genesis and reports the first break; [`AuditLedger::export`] produces an
//! [`AuditExport`] that [`verify_export`] can check with nothing else in hand.

mod error;
pub mod entry;
pub mod export;
pub mod ledger;
pub mod store;
pub mod verify;

pub use entry::{AuditEntry, AuditEvent, AuditOutcome, GENESIS_HASH, HASH_ALGORITHM};
pub use error::{AuditError, Result};
pub use export::{verify_export, AuditExport};
pub use ledger::{AuditLedger, AuditSink};
pub use store::{Anchor, AuditChainStore, ChainHead, FileChainStore, MemoryChainStore};
pub use verify::{verify_entries, BreakKind, ChainBreak, VerificationReport};
