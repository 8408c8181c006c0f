//! Execution envelope contract.
//!
//! An [`ExecutionEnvelope`] travels with every call that could reach the
//! outside world. [`EnvelopeValidator`] decides, without side effects, whether
//! the call may proceed on a read path or a write path. Clocks are always
//! supplied by the caller.

pub mod envelope;
mod error;
pub mod validator;

pub use envelope::{ApprovalEvidence, EnvelopeBuilder, ExecutionEnvelope};
pub use error::{EnvelopeError, Violation};
pub use validator::{EnvelopeConfig, EnvelopeValidator};
