//! Loop orchestration.
//!
//! A loop carries one intent from a circle through intersection discovery,
//! negotiation and commitment to an authorized action, then settles the
//! outcome and records it in every party's memory. Each transition lands in
//! the issuer's audit chain under the loop's trace id.

pub mod config;
pub mod context;
pub mod delegate;
mod error;
pub mod executor;
pub mod memory;
pub mod orchestrator;
pub mod settlement;
pub mod telemetry;

pub use config::{ApprovalConfig, AuditConfig, CovenantConfig, ThresholdRule, TracingConfig};
pub use context::{
    ActionLifecycle, ActionPlan, LoopContext, LoopIntent, LoopState, LoopStatus, LoopStep,
    StepState,
};
pub use delegate::{GovernanceNegotiator, Negotiated, NegotiationDelegate, StepOutcome};
pub use error::{ConfigError, DelegateError, LoopError, Result};
pub use executor::{ExecutionOutcome, ExecutionRequest, Executor, ExecutorError, RecordingExecutor};
pub use memory::{CircleMemory, MemoryDelegate, OutcomeRecord};
pub use orchestrator::{LoopOrchestrator, LoopServices};
pub use settlement::{RecordingSettlement, SettlementDelegate, SettlementReceipt};
pub use telemetry::init_tracing;
