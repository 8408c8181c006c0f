//! Executor seam.
//!
//! The executor is the only place a loop touches the outside world. It is
//! called at most once per action and never retried.

use std::collections::BTreeMap;

use async_trait::async_trait;
use covenant_authority::{ActionHash, AuthorizationGrant};
use covenant_negotiation::Commitment;
use covenant_types::{ActionId, RunMode, TraceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One authorized action handed to the executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub action_id: ActionId,
    pub action_hash: ActionHash,
    pub trace_id: TraceId,
    pub mode: RunMode,
    pub commitment: Commitment,
    pub grant: AuthorizationGrant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub summary: String,
    pub details: BTreeMap<String, String>,
}

impl ExecutionOutcome {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("action {action} rejected: {reason}")]
    Rejected { action: ActionId, reason: String },

    #[error("executor unavailable: {0}")]
    Unavailable(String),

    #[error("unknown action {0}")]
    UnknownAction(ActionId),
}

/// Narrow interface to whatever carries out a commitment.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> std::result::Result<ExecutionOutcome, ExecutorError>;

    async fn pause(&self, action: &ActionId) -> std::result::Result<(), ExecutorError>;

    async fn resume(&self, action: &ActionId) -> std::result::Result<(), ExecutorError>;

    /// Halt `action`. Must not complete it.
    async fn abort(&self, action: &ActionId) -> std::result::Result<(), ExecutorError>;
}

/// Executor that performs nothing and remembers every call.
#[derive(Default)]
pub struct RecordingExecutor {
    executed: Mutex<Vec<ExecutionRequest>>,
    signals: Mutex<Vec<(String, ActionId)>>,
    failure: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor whose every execution is rejected with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn executed(&self) -> Vec<ExecutionRequest> {
        self.executed.lock().clone()
    }

    /// `(signal, action)` pairs for pause, resume and abort calls, in order.
    pub fn signals(&self) -> Vec<(String, ActionId)> {
        self.signals.lock().clone()
    }

    fn signal(&self, name: &str, action: &ActionId) {
        self.signals.lock().push((name.to_string(), action.clone()));
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> std::result::Result<ExecutionOutcome, ExecutorError> {
        self.executed.lock().push(request.clone());
        if let Some(reason) = &self.failure {
            return Err(ExecutorError::Rejected {
                action: request.action_id.clone(),
                reason: reason.clone(),
            });
        }
        Ok(
            ExecutionOutcome::new(format!("executed {}", request.commitment.action.action_type))
                .with_detail("action_hash", request.action_hash.as_str()),
        )
    }

    async fn pause(&self, action: &ActionId) -> std::result::Result<(), ExecutorError> {
        self.signal("pause", action);
        Ok(())
    }

    async fn resume(&self, action: &ActionId) -> std::result::Result<(), ExecutorError> {
        self.signal("resume", action);
        Ok(())
    }

    async fn abort(&self, action: &ActionId) -> std::result::Result<(), ExecutorError> {
        self.signal("abort", action);
        Ok(())
    }
}
