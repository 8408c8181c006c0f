use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use covenant_negotiation::Commitment;
use covenant_types::{CircleId, CommitmentId, LoopId, RunMode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::context::LoopContext;
use crate::error::DelegateError;
use crate::executor::ExecutionOutcome;

/// Record that an outcome was settled between the commitment's parties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub loop_id: LoopId,
    pub commitment_id: CommitmentId,
    pub mode: RunMode,
    pub parties: BTreeSet<CircleId>,
    pub summary: String,
    pub settled_at: DateTime<Utc>,
}

#[async_trait]
pub trait SettlementDelegate: Send + Sync {
    async fn settle(
        &self,
        ctx: &LoopContext,
        commitment: &Commitment,
        outcome: &ExecutionOutcome,
        now: DateTime<Utc>,
    ) -> Result<SettlementReceipt, DelegateError>;
}

/// Keeps every receipt in memory.
#[derive(Default)]
pub struct RecordingSettlement {
    receipts: Mutex<Vec<SettlementReceipt>>,
}

impl RecordingSettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receipts(&self) -> Vec<SettlementReceipt> {
        self.receipts.lock().clone()
    }
}

#[async_trait]
impl SettlementDelegate for RecordingSettlement {
    async fn settle(
        &self,
        ctx: &LoopContext,
        commitment: &Commitment,
        outcome: &ExecutionOutcome,
        now: DateTime<Utc>,
    ) -> Result<SettlementReceipt, DelegateError> {
        let receipt = SettlementReceipt {
            loop_id: ctx.loop_id,
            commitment_id: commitment.id,
            mode: ctx.mode,
            parties: commitment.parties.clone(),
            summary: outcome.summary.clone(),
            settled_at: now,
        };
        self.receipts.lock().push(receipt.clone());
        Ok(receipt)
    }
}
