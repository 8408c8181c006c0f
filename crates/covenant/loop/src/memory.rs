use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use covenant_store::{MemoryOwnerStore, OwnerStore};
use covenant_types::{CircleId, CommitmentId, KeyedLocks, LoopId, RunMode, TraceId};
use serde::{Deserialize, Serialize};

use crate::error::DelegateError;

/// What a circle remembers about one finished loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub loop_id: LoopId,
    pub trace_id: TraceId,
    pub commitment_id: CommitmentId,
    pub action_type: String,
    pub mode: RunMode,
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait MemoryDelegate: Send + Sync {
    async fn remember(&self, circle: &CircleId, record: &OutcomeRecord) -> Result<(), DelegateError>;
}

/// Per-circle outcome history.
pub struct CircleMemory {
    store: Arc<dyn OwnerStore<Vec<OutcomeRecord>>>,
    locks: KeyedLocks<CircleId>,
}

impl CircleMemory {
    pub fn new(store: Arc<dyn OwnerStore<Vec<OutcomeRecord>>>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryOwnerStore::new()))
    }

    /// Oldest first.
    pub fn history(&self, circle: &CircleId) -> Result<Vec<OutcomeRecord>, DelegateError> {
        Ok(self.store.get(circle.as_str())?.unwrap_or_default())
    }
}

#[async_trait]
impl MemoryDelegate for CircleMemory {
    async fn remember(&self, circle: &CircleId, record: &OutcomeRecord) -> Result<(), DelegateError> {
        let _guard = self.locks.lock(circle);
        let mut history = self.store.get(circle.as_str())?.unwrap_or_default();
        history.push(record.clone());
        self.store.put(circle.as_str(), history)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn record(summary: &str) -> OutcomeRecord {
        OutcomeRecord {
            loop_id: LoopId::new(),
            trace_id: TraceId::generate(),
            commitment_id: CommitmentId::new(),
            action_type: "calendar.create_event".into(),
            mode: RunMode::Execute,
            summary: summary.into(),
            recorded_at: Utc.with_ymd_and_hms(2026, 5, 1, 18, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn history_is_kept_per_circle_in_order() {
        let memory = CircleMemory::in_memory();
        let alice = CircleId::new("alice");
        let bob = CircleId::new("bob");

        memory.remember(&alice, &record("first")).await.unwrap();
        memory.remember(&alice, &record("second")).await.unwrap();
        memory.remember(&bob, &record("only")).await.unwrap();

        let summaries: Vec<String> = memory
            .history(&alice)
            .unwrap()
            .into_iter()
            .map(|r| r.summary)
            .collect();
        assert_eq!(summaries, vec!["first", "second"]);
        assert_eq!(memory.history(&bob).unwrap().len(), 1);
        assert!(memory.history(&CircleId::new("carol")).unwrap().is_empty());
    }
}
