//! Revocation list and spent-approval registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use covenant_store::{MemoryOwnerStore, OwnerStore};
use covenant_types::{ApprovalId, CircleId, KeyedLocks, TraceId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::action::ActionHash;
use crate::error::{AuthorityError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub revoked_by: CircleId,
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
}

/// Approvals withdrawn by their issuer before use.
#[derive(Default)]
pub struct RevocationList {
    revoked: DashMap<ApprovalId, Revocation>,
}

impl RevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoke(&self, id: ApprovalId, revocation: Revocation) -> Result<()> {
        match self.revoked.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AuthorityError::AlreadyRevoked(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(revocation);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &ApprovalId) -> Option<Revocation> {
        self.revoked.get(id).map(|r| r.value().clone())
    }

    pub fn is_revoked(&self, id: &ApprovalId) -> bool {
        self.revoked.contains_key(id)
    }
}

/// Where and when an approval was consumed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendRecord {
    pub trace_id: TraceId,
    pub spent_at: DateTime<Utc>,
}

/// Approvals consumed for one action hash.
pub type SpentSet = BTreeMap<ApprovalId, SpendRecord>;

/// Single-use enforcement: an approval may be consumed once per action hash.
///
/// State lives in an [`OwnerStore`] keyed by action hash; consumption for one
/// hash is serialized, different hashes proceed independently.
pub struct SpentApprovals {
    store: Arc<dyn OwnerStore<SpentSet>>,
    locks: KeyedLocks<ActionHash>,
}

impl SpentApprovals {
    pub fn new(store: Arc<dyn OwnerStore<SpentSet>>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryOwnerStore::new()))
    }

    pub fn is_spent(&self, hash: &ActionHash, approval: &ApprovalId) -> Result<bool> {
        Ok(self
            .store
            .get(hash.as_str())?
            .is_some_and(|set| set.contains_key(approval)))
    }

    pub fn spent_for(&self, hash: &ActionHash) -> Result<SpentSet> {
        Ok(self.store.get(hash.as_str())?.unwrap_or_default())
    }

    /// Consume every approval in `approvals` for `hash`, or none of them.
    pub fn consume(
        &self,
        hash: &ActionHash,
        approvals: &[ApprovalId],
        trace_id: &TraceId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.consume_with(hash, approvals, trace_id, at, || Ok(()))
    }

    /// Like [`SpentApprovals::consume`], then run `record` while `hash` is
    /// still locked. If `record` fails the approvals are returned unspent.
    pub fn consume_with<F>(
        &self,
        hash: &ActionHash,
        approvals: &[ApprovalId],
        trace_id: &TraceId,
        at: DateTime<Utc>,
        record: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        if approvals.is_empty() {
            return record();
        }

        let _guard = self.locks.lock(hash);
        let before = self.store.get(hash.as_str())?.unwrap_or_default();

        if let Some(already) = approvals.iter().find(|id| before.contains_key(id)) {
            return Err(AuthorityError::AlreadySpent {
                action_hash: hash.clone(),
                approval_id: *already,
            });
        }

        let mut set = before.clone();
        for id in approvals {
            set.insert(
                *id,
                SpendRecord {
                    trace_id: trace_id.clone(),
                    spent_at: at,
                },
            );
        }
        self.store.put(hash.as_str(), set)?;

        if let Err(err) = record() {
            if let Err(undo) = self.store.put(hash.as_str(), before) {
                warn!(action_hash = %hash, error = %undo, "failed to release spent approvals");
            }
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn revoking_twice_fails() {
        let list = RevocationList::new();
        let id = ApprovalId::new();
        let rev = Revocation {
            revoked_by: CircleId::new("bob"),
            reason: "changed my mind".into(),
            revoked_at: t0(),
        };
        list.revoke(id, rev.clone()).unwrap();
        assert!(list.is_revoked(&id));
        assert!(matches!(list.revoke(id, rev), Err(AuthorityError::AlreadyRevoked(_))));
    }

    #[test]
    fn consume_is_single_use_and_all_or_nothing() {
        let spent = SpentApprovals::in_memory();
        let hash = ActionHash::from_hex("aa");
        let (a, b) = (ApprovalId::new(), ApprovalId::new());
        let trace = TraceId::new("t1");

        spent.consume(&hash, &[a], &trace, t0()).unwrap();
        let err = spent.consume(&hash, &[b, a], &trace, t0()).unwrap_err();
        assert!(matches!(err, AuthorityError::AlreadySpent { approval_id, .. } if approval_id == a));
        assert!(!spent.is_spent(&hash, &b).unwrap());
    }

    #[test]
    fn same_approval_id_under_another_hash_is_independent() {
        let spent = SpentApprovals::in_memory();
        let id = ApprovalId::new();
        let trace = TraceId::new("t1");
        spent
            .consume(&ActionHash::from_hex("aa"), &[id], &trace, t0())
            .unwrap();
        assert!(spent
            .consume(&ActionHash::from_hex("bb"), &[id], &trace, t0())
            .is_ok());
    }

    #[test]
    fn failed_record_leaves_approvals_unspent() {
        let spent = SpentApprovals::in_memory();
        let hash = ActionHash::from_hex("aa");
        let id = ApprovalId::new();
        let trace = TraceId::new("t1");

        let err = spent
            .consume_with(&hash, &[id], &trace, t0(), || {
                Err(AuthorityError::Signature("recorder offline".into()))
            })
            .unwrap_err();
        assert!(matches!(err, AuthorityError::Signature(_)));
        assert!(!spent.is_spent(&hash, &id).unwrap());

        spent.consume(&hash, &[id], &trace, t0()).unwrap();
        assert!(spent.is_spent(&hash, &id).unwrap());
    }
}
