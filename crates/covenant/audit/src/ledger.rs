use std::sync::Arc;

use covenant_types::{Clock, KeyedLocks, SystemClock};
use tracing::{debug, warn};

use crate::entry::{AuditEntry, AuditEvent, GENESIS_HASH};
use crate::error::{AuditError, Result};
use crate::export::AuditExport;
use crate::store::{Anchor, AuditChainStore, ChainHead, MemoryChainStore};
use crate::verify::{verify_entries, VerificationReport};

/// Append side of the ledger, as seen by the rest of Covenant.
pub trait AuditSink: Send + Sync {
    /// Seal `event` at the current head of `owner`'s chain.
    fn append(&self, owner: &str, event: AuditEvent) -> Result<AuditEntry>;
}

/// Append-only, per-owner hash-chained event log.
///
/// Appends for one owner are serialized so every entry links to the true
/// head; appends for different owners never wait on each other.
pub struct AuditLedger {
    store: Arc<dyn AuditChainStore>,
    locks: KeyedLocks<String>,
    clock: Arc<dyn Clock>,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn AuditChainStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            clock,
        }
    }

    /// In-memory ledger on the system clock.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryChainStore::new()), Arc::new(SystemClock))
    }

    pub fn store(&self) -> &Arc<dyn AuditChainStore> {
        &self.store
    }

    pub fn entries(&self, owner: &str) -> Result<Vec<AuditEntry>> {
        Ok(self.store.entries(owner)?)
    }

    pub fn head(&self, owner: &str) -> Result<Option<ChainHead>> {
        Ok(self.store.head(owner)?)
    }

    pub fn owners(&self) -> Result<Vec<String>> {
        Ok(self.store.owners()?)
    }

    /// Recompute `owner`'s chain from genesis and report the first break.
    pub fn verify(&self, owner: &str) -> Result<VerificationReport> {
        let entries = self.store.entries(owner)?;
        let report = verify_entries(owner, &entries);
        match &report.first_break {
            Some(brk) => warn!(owner, sequence = brk.sequence, "audit chain broken: {brk}"),
            None => debug!(owner, entries = report.total_entries, "audit chain verified"),
        }
        Ok(report)
    }

    /// Entries, explanations, head and anchors for `owner`.
    pub fn export(&self, owner: &str) -> Result<AuditExport> {
        let entries = self.store.entries(owner)?;
        let anchors = self.store.anchors(owner)?;
        Ok(AuditExport::new(owner, entries, anchors, self.clock.now()))
    }

    /// Record the current head of `owner` under an external reference.
    pub fn anchor(&self, owner: &str, reference: impl Into<String>) -> Result<Anchor> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(AuditError::InvalidEvent("anchor reference is empty".into()));
        }

        let _guard = self.locks.lock(&owner.to_string());
        let head = self
            .store
            .head(owner)?
            .ok_or_else(|| AuditError::EmptyChain(owner.to_string()))?;
        let anchor = Anchor {
            owner: owner.to_string(),
            reference,
            sequence: head.sequence,
            head_hash: head.hash,
            anchored_at: self.clock.now(),
        };
        self.store.record_anchor(&anchor)?;
        debug!(owner, reference = %anchor.reference, sequence = anchor.sequence, "audit chain anchored");
        Ok(anchor)
    }
}

impl AuditSink for AuditLedger {
    fn append(&self, owner: &str, event: AuditEvent) -> Result<AuditEntry> {
        if owner.trim().is_empty() {
            return Err(AuditError::InvalidEvent("owner id is empty".into()));
        }
        if event.event_type.trim().is_empty() {
            return Err(AuditError::InvalidEvent("event type is empty".into()));
        }

        let _guard = self.locks.lock(&owner.to_string());
        let (sequence, previous_hash) = match self.store.head(owner)? {
            Some(head) => (head.sequence + 1, head.hash),
            None => (1, GENESIS_HASH.to_string()),
        };
        let entry = event.seal(owner, sequence, self.clock.now(), previous_hash);
        self.store.append(&entry)?;

        debug!(
            owner,
            sequence,
            event_type = %entry.event_type,
            outcome = entry.outcome.as_str(),
            "audit entry appended"
        );
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditOutcome;
    use crate::export::verify_export;
    use crate::store::FileChainStore;
    use crate::verify::BreakKind;
    use covenant_types::{CircleId, ManualClock};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::thread;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap()
    }

    fn manual_ledger(store: Arc<dyn AuditChainStore>) -> AuditLedger {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap());
        AuditLedger::new(store, Arc::new(clock))
    }

    #[test]
    fn append_links_to_head() {
        let ledger = AuditLedger::in_memory();
        let a = ledger.append("ix-1", AuditEvent::new("first")).unwrap();
        let b = ledger.append("ix-1", AuditEvent::new("second")).unwrap();

        assert_eq!(a.sequence, 1);
        assert_eq!(a.previous_hash, GENESIS_HASH);
        assert_eq!(b.sequence, 2);
        assert_eq!(b.previous_hash, a.hash);
        assert_eq!(ledger.head("ix-1").unwrap().unwrap().hash, b.hash);
    }

    #[test]
    fn owners_have_independent_chains() {
        let ledger = AuditLedger::in_memory();
        ledger.append("a", AuditEvent::new("x")).unwrap();
        let first_b = ledger.append("b", AuditEvent::new("x")).unwrap();
        assert_eq!(first_b.sequence, 1);
        assert_eq!(first_b.previous_hash, GENESIS_HASH);
        assert_eq!(ledger.owners().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn rejects_blank_owner_and_event_type() {
        let ledger = AuditLedger::in_memory();
        assert!(matches!(
            ledger.append(" ", AuditEvent::new("x")),
            Err(AuditError::InvalidEvent(_))
        ));
        assert!(matches!(
            ledger.append("o", AuditEvent::new("")),
            Err(AuditError::InvalidEvent(_))
        ));
        assert!(ledger.entries("o").unwrap().is_empty());
    }

    #[test]
    fn concurrent_appends_to_one_owner_stay_linked() {
        let ledger = Arc::new(AuditLedger::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        ledger
                            .append("shared", AuditEvent::new(format!("t{t}.e{i}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let report = ledger.verify("shared").unwrap();
        assert!(report.valid, "{:?}", report.first_break);
        assert_eq!(report.total_entries, 200);
    }

    #[test]
    fn tampering_is_reported_and_not_healed_by_new_appends() {
        let store = Arc::new(MemoryChainStore::new());
        let ledger = manual_ledger(store.clone());
        for i in 0..5 {
            ledger
                .append("alice", AuditEvent::new(format!("e{i}")).circle(&CircleId::new("alice")))
                .unwrap();
        }

        store.tamper("alice", 2, |e| e.outcome = AuditOutcome::Failed);
        ledger.append("alice", AuditEvent::new("after")).unwrap();

        let report = ledger.verify("alice").unwrap();
        assert!(!report.valid);
        assert_eq!(report.total_entries, 6);
        let brk = report.first_break.unwrap();
        assert_eq!(brk.sequence, 3);
        assert!(matches!(brk.kind, BreakKind::HashMismatch { .. }));
    }

    #[test]
    fn file_chain_tampered_on_disk_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileChainStore::open(dir.path()).unwrap());
        let ledger = manual_ledger(store.clone());
        for i in 0..4 {
            ledger
                .append("ix-9", AuditEvent::new(format!("e{i}")).detail("n", i))
                .unwrap();
        }

        let path = store.chain_path("ix-9");
        let content = std::fs::read_to_string(&path).unwrap();
        let tampered: Vec<String> = content
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 1 {
                    line.replace("\"n\":\"1\"", "\"n\":\"100\"")
                } else {
                    line.to_string()
                }
            })
            .collect();
        std::fs::write(&path, tampered.join("\n") + "\n").unwrap();

        let reopened = manual_ledger(Arc::new(FileChainStore::open(dir.path()).unwrap()));
        reopened.append("ix-9", AuditEvent::new("after")).unwrap();

        let report = reopened.verify("ix-9").unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_break.unwrap().sequence, 2);
    }

    #[test]
    fn export_carries_anchors_and_verifies_standalone() {
        let store: Arc<dyn AuditChainStore> = Arc::new(MemoryChainStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let ledger = AuditLedger::new(store, clock.clone());

        ledger.append("bob", AuditEvent::new("one")).unwrap();
        ledger.append("bob", AuditEvent::new("two")).unwrap();
        clock.advance(Duration::seconds(1));
        let anchor = ledger.anchor("bob", "notary:7").unwrap();
        assert_eq!(anchor.sequence, 2);
        ledger.append("bob", AuditEvent::new("three")).unwrap();

        let export = ledger.export("bob").unwrap();
        assert_eq!(export.entries.len(), 3);
        assert_eq!(export.explanations.len(), 3);
        assert_eq!(export.anchors, vec![anchor]);
        assert_eq!(export.chain_head.as_deref(), Some(export.entries[2].hash.as_str()));
        assert!(verify_export(&export).valid);

        let json = serde_json::to_string(&export).unwrap();
        let mut forged: AuditExport = serde_json::from_str(&json).unwrap();
        forged.anchors[0].head_hash = "0".repeat(64);
        let report = verify_export(&forged);
        assert!(matches!(
            report.first_break.unwrap().kind,
            BreakKind::AnchorMismatch { .. }
        ));
    }

    #[test]
    fn anchoring_an_empty_chain_fails() {
        let ledger = AuditLedger::in_memory();
        assert!(matches!(ledger.anchor("nobody", "ref"), Err(AuditError::EmptyChain(_))));
    }
}
