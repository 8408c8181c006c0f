//! Chain verification.
//!
//! Verification walks a chain from genesis and stops at the first break. It
//! never repairs anything: a later valid append does not heal an earlier break.

use serde::{Deserialize, Serialize};

use crate::entry::{AuditEntry, GENESIS_HASH};

/// Why an entry failed verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakKind {
    /// Stored hash does not match the recomputed hash.
    HashMismatch { stored: String, computed: String },
    /// `previous_hash` does not point at the preceding entry.
    LinkMismatch { expected: String, found: String },
    /// Sequence numbers are not consecutive (reordering or deletion).
    SequenceGap { expected: u64, found: u64 },
    /// Entry belongs to a different owner's chain.
    OwnerMismatch { found: String },
    /// Declared chain head does not match the last entry.
    HeadMismatch { declared: String, actual: String },
    /// An anchor references a hash not present at its sequence.
    AnchorMismatch { reference: String },
}

/// First break found in a chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Zero-based position in the chain as stored.
    pub index: usize,
    /// Sequence number recorded on the offending entry.
    pub sequence: u64,
    pub kind: BreakKind,
}

impl std::fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            BreakKind::HashMismatch { .. } => {
                write!(f, "entry #{} content does not match its hash", self.sequence)
            }
            BreakKind::LinkMismatch { .. } => {
                write!(f, "entry #{} is not linked to its predecessor", self.sequence)
            }
            BreakKind::SequenceGap { expected, found } => {
                write!(f, "expected sequence {expected}, found {found}")
            }
            BreakKind::OwnerMismatch { found } => {
                write!(f, "entry #{} belongs to owner {found}", self.sequence)
            }
            BreakKind::HeadMismatch { .. } => write!(f, "declared chain head is not the last entry"),
            BreakKind::AnchorMismatch { reference } => {
                write!(f, "anchor {reference} does not match the chain")
            }
        }
    }
}

/// Outcome of verifying one owner's chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub owner: String,
    pub valid: bool,
    pub total_entries: usize,
    /// Entries examined, including the broken one.
    pub entries_checked: usize,
    pub first_break: Option<ChainBreak>,
    /// Hash of the last entry, valid or not.
    pub head: Option<String>,
}

/// Verify `entries` as the complete chain of `owner`.
pub fn verify_entries(owner: &str, entries: &[AuditEntry]) -> VerificationReport {
    let mut report = VerificationReport {
        owner: owner.to_string(),
        valid: true,
        total_entries: entries.len(),
        entries_checked: 0,
        first_break: None,
        head: entries.last().map(|e| e.hash.clone()),
    };

    let mut expected_prev = GENESIS_HASH.to_string();
    for (index, entry) in entries.iter().enumerate() {
        report.entries_checked = index + 1;

        let kind = if entry.owner != owner {
            Some(BreakKind::OwnerMismatch {
                found: entry.owner.clone(),
            })
        } else if entry.sequence != index as u64 + 1 {
            Some(BreakKind::SequenceGap {
                expected: index as u64 + 1,
                found: entry.sequence,
            })
        } else if entry.previous_hash != expected_prev {
            Some(BreakKind::LinkMismatch {
                expected: expected_prev.clone(),
                found: entry.previous_hash.clone(),
            })
        } else {
            let computed = entry.compute_hash();
            (computed != entry.hash).then(|| BreakKind::HashMismatch {
                stored: entry.hash.clone(),
                computed,
            })
        };

        if let Some(kind) = kind {
            report.valid = false;
            report.first_break = Some(ChainBreak {
                index,
                sequence: entry.sequence,
                kind,
            });
            return report;
        }

        expected_prev = entry.hash.clone();
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuditEvent, AuditOutcome};
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap()
    }

    fn chain(owner: &str, n: u64) -> Vec<AuditEntry> {
        let mut prev = GENESIS_HASH.to_string();
        (1..=n)
            .map(|seq| {
                let e = AuditEvent::new(format!("event.{seq}")).seal(
                    owner,
                    seq,
                    t0(),
                    prev.clone(),
                );
                prev = e.hash.clone();
                e
            })
            .collect()
    }

    #[test]
    fn empty_and_intact_chains_verify() {
        assert!(verify_entries("o", &[]).valid);

        let entries = chain("o", 5);
        let report = verify_entries("o", &entries);
        assert!(report.valid);
        assert_eq!(report.entries_checked, 5);
        assert_eq!(report.head.as_deref(), Some(entries[4].hash.as_str()));
    }

    #[test]
    fn edited_entry_is_first_break() {
        let mut entries = chain("o", 5);
        entries[2].outcome = AuditOutcome::Denied;

        let report = verify_entries("o", &entries);
        assert!(!report.valid);
        assert_eq!(report.entries_checked, 3);
        let brk = report.first_break.unwrap();
        assert_eq!(brk.sequence, 3);
        assert!(matches!(brk.kind, BreakKind::HashMismatch { .. }));
    }

    #[test]
    fn rehashed_entry_still_breaks_the_link() {
        let mut entries = chain("o", 4);
        entries[1].event_type = "forged".into();
        entries[1].hash = entries[1].compute_hash();

        let brk = verify_entries("o", &entries).first_break.unwrap();
        assert_eq!(brk.sequence, 3);
        assert!(matches!(brk.kind, BreakKind::LinkMismatch { .. }));
    }

    #[test]
    fn reordered_entries_are_detected() {
        let mut entries = chain("o", 4);
        entries.swap(1, 2);

        let brk = verify_entries("o", &entries).first_break.unwrap();
        assert_eq!(brk.index, 1);
        assert!(matches!(brk.kind, BreakKind::SequenceGap { expected: 2, found: 3 }));
    }

    #[test]
    fn foreign_entry_is_detected() {
        let mut entries = chain("o", 2);
        entries.extend(chain("other", 1));
        let brk = verify_entries("o", &entries).first_break.unwrap();
        assert_eq!(brk.index, 2);
        assert!(matches!(brk.kind, BreakKind::OwnerMismatch { .. }));
    }
}
