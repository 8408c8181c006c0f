use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{AuditEntry, GENESIS_HASH, HASH_ALGORITHM};
use crate::store::Anchor;
use crate::verify::{verify_entries, BreakKind, ChainBreak, VerificationReport};

/// Self-contained, independently verifiable dump of one owner's chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditExport {
    pub owner: String,
    pub hash_algorithm: String,
    pub genesis_hash: String,
    pub entries: Vec<AuditEntry>,
    /// One human-readable line per entry, same order as `entries`.
    pub explanations: Vec<String>,
    pub chain_head: Option<String>,
    pub anchors: Vec<Anchor>,
    pub exported_at: DateTime<Utc>,
}

impl AuditExport {
    pub fn new(
        owner: &str,
        entries: Vec<AuditEntry>,
        anchors: Vec<Anchor>,
        exported_at: DateTime<Utc>,
    ) -> Self {
        Self {
            owner: owner.to_string(),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            genesis_hash: GENESIS_HASH.to_string(),
            explanations: entries.iter().map(AuditEntry::explain).collect(),
            chain_head: entries.last().map(|e| e.hash.clone()),
            entries,
            anchors,
            exported_at,
        }
    }
}

/// Verify an export without access to the ledger that produced it.
///
/// Recomputes the chain, then checks the declared head and every anchor.
pub fn verify_export(export: &AuditExport) -> VerificationReport {
    let mut report = verify_entries(&export.owner, &export.entries);
    if !report.valid {
        return report;
    }

    let actual = export.entries.last().map(|e| e.hash.clone());
    if export.chain_head != actual {
        report.valid = false;
        report.first_break = Some(ChainBreak {
            index: export.entries.len().saturating_sub(1),
            sequence: export.entries.last().map(|e| e.sequence).unwrap_or(0),
            kind: BreakKind::HeadMismatch {
                declared: export.chain_head.clone().unwrap_or_default(),
                actual: actual.unwrap_or_default(),
            },
        });
        return report;
    }

    for anchor in &export.anchors {
        let index = (anchor.sequence as usize).checked_sub(1);
        let matches = index
            .and_then(|i| export.entries.get(i))
            .is_some_and(|e| e.hash == anchor.head_hash);
        if !matches {
            report.valid = false;
            report.first_break = Some(ChainBreak {
                index: index.unwrap_or(0),
                sequence: anchor.sequence,
                kind: BreakKind::AnchorMismatch {
                    reference: anchor.reference.clone(),
                },
            });
            return report;
        }
    }

    report
}
