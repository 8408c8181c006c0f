//! Ordered, append-only chain storage.
//!
//! Two backends: [`MemoryChainStore`] for tests and embedded use, and
//! [`FileChainStore`], which keeps one JSON-lines file per owner so a chain
//! can be inspected, exported or tampered with on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use covenant_store::{StoreError, StoreResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::entry::AuditEntry;

/// Current head of one owner's chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub sequence: u64,
    pub hash: String,
}

/// A chain head recorded under an external reference (a notary receipt,
/// a ticket number, a published digest).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub owner: String,
    pub reference: String,
    pub sequence: u64,
    pub head_hash: String,
    pub anchored_at: DateTime<Utc>,
}

/// Storage for hash chains, keyed by owner.
///
/// Implementations only store; linking and hashing are done by the ledger,
/// which serializes appends per owner.
pub trait AuditChainStore: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// All entries for `owner`, in append order.
    fn entries(&self, owner: &str) -> StoreResult<Vec<AuditEntry>>;

    fn head(&self, owner: &str) -> StoreResult<Option<ChainHead>>;

    fn owners(&self) -> StoreResult<Vec<String>>;

    fn record_anchor(&self, anchor: &Anchor) -> StoreResult<()>;

    fn anchors(&self, owner: &str) -> StoreResult<Vec<Anchor>>;
}

fn head_of(entry: &AuditEntry) -> ChainHead {
    ChainHead {
        sequence: entry.sequence,
        hash: entry.hash.clone(),
    }
}

/// In-memory chain store.
#[derive(Default)]
pub struct MemoryChainStore {
    chains: DashMap<String, Vec<AuditEntry>>,
    anchors: DashMap<String, Vec<Anchor>>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite an entry in place. Only exists so tests can simulate tampering.
    #[doc(hidden)]
    pub fn tamper(&self, owner: &str, index: usize, f: impl FnOnce(&mut AuditEntry)) {
        if let Some(mut chain) = self.chains.get_mut(owner) {
            if let Some(entry) = chain.get_mut(index) {
                f(entry);
            }
        }
    }

    /// Swap two entries. Test-only, like [`MemoryChainStore::tamper`].
    #[doc(hidden)]
    pub fn swap(&self, owner: &str, a: usize, b: usize) {
        if let Some(mut chain) = self.chains.get_mut(owner) {
            if a < chain.len() && b < chain.len() {
                chain.swap(a, b);
            }
        }
    }
}

impl AuditChainStore for MemoryChainStore {
    fn append(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.chains
            .entry(entry.owner.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    fn entries(&self, owner: &str) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .chains
            .get(owner)
            .map(|c| c.value().clone())
            .unwrap_or_default())
    }

    fn head(&self, owner: &str) -> StoreResult<Option<ChainHead>> {
        Ok(self
            .chains
            .get(owner)
            .and_then(|c| c.value().last().map(head_of)))
    }

    fn owners(&self) -> StoreResult<Vec<String>> {
        let mut owners: Vec<String> = self.chains.iter().map(|e| e.key().clone()).collect();
        owners.sort();
        Ok(owners)
    }

    fn record_anchor(&self, anchor: &Anchor) -> StoreResult<()> {
        self.anchors
            .entry(anchor.owner.clone())
            .or_default()
            .push(anchor.clone());
        Ok(())
    }

    fn anchors(&self, owner: &str) -> StoreResult<Vec<Anchor>> {
        Ok(self
            .anchors
            .get(owner)
            .map(|a| a.value().clone())
            .unwrap_or_default())
    }
}

const CHAIN_EXT: &str = "jsonl";
const ANCHOR_SUFFIX: &str = ".anchors.jsonl";

/// File-backed chain store: `<dir>/<hex(owner)>.jsonl` plus an anchors file.
///
/// Owner ids are hex-encoded in file names so any id is filesystem safe.
/// Heads are cached after the first read of each file.
pub struct FileChainStore {
    dir: PathBuf,
    heads: DashMap<String, Option<ChainHead>>,
}

impl FileChainStore {
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            heads: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the chain file for `owner`.
    pub fn chain_path(&self, owner: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{CHAIN_EXT}", hex::encode(owner.as_bytes())))
    }

    fn anchor_path(&self, owner: &str) -> PathBuf {
        self.dir
            .join(format!("{}{ANCHOR_SUFFIX}", hex::encode(owner.as_bytes())))
    }

    fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> StoreResult<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(serde_json::from_str(&line)?);
        }
        Ok(out)
    }

    fn append_line<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }
}

impl AuditChainStore for FileChainStore {
    fn append(&self, entry: &AuditEntry) -> StoreResult<()> {
        Self::append_line(&self.chain_path(&entry.owner), entry)?;
        self.heads
            .insert(entry.owner.clone(), Some(head_of(entry)));
        Ok(())
    }

    fn entries(&self, owner: &str) -> StoreResult<Vec<AuditEntry>> {
        Self::read_lines(&self.chain_path(owner))
    }

    fn head(&self, owner: &str) -> StoreResult<Option<ChainHead>> {
        if let Some(cached) = self.heads.get(owner) {
            return Ok(cached.value().clone());
        }
        let head = self.entries(owner)?.last().map(head_of);
        self.heads.insert(owner.to_string(), head.clone());
        Ok(head)
    }

    fn owners(&self) -> StoreResult<Vec<String>> {
        let mut owners = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let name = dir_entry?.file_name().to_string_lossy().into_owned();
            if name.ends_with(ANCHOR_SUFFIX) {
                continue;
            }
            let Some(stem) = name.strip_suffix(&format!(".{CHAIN_EXT}")) else {
                continue;
            };
            let bytes = hex::decode(stem)
                .map_err(|e| StoreError::Backend(format!("bad chain file {name}: {e}")))?;
            let owner = String::from_utf8(bytes)
                .map_err(|e| StoreError::Backend(format!("bad chain file {name}: {e}")))?;
            owners.push(owner);
        }
        owners.sort();
        Ok(owners)
    }

    fn record_anchor(&self, anchor: &Anchor) -> StoreResult<()> {
        Self::append_line(&self.anchor_path(&anchor.owner), anchor)
    }

    fn anchors(&self, owner: &str) -> StoreResult<Vec<Anchor>> {
        Self::read_lines(&self.anchor_path(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::entry::{AuditEvent, GENESIS_HASH};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap()
    }

    fn entry(owner: &str, seq: u64, prev: &str) -> AuditEntry {
        AuditEvent::new("test.event").seal(owner, seq, t0(), prev.to_string())
    }

    #[test]
    fn memory_head_tracks_last_append() {
        let store = MemoryChainStore::new();
        assert_eq!(store.head("a").unwrap(), None);

        let first = entry("a", 1, GENESIS_HASH);
        store.append(&first).unwrap();
        let second = entry("a", 2, &first.hash);
        store.append(&second).unwrap();

        let head = store.head("a").unwrap().unwrap();
        assert_eq!(head.sequence, 2);
        assert_eq!(head.hash, second.hash);
        assert_eq!(store.entries("a").unwrap().len(), 2);
        assert!(store.entries("b").unwrap().is_empty());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first = entry("circle/alice", 1, GENESIS_HASH);
        {
            let store = FileChainStore::open(dir.path()).unwrap();
            store.append(&first).unwrap();
        }

        let reopened = FileChainStore::open(dir.path()).unwrap();
        assert_eq!(reopened.owners().unwrap(), vec!["circle/alice".to_string()]);
        assert_eq!(reopened.entries("circle/alice").unwrap(), vec![first.clone()]);
        assert_eq!(reopened.head("circle/alice").unwrap().unwrap().hash, first.hash);
    }

    #[test]
    fn file_store_keeps_anchors_out_of_owner_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileChainStore::open(dir.path()).unwrap();
        let first = entry("ix-1", 1, GENESIS_HASH);
        store.append(&first).unwrap();
        store
            .record_anchor(&Anchor {
                owner: "ix-1".into(),
                reference: "notary:42".into(),
                sequence: 1,
                head_hash: first.hash.clone(),
                anchored_at: t0(),
            })
            .unwrap();

        assert_eq!(store.owners().unwrap(), vec!["ix-1".to_string()]);
        assert_eq!(store.anchors("ix-1").unwrap().len(), 1);
    }
}
