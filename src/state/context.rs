//! Accumulated working context with size-bounded archiving.
//!
//! Context entries are namespaced pieces of working memory produced by
//! workers. When their aggregate size crosses a threshold, the least
//! recently read entries move to cold storage and leave a compact
//! placeholder behind; reading a placeholder fetches the full data back
//! transparently.

use crate::error::Result;
use crate::state::store::StateStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// How many characters of the original data a placeholder keeps.
const SUMMARY_CHARS: usize = 48;

/// Body of a context entry: live data, or a placeholder for archived data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ContextBody {
    /// Full data held in the ledger.
    Live { data: String },
    /// Data moved to cold storage; only a summary remains.
    Archived { summary: String },
}

/// A single piece of accumulated working memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Namespaced path identifying the entry.
    pub path: String,
    /// Size of the full data in bytes.
    pub bytes: u64,
    /// Ledger clock value at insertion; the archiving tie-breaker.
    pub created: u64,
    /// Ledger clock value of the last read.
    pub last_read: u64,
    /// Live data or archived placeholder.
    pub body: ContextBody,
}

impl ContextEntry {
    pub fn is_archived(&self) -> bool {
        matches!(self.body, ContextBody::Archived { .. })
    }
}

/// What a ledger lookup produced; cold retrieval is the store's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextRead {
    Live(String),
    Archived,
}

/// In-memory index of all context entries.
///
/// The ledger orders reads and insertions with a logical clock so the
/// archiving policy (LRU by last read, ties broken oldest-created first)
/// needs no wall-clock comparisons.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextLedger {
    entries: HashMap<String, ContextEntry>,
    clock: u64,
}

impl ContextLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Insert or replace an entry. A replaced entry keeps its creation
    /// order; a write is not a read, so last_read is left alone.
    pub fn insert(&mut self, path: &str, data: &str) {
        let now = self.tick();
        let bytes = data.len() as u64;
        match self.entries.get_mut(path) {
            Some(entry) => {
                entry.bytes = bytes;
                entry.body = ContextBody::Live {
                    data: data.to_string(),
                };
            }
            None => {
                self.entries.insert(
                    path.to_string(),
                    ContextEntry {
                        path: path.to_string(),
                        bytes,
                        created: now,
                        last_read: now,
                        body: ContextBody::Live {
                            data: data.to_string(),
                        },
                    },
                );
            }
        }
    }

    /// Look up an entry, bumping its last-read order.
    pub fn read(&mut self, path: &str) -> Option<ContextRead> {
        let now = self.tick();
        let entry = self.entries.get_mut(path)?;
        entry.last_read = now;
        Some(match &entry.body {
            ContextBody::Live { data } => ContextRead::Live(data.clone()),
            ContextBody::Archived { .. } => ContextRead::Archived,
        })
    }

    pub fn get(&self, path: &str) -> Option<&ContextEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Aggregate size of live (non-archived) data.
    pub fn live_bytes(&self) -> u64 {
        self.entries
            .values()
            .filter(|e| !e.is_archived())
            .map(|e| e.bytes)
            .sum()
    }

    /// All entry paths, sorted for stable manifests.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Pick the next archiving victim: least recently read live entry,
    /// ties broken by creation order, oldest first.
    pub fn victim(&self) -> Option<&ContextEntry> {
        self.entries
            .values()
            .filter(|e| !e.is_archived())
            .min_by_key(|e| (e.last_read, e.created))
    }

    /// Replace an entry's data with a placeholder summary, returning the
    /// full data for the caller to move to cold storage.
    pub fn archive(&mut self, path: &str) -> Option<String> {
        let entry = self.entries.get_mut(path)?;
        let data = match &entry.body {
            ContextBody::Live { data } => data.clone(),
            ContextBody::Archived { .. } => return None,
        };
        entry.body = ContextBody::Archived {
            summary: summarize(&data, entry.bytes),
        };
        Some(data)
    }
}

/// Build the compact placeholder text for archived data.
fn summarize(data: &str, bytes: u64) -> String {
    let head: String = data.chars().take(SUMMARY_CHARS).collect();
    format!("{} [{} bytes archived]", head, bytes)
}

/// Worker-facing view of the store, scoped to the context namespace.
///
/// Workers receive a handle with each assignment; it is the only way they
/// touch shared state.
#[derive(Clone)]
pub struct ContextHandle {
    store: Arc<RwLock<StateStore>>,
}

impl ContextHandle {
    pub fn new(store: Arc<RwLock<StateStore>>) -> Self {
        Self { store }
    }

    /// Read a context entry, transparently fetching archived data.
    pub async fn read(&self, path: &str) -> Result<String> {
        self.store.write().await.read_context(path)
    }

    /// Write a context entry; may trigger archiving of older entries.
    pub async fn write(&self, path: &str, data: &str) -> Result<()> {
        self.store.write().await.put_context(path, data)
    }
}
