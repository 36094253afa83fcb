//! Durable, checkpointable key-value store backing the task graph.
//!
//! Layout under the store root:
//! - `kv/` one JSON file per namespaced key (`tasks/{id}`, `results/{id}`)
//! - `checkpoints/` one immutable file per checkpoint sequence number
//! - `context.json` the context ledger
//! - `archive/` cold storage for archived context data

use crate::clog_debug;
use crate::core::graph::{GraphSnapshot, TaskGraph};
use crate::error::{Error, Result};
use crate::state::context::{ContextLedger, ContextRead};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Options controlling store behavior.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Number of checkpoints to retain; older ones are pruned.
    pub retain: usize,
    /// When set, context writes auto-archive past this many live bytes.
    pub archive_threshold: Option<u64>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retain: 5,
            archive_threshold: None,
        }
    }
}

/// A point-in-time capture of the task graph plus a manifest of the
/// store keys valid at that point. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Monotonically increasing sequence number.
    pub seq: u64,
    /// When the checkpoint was taken.
    pub taken_at: DateTime<Utc>,
    /// Store keys (including context paths) valid as of this checkpoint.
    pub manifest: Vec<String>,
    /// The full graph snapshot.
    pub graph: GraphSnapshot,
}

/// Durable key-value store with checkpoints and context archiving.
pub struct StateStore {
    root: PathBuf,
    live: BTreeMap<String, Value>,
    context: ContextLedger,
    next_checkpoint: u64,
    latest_checkpoint: Option<u64>,
    retain: usize,
    archive_threshold: Option<u64>,
}

impl StateStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Existing keys, context, and checkpoint numbering are loaded from
    /// disk so a restarted process resumes where it left off.
    pub fn open(root: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("kv"))?;
        fs::create_dir_all(root.join("checkpoints"))?;
        fs::create_dir_all(root.join("archive"))?;

        let mut live = BTreeMap::new();
        load_kv_dir(&root.join("kv"), Path::new(""), &mut live)?;

        let context_path = root.join("context.json");
        let context = if context_path.exists() {
            serde_json::from_str(&fs::read_to_string(&context_path)?)?
        } else {
            ContextLedger::new()
        };

        let mut seqs = checkpoint_seqs(&root)?;
        seqs.sort_unstable();
        let latest_checkpoint = seqs.last().copied();
        let next_checkpoint = latest_checkpoint.map_or(0, |s| s + 1);

        clog_debug!(
            "StateStore::open root={} keys={} next_checkpoint={}",
            root.display(),
            live.len(),
            next_checkpoint
        );

        Ok(Self {
            root,
            live,
            context,
            next_checkpoint,
            latest_checkpoint,
            retain: options.retain,
            archive_threshold: options.archive_threshold,
        })
    }

    /// Store a value under a namespaced key, write-through to disk.
    pub fn put(&mut self, key: &str, value: Value) -> Result<()> {
        validate_key(key)?;
        let path = self.kv_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_vec_pretty(&value)?)?;
        self.live.insert(key.to_string(), value);
        Ok(())
    }

    /// Fetch a value; missing keys are an error, not an option.
    pub fn get(&self, key: &str) -> Result<&Value> {
        self.live.get(key).ok_or_else(|| Error::NotFound {
            key: key.to_string(),
        })
    }

    /// Remove a key and its backing file.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        if self.live.remove(key).is_none() {
            return Err(Error::NotFound {
                key: key.to_string(),
            });
        }
        let path = self.kv_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// All live keys, in order.
    pub fn keys(&self) -> Vec<String> {
        self.live.keys().cloned().collect()
    }

    fn kv_path(&self, key: &str) -> PathBuf {
        self.root.join("kv").join(format!("{}.json", key))
    }

    // ========== Checkpoints ==========

    /// Capture the graph and the current key manifest as a new checkpoint.
    ///
    /// The caller holds the graph while this runs, so the snapshot is a
    /// consistent cut of acknowledged updates. Any write failure surfaces
    /// as `Checkpoint` and leaves the previous checkpoints intact.
    pub fn checkpoint(&mut self, graph: &TaskGraph) -> Result<u64> {
        let seq = self.next_checkpoint;
        let path = self.checkpoint_path(seq);
        if path.exists() {
            return Err(Error::Checkpoint(format!(
                "checkpoint {} already exists",
                seq
            )));
        }

        let mut manifest = self.keys();
        manifest.extend(
            self.context
                .paths()
                .into_iter()
                .map(|p| format!("context/{}", p)),
        );

        let checkpoint = Checkpoint {
            seq,
            taken_at: Utc::now(),
            manifest,
            graph: graph.snapshot(),
        };
        let bytes = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| Error::Checkpoint(e.to_string()))?;
        fs::write(&path, bytes).map_err(|e| Error::Checkpoint(e.to_string()))?;

        self.next_checkpoint = seq + 1;
        self.latest_checkpoint = Some(seq);
        self.prune_checkpoints()?;
        clog_debug!("Checkpoint {} written to {}", seq, path.display());
        Ok(seq)
    }

    /// Rebuild a task graph from a stored checkpoint.
    ///
    /// Work completed after the checkpoint was taken is not in the
    /// snapshot and will be recomputed; that is the documented trade-off
    /// of restoring, not data loss.
    pub fn restore(&self, seq: u64) -> Result<TaskGraph> {
        let path = self.checkpoint_path(seq);
        let data = fs::read_to_string(&path)
            .map_err(|e| Error::Restore(format!("checkpoint {}: {}", seq, e)))?;
        let checkpoint: Checkpoint = serde_json::from_str(&data)
            .map_err(|e| Error::Restore(format!("checkpoint {}: {}", seq, e)))?;
        TaskGraph::from_snapshot(checkpoint.graph)
    }

    /// Read back a checkpoint record without rebuilding the graph.
    pub fn read_checkpoint(&self, seq: u64) -> Result<Checkpoint> {
        let path = self.checkpoint_path(seq);
        let data = fs::read_to_string(&path)
            .map_err(|e| Error::Restore(format!("checkpoint {}: {}", seq, e)))?;
        serde_json::from_str(&data).map_err(|e| Error::Restore(format!("checkpoint {}: {}", seq, e)))
    }

    /// Sequence number of the most recent checkpoint, if any.
    pub fn latest_checkpoint(&self) -> Option<u64> {
        self.latest_checkpoint
    }

    /// Sequence numbers of all retained checkpoints, ascending.
    pub fn checkpoints(&self) -> Result<Vec<u64>> {
        let mut seqs = checkpoint_seqs(&self.root)?;
        seqs.sort_unstable();
        Ok(seqs)
    }

    fn checkpoint_path(&self, seq: u64) -> PathBuf {
        self.root.join("checkpoints").join(format!("{}.json", seq))
    }

    fn prune_checkpoints(&self) -> Result<()> {
        let mut seqs = checkpoint_seqs(&self.root)?;
        seqs.sort_unstable();
        while seqs.len() > self.retain {
            let oldest = seqs.remove(0);
            fs::remove_file(self.checkpoint_path(oldest))?;
            clog_debug!("Pruned checkpoint {}", oldest);
        }
        Ok(())
    }

    // ========== Context ==========

    /// Store a context entry; auto-archives when the configured threshold
    /// is crossed.
    pub fn put_context(&mut self, path: &str, data: &str) -> Result<()> {
        validate_key(path)?;
        self.context.insert(path, data);
        if let Some(threshold) = self.archive_threshold {
            self.archive_context(threshold)?;
        }
        self.save_context()
    }

    /// Read a context entry, transparently retrieving archived data from
    /// cold storage.
    pub fn read_context(&mut self, path: &str) -> Result<String> {
        let outcome = self.context.read(path).ok_or_else(|| Error::NotFound {
            key: format!("context/{}", path),
        })?;
        let data = match outcome {
            ContextRead::Live(data) => data,
            ContextRead::Archived => fs::read_to_string(self.archive_path(path))?,
        };
        self.save_context()?;
        Ok(data)
    }

    /// Move the least recently referenced entries to cold storage until
    /// live context data fits under `threshold` bytes. Returns the paths
    /// that were archived.
    pub fn archive_context(&mut self, threshold: u64) -> Result<Vec<String>> {
        let mut archived = Vec::new();
        while self.context.live_bytes() > threshold {
            let victim = match self.context.victim() {
                Some(entry) => entry.path.clone(),
                None => break,
            };
            let data = match self.context.archive(&victim) {
                Some(data) => data,
                None => break,
            };
            let cold = self.archive_path(&victim);
            if let Some(parent) = cold.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&cold, data)?;
            clog_debug!("Archived context entry {}", victim);
            archived.push(victim);
        }
        if !archived.is_empty() {
            self.save_context()?;
        }
        Ok(archived)
    }

    /// Aggregate size of live (non-archived) context data.
    pub fn context_live_bytes(&self) -> u64 {
        self.context.live_bytes()
    }

    /// Inspect the context ledger (read-only).
    pub fn context(&self) -> &ContextLedger {
        &self.context
    }

    fn archive_path(&self, path: &str) -> PathBuf {
        self.root.join("archive").join(path)
    }

    fn save_context(&self) -> Result<()> {
        fs::write(
            self.root.join("context.json"),
            serde_json::to_vec_pretty(&self.context)?,
        )?;
        Ok(())
    }
}

/// Keys are relative namespaced paths: non-empty segments, no traversal.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
        return Err(Error::Validation(format!("invalid key: {:?}", key)));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::Validation(format!("invalid key: {:?}", key)));
        }
    }
    Ok(())
}

fn load_kv_dir(dir: &Path, prefix: &Path, out: &mut BTreeMap<String, Value>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if path.is_dir() {
            load_kv_dir(&path, &prefix.join(&name), out)?;
        } else if path.extension().map_or(false, |e| e == "json") {
            let stem = path.file_stem().unwrap_or_default().to_string_lossy();
            let key = prefix.join(&*stem).to_string_lossy().replace('\\', "/");
            let value: Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
            out.insert(key, value);
        }
    }
    Ok(())
}

fn checkpoint_seqs(root: &Path) -> Result<Vec<u64>> {
    let dir = root.join("checkpoints");
    let mut seqs = Vec::new();
    if !dir.exists() {
        return Ok(seqs);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".json") {
            if let Ok(seq) = stem.parse::<u64>() {
                seqs.push(seq);
            }
        }
    }
    Ok(seqs)
}
