//! Run result persistence
//!
//! Each finished run is written as its own JSON record file, and a single
//! `index.json` keeps the newest-first listing capped at a configured
//! maximum. The index is a cache over the record directory: when it is
//! missing or corrupt it is rebuilt by walking the records rather than
//! served in an inconsistent state.

use crate::core::error::{NetProbeError, Result};
use crate::plugin::descriptor::{DescriptorSnapshot, PluginId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

const INDEX_FILE: &str = "index.json";
const RECORD_DIR: &str = "records";

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Success { result: Value },
    Timeout,
    Error { error: String },
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success { .. })
    }
}

/// Persisted record of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub plugin: PluginId,
    pub timestamp: DateTime<Utc>,
    pub params: Value,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    /// Wall-clock duration of the run in seconds.
    pub execution_time: f64,
    pub plugin_info: DescriptorSnapshot,
}

/// One row of `index.json`, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub run_id: Uuid,
    pub plugin: PluginId,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Record file name relative to the record directory.
    pub file: String,
}

/// Record-per-run store with a capped newest-first index.
pub struct ResultStore {
    directory: PathBuf,
    max_stored: usize,
    /// Serializes index read-modify-write cycles.
    index: Mutex<()>,
}

impl ResultStore {
    pub fn new(directory: PathBuf, max_stored: usize) -> Result<Self> {
        std::fs::create_dir_all(directory.join(RECORD_DIR))?;
        Ok(Self {
            directory,
            max_stored: max_stored.max(1),
            index: Mutex::new(()),
        })
    }

    fn index_path(&self) -> PathBuf {
        self.directory.join(INDEX_FILE)
    }

    fn record_dir(&self) -> PathBuf {
        self.directory.join(RECORD_DIR)
    }

    fn record_file(record: &RunRecord) -> String {
        format!(
            "{}_{}_{}.json",
            record.plugin,
            record.timestamp.format("%Y%m%dT%H%M%S"),
            record.run_id.simple()
        )
    }

    /// Persist a record and prepend it to the index. Returns the path of the
    /// written record file.
    ///
    /// The record file is written first; if the index update then fails the
    /// record file is removed again so the two never disagree about what
    /// exists.
    pub async fn save(&self, record: &RunRecord) -> Result<PathBuf> {
        let _guard = self.index.lock().await;
        let file = Self::record_file(record);
        let path = self.record_dir().join(&file);
        let raw = serde_json::to_string_pretty(record)
            .map_err(|e| NetProbeError::SerializationError(e.to_string()))?;
        tokio::fs::write(&path, raw).await?;

        let mut index = self.load_index().await;
        index.retain(|e| e.run_id != record.run_id);
        index.insert(
            0,
            IndexEntry {
                run_id: record.run_id,
                plugin: record.plugin.clone(),
                timestamp: record.timestamp,
                success: record.outcome.is_success(),
                file: file.clone(),
            },
        );

        // trim the index past the cap, but only delete the evicted files
        // once the trimmed index is on disk; otherwise a failed index write
        // would leave it pointing at records that no longer exist
        let mut evicted = Vec::new();
        while index.len() > self.max_stored {
            if let Some(entry) = index.pop() {
                evicted.push(entry);
            }
        }

        if let Err(e) = self.write_index(&index).await {
            error!(error = %e, "index update failed, rolling back record");
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
        for entry in evicted {
            let old = self.record_dir().join(&entry.file);
            if let Err(e) = tokio::fs::remove_file(&old).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %old.display(), error = %e, "failed to remove evicted record");
                }
            }
        }
        debug!(run_id = %record.run_id, plugin = %record.plugin, "run record stored");
        Ok(path)
    }

    /// Load one record by run id.
    pub async fn get(&self, run_id: Uuid) -> Result<RunRecord> {
        let entry = {
            let _guard = self.index.lock().await;
            self.load_index()
                .await
                .into_iter()
                .find(|e| e.run_id == run_id)
        };
        let entry = entry
            .ok_or_else(|| NetProbeError::ResultNotFound(run_id.to_string()))?;
        self.read_record(&entry.file).await
    }

    /// Newest-first index listing, optionally truncated.
    pub async fn list(&self, limit: Option<usize>) -> Vec<IndexEntry> {
        let _guard = self.index.lock().await;
        let mut index = self.load_index().await;
        if let Some(limit) = limit {
            index.truncate(limit);
        }
        index
    }

    /// Newest-first records for one plugin.
    pub async fn list_for_plugin(
        &self,
        plugin: &str,
        limit: Option<usize>,
    ) -> Vec<IndexEntry> {
        let _guard = self.index.lock().await;
        let mut entries: Vec<_> = self
            .load_index()
            .await
            .into_iter()
            .filter(|e| e.plugin == plugin)
            .collect();
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        entries
    }

    /// The most recent record for a plugin, if any.
    pub async fn latest_for_plugin(&self, plugin: &str) -> Option<RunRecord> {
        let entry = self.list_for_plugin(plugin, Some(1)).await.into_iter().next()?;
        self.read_record(&entry.file).await.ok()
    }

    /// Delete records older than the cutoff. Returns how many were removed.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.index.lock().await;
        let index = self.load_index().await;
        let (keep, drop): (Vec<_>, Vec<_>) =
            index.into_iter().partition(|e| e.timestamp >= cutoff);
        for entry in &drop {
            let path = self.record_dir().join(&entry.file);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(file = %path.display(), error = %e, "failed to purge record");
                }
            }
        }
        self.write_index(&keep).await?;
        if !drop.is_empty() {
            info!(purged = drop.len(), "old run records purged");
        }
        Ok(drop.len())
    }

    async fn read_record(&self, file: &str) -> Result<RunRecord> {
        let path = self.record_dir().join(file);
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            NetProbeError::StoreError(format!("cannot read record {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| NetProbeError::StoreError(format!("corrupt record {}: {}", file, e)))
    }

    /// Read the index, rebuilding it from the record directory when it is
    /// missing or unparseable.
    async fn load_index(&self) -> Vec<IndexEntry> {
        match tokio::fs::read_to_string(self.index_path()).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(index) => index,
                Err(e) => {
                    warn!(error = %e, "index corrupt, rebuilding from records");
                    self.rebuild_index().await
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.rebuild_index().await
            }
            Err(e) => {
                warn!(error = %e, "index unreadable, rebuilding from records");
                self.rebuild_index().await
            }
        }
    }

    async fn rebuild_index(&self) -> Vec<IndexEntry> {
        let record_dir = self.record_dir();
        let mut entries = Vec::new();
        for item in WalkDir::new(&record_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !item.file_type().is_file() {
                continue;
            }
            let name = item.file_name().to_string_lossy().to_string();
            if !name.ends_with(".json") {
                continue;
            }
            match self.read_record(&name).await {
                Ok(record) => entries.push(IndexEntry {
                    run_id: record.run_id,
                    plugin: record.plugin,
                    timestamp: record.timestamp,
                    success: record.outcome.is_success(),
                    file: name,
                }),
                Err(e) => {
                    warn!(file = %name, error = %e, "skipping unreadable record during rebuild");
                }
            }
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(self.max_stored);
        if let Err(e) = self.write_index(&entries).await {
            warn!(error = %e, "failed to persist rebuilt index");
        } else if !entries.is_empty() {
            info!(records = entries.len(), "index rebuilt from record directory");
        }
        entries
    }

    async fn write_index(&self, index: &[IndexEntry]) -> Result<()> {
        let raw = serde_json::to_string_pretty(index)
            .map_err(|e| NetProbeError::SerializationError(e.to_string()))?;
        tokio::fs::write(self.index_path(), raw).await?;
        Ok(())
    }
}
