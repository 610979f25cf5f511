//! Filesystem store for one commit's evaluation artifacts.
//!
//! Layout inside the store directory:
//! - `data-<task_id>.json`: the persisted [`RuleOutcome`]
//! - `task-<task_id>.json`: the [`TaskSnapshot`] it was computed for
//! - `ai-transcript-<task_id>.json` / `.md`: optional evaluator transcript
//!
//! Every write goes to a uniquely named temp file in the same directory and
//! is renamed into place, so readers never observe a partial file.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::constants::{RESULT_FILE_PREFIX, SNAPSHOT_FILE_PREFIX, TRANSCRIPT_FILE_PREFIX};
use crate::models::{RuleOutcome, TaskSnapshot};

/// Errors from store writes. Reads never fail: a bad file is a miss.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: String,
        source: serde_json::Error,
    },
}

/// Artifacts of one commit, stored in a single directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn result_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{RESULT_FILE_PREFIX}{task_id}.json"))
    }

    pub fn snapshot_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{SNAPSHOT_FILE_PREFIX}{task_id}.json"))
    }

    /// Paths of the JSON and Markdown transcripts.
    pub fn transcript_paths(&self, task_id: &str) -> [PathBuf; 2] {
        [
            self.dir.join(format!("{TRANSCRIPT_FILE_PREFIX}{task_id}.json")),
            self.dir.join(format!("{TRANSCRIPT_FILE_PREFIX}{task_id}.md")),
        ]
    }

    /// Read the stored outcome for `task_id`, if present and decodable.
    pub async fn read_outcome(&self, task_id: &str) -> Option<RuleOutcome> {
        read_json(&self.result_path(task_id)).await
    }

    /// Read the stored snapshot for `task_id`, if present and decodable.
    pub async fn read_snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        read_json(&self.snapshot_path(task_id)).await
    }

    pub async fn write_outcome(&self, outcome: &RuleOutcome) -> Result<(), StoreError> {
        write_json(&self.result_path(outcome.task_id()), outcome).await
    }

    pub async fn write_snapshot(&self, snapshot: &TaskSnapshot) -> Result<(), StoreError> {
        write_json(&self.snapshot_path(&snapshot.task().task_id), snapshot).await
    }

    /// Write both transcript renderings for `task_id`.
    pub async fn write_transcript(&self, task_id: &str, json: &str, markdown: &str) -> Result<(), StoreError> {
        let [json_path, md_path] = self.transcript_paths(task_id);
        write_atomic(&json_path, json.as_bytes()).await?;
        write_atomic(&md_path, markdown.as_bytes()).await
    }

    /// Copy the result, snapshot and any transcripts of `task_id` from
    /// `source` into this store, byte for byte.
    ///
    /// The result and snapshot must exist in `source`; transcripts are
    /// copied when present.
    pub async fn copy_task_artifacts(&self, source: &ResultStore, task_id: &str) -> Result<(), StoreError> {
        copy_file(&source.result_path(task_id), &self.result_path(task_id)).await?;
        copy_file(&source.snapshot_path(task_id), &self.snapshot_path(task_id)).await?;
        for (from, to) in source
            .transcript_paths(task_id)
            .iter()
            .zip(self.transcript_paths(task_id).iter())
        {
            if tokio::fs::try_exists(from).await.unwrap_or(false) {
                copy_file(from, to).await?;
            }
        }
        Ok(())
    }

    /// Remove the snapshot and transcripts of `task_id`. The result file is
    /// left in place until it is overwritten.
    ///
    /// Without a snapshot the task can never be a cache hit, so this is the
    /// first step of re-evaluating it.
    pub async fn clear_task(&self, task_id: &str) -> Result<(), StoreError> {
        let [json_path, md_path] = self.transcript_paths(task_id);
        for path in [self.snapshot_path(task_id), json_path, md_path] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StoreError::Write {
                        path: path.display().to_string(),
                        source: e,
                    });
                }
            }
        }
        Ok(())
    }

    /// Remove every snapshot file in the store. Returns how many were removed.
    pub async fn clear_snapshots(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for path in self.files_with_prefix(SNAPSHOT_FILE_PREFIX).await? {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| StoreError::Write {
                    path: path.display().to_string(),
                    source: e,
                })?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Every decodable outcome in the store, ordered by task id.
    pub async fn load_all_outcomes(&self) -> Result<Vec<RuleOutcome>, StoreError> {
        let mut outcomes = Vec::new();
        for path in self.files_with_prefix(RESULT_FILE_PREFIX).await? {
            if let Some(outcome) = read_json::<RuleOutcome>(&path).await {
                outcomes.push(outcome);
            }
        }
        outcomes.sort_by(|a, b| a.task_id().cmp(b.task_id()));
        Ok(outcomes)
    }

    /// Every decodable snapshot in the store, ordered by task id.
    pub async fn load_all_snapshots(&self) -> Result<Vec<TaskSnapshot>, StoreError> {
        let mut snapshots = Vec::new();
        for path in self.files_with_prefix(SNAPSHOT_FILE_PREFIX).await? {
            if let Some(snapshot) = read_json::<TaskSnapshot>(&path).await {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| a.task().task_id.cmp(&b.task().task_id));
        Ok(snapshots)
    }

    /// Compute statistics about the store.
    pub async fn stats(&self) -> Result<CacheStats, StoreError> {
        let mut stats = CacheStats::default();
        let Some(mut entries) = self.read_dir().await? else {
            return Ok(stats);
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.read_error(e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") && !name.ends_with(".md") {
                continue;
            }
            if name.starts_with(RESULT_FILE_PREFIX) {
                stats.outcomes += 1;
            } else if name.starts_with(SNAPSHOT_FILE_PREFIX) {
                stats.snapshots += 1;
            } else if name.starts_with(TRANSCRIPT_FILE_PREFIX) {
                stats.transcripts += 1;
            } else {
                continue;
            }
            stats.total_bytes += entry.metadata().await.map(|m| m.len()).unwrap_or(0);
        }
        Ok(stats)
    }

    async fn files_with_prefix(&self, prefix: &str) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        let Some(mut entries) = self.read_dir().await? else {
            return Ok(files);
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.read_error(e))? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(prefix) && name.ends_with(".json") {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// `None` when the directory does not exist yet.
    async fn read_dir(&self) -> Result<Option<tokio::fs::ReadDir>, StoreError> {
        match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => Ok(Some(entries)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.read_error(e)),
        }
    }

    fn read_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Read {
            path: self.dir.display().to_string(),
            source,
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(path = %path.display(), "ignoring undecodable file: {e}");
            None
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Encode {
        path: path.display().to_string(),
        source: e,
    })?;
    write_atomic(path, &content).await
}

async fn copy_file(from: &Path, to: &Path) -> Result<(), StoreError> {
    let bytes = tokio::fs::read(from).await.map_err(|e| StoreError::Read {
        path: from.display().to_string(),
        source: e,
    })?;
    write_atomic(to, &bytes).await
}

/// Write `bytes` to a temp file next to `path` and rename it into place.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let write_err = |e| StoreError::Write {
        path: path.display().to_string(),
        source: e,
    };
    let parent = path.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await.map_err(write_err)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(e));
    }
    Ok(())
}

/// Statistics about a result directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub outcomes: usize,
    pub snapshots: usize,
    pub transcripts: usize,
    /// Total size in bytes.
    pub total_bytes: u64,
}

impl CacheStats {
    pub fn entries(&self) -> usize {
        self.outcomes + self.snapshots + self.transcripts
    }

    /// Format total_bytes as a human-readable string.
    pub fn human_size(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * KB;

        if self.total_bytes >= MB {
            format!("{:.1} MiB", self.total_bytes as f64 / MB as f64)
        } else if self.total_bytes >= KB {
            format!("{:.1} KiB", self.total_bytes as f64 / KB as f64)
        } else {
            format!("{} B", self.total_bytes)
        }
    }
}
