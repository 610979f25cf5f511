//! Task builder: pairs applicable rules with focus areas.
//!
//! Each pairing becomes an [`EvaluationTask`] carrying the content hashes
//! that key the result cache. Hash lookups are memoized per path for the
//! lifetime of the builder.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::cache::store::{ResultStore, StoreError};
use crate::git::BlobSource;
use crate::models::{EvaluationTask, FocusArea, TaskSnapshot};
use crate::rules::RuleRepository;

/// Errors from task persistence.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("failed to persist task snapshots: {0}")]
    Store(#[from] StoreError),
}

/// Builds evaluation tasks for one commit.
pub struct TaskBuilder {
    blobs: Arc<dyn BlobSource>,
    commit: String,
    file_hashes: HashMap<String, String>,
    rule_hashes: HashMap<String, Option<String>>,
}

impl TaskBuilder {
    pub fn new(blobs: Arc<dyn BlobSource>, commit: impl Into<String>) -> Self {
        Self {
            blobs,
            commit: commit.into(),
            file_hashes: HashMap::new(),
            rule_hashes: HashMap::new(),
        }
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    /// One task per (applicable rule, focus area) pair, focus-major.
    pub async fn build(&mut self, rules: &RuleRepository, focus_areas: &[FocusArea]) -> Vec<EvaluationTask> {
        let mut tasks = Vec::new();
        for focus in focus_areas {
            let applicable: Vec<_> = rules.applicable_rules(focus).cloned().collect();
            if applicable.is_empty() {
                continue;
            }
            let git_blob_hash = self.file_hash(&focus.file_path).await;
            for rule in applicable {
                let rule_blob_hash = self.rule_hash(&rule.file_path).await;
                tasks.push(EvaluationTask::new(
                    rule,
                    focus.clone(),
                    git_blob_hash.clone(),
                    rule_blob_hash,
                ));
            }
        }
        tracing::info!(
            commit = %self.commit,
            focus_areas = focus_areas.len(),
            tasks = tasks.len(),
            "built evaluation tasks"
        );
        tasks
    }

    /// Blob hash of `file_path` at the commit, or `"<commit>:<file_path>"`
    /// when it cannot be resolved.
    async fn file_hash(&mut self, file_path: &str) -> String {
        if let Some(hash) = self.file_hashes.get(file_path) {
            return hash.clone();
        }
        let hash = match self.blobs.file_blob_hash(&self.commit, file_path).await {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(file = file_path, "blob hash unavailable, using fallback key: {e}");
                format!("{}:{file_path}", self.commit)
            }
        };
        self.file_hashes.insert(file_path.to_string(), hash.clone());
        hash
    }

    /// Version-control hash of the rule file, else a SHA-256 of its bytes.
    async fn rule_hash(&mut self, rule_path: &str) -> Option<String> {
        if let Some(hash) = self.rule_hashes.get(rule_path) {
            return hash.clone();
        }
        let hash = match self.blobs.rule_blob_hash(Path::new(rule_path)).await {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::debug!(rule = rule_path, "rule not under version control: {e}");
                content_hash(Path::new(rule_path)).await
            }
        };
        self.rule_hashes.insert(rule_path.to_string(), hash.clone());
        hash
    }
}

/// SHA-256 of a file's bytes, hex encoded.
pub async fn content_hash(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(hex::encode(Sha256::digest(&bytes))),
        Err(e) => {
            tracing::warn!(path = %path.display(), "cannot hash rule file: {e}");
            None
        }
    }
}

/// Replace the snapshots in `store` with one per task.
///
/// Stale snapshots are cleared first so a rerun never mixes tasks from an
/// earlier rule set.
pub async fn write_snapshots(store: &ResultStore, tasks: &[EvaluationTask]) -> Result<usize, TaskError> {
    let removed = store.clear_snapshots().await?;
    if removed > 0 {
        tracing::debug!(dir = %store.dir().display(), removed, "cleared stale task snapshots");
    }
    for task in tasks {
        store.write_snapshot(&TaskSnapshot::of(task)).await?;
    }
    Ok(tasks.len())
}
