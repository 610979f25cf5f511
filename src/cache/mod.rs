//! Content-addressed result cache.
//!
//! Splits a task list into outcomes that can be reused and tasks that need
//! a fresh evaluation. A stored outcome is reused only when the snapshot
//! written next to it carries the same file and rule hashes as the fresh
//! task. There is no in-memory state and no expiry: validity is decided
//! entirely by what is on disk.

pub mod lock;
pub mod store;

use std::path::Path;
use std::time::SystemTime;

use crate::models::{EvaluationTask, RuleOutcome};
use store::ResultStore;

/// Result of [`ResultCache::partition`].
#[derive(Debug, Default)]
pub struct CachePartition {
    /// Reusable outcomes, in task order.
    pub cached: Vec<RuleOutcome>,
    /// Tasks with no valid stored outcome, in task order.
    pub to_evaluate: Vec<EvaluationTask>,
    /// Task ids whose artifacts were copied in from a prior commit.
    pub migrated: Vec<String>,
}

/// The cache engine for evaluation outcomes.
#[derive(Debug, Clone)]
pub struct ResultCache {
    enabled: bool,
}

impl ResultCache {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Partition `tasks` against the current commit's store and the stores
    /// of prior commits.
    ///
    /// A hit in `current` is used directly. Otherwise each prior store is
    /// tried in turn; the first hit has its artifacts copied into `current`
    /// so each commit directory stays self-contained. A failed copy is
    /// logged and the outcome is still reused.
    pub async fn partition(
        &self,
        tasks: Vec<EvaluationTask>,
        current: &ResultStore,
        prior: &[ResultStore],
    ) -> CachePartition {
        let mut partition = CachePartition::default();
        if !self.enabled {
            partition.to_evaluate = tasks;
            return partition;
        }

        'tasks: for task in tasks {
            if let Some(outcome) = lookup(current, &task).await {
                tracing::debug!(task_id = %task.task_id, "cache hit");
                partition.cached.push(outcome);
                continue;
            }

            for store in prior.iter().filter(|s| s.dir() != current.dir()) {
                let Some(outcome) = lookup(store, &task).await else {
                    continue;
                };
                tracing::debug!(
                    task_id = %task.task_id,
                    from = %store.dir().display(),
                    "cross-commit cache hit"
                );
                if let Err(e) = current.copy_task_artifacts(store, &task.task_id).await {
                    tracing::warn!(task_id = %task.task_id, "failed to migrate cached result: {e}");
                }
                partition.migrated.push(task.task_id.clone());
                partition.cached.push(outcome);
                continue 'tasks;
            }

            partition.to_evaluate.push(task);
        }

        tracing::info!(
            cached = partition.cached.len(),
            migrated = partition.migrated.len(),
            to_evaluate = partition.to_evaluate.len(),
            "partitioned tasks"
        );
        partition
    }
}

/// The stored outcome for `task` if `store` holds a valid one.
async fn lookup(store: &ResultStore, task: &EvaluationTask) -> Option<RuleOutcome> {
    let snapshot = store.read_snapshot(&task.task_id).await?;
    if !snapshot.is_valid_for(task) {
        tracing::debug!(task_id = %task.task_id, dir = %store.dir().display(), "stale snapshot");
        return None;
    }
    store.read_outcome(&task.task_id).await
}

/// Result stores of other commits under `evaluations_root`, most recently
/// modified first. `current` is excluded.
///
/// The order only affects which prior commit is tried first; any valid hit
/// is equally correct.
pub async fn discover_prior_dirs(evaluations_root: &Path, current: &Path) -> Vec<ResultStore> {
    let mut dirs: Vec<(SystemTime, std::path::PathBuf)> = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(evaluations_root).await else {
        return Vec::new();
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path == current {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        dirs.push((modified, path));
    }
    dirs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    dirs.into_iter().map(|(_, path)| ResultStore::new(path)).collect()
}
