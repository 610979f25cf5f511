//! App-wide constants.
//!
//! Centralises the tool name, config paths, environment variable names,
//! and the on-disk file naming scheme so a rename only requires changing
//! this file.

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Local config filename (e.g. `.prradar.toml` in repo root).
pub const CONFIG_FILENAME: &str = ".prradar.toml";

/// Directory name under `~/.config/` for global config.
pub const CONFIG_DIR: &str = "prradar";

// ── On-disk layout ──────────────────────────────────────────────────

/// Prefix of a persisted `RuleOutcome` (`data-<taskId>.json`).
pub const RESULT_FILE_PREFIX: &str = "data-";

/// Prefix of a persisted `TaskSnapshot` (`task-<taskId>.json`).
pub const SNAPSHOT_FILE_PREFIX: &str = "task-";

/// Prefix of an evaluator transcript (`ai-transcript-<taskId>.json` / `.md`).
pub const TRANSCRIPT_FILE_PREFIX: &str = "ai-transcript-";

/// Subdirectory of the output root holding one result directory per commit.
pub const EVALUATIONS_DIR: &str = "evaluations";

/// Subdirectory of the output root holding one snapshot directory per commit.
pub const TASKS_DIR: &str = "tasks";

// ── Environment variable names ──────────────────────────────────────

pub const ENV_RULES_DIR: &str = "PRRADAR_RULES_DIR";
pub const ENV_OUTPUT_DIR: &str = "PRRADAR_OUTPUT_DIR";
pub const ENV_MODEL: &str = "PRRADAR_MODEL";
pub const ENV_API_KEY: &str = "PRRADAR_API_KEY";
pub const ENV_EVALUATOR_COMMAND: &str = "PRRADAR_EVALUATOR";
pub const ENV_LOG: &str = "PRRADAR_LOG";
