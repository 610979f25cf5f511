//! Layered configuration.
//!
//! Later layers win:
//! 1. Built-in defaults
//! 2. `~/.config/prradar/config.toml`
//! 3. `.prradar.toml` in the repository root
//! 4. `PRRADAR_*` environment variables
//! 5. CLI flags, applied by the binary

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::constants::{
    CONFIG_DIR, CONFIG_FILENAME, ENV_API_KEY, ENV_EVALUATOR_COMMAND, ENV_MODEL, ENV_OUTPUT_DIR, ENV_RULES_DIR,
};
use crate::env::Env;
use crate::models::{DEFAULT_MIN_SCORE, DEFAULT_MODEL};

/// A config layer that could not be read or decoded.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rules: RulesConfig,
    pub output: OutputConfig,
    pub evaluator: EvaluatorConfig,
    pub review: ReviewConfig,
}

/// Where rule definitions live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rules directory, relative to the repository root unless absolute.
    pub dir: PathBuf,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("rules"),
        }
    }
}

/// Where results, snapshots and transcripts are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".prradar"),
        }
    }
}

/// The external agent command used for AI rules.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub command: String,
    /// Arguments; `{model}` is replaced by the task's model.
    pub args: Vec<String>,
    pub model: String,
    pub api_key: Option<String>,
    /// Variable the API key is exported as to the agent process.
    pub api_key_env: String,
}

impl std::fmt::Debug for EvaluatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorConfig")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_env", &self.api_key_env)
            .finish()
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: ["-p", "--output-format", "stream-json", "--verbose", "--model", "{model}"]
                .map(String::from)
                .to_vec(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

/// Review behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Minimum violation score that becomes a review comment.
    pub min_score: u8,
    /// Reuse stored outcomes whose content hashes still match.
    pub cache: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            cache: true,
        }
    }
}

impl Config {
    /// Fold the file layers over the defaults, then apply `env`.
    pub fn load(repo_root: Option<&Path>, env: &Env) -> Result<Self, ConfigError> {
        let layers = [Self::global_path(), repo_root.map(|root| root.join(CONFIG_FILENAME))];
        let mut config = Config::default();
        for path in layers.into_iter().flatten().filter(|p| p.is_file()) {
            tracing::debug!(path = %path.display(), "applying config layer");
            config.overlay(Self::from_file(&path)?);
        }
        config.apply_env(env);
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })
    }

    fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR).join("config.toml"))
    }

    /// Resolve `path` against `repo_root` unless it is absolute.
    pub fn resolve(repo_root: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            repo_root.join(path)
        }
    }

    /// Take every value of `layer` that differs from the built-in default.
    fn overlay(&mut self, layer: Config) {
        let defaults = Config::default();
        if layer.rules != defaults.rules {
            self.rules = layer.rules;
        }
        if layer.output != defaults.output {
            self.output = layer.output;
        }

        let (mine, theirs, base) = (&mut self.evaluator, layer.evaluator, defaults.evaluator);
        if theirs.command != base.command {
            mine.command = theirs.command;
        }
        if theirs.args != base.args {
            mine.args = theirs.args;
        }
        if theirs.model != base.model {
            mine.model = theirs.model;
        }
        if theirs.api_key.is_some() {
            mine.api_key = theirs.api_key;
        }
        if theirs.api_key_env != base.api_key_env {
            mine.api_key_env = theirs.api_key_env;
        }

        if layer.review.min_score != defaults.review.min_score {
            self.review.min_score = layer.review.min_score;
        }
        // Any layer can switch caching off; none can switch it back on.
        self.review.cache &= layer.review.cache;
    }

    fn apply_env(&mut self, env: &Env) {
        if let Some(dir) = env.get(ENV_RULES_DIR) {
            self.rules.dir = PathBuf::from(dir);
        }
        if let Some(dir) = env.get(ENV_OUTPUT_DIR) {
            self.output.dir = PathBuf::from(dir);
        }
        if let Some(model) = env.get(ENV_MODEL) {
            self.evaluator.model = model;
        }
        if let Some(command) = env.get(ENV_EVALUATOR_COMMAND) {
            self.evaluator.command = command;
        }
        if let Some(key) = env.first_of(&[ENV_API_KEY, self.evaluator.api_key_env.as_str()]) {
            self.evaluator.api_key = Some(key);
        }
    }
}
