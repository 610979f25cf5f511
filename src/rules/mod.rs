//! Rule repository: loading rule definitions and deciding applicability.

pub mod parser;

use std::path::{Path, PathBuf};

use glob::Pattern;
use regex::{Regex, RegexBuilder};
use thiserror::Error;
use walkdir::WalkDir;

use crate::git;
use crate::models::{FocusArea, Rule};

/// Errors from rule loading.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("rules directory does not exist: {0}")]
    NotFound(String),

    #[error("rules path is not a directory: {0}")]
    NotADirectory(String),

    #[error("failed to read rule file {path}: {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },

    #[error("rule '{rule}' has invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        message: String,
    },

    #[error("rule discovery failed: {0}")]
    Walk(String),
}

/// A rule together with its compiled matchers.
#[derive(Debug, Clone)]
pub struct LoadedRule {
    pub rule: Rule,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    grep_all: Vec<Regex>,
    grep_any: Vec<Regex>,
    violation: Option<Regex>,
}

impl LoadedRule {
    /// Compile a rule's patterns. Any invalid glob or regex is an error.
    pub fn compile(rule: Rule) -> Result<Self, RuleError> {
        let include = compile_globs(&rule, &rule.applies_to.file_patterns)?;
        let exclude = compile_globs(&rule, &rule.applies_to.exclude_patterns)?;
        let grep_all = compile_regexes(&rule, &rule.grep.all)?;
        let grep_any = compile_regexes(&rule, &rule.grep.any)?;
        let violation = match &rule.violation_regex {
            Some(pattern) => Some(compile_regex(&rule, pattern)?),
            None => None,
        };
        Ok(Self {
            rule,
            include,
            exclude,
            grep_all,
            grep_any,
            violation,
        })
    }

    /// Exclusions win; an empty include list matches every file.
    pub fn applies_to_file(&self, file_path: &str) -> bool {
        if self.exclude.iter().any(|p| p.matches(file_path)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches(file_path))
    }

    /// All `all` patterns and at least one `any` pattern must match.
    pub fn matches_content(&self, text: &str) -> bool {
        let all = self.grep_all.iter().all(|re| re.is_match(text));
        let any = self.grep_any.is_empty() || self.grep_any.iter().any(|re| re.is_match(text));
        all && any
    }

    /// Whether this rule should be evaluated against `focus`.
    pub fn applies_to(&self, focus: &FocusArea) -> bool {
        if self.rule.focus_type != focus.focus_type {
            return false;
        }
        if !self.applies_to_file(&focus.file_path) {
            return false;
        }
        if self.rule.grep.has_patterns() {
            let changed = focus.changed_content(self.rule.new_code_lines_only);
            return self.matches_content(&changed);
        }
        true
    }

    /// The compiled `violation_regex`, for regex-evaluated rules.
    pub fn violation_regex(&self) -> Option<&Regex> {
        self.violation.as_ref()
    }
}

fn compile_globs(rule: &Rule, patterns: &[String]) -> Result<Vec<Pattern>, RuleError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| RuleError::InvalidPattern {
                rule: rule.name.clone(),
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

fn compile_regexes(rule: &Rule, patterns: &[String]) -> Result<Vec<Regex>, RuleError> {
    patterns.iter().map(|p| compile_regex(rule, p)).collect()
}

fn compile_regex(rule: &Rule, pattern: &str) -> Result<Regex, RuleError> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .build()
        .map_err(|e| RuleError::InvalidPattern {
            rule: rule.name.clone(),
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

/// All rules loaded from a rules directory.
#[derive(Debug, Clone, Default)]
pub struct RuleRepository {
    dir: PathBuf,
    rules: Vec<LoadedRule>,
}

impl RuleRepository {
    /// Load every `*.md` file under `dir` (recursively, sorted by path).
    ///
    /// Files with unparseable frontmatter are skipped with a warning.
    /// A missing directory or an invalid pattern fails the whole load.
    pub async fn load(dir: &Path) -> Result<Self, RuleError> {
        let meta = tokio::fs::metadata(dir)
            .await
            .map_err(|_| RuleError::NotFound(dir.display().to_string()))?;
        if !meta.is_dir() {
            return Err(RuleError::NotADirectory(dir.display().to_string()));
        }

        let files = discover_rule_files(dir).await?;
        let mut rules = Vec::with_capacity(files.len());
        for path in files {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| RuleError::ReadError {
                    path: path.display().to_string(),
                    source: e,
                })?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let rule = match parser::parse_rule(&name, &path.display().to_string(), &content) {
                Ok(rule) => rule,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "skipping rule: {e}");
                    continue;
                }
            };
            rules.push(LoadedRule::compile(rule)?);
        }

        tracing::debug!(dir = %dir.display(), count = rules.len(), "loaded rules");
        Ok(Self {
            dir: dir.to_path_buf(),
            rules,
        })
    }

    /// Build a repository from already-parsed rules.
    pub fn from_rules(dir: impl Into<PathBuf>, rules: Vec<Rule>) -> Result<Self, RuleError> {
        let rules = rules
            .into_iter()
            .map(LoadedRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            dir: dir.into(),
            rules,
        })
    }

    /// Attach hosted-repository links to each rule.
    ///
    /// A rule whose location cannot be resolved keeps `rule_url = None`.
    pub async fn enrich_urls(&mut self) {
        for loaded in &mut self.rules {
            match git::file_location(Path::new(&loaded.rule.file_path)).await {
                Ok(location) => loaded.rule.rule_url = Some(location.web_url()),
                Err(e) => {
                    tracing::debug!(rule = %loaded.rule.name, "no rule url: {e}");
                }
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|l| &l.rule)
    }

    pub fn loaded(&self) -> &[LoadedRule] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&LoadedRule> {
        self.rules.iter().find(|l| l.rule.name == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules applicable to `focus`, in load order.
    pub fn applicable_rules<'a>(&'a self, focus: &'a FocusArea) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules
            .iter()
            .filter(move |l| l.applies_to(focus))
            .map(|l| &l.rule)
    }
}

async fn discover_rule_files(dir: &Path) -> Result<Vec<PathBuf>, RuleError> {
    let root = dir.to_path_buf();
    // walkdir is synchronous
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|e| RuleError::Walk(e.to_string()))?;
            if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "md") {
                files.push(entry.into_path());
            }
        }
        files.sort();
        Ok(files)
    })
    .await
    .map_err(|e| RuleError::Walk(e.to_string()))?
}
