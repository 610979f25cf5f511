//! Rule definitions loaded from Markdown files with YAML frontmatter.

use serde::{Deserialize, Serialize};

use super::focus::FocusType;

/// Criteria for which files a rule applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppliesTo {
    /// Glob patterns (e.g. `*.swift`, `src/**/*.rs`). Empty matches all files.
    pub file_patterns: Vec<String>,
    /// Glob patterns that always exclude a file.
    pub exclude_patterns: Vec<String>,
}

/// Regex patterns that pre-filter the changed content of a focus area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrepPatterns {
    /// Every pattern must match.
    pub all: Vec<String>,
    /// At least one pattern must match.
    pub any: Vec<String>,
}

impl GrepPatterns {
    pub fn has_patterns(&self) -> bool {
        !self.all.is_empty() || !self.any.is_empty()
    }
}

/// A code review rule. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule name (the file stem of its definition).
    pub name: String,
    /// Path of the rule definition file.
    pub file_path: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
    /// Full rule text handed to the evaluator.
    pub content: String,
    #[serde(default)]
    pub focus_type: FocusType,
    #[serde(default)]
    pub applies_to: AppliesTo,
    #[serde(default)]
    pub grep: GrepPatterns,
    /// Model override for AI evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Restrict content matching to newly added lines.
    #[serde(default)]
    pub new_code_lines_only: bool,
    /// Regex for non-AI rules; each matching added line is a violation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_regex: Option<String>,
    /// Fixed comment text for regex violations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_link: Option<String>,
    /// Link to the rule definition in its hosting repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_url: Option<String>,
}

impl Rule {
    /// Whether this rule is evaluated by regex instead of an AI agent.
    pub fn is_regex_rule(&self) -> bool {
        self.violation_regex.is_some()
    }
}
