//! Markdown + YAML frontmatter parser for rule definitions.
//!
//! Uses `serde_yaml_ng` for the frontmatter. Every key is optional; a file
//! with no frontmatter at all is a rule whose whole body is the content.

use serde::Deserialize;

use crate::models::FocusType;
use crate::models::rule::{AppliesTo, GrepPatterns, Rule};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RuleFrontmatter {
    description: String,
    category: String,
    focus_type: Option<String>,
    applies_to: Option<AppliesTo>,
    grep: Option<GrepPatterns>,
    model: Option<String>,
    documentation_link: Option<String>,
    new_code_lines_only: bool,
    violation_regex: Option<String>,
    violation_message: Option<String>,
}

/// Parse a rule file into a [`Rule`].
///
/// `name` is the file stem and `file_path` the path it was read from.
///
/// Expected format:
/// ```markdown
/// ---
/// description: Avoid print statements
/// category: hygiene
/// focus_type: method
/// applies_to:
///   file_patterns: ["*.py"]
/// grep:
///   any: ["print\\("]
/// ---
///
/// Rule instructions here...
/// ```
pub fn parse_rule(name: &str, file_path: &str, content: &str) -> Result<Rule, String> {
    let (frontmatter, body) = split_frontmatter(content)?;
    let meta: RuleFrontmatter = match frontmatter {
        Some(yaml) if !yaml.trim().is_empty() => {
            serde_yaml_ng::from_str(yaml).map_err(|e| format!("invalid frontmatter: {e}"))?
        }
        _ => RuleFrontmatter::default(),
    };

    // Unknown granularities fall back to file-level review.
    let focus_type = meta
        .focus_type
        .as_deref()
        .and_then(|t| t.parse::<FocusType>().ok())
        .unwrap_or_default();

    Ok(Rule {
        name: name.to_string(),
        file_path: file_path.to_string(),
        description: meta.description,
        category: meta.category,
        content: body.trim().to_string(),
        focus_type,
        applies_to: meta.applies_to.unwrap_or_default(),
        grep: meta.grep.unwrap_or_default(),
        model: meta.model,
        new_code_lines_only: meta.new_code_lines_only,
        violation_regex: meta.violation_regex,
        violation_message: meta.violation_message,
        documentation_link: meta.documentation_link,
        rule_url: None,
    })
}

/// Split content into optional YAML frontmatter and the markdown body.
fn split_frontmatter(content: &str) -> Result<(Option<&str>, &str), String> {
    let trimmed = content.trim_start();
    let Some(after_first) = trimmed.strip_prefix("---") else {
        return Ok((None, content));
    };

    let end = after_first
        .find("\n---")
        .ok_or_else(|| "unterminated YAML frontmatter (missing closing ---)".to_string())?;

    let frontmatter = &after_first[..end];
    let rest = &after_first[end + 4..];
    // Drop the remainder of the closing delimiter line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    Ok((Some(frontmatter), body))
}
