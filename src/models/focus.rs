//! Focus areas: reviewable regions of a changed file.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Granularity of a focus area (and of the rules that apply to it).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FocusType {
    /// A single method or function inside a hunk.
    Method,
    /// A whole changed file.
    #[default]
    File,
}

/// Kind of a line inside annotated hunk content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Added,
    Removed,
    Context,
}

/// One line of annotated hunk content.
///
/// Annotated lines look like `"  12: +code"`, `"  13:  context"` or
/// `"   -: -removed"`; the number is the new-file line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedLine<'a> {
    pub new_line: Option<u32>,
    pub kind: LineKind,
    pub text: &'a str,
}

impl<'a> AnnotatedLine<'a> {
    /// Parse an annotated line. Returns `None` for headers and blank lines.
    pub fn parse(line: &'a str) -> Option<Self> {
        let (number, rest) = line.split_once(": ")?;
        let number = number.trim();
        let new_line = if number == "-" {
            None
        } else {
            Some(number.parse::<u32>().ok()?)
        };

        let mut chars = rest.chars();
        let (kind, text) = match chars.next() {
            Some('+') => (LineKind::Added, chars.as_str()),
            Some('-') => (LineKind::Removed, chars.as_str()),
            Some(' ') => (LineKind::Context, chars.as_str()),
            _ => (LineKind::Context, rest),
        };

        if kind == LineKind::Removed && new_line.is_some() {
            return None;
        }

        Some(Self {
            new_line,
            kind,
            text,
        })
    }
}

/// A reviewable region of a changed file, produced upstream from diff hunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusArea {
    /// Stable identifier derived from path, hunk index and description.
    pub focus_id: String,
    pub file_path: String,
    /// First line of the region in new-file coordinates.
    pub start_line: u32,
    /// Last line of the region in new-file coordinates (inclusive).
    pub end_line: u32,
    pub description: String,
    pub hunk_index: usize,
    /// Annotated hunk content (header plus numbered `+`/`-`/context lines).
    pub hunk_content: String,
    #[serde(default)]
    pub focus_type: FocusType,
}

impl FocusArea {
    /// Build a stable focus id from a file path, hunk index and description.
    ///
    /// File-level areas pass `None` for the description and get the bare
    /// sanitized path.
    pub fn make_focus_id(file_path: &str, hunk_index: Option<usize>, description: Option<&str>) -> String {
        let safe_path = file_path.replace(['/', '\\'], "-");
        match (hunk_index, description) {
            (None, _) => safe_path,
            (Some(index), None) => format!("{safe_path}-{index}"),
            (Some(index), Some(desc)) => {
                format!("{safe_path}-{index}-{}", sanitize_for_id(desc))
            }
        }
    }

    /// The `@@` header plus the annotated lines within `[start_line, end_line]`.
    ///
    /// Removed lines carry no new-file number and are kept when they sit
    /// between two in-bounds lines.
    pub fn focused_content(&self) -> String {
        let mut lines = self.hunk_content.lines();
        let mut focused: Vec<&str> = Vec::new();

        for line in lines.by_ref() {
            if line.starts_with("@@") {
                focused.push(line);
                break;
            }
        }

        let mut inside = false;
        let mut pending_removed: Vec<&str> = Vec::new();
        for line in lines {
            if line.starts_with("@@") {
                // Multi-hunk file areas repeat headers.
                pending_removed.clear();
                focused.push(line);
                continue;
            }
            let Some(parsed) = AnnotatedLine::parse(line) else {
                continue;
            };
            match parsed.new_line {
                Some(n) if n >= self.start_line && n <= self.end_line => {
                    focused.append(&mut pending_removed);
                    focused.push(line);
                    inside = true;
                }
                Some(_) => {
                    pending_removed.clear();
                    inside = false;
                }
                None => {
                    if inside || parsed.kind == LineKind::Removed {
                        pending_removed.push(line);
                    }
                }
            }
        }
        if inside {
            focused.append(&mut pending_removed);
        }

        focused.join("\n")
    }

    /// Added and removed lines inside the focus bounds, without prefixes.
    ///
    /// When `added_only` is set only `+` lines are returned.
    pub fn changed_content(&self, added_only: bool) -> String {
        let focused = self.focused_content();
        focused
            .lines()
            .filter_map(AnnotatedLine::parse)
            .filter(|l| match l.kind {
                LineKind::Added => true,
                LineKind::Removed => !added_only,
                LineKind::Context => false,
            })
            .map(|l| l.text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Added lines inside the focus bounds with their new-file numbers.
    pub fn added_lines(&self) -> Vec<(u32, String)> {
        self.focused_content()
            .lines()
            .filter_map(AnnotatedLine::parse)
            .filter(|l| l.kind == LineKind::Added)
            .filter_map(|l| l.new_line.map(|n| (n, l.text.to_string())))
            .collect()
    }
}

/// Sanitize a method description for use inside a focus id.
fn sanitize_for_id(name: &str) -> String {
    let head = name.split('(').next().unwrap_or_default().trim();
    let sanitized: String = head
        .replace([' ', '/', '\\'], "-")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .take(50)
        .collect();
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}
