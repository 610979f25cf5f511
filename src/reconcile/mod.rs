//! Violation reconciler: matches pending comments against posted ones.
//!
//! A posted comment matches a pending one when it is on the same file, its
//! body mentions the pending comment's rule name, and either it sits on the
//! same line (exact) or, for line-level comments only, anywhere else in the
//! file (fuzzy, to follow line drift after new pushes). Each posted comment
//! is consumed by at most one pending comment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::aggregate::EvaluationSummary;
use crate::models::{PendingComment, PostedComment, ReconciledComment};

/// Errors from loading posted comments.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("failed to read posted comments from {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse posted comments from {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Supplies the comments already posted on the remote review.
#[async_trait]
pub trait CommentSource: Send + Sync {
    async fn posted_comments(&self) -> Result<Vec<PostedComment>, ReconcileError>;
}

/// Reads posted comments from a JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonCommentSource {
    path: PathBuf,
}

impl JsonCommentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CommentSource for JsonCommentSource {
    async fn posted_comments(&self) -> Result<Vec<PostedComment>, ReconcileError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ReconcileError::Read {
                path: self.path.display().to_string(),
                source: e,
            })?;
        serde_json::from_str(&content).map_err(|e| ReconcileError::Parse {
            path: self.path.display().to_string(),
            source: e,
        })
    }
}

/// Render every violation scoring at least `min_score` as a pending comment.
pub fn pending_comments(summary: &EvaluationSummary, min_score: u8) -> Vec<PendingComment> {
    let mut pending = Vec::new();
    for outcome in &summary.outcomes {
        let crate::models::RuleOutcome::Success(result) = outcome else {
            continue;
        };
        for violation in result.violations.iter().filter(|v| v.score >= min_score) {
            let mut body = format!(
                "**{}** (Score: {})\n\n{}",
                result.rule_name, violation.score, violation.comment
            );
            if let Some(link) = &result.documentation_link {
                body.push_str(&format!("\n\nRelated Documentation: [Docs]({link})"));
            }
            pending.push(PendingComment {
                rule_name: result.rule_name.clone(),
                file_path: violation.file_path.clone(),
                line_number: violation.line_number,
                body,
                score: violation.score,
            });
        }
    }
    pending
}

/// Posted comments not yet consumed, indexed by position and by file.
struct PostedIndex {
    slots: Vec<Option<PostedComment>>,
    by_position: HashMap<(String, Option<u32>), Vec<usize>>,
    by_file: HashMap<String, Vec<usize>>,
}

impl PostedIndex {
    fn new(posted: Vec<PostedComment>) -> Self {
        let mut by_position: HashMap<_, Vec<usize>> = HashMap::new();
        let mut by_file: HashMap<_, Vec<usize>> = HashMap::new();
        for (i, comment) in posted.iter().enumerate() {
            by_position
                .entry((comment.file_path.clone(), comment.line_number))
                .or_default()
                .push(i);
            by_file.entry(comment.file_path.clone()).or_default().push(i);
        }
        Self {
            slots: posted.into_iter().map(Some).collect(),
            by_position,
            by_file,
        }
    }

    /// Remove and return the first unconsumed candidate mentioning `rule`.
    fn take_first(&mut self, candidates: &[usize], rule: &str) -> Option<PostedComment> {
        let slot = candidates.iter().copied().find(|&i| {
            self.slots[i]
                .as_ref()
                .is_some_and(|posted| posted.body.contains(rule))
        })?;
        self.slots[slot].take()
    }

    fn take_exact(&mut self, pending: &PendingComment) -> Option<PostedComment> {
        let key = (pending.file_path.clone(), pending.line_number);
        let candidates = self.by_position.get(&key)?.clone();
        self.take_first(&candidates, &pending.rule_name)
    }

    fn take_in_file(&mut self, pending: &PendingComment) -> Option<PostedComment> {
        let candidates = self.by_file.get(&pending.file_path)?.clone();
        self.take_first(&candidates, &pending.rule_name)
    }

    fn into_remaining(self) -> impl Iterator<Item = PostedComment> {
        self.slots.into_iter().flatten()
    }
}

/// Classify pending and posted comments.
///
/// All exact-position matches are made before any fuzzy match, so a
/// drifted comment can never take the posted comment that another pending
/// comment matches exactly. The result lists pending comments in input
/// order, followed by unconsumed posted comments in input order.
pub fn reconcile(pending: Vec<PendingComment>, posted: Vec<PostedComment>) -> Vec<ReconciledComment> {
    let mut index = PostedIndex::new(posted);

    let mut matches: Vec<Option<PostedComment>> = pending.iter().map(|p| index.take_exact(p)).collect();
    for (p, matched) in pending.iter().zip(matches.iter_mut()) {
        if matched.is_none() && p.line_number.is_some() {
            *matched = index.take_in_file(p);
        }
    }

    let mut reconciled: Vec<ReconciledComment> = pending
        .into_iter()
        .zip(matches)
        .map(|(pending, matched)| match matched {
            Some(posted) => ReconciledComment::Redetected { pending, posted },
            None => ReconciledComment::New { pending },
        })
        .collect();
    reconciled.extend(index.into_remaining().map(|posted| ReconciledComment::PostedOnly { posted }));
    reconciled
}

/// Counts per lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub new: usize,
    pub redetected: usize,
    pub posted_only: usize,
}

impl ReconcileReport {
    pub fn from_comments(comments: &[ReconciledComment]) -> Self {
        let mut report = Self::default();
        for comment in comments {
            match comment {
                ReconciledComment::New { .. } => report.new += 1,
                ReconciledComment::Redetected { .. } => report.redetected += 1,
                ReconciledComment::PostedOnly { .. } => report.posted_only += 1,
            }
        }
        report
    }
}

impl std::fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} new, {} redetected, {} posted only",
            self.new, self.redetected, self.posted_only
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvaluationFailure, RuleOutcome, RuleResult, Violation};
    use pretty_assertions::assert_eq;

    fn pending(rule: &str, file: &str, line: Option<u32>) -> PendingComment {
        PendingComment {
            rule_name: rule.into(),
            file_path: file.into(),
            line_number: line,
            body: format!("**{rule}** (Score: 7)\n\nfix it"),
            score: 7,
        }
    }

    fn posted(id: u64, file: &str, line: Option<u32>, body: &str) -> PostedComment {
        PostedComment {
            id: Some(id),
            file_path: file.into(),
            line_number: line,
            body: body.into(),
        }
    }

    fn states(result: &[ReconciledComment]) -> ReconcileReport {
        ReconcileReport::from_comments(result)
    }

    #[test]
    fn exact_match_is_redetected() {
        let result = reconcile(
            vec![pending("no-print", "a.py", Some(10))],
            vec![posted(1, "a.py", Some(10), "Violates no-print: remove it")],
        );
        assert_eq!(
            states(&result),
            ReconcileReport {
                new: 0,
                redetected: 1,
                posted_only: 0
            }
        );
    }

    #[test]
    fn drifted_line_matches_fuzzily() {
        let result = reconcile(
            vec![pending("no-print", "a.py", Some(10))],
            vec![posted(1, "a.py", Some(13), "Violates no-print: remove it")],
        );
        assert!(result[0].is_redetected());
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn each_posted_comment_is_consumed_once() {
        let result = reconcile(
            vec![pending("no-print", "a.py", Some(10))],
            vec![
                posted(1, "a.py", Some(10), "no-print here"),
                posted(2, "a.py", Some(10), "no-print again"),
            ],
        );
        assert_eq!(
            states(&result),
            ReconcileReport {
                new: 0,
                redetected: 1,
                posted_only: 1
            }
        );
        let ReconciledComment::Redetected { posted, .. } = &result[0] else {
            panic!("expected redetected");
        };
        assert_eq!(posted.id, Some(1));
        let ReconciledComment::PostedOnly { posted } = &result[1] else {
            panic!("expected posted only");
        };
        assert_eq!(posted.id, Some(2));
    }

    #[test]
    fn file_level_comments_never_fall_back() {
        let result = reconcile(
            vec![pending("no-print", "a.py", None)],
            vec![posted(1, "a.py", Some(3), "no-print")],
        );
        assert!(result[0].is_new());
        assert!(result[1].is_posted_only());

        let exact = reconcile(
            vec![pending("no-print", "a.py", None)],
            vec![posted(1, "a.py", None, "no-print")],
        );
        assert!(exact[0].is_redetected());
    }

    #[test]
    fn rule_name_must_appear_in_body() {
        let result = reconcile(
            vec![pending("no-print", "a.py", Some(10))],
            vec![posted(1, "a.py", Some(10), "unrelated reviewer remark")],
        );
        assert_eq!(
            states(&result),
            ReconcileReport {
                new: 1,
                redetected: 0,
                posted_only: 1
            }
        );
    }

    #[test]
    fn other_files_never_match() {
        let result = reconcile(
            vec![pending("no-print", "a.py", Some(10))],
            vec![posted(1, "b.py", Some(10), "no-print")],
        );
        assert!(result[0].is_new());
        assert!(result[1].is_posted_only());
    }

    #[test]
    fn fuzzy_match_cannot_steal_an_exact_match() {
        // The drifted comment is listed first, but the only posted comment
        // sits exactly on the second pending comment's line.
        let result = reconcile(
            vec![
                pending("no-print", "a.py", Some(5)),
                pending("no-print", "a.py", Some(20)),
            ],
            vec![posted(1, "a.py", Some(20), "no-print")],
        );
        assert!(result[0].is_new());
        assert!(result[1].is_redetected());
    }

    #[test]
    fn empty_inputs() {
        assert!(reconcile(vec![], vec![]).is_empty());
        let only_posted = reconcile(vec![], vec![posted(1, "a.py", Some(1), "x")]);
        assert!(only_posted[0].is_posted_only());
    }

    #[test]
    fn pending_comments_filter_by_score_and_render_body() {
        let summary = EvaluationSummary::from_outcomes(vec![
            RuleOutcome::Success(RuleResult {
                task_id: "no-print_a.py".into(),
                rule_name: "no-print".into(),
                file_path: "a.py".into(),
                violations: vec![
                    Violation {
                        score: 7,
                        comment: "Use logging.".into(),
                        file_path: "a.py".into(),
                        line_number: Some(10),
                    },
                    Violation {
                        score: 3,
                        comment: "minor".into(),
                        file_path: "a.py".into(),
                        line_number: Some(12),
                    },
                ],
                model_used: "m".into(),
                duration_ms: 1,
                cost_usd: None,
                documentation_link: Some("https://docs.example.com/no-print".into()),
            }),
            RuleOutcome::Error(EvaluationFailure {
                task_id: "x".into(),
                message: "boom".into(),
                rule_name: "x".into(),
                file_path: "a.py".into(),
            }),
        ]);

        let comments = pending_comments(&summary, 5);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].line_number, Some(10));
        assert_eq!(
            comments[0].body,
            "**no-print** (Score: 7)\n\nUse logging.\n\nRelated Documentation: [Docs](https://docs.example.com/no-print)"
        );
        assert_eq!(pending_comments(&summary, 1).len(), 2);
    }

    #[tokio::test]
    async fn json_comment_source_reads_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posted.json");
        tokio::fs::write(
            &path,
            r#"[{"id": 1, "path": "a.py", "line": 10, "body": "no-print"},
                {"file_path": "b.py", "body": "file-level"}]"#,
        )
        .await
        .unwrap();

        let comments = JsonCommentSource::new(&path).posted_comments().await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[1].line_number, None);

        tokio::fs::write(&path, "{}").await.unwrap();
        assert!(matches!(
            JsonCommentSource::new(&path).posted_comments().await,
            Err(ReconcileError::Parse { .. })
        ));
    }

    #[test]
    fn report_display() {
        let report = ReconcileReport {
            new: 2,
            redetected: 1,
            posted_only: 0,
        };
        assert_eq!(report.to_string(), "2 new, 1 redetected, 0 posted only");
    }
}
