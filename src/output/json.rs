//! JSON output renderer.
//!
//! Runs render as `{"report": "...", "summary": {...}, ...}`; reconciliation
//! renders as `{"comments": [...], "counts": {...}}`.

use crate::models::ReconciledComment;
use crate::output::OutputRenderer;
use crate::pipeline::RunReport;
use crate::reconcile::ReconcileReport;

/// JSON output renderer.
pub struct JsonRenderer;

impl OutputRenderer for JsonRenderer {
    fn render_run(&self, report: &RunReport) -> String {
        let output = serde_json::json!({
            "commit": report.commit,
            "report": report.to_string(),
            "new": report.fresh,
            "cached": report.cached,
            "migrated": report.migrated,
            "cancelled": report.cancelled,
            "summary": report.summary,
        });
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
    }

    fn render_reconciliation(&self, comments: &[ReconciledComment]) -> String {
        let output = serde_json::json!({
            "comments": comments,
            "counts": ReconcileReport::from_comments(comments),
        });
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::EvaluationSummary;
    use crate::models::{PendingComment, PostedComment};

    #[test]
    fn render_run_json() {
        let report = RunReport {
            commit: "c1".into(),
            summary: EvaluationSummary::from_outcomes(vec![]),
            fresh: 0,
            cached: 0,
            migrated: vec!["t1".into()],
            cancelled: false,
        };
        let parsed: serde_json::Value = serde_json::from_str(&JsonRenderer.render_run(&report)).unwrap();
        assert_eq!(parsed["report"], "0 new, 0 cached, 0 total");
        assert_eq!(parsed["summary"]["total_tasks"], 0);
        assert_eq!(parsed["migrated"][0], "t1");
    }

    #[test]
    fn render_reconciliation_json() {
        let comments = vec![
            ReconciledComment::New {
                pending: PendingComment {
                    rule_name: "no-print".into(),
                    file_path: "a.py".into(),
                    line_number: Some(3),
                    body: "**no-print** (Score: 6)\n\nx".into(),
                    score: 6,
                },
            },
            ReconciledComment::PostedOnly {
                posted: PostedComment {
                    id: Some(9),
                    file_path: "b.py".into(),
                    line_number: None,
                    body: "old".into(),
                },
            },
        ];
        let parsed: serde_json::Value =
            serde_json::from_str(&JsonRenderer.render_reconciliation(&comments)).unwrap();
        assert_eq!(parsed["comments"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["comments"][0]["state"], "new");
        assert_eq!(parsed["counts"]["posted_only"], 1);
    }
}
