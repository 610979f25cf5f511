//! Integration tests for the rules, reconcile, and cache CLI commands.
//!
//! These tests exercise the library functions that back each command,
//! using the public API from the prradar crate.

use prradar::aggregate::EvaluationSummary;
use prradar::cache::store::ResultStore;
use prradar::config::Config;
use prradar::env::Env;
use prradar::models::{FocusType, RuleOutcome, RuleResult, TaskSnapshot, Violation};
use prradar::output::OutputRenderer;
use prradar::output::json::JsonRenderer;
use prradar::reconcile::{self, CommentSource, JsonCommentSource, ReconcileReport};
use prradar::rules::{RuleError, RuleRepository};

// ---------------------------------------------------------------------------
// rules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rules_load_recursively_in_path_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("swift")).unwrap();
    std::fs::write(
        dir.path().join("swift/force-unwrap.md"),
        "---\ndescription: Avoid force unwraps\nfocus_type: method\napplies_to:\n  file_patterns: [\"*.swift\"]\n---\nDo not use `!`.",
    )
    .unwrap();
    std::fs::write(dir.path().join("api-docs.md"), "Document public APIs.").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a rule").unwrap();

    let rules = RuleRepository::load(dir.path()).await.unwrap();
    let names: Vec<_> = rules.rules().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["api-docs", "force-unwrap"]);

    let unwrap_rule = rules.get("force-unwrap").unwrap();
    assert_eq!(unwrap_rule.rule.focus_type, FocusType::Method);
    assert!(unwrap_rule.applies_to_file("Sources/App/View.swift"));
    assert!(!unwrap_rule.applies_to_file("main.py"));
}

#[tokio::test]
async fn rules_skip_bad_yaml_but_reject_bad_regex() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ok.md"), "---\ndescription: fine\n---\nBody.").unwrap();
    std::fs::write(dir.path().join("broken.md"), "---\ndescription: [unclosed\n---\nBody.").unwrap();

    let rules = RuleRepository::load(dir.path()).await.unwrap();
    assert_eq!(rules.len(), 1);

    std::fs::write(
        dir.path().join("bad-regex.md"),
        "---\ndescription: bad\ngrep:\n  any: [\"(unclosed\"]\n---\nBody.",
    )
    .unwrap();
    let err = RuleRepository::load(dir.path()).await.unwrap_err();
    assert!(matches!(err, RuleError::InvalidPattern { .. }));
}

#[tokio::test]
async fn rules_missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RuleRepository::load(&dir.path().join("nope")).await.unwrap_err();
    assert!(matches!(err, RuleError::NotFound(_)));

    let file = dir.path().join("file.md");
    std::fs::write(&file, "x").unwrap();
    let err = RuleRepository::load(&file).await.unwrap_err();
    assert!(matches!(err, RuleError::NotADirectory(_)));
}

// ---------------------------------------------------------------------------
// reconcile
// ---------------------------------------------------------------------------

fn stored_result(task_id: &str, rule: &str, file: &str, line: u32, score: u8) -> RuleOutcome {
    RuleOutcome::Success(RuleResult {
        task_id: task_id.into(),
        rule_name: rule.into(),
        file_path: file.into(),
        violations: vec![Violation {
            score,
            comment: format!("{rule} found"),
            file_path: file.into(),
            line_number: Some(line),
        }],
        model_used: "sonnet".into(),
        duration_ms: 5,
        cost_usd: Some(0.01),
        documentation_link: None,
    })
}

#[tokio::test]
async fn reconcile_stored_results_against_posted_comments() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(dir.path().join("evaluations/c1"));
    store.write_outcome(&stored_result("no-print_a.py", "no-print", "a.py", 10, 7)).await.unwrap();
    store.write_outcome(&stored_result("naming_b.py", "naming", "b.py", 4, 6)).await.unwrap();
    store.write_outcome(&stored_result("minor_a.py", "minor", "a.py", 1, 2)).await.unwrap();

    let posted_path = dir.path().join("posted.json");
    std::fs::write(
        &posted_path,
        r#"[
            {"id": 1, "path": "a.py", "line": 12, "body": "**no-print** (Score: 7)\n\nold text"},
            {"id": 2, "path": "c.py", "line": 3, "body": "**naming** (Score: 5)\n\nresolved"}
        ]"#,
    )
    .unwrap();

    let summary = EvaluationSummary::from_outcomes(store.load_all_outcomes().await.unwrap());
    let pending = reconcile::pending_comments(&summary, 5);
    assert_eq!(pending.len(), 2);

    let posted = JsonCommentSource::new(&posted_path).posted_comments().await.unwrap();
    let reconciled = reconcile::reconcile(pending, posted);

    assert_eq!(
        ReconcileReport::from_comments(&reconciled),
        ReconcileReport {
            new: 1,
            redetected: 1,
            posted_only: 1
        }
    );

    let output: serde_json::Value =
        serde_json::from_str(&JsonRenderer.render_reconciliation(&reconciled)).unwrap();
    assert_eq!(output["counts"]["redetected"], 1);
}

// ---------------------------------------------------------------------------
// cache
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cache_stats_count_each_artifact_kind() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(dir.path());

    let empty = store.stats().await.unwrap();
    assert_eq!(empty.entries(), 0);

    let outcome = stored_result("no-print_a.py", "no-print", "a.py", 10, 7);
    store.write_outcome(&outcome).await.unwrap();
    store.write_transcript("no-print_a.py", "{}", "# t").await.unwrap();
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.outcomes, 1);
    assert_eq!(stats.snapshots, 0);
    assert_eq!(stats.transcripts, 2);
    assert!(stats.total_bytes > 0);
}

#[tokio::test]
async fn cache_missing_snapshot_is_a_miss_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::new(dir.path());
    std::fs::write(store.snapshot_path("t1"), "{ not json").unwrap();
    let snapshot: Option<TaskSnapshot> = store.read_snapshot("t1").await;
    assert!(snapshot.is_none());
    assert!(store.read_outcome("t1").await.is_none());
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn config_layers_local_file_and_environment() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(".prradar.toml"),
        "[rules]\ndir = \"review-rules\"\n[review]\nmin_score = 7\n",
    )
    .unwrap();

    let env = Env::mock([("PRRADAR_MODEL", "opus")]);
    let config = Config::load(Some(dir.path()), &env).unwrap();
    assert_eq!(config.rules.dir, std::path::PathBuf::from("review-rules"));
    assert_eq!(config.review.min_score, 7);
    assert_eq!(config.evaluator.model, "opus");
}
