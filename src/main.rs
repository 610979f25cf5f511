//! prradar: rule-based pull request review CLI.
//!
//! Entry point and error handling boundary. Uses `anyhow` for
//! ergonomic error propagation and user-facing messages.

mod cli;

use prradar::config::Config;
use prradar::constants;
use prradar::env::Env;
use prradar::evaluator::RuleDispatchEvaluator;
use prradar::evaluator::command::CommandEvaluator;
use prradar::git::{self, GitBlobSource};
use prradar::models::FocusArea;
use prradar::pipeline::{self, ReviewPipeline};
use prradar::progress::ProgressTracker;
use prradar::reconcile::{self, CommentSource, JsonCommentSource};
use prradar::rules::RuleRepository;

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::args::{CacheAction, Cli, Command, EvaluateArgs, ReconcileArgs, TasksArgs};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

/// Log to stderr, filtered by `PRRADAR_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env(constants::ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolved invocation context shared by all commands.
struct Invocation {
    repo_root: PathBuf,
    config: Config,
    quiet: bool,
}

impl Invocation {
    fn rules_dir(&self, overridden: Option<&Path>) -> PathBuf {
        Config::resolve(&self.repo_root, overridden.unwrap_or(self.config.rules.dir.as_path()))
    }

    fn output_root(&self) -> PathBuf {
        Config::resolve(&self.repo_root, &self.config.output.dir)
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let repo_root = match git::find_repo_root(&cli.path).await {
        Ok(root) => root,
        Err(e) => {
            tracing::debug!("not using a git root: {e}");
            cli.path.clone()
        }
    };
    let config = Config::load(Some(&repo_root), &Env::real()).context("failed to load configuration")?;
    tracing::debug!(?config, repo_root = %repo_root.display(), "configuration loaded");

    let ctx = Invocation {
        repo_root,
        config,
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Rules(args) => run_rules(&ctx, args.rules_dir.as_deref()).await,
        Command::Tasks(args) => run_tasks(&ctx, args).await,
        Command::Evaluate(args) => run_evaluate(&ctx, args).await,
        Command::Reconcile(args) => run_reconcile(&ctx, args).await,
        Command::Cache { action } => run_cache(&ctx, action).await,
    }
}

async fn load_rules(ctx: &Invocation, rules_dir: Option<&Path>) -> Result<RuleRepository> {
    let dir = ctx.rules_dir(rules_dir);
    let mut rules = RuleRepository::load(&dir)
        .await
        .with_context(|| format!("failed to load rules from {}", dir.display()))?;
    rules.enrich_urls().await;
    Ok(rules)
}

async fn load_focus_areas(path: &Path) -> Result<Vec<FocusArea>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse focus areas in {}", path.display()))
}

fn build_pipeline(ctx: &Invocation, rules: RuleRepository) -> ReviewPipeline {
    let evaluator_config = &ctx.config.evaluator;
    let mut agent = CommandEvaluator::new(&evaluator_config.command, evaluator_config.args.clone());
    if let Some(key) = &evaluator_config.api_key {
        agent = agent.with_api_key(&evaluator_config.api_key_env, key);
    }

    ReviewPipeline::new(
        Arc::new(rules),
        Arc::new(GitBlobSource::new(&ctx.repo_root)),
        Arc::new(RuleDispatchEvaluator::new(agent)),
        ctx.output_root(),
        ctx.repo_root.clone(),
        evaluator_config.model.clone(),
    )
    .with_cache(ctx.config.review.cache)
}

/// List the rules in the rules directory.
async fn run_rules(ctx: &Invocation, rules_dir: Option<&Path>) -> Result<()> {
    use colored::Colorize;

    let rules = load_rules(ctx, rules_dir).await?;
    if rules.is_empty() {
        println!("No rules found.");
        return Ok(());
    }

    for rule in rules.rules() {
        println!("  {}  {}", rule.name.bold(), rule.description.dimmed());
        println!("         {}  {}", "focus:".cyan(), rule.focus_type);
        if !rule.applies_to.file_patterns.is_empty() {
            println!("         {}  {}", "files:".cyan(), rule.applies_to.file_patterns.join(", "));
        }
        if rule.is_regex_rule() {
            println!("         {}  regex", "evaluator:".cyan());
        } else if let Some(model) = &rule.model {
            println!("         {}  {}", "model:".cyan(), model);
        }
        if let Some(url) = &rule.rule_url {
            println!("         {}  {}", "source:".cyan(), url.dimmed());
        }
    }
    Ok(())
}

/// Build tasks for a commit and persist their snapshots.
async fn run_tasks(ctx: &Invocation, args: TasksArgs) -> Result<()> {
    let rules = load_rules(ctx, args.rules_dir.as_deref()).await?;
    let focus_areas = load_focus_areas(&args.focus_areas).await?;
    let pipeline = build_pipeline(ctx, rules);

    let tasks = pipeline
        .prepare(&args.commit, &focus_areas)
        .await
        .context("failed to build tasks")?;
    for task in &tasks {
        println!("{}", task.task_id);
    }
    if !ctx.quiet {
        eprintln!("{} task(s) written to {}", tasks.len(), pipeline.task_store(&args.commit)?.dir().display());
    }
    Ok(())
}

/// Evaluate (or selectively re-evaluate) tasks for a commit.
async fn run_evaluate(ctx: &Invocation, args: EvaluateArgs) -> Result<()> {
    let rules = load_rules(ctx, args.rules_dir.as_deref()).await?;
    let focus_areas = load_focus_areas(&args.focus_areas).await?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current task…");
            signal_token.cancel();
        }
    });

    let pipeline = build_pipeline(ctx, rules)
        .with_cache(ctx.config.review.cache && !args.no_cache)
        .with_cancellation(cancel);
    let progress = ProgressTracker::new(!ctx.quiet);

    let result = if args.only.is_empty() {
        pipeline.run(&args.commit, &focus_areas, &progress).await
    } else {
        pipeline.rerun(&args.commit, &focus_areas, &args.only, &progress).await
    };
    progress.finish();
    let report = result.context("evaluation failed")?;

    print!("{}", args.format.render_run(&report));
    if report.cancelled {
        bail!("cancelled: {report}");
    }
    Ok(())
}

/// Reconcile stored violations against posted comments.
async fn run_reconcile(ctx: &Invocation, args: ReconcileArgs) -> Result<()> {
    let store = pipeline::result_store(&ctx.output_root(), &args.commit)?;
    if !store.dir().is_dir() {
        bail!("no stored results for commit {} in {}", args.commit, store.dir().display());
    }
    let outcomes = store.load_all_outcomes().await.context("failed to load stored results")?;
    let summary = prradar::aggregate::EvaluationSummary::from_outcomes(outcomes);

    let min_score = args.min_score.unwrap_or(ctx.config.review.min_score);
    let pending = reconcile::pending_comments(&summary, min_score);
    let posted = JsonCommentSource::new(&args.posted)
        .posted_comments()
        .await
        .context("failed to load posted comments")?;

    let reconciled = reconcile::reconcile(pending, posted);
    print!("{}", args.format.render_reconciliation(&reconciled));
    Ok(())
}

/// Inspect stored results.
async fn run_cache(ctx: &Invocation, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::Stats { commit } => {
            let store = pipeline::result_store(&ctx.output_root(), &commit)?;
            let stats = store.stats().await.context("failed to read cache stats")?;
            println!("Directory:   {}", store.dir().display());
            println!("Results:     {}", stats.outcomes);
            println!("Snapshots:   {}", stats.snapshots);
            println!("Transcripts: {}", stats.transcripts);
            println!("Size:        {}", stats.human_size());
        }
    }
    Ok(())
}
