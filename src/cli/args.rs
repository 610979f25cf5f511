//! Clap argument types.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use prradar::models::ReconciledComment;
use prradar::output::OutputRenderer;
use prradar::pipeline::RunReport;

/// Rule-based pull request review.
#[derive(Parser, Debug)]
#[command(name = "prradar", version = prradar::constants::VERSION, about = super::ABOUT)]
pub struct Cli {
    /// Path to the repository (default: current directory).
    #[arg(long, global = true, default_value = ".")]
    pub path: PathBuf,

    /// Suppress progress and informational output.
    #[arg(long, short = 'q', global = true, default_value_t = false)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// List the rules in the rules directory.
    Rules(RulesArgs),

    /// Build evaluation tasks for a commit and persist their snapshots.
    Tasks(TasksArgs),

    /// Evaluate tasks, reusing cached results where content is unchanged.
    Evaluate(EvaluateArgs),

    /// Match violations against comments already posted on the review.
    Reconcile(ReconcileArgs),

    /// Inspect stored results.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Arguments for the `rules` subcommand.
#[derive(Parser, Debug)]
pub struct RulesArgs {
    /// Rules directory (overrides config).
    #[arg(long)]
    pub rules_dir: Option<PathBuf>,
}

/// Arguments for the `tasks` subcommand.
#[derive(Parser, Debug)]
pub struct TasksArgs {
    /// JSON file with the focus areas to review.
    #[arg(long)]
    pub focus_areas: PathBuf,

    /// Commit the focus areas belong to.
    #[arg(long)]
    pub commit: String,

    /// Rules directory (overrides config).
    #[arg(long)]
    pub rules_dir: Option<PathBuf>,
}

/// Arguments for the `evaluate` subcommand.
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// JSON file with the focus areas to review.
    #[arg(long)]
    pub focus_areas: PathBuf,

    /// Commit the focus areas belong to.
    #[arg(long)]
    pub commit: String,

    /// Re-evaluate only these task ids, bypassing the cache for them.
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Rules directory (overrides config).
    #[arg(long)]
    pub rules_dir: Option<PathBuf>,

    /// Output format.
    #[arg(long, default_value = "terminal")]
    pub format: OutputFormat,

    /// Disable result caching.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,
}

/// Arguments for the `reconcile` subcommand.
#[derive(Parser, Debug)]
pub struct ReconcileArgs {
    /// Commit whose stored results are reconciled.
    #[arg(long)]
    pub commit: String,

    /// JSON file with the comments already posted.
    #[arg(long)]
    pub posted: PathBuf,

    /// Minimum violation score (overrides config).
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub min_score: Option<u8>,

    /// Output format.
    #[arg(long, default_value = "terminal")]
    pub format: OutputFormat,
}

/// Cache subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum CacheAction {
    /// Show stored result counts and size for a commit.
    Stats {
        #[arg(long)]
        commit: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Terminal,
    Json,
}

impl OutputFormat {
    fn renderer(&self) -> &'static dyn OutputRenderer {
        match self {
            OutputFormat::Terminal => &prradar::output::terminal::TerminalRenderer,
            OutputFormat::Json => &prradar::output::json::JsonRenderer,
        }
    }

    pub fn render_run(&self, report: &RunReport) -> String {
        self.renderer().render_run(report)
    }

    pub fn render_reconciliation(&self, comments: &[ReconciledComment]) -> String {
        self.renderer().render_reconciliation(comments)
    }
}
