//! Output renderers: terminal and JSON.

pub mod json;
pub mod terminal;

use crate::models::ReconciledComment;
use crate::pipeline::RunReport;

/// Trait for rendering run and reconciliation results to an output format.
pub trait OutputRenderer {
    /// Render the outcome of an evaluation run.
    fn render_run(&self, report: &RunReport) -> String;

    /// Render reconciled review comments.
    fn render_reconciliation(&self, comments: &[ReconciledComment]) -> String;
}
