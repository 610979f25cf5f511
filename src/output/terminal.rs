//! Terminal renderer: styled flowing text grouped by file.

use colored::Colorize;

use crate::models::{ReconciledComment, RuleOutcome, Violation};
use crate::output::OutputRenderer;
use crate::pipeline::RunReport;
use crate::reconcile::ReconcileReport;

/// Terminal output renderer with colored, flowing text.
pub struct TerminalRenderer;

impl TerminalRenderer {
    fn location(file: &str, line: Option<u32>) -> String {
        match line {
            Some(line) => format!("{file}:{line}"),
            None => file.to_string(),
        }
    }

    fn score_badge(score: u8) -> String {
        let badge = format!("[{score}/10]");
        match score {
            8.. => badge.red().bold().to_string(),
            5..=7 => badge.yellow().bold().to_string(),
            _ => badge.blue().to_string(),
        }
    }
}

impl OutputRenderer for TerminalRenderer {
    fn render_run(&self, report: &RunReport) -> String {
        let mut output = String::new();

        let mut violations: Vec<(&str, &Violation)> = report
            .summary
            .outcomes
            .iter()
            .flat_map(|o| o.violations().iter().map(move |v| (o.rule_name(), v)))
            .collect();
        violations.sort_by(|a, b| {
            a.1.file_path
                .cmp(&b.1.file_path)
                .then(a.1.line_number.cmp(&b.1.line_number))
        });

        let mut current_file = "";
        for (rule, violation) in &violations {
            if violation.file_path != current_file {
                if !current_file.is_empty() {
                    output.push('\n');
                }
                current_file = &violation.file_path;
            }
            output.push_str(&format!(
                " {} {} in {}\n",
                Self::score_badge(violation.score),
                rule.bold(),
                Self::location(&violation.file_path, violation.line_number).bold()
            ));
            output.push_str(&format!("   {}\n\n", violation.comment));
        }

        let failures: Vec<_> = report
            .summary
            .outcomes
            .iter()
            .filter_map(|o| match o {
                RuleOutcome::Error(failure) => Some(failure),
                RuleOutcome::Success(_) => None,
            })
            .collect();
        for failure in &failures {
            output.push_str(&format!(
                " {} {} on {}: {}\n",
                "✖".red().bold(),
                failure.rule_name.bold(),
                failure.file_path,
                failure.message.red()
            ));
        }
        if !failures.is_empty() {
            output.push('\n');
        }

        if violations.is_empty() && failures.is_empty() {
            output.push_str(&format!("{}", "  ✔ No violations found.\n".green()));
        }

        output.push_str(&format!("{}\n", "───────────────────────────────────".dimmed()));
        output.push_str(&format!(
            " {} · {} {}, {} {}, ${:.4}\n",
            report.to_string().bold(),
            report.summary.violations_found.to_string().yellow().bold(),
            if report.summary.violations_found == 1 { "violation" } else { "violations" },
            report.summary.errors.to_string().red().bold(),
            if report.summary.errors == 1 { "error" } else { "errors" },
            report.summary.total_cost_usd,
        ));
        if !report.migrated.is_empty() {
            output.push_str(&format!(
                " {}\n",
                format!("{} result(s) reused from earlier commits", report.migrated.len()).dimmed()
            ));
        }
        if report.cancelled {
            output.push_str(&format!(" {}\n", "Cancelled before all tasks ran.".yellow()));
        }
        output
    }

    fn render_reconciliation(&self, comments: &[ReconciledComment]) -> String {
        let mut output = String::new();
        for comment in comments {
            let (tag, detail) = match comment {
                ReconciledComment::New { pending } => ("new".green().bold().to_string(), pending.rule_name.as_str()),
                ReconciledComment::Redetected { pending, .. } => {
                    ("redetected".cyan().bold().to_string(), pending.rule_name.as_str())
                }
                ReconciledComment::PostedOnly { posted } => (
                    "posted-only".dimmed().to_string(),
                    posted.body.lines().next().unwrap_or_default(),
                ),
            };
            output.push_str(&format!(
                " {tag} {} {detail}\n",
                Self::location(comment.file_path(), comment.line_number()).bold()
            ));
        }
        output.push_str(&format!("{}\n", "───────────────────────────────────".dimmed()));
        output.push_str(&format!(" {}\n", ReconcileReport::from_comments(comments)));
        output
    }
}
