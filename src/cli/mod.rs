//! CLI command definitions and argument parsing.
//!
//! Uses clap derive macros for ergonomic argument definitions.

pub mod args;

/// One-line description shown in `--help`.
pub const ABOUT: &str = "Evaluate pull request changes against a directory of review rules";
