//! prradar: rule-based pull request review (library crate).
//!
//! Re-exports public modules for integration tests and external use.

pub mod aggregate;
pub mod batch;
pub mod cache;
pub mod config;
pub mod constants;
pub mod env;
pub mod evaluator;
pub mod git;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod rules;
pub mod tasks;
