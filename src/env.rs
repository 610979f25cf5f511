//! Environment lookups for the configuration layer.
//!
//! [`Env::real()`] reads the process environment. [`Env::mock()`] serves a
//! fixed table, so config layering is testable without mutating process
//! state. Values that are empty or whitespace count as unset.

use std::collections::HashMap;

#[derive(Clone, Debug)]
enum Source {
    Process,
    Fixed(HashMap<String, String>),
}

/// Where configuration overrides are read from.
#[derive(Clone, Debug)]
pub struct Env {
    source: Source,
}

impl Env {
    pub fn real() -> Self {
        Self {
            source: Source::Process,
        }
    }

    pub fn mock(vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        let table = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self {
            source: Source::Fixed(table),
        }
    }

    /// The value of `name`, if set and non-empty.
    pub fn get(&self, name: &str) -> Option<String> {
        let value = match &self.source {
            Source::Process => std::env::var(name).ok(),
            Source::Fixed(table) => table.get(name).cloned(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// The first of `names` that is set.
    pub fn first_of(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.get(name))
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::real()
    }
}
