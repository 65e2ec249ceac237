//! Access to process environment variables.
//!
//! Sessions read proxies, CA bundles and netrc locations from the environment
//! when `trust_env` is set. The lookups go through [`Environment`] so tests can
//! supply a fixed set of variables instead of touching the process state.

use std::collections::BTreeMap;
use std::sync::Arc;

pub type EnvironmentHandle = Arc<dyn Environment>;

pub trait Environment: Send + Sync {
    /// Returns the value of a single variable, if set and valid unicode.
    fn var(&self, key: &str) -> Option<String>;

    /// Returns every variable as `(name, value)` pairs.
    fn vars(&self) -> Vec<(String, String)>;
}

/// Reads from the real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }
}

/// Fixed set of variables.
#[derive(Debug, Default, Clone)]
pub struct StaticEnvironment {
    vars: BTreeMap<String, String>,
}

impl StaticEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl Environment for StaticEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn vars(&self) -> Vec<(String, String)> {
        self.vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
