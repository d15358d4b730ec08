//! Process environment access
//!
//! Everything that consults ambient variables (engine endpoint, plugin mode,
//! storage override) goes through [`Environment`] so callers can substitute a
//! fixed map.

use std::collections::HashMap;

/// Read-only view of environment variables
pub trait Environment: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed set of variables, used when the process environment must not leak in
#[derive(Debug, Clone, Default)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl Environment for MapEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// Look up `key`, treating an empty value the same as an unset one
pub fn non_empty_var(env: &dyn Environment, key: &str) -> Option<String> {
    env.var(key).filter(|value| !value.is_empty())
}
