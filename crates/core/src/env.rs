//! Process environment access
//!
//! Credential resolution reads environment variables through [`Env`] so that
//! tests can supply a fixed snapshot instead of the real process environment.

use std::collections::HashMap;
use std::sync::Arc;

/// Read-only view of environment variables
#[derive(Debug, Clone, Default)]
pub struct Env(Inner);

#[derive(Debug, Clone, Default)]
enum Inner {
    #[default]
    Real,
    Fake(Arc<HashMap<String, String>>),
}

impl Env {
    /// The real process environment
    pub fn real() -> Self {
        Self(Inner::Real)
    }

    /// A fixed set of variables; nothing else is visible
    pub fn from_slice(vars: &[(&str, &str)]) -> Self {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self(Inner::Fake(Arc::new(map)))
    }

    /// Look up a variable. Unset and empty values are both `None`.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match &self.0 {
            Inner::Real => std::env::var(key).ok(),
            Inner::Fake(map) => map.get(key).cloned(),
        };
        value.filter(|v| !v.is_empty())
    }

    /// First non-empty value among `keys`, in order
    pub fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.get(k))
    }
}
