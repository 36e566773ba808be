//! Task request model and the child-process environment overlay.

use std::collections::BTreeMap;
use std::ffi::OsStr;

use serde::{Deserialize, Serialize};

/// The single instruction the host sends to the adapter.
///
/// Only constructed by [`crate::validator::accept`] after every field has
/// passed validation; immutable from then on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// Task file path relative to the workspace root; ends with `.json`.
    pub task_file_path: String,
    /// Branch the agent works on.
    pub branch_name: String,
    /// Repository to clone (`https://` or `git@`).
    pub repo_url: String,
    /// Extra environment for every child process started after acceptance.
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

/// Environment overlay applied to every child process the adapter starts.
///
/// Lookups consult the overlay first and then the inherited process
/// environment, so a variable supplied in the request shadows the
/// container's value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildEnv {
    vars: BTreeMap<String, String>,
}

impl ChildEnv {
    /// Build an overlay from validated request variables.
    #[must_use]
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Look up `key` in the overlay, falling back to the process environment.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|value| !value.is_empty())
    }

    /// Names of the overlaid variables, in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Whether the overlay carries no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Apply the overlay to a command about to be spawned.
    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        cmd.envs(
            self.vars
                .iter()
                .map(|(k, v)| (OsStr::new(k.as_str()), OsStr::new(v.as_str()))),
        );
    }
}
