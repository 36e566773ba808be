//! Adapter configuration: optional TOML overrides plus the process
//! environment the host provides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::acp::envelope::Identity;
use crate::{AppError, Result};

/// Environment variable holding the agent API credential (required).
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Environment variable carrying the swarm identifier.
pub const SWARM_ID_VAR: &str = "SWARM_ID";

/// Environment variable carrying the container identifier.
pub const CONTAINER_ID_VAR: &str = "CONTAINER_ID";

/// Source-control token variables, in lookup order.
pub const GIT_TOKEN_VARS: &[&str] = &["GH_TOKEN", "GITHUB_TOKEN"];

fn default_workspace_root() -> PathBuf {
    PathBuf::from("/workspace")
}

fn default_agent_cli() -> String {
    "claude".into()
}

fn default_agent_cli_args() -> Vec<String> {
    vec!["--dangerously-skip-permissions".into(), "-p".into()]
}

fn default_story_id() -> String {
    "US-000".into()
}

fn default_progress_interval_ms() -> u64 {
    2000
}

fn default_terminate_grace_seconds() -> u64 {
    5
}

fn default_kill_grace_seconds() -> u64 {
    3
}

fn default_tail_lines() -> usize {
    20
}

/// Adapter settings, parsed from an optional `config.toml`.
///
/// Every field has a default, so an absent file and an empty file are
/// equivalent.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AdapterConfig {
    /// Directory the repository is cloned into and the agent runs in.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Agent CLI executable.
    #[serde(default = "default_agent_cli")]
    pub agent_cli: String,
    /// Fixed arguments placed before the prompt.
    #[serde(default = "default_agent_cli_args")]
    pub agent_cli_args: Vec<String>,
    /// Story identifier stamped on progress events.
    #[serde(default = "default_story_id")]
    pub story_id: String,
    /// Minimum gap between streamed progress events.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Wait after SIGTERM before escalating to SIGKILL.
    #[serde(default = "default_terminate_grace_seconds")]
    pub terminate_grace_seconds: u64,
    /// Wait after SIGKILL before giving up.
    #[serde(default = "default_kill_grace_seconds")]
    pub kill_grace_seconds: u64,
    /// Number of trailing output lines kept for diagnostics.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            agent_cli: default_agent_cli(),
            agent_cli_args: default_agent_cli_args(),
            story_id: default_story_id(),
            progress_interval_ms: default_progress_interval_ms(),
            terminate_grace_seconds: default_terminate_grace_seconds(),
            kill_grace_seconds: default_kill_grace_seconds(),
            tail_lines: default_tail_lines(),
        }
    }
}

impl AdapterConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Throttle interval for streamed progress.
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Grace period after the polite termination request.
    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_seconds)
    }

    /// Grace period after the forceful kill.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_seconds)
    }

    /// Check field invariants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.agent_cli.trim().is_empty() {
            return Err(AppError::Config("agent_cli must not be empty".into()));
        }
        if self.tail_lines == 0 {
            return Err(AppError::Config(
                "tail_lines must be greater than zero".into(),
            ));
        }
        if self.progress_interval_ms == 0 {
            return Err(AppError::Config(
                "progress_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Values the adapter reads from its own environment at startup.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct HostEnv {
    /// Agent API credential; `None` when unset or empty.
    pub api_key: Option<String>,
    /// Envelope identifiers.
    pub identity: Identity,
}

impl std::fmt::Debug for HostEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEnv")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("identity", &self.identity)
            .finish()
    }
}

impl HostEnv {
    /// Snapshot the relevant variables from the process environment.
    #[must_use]
    pub fn from_process() -> Self {
        let defaults = Identity::default();
        let swarm_id = non_empty_var(SWARM_ID_VAR).unwrap_or(defaults.swarm_id);
        if uuid::Uuid::parse_str(&swarm_id).is_err() {
            warn!(swarm_id, "SWARM_ID is not a UUID, passing it through unchanged");
        }
        Self {
            api_key: non_empty_var(API_KEY_VAR),
            identity: Identity {
                swarm_id,
                container_id: non_empty_var(CONTAINER_ID_VAR).unwrap_or(defaults.container_id),
            },
        }
    }

    /// Names of required variables that are missing.
    #[must_use]
    pub fn missing_required(&self) -> Vec<&'static str> {
        if self.api_key.is_some() {
            Vec::new()
        } else {
            vec![API_KEY_VAR]
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}
