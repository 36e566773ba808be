//! Unit tests for adapter configuration and the host environment snapshot.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;

use acp_adapter::config::{AdapterConfig, HostEnv, API_KEY_VAR, CONTAINER_ID_VAR, SWARM_ID_VAR};
use acp_adapter::AppError;

// ── AdapterConfig ───────────────────────────────────────────────────────────

#[test]
fn empty_toml_yields_defaults() {
    let config = AdapterConfig::from_toml_str("").expect("empty config is valid");
    assert_eq!(config, AdapterConfig::default());
    assert_eq!(config.workspace_root, PathBuf::from("/workspace"));
    assert_eq!(config.agent_cli, "claude");
    assert_eq!(
        config.agent_cli_args,
        vec!["--dangerously-skip-permissions", "-p"]
    );
    assert_eq!(config.story_id, "US-000");
    assert_eq!(config.progress_interval(), Duration::from_secs(2));
    assert_eq!(config.terminate_grace(), Duration::from_secs(5));
    assert_eq!(config.kill_grace(), Duration::from_secs(3));
    assert_eq!(config.tail_lines, 20);
}

#[test]
fn overrides_are_applied() {
    let toml = r#"
workspace_root = "/srv/work"
agent_cli = "/usr/local/bin/agent"
agent_cli_args = ["--yes"]
story_id = "US-042"
progress_interval_ms = 500
terminate_grace_seconds = 10
kill_grace_seconds = 1
tail_lines = 50
"#;
    let config = AdapterConfig::from_toml_str(toml).expect("valid config");
    assert_eq!(config.workspace_root, PathBuf::from("/srv/work"));
    assert_eq!(config.agent_cli, "/usr/local/bin/agent");
    assert_eq!(config.agent_cli_args, vec!["--yes"]);
    assert_eq!(config.story_id, "US-042");
    assert_eq!(config.progress_interval(), Duration::from_millis(500));
    assert_eq!(config.terminate_grace(), Duration::from_secs(10));
    assert_eq!(config.kill_grace(), Duration::from_secs(1));
    assert_eq!(config.tail_lines, 50);
}

#[test]
fn invalid_toml_is_a_config_error() {
    let err = AdapterConfig::from_toml_str("tail_lines = \"many\"").expect_err("bad type");
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}

#[test]
fn empty_agent_cli_is_rejected() {
    let err = AdapterConfig::from_toml_str("agent_cli = \"  \"").expect_err("rejected");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("agent_cli")));
}

#[test]
fn zero_tail_lines_is_rejected() {
    assert!(AdapterConfig::from_toml_str("tail_lines = 0").is_err());
}

#[test]
fn zero_progress_interval_is_rejected() {
    assert!(AdapterConfig::from_toml_str("progress_interval_ms = 0").is_err());
}

#[test]
fn config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "story_id = \"US-007\"").expect("write");
    let config = AdapterConfig::load_from_path(file.path()).expect("loads");
    assert_eq!(config.story_id, "US-007");
}

#[test]
fn missing_config_file_is_a_config_error() {
    let err = AdapterConfig::load_from_path("/no/such/config.toml").expect_err("missing");
    assert!(matches!(err, AppError::Config(_)));
}

// ── HostEnv ─────────────────────────────────────────────────────────────────

struct EnvGuard(Vec<(&'static str, Option<String>)>);

impl EnvGuard {
    fn set(vars: &[(&'static str, Option<&str>)]) -> Self {
        let saved = vars
            .iter()
            .map(|(key, _)| (*key, std::env::var(key).ok()))
            .collect();
        for (key, value) in vars {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
        Self(saved)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.0 {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

#[test]
#[serial]
fn host_env_reads_identity_and_key() {
    let _guard = EnvGuard::set(&[
        (API_KEY_VAR, Some("sk-test")),
        (SWARM_ID_VAR, Some("6f1c2a34-9b1e-4c55-8d2e-0a7b3c9d1e2f")),
        (CONTAINER_ID_VAR, Some("c-9")),
    ]);

    let host = HostEnv::from_process();
    assert_eq!(host.api_key.as_deref(), Some("sk-test"));
    assert_eq!(host.identity.swarm_id, "6f1c2a34-9b1e-4c55-8d2e-0a7b3c9d1e2f");
    assert_eq!(host.identity.container_id, "c-9");
    assert!(host.missing_required().is_empty());
}

#[test]
#[serial]
fn missing_identity_falls_back_to_defaults() {
    let _guard = EnvGuard::set(&[
        (API_KEY_VAR, None),
        (SWARM_ID_VAR, None),
        (CONTAINER_ID_VAR, Some("")),
    ]);

    let host = HostEnv::from_process();
    assert_eq!(host.identity.swarm_id, "00000000-0000-0000-0000-000000000000");
    assert_eq!(host.identity.container_id, "unknown");
    assert_eq!(host.missing_required(), vec![API_KEY_VAR]);
}

#[test]
#[serial]
fn empty_api_key_counts_as_missing() {
    let _guard = EnvGuard::set(&[(API_KEY_VAR, Some(""))]);
    assert_eq!(HostEnv::from_process().missing_required(), vec![API_KEY_VAR]);
}

#[test]
fn debug_output_redacts_the_api_key() {
    let host = HostEnv {
        api_key: Some("sk-very-secret".into()),
        ..HostEnv::default()
    };
    let rendered = format!("{host:?}");
    assert!(!rendered.contains("sk-very-secret"));
    assert!(rendered.contains("redacted"));
}
