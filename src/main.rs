#![forbid(unsafe_code)]

//! `acp-adapter`: runs one agent task inside a container.
//!
//! Reads a single `task-request`, provisions the workspace, supervises the
//! agent CLI and reports progress and the outcome as NDJSON on stdout.
//! Diagnostics go to stderr through `tracing`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use acp_adapter::acp::reader::InputSource;
use acp_adapter::acp::writer::EventSink;
use acp_adapter::controller::{spawn_signal_listener, Adapter, Outcome, TerminationSignals};
use acp_adapter::{AdapterConfig, AppError, HostEnv, Result};

/// Time allowed for background tasks (such as a blocked stdin read) to
/// wind down once the run is over.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-adapter", about = "Agent task adapter", version, long_about = None)]
struct Cli {
    /// Read the task request from this file instead of stdin.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the workspace root.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let input = args.input.map_or(InputSource::Stdin, InputSource::File);
    let outcome = runtime.block_on(run(config, &input));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    info!(?outcome, "acp-adapter exiting");
    ExitCode::from(outcome.exit_code())
}

async fn run(config: AdapterConfig, input: &InputSource) -> Outcome {
    let signals = TerminationSignals::install();
    let host = HostEnv::from_process();
    info!(
        swarm_id = %host.identity.swarm_id,
        container_id = %host.identity.container_id,
        workspace = %config.workspace_root.display(),
        agent_cli = %config.agent_cli,
        "acp-adapter starting"
    );

    let sink = Arc::new(EventSink::stdout(host.identity.clone()));
    let adapter = Arc::new(Adapter::new(config, host, sink));
    let listener = spawn_signal_listener(Arc::clone(&adapter), signals);

    let outcome = adapter.run(input).await;
    listener.abort();
    outcome
}

fn load_config(args: &Cli) -> Result<AdapterConfig> {
    let mut config = match &args.config {
        Some(path) => AdapterConfig::load_from_path(path)?,
        None => AdapterConfig::default(),
    };

    if let Some(ws) = &args.workspace {
        config.workspace_root.clone_from(ws);
    }
    info!(workspace = %config.workspace_root.display(), "configuration loaded");
    Ok(config)
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
