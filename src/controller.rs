//! Adapter controller.
//!
//! Drives one run through `AwaitingRequest → Validating → Provisioning →
//! Running → Completed`, and owns the two pieces of state shared with the
//! interrupt path: the [`ProcessSlot`] and the cancellation flag.
//!
//! The interrupt path ([`Adapter::interrupt`]) may fire at any time. It
//! terminates the live agent (if any), emits the `stopped` completion
//! itself, and then releases [`Adapter::run`]. The normal path checks the
//! flag before committing to its own completion, and the [`EventSink`]
//! latch backs that up, so at most one terminal envelope is ever written.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acp::envelope::{truncate_chars, CompletionStatus, ErrorCode};
use crate::acp::reader::{decode_message, InputSource};
use crate::acp::writer::EventSink;
use crate::config::{AdapterConfig, HostEnv};
use crate::models::state::AdapterState;
use crate::models::task::{ChildEnv, TaskRequest};
use crate::supervisor::process_slot::ProcessSlot;
use crate::supervisor::prompt::build_prompt;
use crate::supervisor::{AgentCommand, AgentRun, Supervisor, PROGRESS_STATUS};
use crate::validator;
use crate::workspace::git::{GitCli, GitOps};
use crate::workspace::Provisioner;

/// Process exit status for an interrupted run (128 + SIGINT).
pub const INTERRUPTED_EXIT_CODE: u8 = 130;

/// Characters of tail output quoted in a failed completion.
const TAIL_EXCERPT_CHARS: usize = 450;

/// Builds the git backend for a workspace once the request env is known.
pub type GitFactory = Arc<dyn Fn(&Path, ChildEnv) -> Box<dyn GitOps> + Send + Sync>;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Agent exited 0.
    Completed,
    /// Agent exited non-zero or could not be launched.
    Failed,
    /// Environment, input, validation or provisioning failure.
    Rejected,
    /// A termination signal ended the run.
    Interrupted,
}

impl Outcome {
    /// Process exit status for this outcome.
    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Failed | Self::Rejected => 1,
            Self::Interrupted => INTERRUPTED_EXIT_CODE,
        }
    }
}

/// The adapter: one task request, one agent run, one terminal envelope.
pub struct Adapter {
    config: AdapterConfig,
    host: HostEnv,
    sink: Arc<EventSink>,
    slot: Arc<ProcessSlot>,
    interrupted: AtomicBool,
    stopped: CancellationToken,
    state: Mutex<AdapterState>,
    reported: Mutex<Option<Outcome>>,
    git_factory: GitFactory,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("config", &self.config)
            .field("host", &self.host)
            .field("interrupted", &self.is_interrupted())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Adapter {
    /// Build an adapter that runs real `git` and writes envelopes to `sink`.
    #[must_use]
    pub fn new(config: AdapterConfig, host: HostEnv, sink: Arc<EventSink>) -> Self {
        Self {
            config,
            host,
            sink,
            slot: Arc::new(ProcessSlot::new()),
            interrupted: AtomicBool::new(false),
            stopped: CancellationToken::new(),
            state: Mutex::new(AdapterState::AwaitingRequest),
            reported: Mutex::new(None),
            git_factory: Arc::new(|workdir: &Path, env: ChildEnv| {
                Box::new(GitCli::new(workdir, env)) as Box<dyn GitOps>
            }),
        }
    }

    /// Replace the git backend.
    #[must_use]
    pub fn with_git_factory(mut self, factory: GitFactory) -> Self {
        self.git_factory = factory;
        self
    }

    /// Whether the termination signal has been observed.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AdapterState {
        self.state
            .lock()
            .map_or(AdapterState::Completed, |state| *state)
    }

    /// Shared handle to the agent process slot.
    #[must_use]
    pub fn process_slot(&self) -> Arc<ProcessSlot> {
        Arc::clone(&self.slot)
    }

    /// Outcome whose terminal envelope reached the host, if any has.
    #[must_use]
    pub fn reported(&self) -> Option<Outcome> {
        self.reported.lock().ok().and_then(|reported| *reported)
    }

    /// Process one request from `input` to a terminal envelope.
    ///
    /// The returned outcome always agrees with the terminal envelope the
    /// host received: a signal that lands after a `completed` or `error`
    /// envelope was written does not turn the run into an interruption.
    pub async fn run(&self, input: &InputSource) -> Outcome {
        let outcome = tokio::select! {
            biased;
            () = self.stopped.cancelled() => Outcome::Interrupted,
            outcome = self.drive(input) => outcome,
        };

        if self.is_interrupted() {
            // Wait for the interrupt path to write (or lose) its envelope.
            self.stopped.cancelled().await;
            return self.reported().unwrap_or(Outcome::Interrupted);
        }
        outcome
    }

    /// Handle a termination signal.
    ///
    /// Terminates the agent (SIGTERM, then SIGKILL after the grace period),
    /// emits the `stopped` completion and releases [`Adapter::run`].
    /// Repeated calls are no-ops.
    pub async fn interrupt(&self, signal: &str) {
        if self.interrupted.swap(true, Ordering::SeqCst) {
            debug!(signal, "interrupt already in progress");
            return;
        }
        warn!(signal, state = %self.state(), "received termination signal, shutting down");
        self.transition(AdapterState::Interrupted);

        let termination = self
            .slot
            .terminate(self.config.terminate_grace(), self.config.kill_grace())
            .await;
        info!(?termination, "agent termination finished");

        let message = format!("Process interrupted by {signal}");
        match self
            .sink
            .completion(CompletionStatus::Stopped, None, &[message])
            .await
        {
            Ok(true) => self.settle(Outcome::Interrupted),
            Ok(false) => info!("terminal envelope already sent before interrupt"),
            Err(err) => error!(%err, "failed to emit stopped completion"),
        }
        self.stopped.cancel();
    }

    async fn drive(&self, input: &InputSource) -> Outcome {
        let missing = self.host.missing_required();
        if !missing.is_empty() {
            let message = format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            );
            return self.abort(ErrorCode::MissingEnvVar, &message).await;
        }

        info!(source = %input, "adapter started, waiting for task-request");
        let text = match input.read().await {
            Ok(text) => text,
            Err(err) => {
                let message = format!("Failed to read input from {input}: {err}");
                return self.abort(ErrorCode::InvalidInput, &message).await;
            }
        };
        let message = match decode_message(&text) {
            Ok(message) => message,
            Err(err) => {
                let message = format!("Invalid input on {input}: {err}");
                return self.abort(ErrorCode::InvalidInput, &message).await;
            }
        };

        self.transition(AdapterState::Validating);
        let request = match validator::accept(&message) {
            Ok(request) => request,
            Err(rejection) => {
                return self.abort(rejection.code(), &rejection.to_string()).await;
            }
        };
        info!(
            task_file = %request.task_file_path,
            branch = %request.branch_name,
            repo = %request.repo_url,
            "received task-request"
        );

        let env = ChildEnv::new(request.env_vars.clone());
        for key in env.keys() {
            info!(key, "applied env var");
        }

        self.transition(AdapterState::Provisioning);
        let root = self.config.workspace_root.as_path();
        let git = (self.git_factory)(root, env.clone());
        let provisioner = Provisioner::new(git, root, env.clone());
        match provisioner.provision(&request).await {
            Ok(provisioned) => info!(?provisioned, "workspace ready"),
            Err(failure) => return self.abort(failure.code, &failure.message).await,
        }
        self.progress("Workspace ready").await;

        self.transition(AdapterState::Running);
        let run = self.run_agent(&request, env).await;

        if self.is_interrupted() {
            info!("interrupted during run, suppressing normal completion");
            return Outcome::Interrupted;
        }
        self.finish(&run).await
    }

    async fn run_agent(&self, request: &TaskRequest, env: ChildEnv) -> AgentRun {
        let command = AgentCommand {
            program: self.config.agent_cli.clone(),
            args: self.config.agent_cli_args.clone(),
            working_dir: self.config.workspace_root.clone(),
            env,
        };
        let supervisor = Supervisor::new(command, Arc::clone(&self.sink), Arc::clone(&self.slot))
            .with_story_id(self.config.story_id.clone())
            .with_progress_interval(self.config.progress_interval())
            .with_tail_lines(self.config.tail_lines);

        self.progress("Starting agent CLI...").await;
        supervisor.run(&build_prompt(request)).await
    }

    async fn finish(&self, run: &AgentRun) -> Outcome {
        if self.is_interrupted() {
            info!("interrupted before completion, leaving the terminal envelope to the interrupt path");
            return Outcome::Interrupted;
        }
        self.transition(AdapterState::Completed);

        let (status, errors, outcome) = if run.succeeded() {
            info!("agent completed successfully");
            (CompletionStatus::Completed, Vec::new(), Outcome::Completed)
        } else {
            let headline = format!("Agent exited with code {}", run.exit_code);
            warn!("{headline}");
            let mut errors = vec![headline];
            if !run.tail.is_empty() {
                errors.push(format!(
                    "Last output: {}",
                    truncate_chars(&run.tail, TAIL_EXCERPT_CHARS)
                ));
            }
            (CompletionStatus::Failed, errors, Outcome::Failed)
        };

        match self.sink.completion(status, None, &errors).await {
            Ok(true) => self.settle(outcome),
            Ok(false) => info!("terminal envelope already sent, dropping completion"),
            Err(err) => error!(%err, "failed to emit completion"),
        }
        outcome
    }

    async fn abort(&self, code: ErrorCode, message: &str) -> Outcome {
        error!(?code, "{message}");
        if self.is_interrupted() {
            info!("interrupted, leaving the terminal envelope to the interrupt path");
            return Outcome::Interrupted;
        }
        self.transition(AdapterState::Completed);
        match self.sink.error(code, message).await {
            Ok(true) => self.settle(Outcome::Rejected),
            Ok(false) => info!("terminal envelope already sent, dropping error"),
            Err(err) => error!(%err, "failed to emit error envelope"),
        }
        Outcome::Rejected
    }

    /// Record the outcome whose terminal envelope won the sink latch.
    fn settle(&self, outcome: Outcome) {
        if let Ok(mut reported) = self.reported.lock() {
            if reported.is_none() {
                *reported = Some(outcome);
            }
        }
    }

    async fn progress(&self, output: &str) {
        if let Err(err) = self
            .sink
            .progress(&self.config.story_id, PROGRESS_STATUS, output)
            .await
        {
            warn!(%err, "failed to emit progress update");
        }
    }

    fn transition(&self, next: AdapterState) {
        let Ok(mut state) = self.state.lock() else {
            warn!(%next, "adapter state lock poisoned");
            return;
        };
        if state.can_transition_to(next) {
            debug!(from = %*state, to = %next, "adapter state transition");
            *state = next;
        } else {
            debug!(from = %*state, to = %next, "ignoring adapter state transition");
        }
    }
}

/// Termination signal handlers, registered as soon as this is built.
///
/// Build it before anything else in the runtime: once registered, SIGTERM
/// and SIGINT no longer kill the process and are buffered until
/// [`TerminationSignals::recv`] observes them.
#[derive(Debug)]
pub struct TerminationSignals {
    #[cfg(unix)]
    sigterm: Option<Signal>,
    #[cfg(unix)]
    sigint: Option<Signal>,
}

impl TerminationSignals {
    /// Register handlers for SIGTERM and SIGINT.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn install() -> Self {
        #[cfg(unix)]
        {
            Self {
                sigterm: register(SignalKind::terminate(), "SIGTERM"),
                sigint: register(SignalKind::interrupt(), "SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    /// Wait for the first termination signal and return its name.
    pub async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                () = next_signal(self.sigterm.as_mut()) => "SIGTERM",
                () = next_signal(self.sigint.as_mut()) => "SIGINT",
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(%err, "ctrl-c signal handler failed");
                std::future::pending::<()>().await;
            }
            "SIGINT"
        }
    }
}

#[cfg(unix)]
fn register(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(stream) => Some(stream),
        Err(err) => {
            warn!(%err, signal = name, "failed to register signal handler");
            None
        }
    }
}

#[cfg(unix)]
async fn next_signal(stream: Option<&mut Signal>) {
    if let Some(stream) = stream {
        if stream.recv().await.is_some() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

/// Spawn the task that routes the first signal seen by `signals` to
/// [`Adapter::interrupt`].
#[must_use]
pub fn spawn_signal_listener(
    adapter: Arc<Adapter>,
    mut signals: TerminationSignals,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = signals.recv().await;
        adapter.interrupt(signal).await;
    })
}
