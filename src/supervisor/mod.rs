//! Agent subprocess supervision.
//!
//! Launches the agent CLI with a fixed argument vector plus the prompt as
//! one final argument (no shell is involved), then:
//! - drains stderr on its own task so the child never blocks on a full
//!   pipe; those lines are logged in bulk after exit, never forwarded;
//! - forwards stdout lines as `progress-update` envelopes, throttled to one
//!   per interval, always flushing the last observed line at the end;
//! - keeps the last N lines as the tail returned for diagnostics.
//!
//! The pid is published in the shared [`ProcessSlot`] from spawn until the
//! child has been reaped, which is what the interrupt path relies on.

pub mod process_slot;
pub mod prompt;
pub mod throttle;

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::acp::codec::AgentOutputCodec;
use crate::acp::writer::EventSink;
use crate::models::task::ChildEnv;

use self::process_slot::ProcessSlot;
use self::throttle::{ProgressThrottle, TailBuffer};

/// Exit code reported when the agent could not be launched.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = -1;

/// Status label on streamed progress events.
pub const PROGRESS_STATUS: &str = "in_progress";

/// How long to keep draining output once the child has exited.
const POST_EXIT_DRAIN: Duration = Duration::from_secs(2);

/// Stderr lines kept for the post-exit log.
const STDERR_TAIL_LINES: usize = 200;

/// How to launch the agent.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    /// Executable name or path.
    pub program: String,
    /// Fixed arguments; the prompt is appended after them.
    pub args: Vec<String>,
    /// Working directory (the workspace root).
    pub working_dir: PathBuf,
    /// Environment overlay from the request.
    pub env: ChildEnv,
}

/// Outcome of one supervised run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRun {
    /// Process exit code; [`LAUNCH_FAILURE_EXIT_CODE`] if it never started,
    /// `128 + signo` if it was killed by a signal.
    pub exit_code: i32,
    /// Last retained output lines, or the launch failure description.
    pub tail: String,
}

impl AgentRun {
    /// Whether the agent exited with code 0.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs the agent CLI and streams its output to the host.
#[derive(Debug)]
pub struct Supervisor {
    command: AgentCommand,
    sink: Arc<EventSink>,
    slot: Arc<ProcessSlot>,
    story_id: String,
    progress_interval: Duration,
    tail_lines: usize,
}

impl Supervisor {
    /// Supervise `command`, writing progress to `sink` and publishing the
    /// pid in `slot`.
    #[must_use]
    pub fn new(command: AgentCommand, sink: Arc<EventSink>, slot: Arc<ProcessSlot>) -> Self {
        Self {
            command,
            sink,
            slot,
            story_id: "US-000".to_owned(),
            progress_interval: Duration::from_secs(2),
            tail_lines: 20,
        }
    }

    /// Story identifier for progress events.
    #[must_use]
    pub fn with_story_id(mut self, story_id: impl Into<String>) -> Self {
        self.story_id = story_id.into();
        self
    }

    /// Minimum gap between streamed progress events.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Number of trailing lines returned in [`AgentRun::tail`].
    #[must_use]
    pub fn with_tail_lines(mut self, tail_lines: usize) -> Self {
        self.tail_lines = tail_lines;
        self
    }

    /// Run the agent with `prompt` and wait for it to exit.
    ///
    /// Never fails: launch errors come back as
    /// [`LAUNCH_FAILURE_EXIT_CODE`] with a description in the tail.
    pub async fn run(&self, prompt: &str) -> AgentRun {
        let span = info_span!("agent", program = %self.command.program);
        self.run_inner(prompt).instrument(span).await
    }

    async fn run_inner(&self, prompt: &str) -> AgentRun {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .arg(prompt)
            .current_dir(&self.command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.command.env.apply(&mut cmd);

        info!(
            args = ?self.command.args,
            workdir = %self.command.working_dir.display(),
            "launching agent CLI"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return self.launch_failure(&err),
        };

        if let Some(pid) = child.id() {
            self.slot.occupy(pid);
            info!(pid, "agent process spawned");
        }

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            warn!("agent stdio was not captured, killing process");
            child.kill().await.ok();
            self.slot.release();
            return AgentRun {
                exit_code: LAUNCH_FAILURE_EXIT_CODE,
                tail: "Failed to capture agent output".to_owned(),
            };
        };

        let stderr_task = tokio::spawn(drain_stderr(stderr));
        let (status, tail) = self.stream_stdout(&mut child, stdout).await;
        self.slot.release();

        match tokio::time::timeout(POST_EXIT_DRAIN, stderr_task).await {
            Ok(Ok(lines)) if !lines.is_empty() => {
                warn!(lines = lines.len(), stderr = %lines.joined(), "agent stderr");
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(%err, "stderr drain task failed"),
            Err(_) => debug!("stderr still open after exit, abandoning drain"),
        }

        let exit_code = match status {
            Ok(status) => exit_code_of(status),
            Err(err) => {
                warn!(%err, "failed to wait for agent process");
                LAUNCH_FAILURE_EXIT_CODE
            }
        };
        info!(exit_code, "agent exited");

        AgentRun {
            exit_code,
            tail: tail.joined(),
        }
    }

    /// Forward stdout until EOF, reaping the child as soon as it exits.
    async fn stream_stdout(
        &self,
        child: &mut Child,
        stdout: ChildStdout,
    ) -> (std::io::Result<ExitStatus>, TailBuffer) {
        let mut lines = FramedRead::new(stdout, AgentOutputCodec::new());
        let mut throttle = ProgressThrottle::new(self.progress_interval);
        let mut tail = TailBuffer::new(self.tail_lines);
        let mut last_line: Option<String> = None;
        let mut status = None;

        loop {
            tokio::select! {
                item = lines.next() => match item {
                    Some(Ok(line)) => {
                        if line.is_empty() {
                            continue;
                        }
                        tail.push(line.clone());
                        if throttle.admit(Instant::now()) {
                            self.forward(&line).await;
                        }
                        last_line = Some(line);
                    }
                    Some(Err(err)) => {
                        warn!(%err, "agent stdout read failed, stopping stream");
                        break;
                    }
                    None => break,
                },
                result = child.wait(), if status.is_none() => {
                    self.slot.release();
                    status = Some(result);
                }
                () = tokio::time::sleep(POST_EXIT_DRAIN), if status.is_some() => {
                    debug!("stdout still open after exit, abandoning drain");
                    break;
                }
            }
        }

        // The host always sees the final line, even if it was just sent.
        if let Some(line) = last_line {
            self.forward(&line).await;
        }

        let status = match status {
            Some(status) => status,
            None => {
                let status = child.wait().await;
                self.slot.release();
                status
            }
        };
        (status, tail)
    }

    async fn forward(&self, line: &str) {
        if let Err(err) = self
            .sink
            .progress(&self.story_id, PROGRESS_STATUS, line)
            .await
        {
            warn!(%err, "failed to emit progress update");
        }
    }

    fn launch_failure(&self, err: &std::io::Error) -> AgentRun {
        let tail = if err.kind() == std::io::ErrorKind::NotFound {
            format!("Agent CLI binary not found: {}", self.command.program)
        } else {
            format!("Failed to launch agent CLI {}: {err}", self.command.program)
        };
        warn!(%err, "{tail}");
        AgentRun {
            exit_code: LAUNCH_FAILURE_EXIT_CODE,
            tail,
        }
    }
}

/// Collect stderr until EOF, keeping the most recent lines.
async fn drain_stderr(stderr: ChildStderr) -> TailBuffer {
    let mut lines = FramedRead::new(stderr, AgentOutputCodec::new());
    let mut kept = TailBuffer::new(STDERR_TAIL_LINES);
    while let Some(item) = lines.next().await {
        match item {
            Ok(line) => kept.push(line),
            Err(err) => {
                debug!(%err, "agent stderr read failed");
                break;
            }
        }
    }
    kept
}

/// Map an exit status to a code, using `128 + signo` for signal deaths.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    LAUNCH_FAILURE_EXIT_CODE
}
