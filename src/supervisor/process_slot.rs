//! Shared handle to the live agent process.
//!
//! The supervisor owns the [`tokio::process::Child`]; this slot only
//! publishes its pid while the child is running. The interrupt path reads
//! the slot to signal the process and waits on it to learn that the
//! supervisor has reaped the child, so it never needs ownership.
//!
//! There is no lock around the signal itself. Every operation checks the
//! slot immediately before acting, and a child that exits between the check
//! and the signal (`ESRCH`) counts as terminated.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

/// Result of a termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No process was running.
    NotRunning,
    /// The process exited within the grace period after SIGTERM.
    Graceful,
    /// The process exited after SIGKILL.
    Killed,
    /// The process was still running after both grace periods.
    Unresponsive,
}

/// Liveness-checked slot for the running agent's pid.
#[derive(Debug)]
pub struct ProcessSlot {
    pid: watch::Sender<Option<u32>>,
}

impl Default for ProcessSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSlot {
    /// An empty slot.
    #[must_use]
    pub fn new() -> Self {
        let (pid, _) = watch::channel(None);
        Self { pid }
    }

    /// Publish a freshly spawned process.
    pub fn occupy(&self, pid: u32) {
        self.pid.send_replace(Some(pid));
    }

    /// Clear the slot once the process has been waited on.
    pub fn release(&self) {
        self.pid.send_replace(None);
    }

    /// Pid of the running process, if any.
    #[must_use]
    pub fn current(&self) -> Option<u32> {
        *self.pid.borrow()
    }

    /// Wait until the slot is empty, for at most `limit`.
    ///
    /// Returns `true` if the slot emptied in time.
    pub async fn wait_released(&self, limit: Duration) -> bool {
        let mut rx = self.pid.subscribe();
        tokio::time::timeout(limit, rx.wait_for(Option::is_none))
            .await
            .is_ok_and(|changed| changed.is_ok())
    }

    /// Terminate the running process: SIGTERM, wait `grace`, then SIGKILL
    /// and wait `kill_grace`.
    ///
    /// Safe to call when nothing is running and while the supervisor is
    /// tearing the process down.
    pub async fn terminate(&self, grace: Duration, kill_grace: Duration) -> Termination {
        let Some(pid) = self.current() else {
            info!("no agent process running, nothing to terminate");
            return Termination::NotRunning;
        };

        info!(pid, "terminating agent process");
        if !send_signal(pid, Escalation::Terminate) {
            return Termination::Graceful;
        }
        if self.wait_released(grace).await {
            return Termination::Graceful;
        }

        let Some(pid) = self.current() else {
            return Termination::Graceful;
        };
        warn!(pid, ?grace, "agent did not exit in time, sending SIGKILL");
        if !send_signal(pid, Escalation::Kill) {
            return Termination::Killed;
        }
        if self.wait_released(kill_grace).await {
            Termination::Killed
        } else {
            warn!(pid, "agent still running after SIGKILL, giving up");
            Termination::Unresponsive
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Escalation {
    Terminate,
    Kill,
}

/// Send the signal for `step`; `false` means the process is already gone.
#[cfg(unix)]
fn send_signal(pid: u32, step: Escalation) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range, cannot signal");
        return false;
    };
    let signal = match step {
        Escalation::Terminate => Signal::SIGTERM,
        Escalation::Kill => Signal::SIGKILL,
    };
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(err) => {
            warn!(pid, %err, ?signal, "failed to signal agent process");
            true
        }
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, step: Escalation) -> bool {
    warn!(pid, ?step, "process signals unsupported on this platform");
    true
}
