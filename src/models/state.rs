//! Adapter controller lifecycle.

use std::fmt::{Display, Formatter};

/// Lifecycle state of the adapter controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Waiting for the single task request.
    AwaitingRequest,
    /// Checking the decoded request.
    Validating,
    /// Cloning and checking out the workspace.
    Provisioning,
    /// The agent CLI is running.
    Running,
    /// A completion or aborting error has been reported.
    Completed,
    /// A termination signal was observed.
    Interrupted,
}

impl AdapterState {
    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `Interrupted` is reachable from every non-terminal state; any
    /// non-terminal state may also finish as `Completed` (fatal errors end
    /// the run early).
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Self::AwaitingRequest, Self::Validating)
                | (Self::Validating, Self::Provisioning)
                | (Self::Provisioning, Self::Running)
                | (_, Self::Completed | Self::Interrupted)
        )
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Interrupted)
    }
}

impl Display for AdapterState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwaitingRequest => "awaiting_request",
            Self::Validating => "validating",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}
