//! Outbound ACP envelope and payload types.
//!
//! Every protocol event written to the host is one [`Envelope`] serialised
//! as a single JSON line. Field names are camelCase on the wire; payload
//! text fields are truncated here so no caller can exceed the host limits.

use chrono::Utc;
use serde::Serialize;

/// Maximum characters kept in a progress `output` or error `message`.
pub const MAX_OUTPUT_CHARS: usize = 2000;

/// Maximum characters kept in one completion `errors` entry.
pub const MAX_ERROR_ENTRY_CHARS: usize = 500;

/// Maximum number of completion `errors` entries.
pub const MAX_ERROR_ENTRIES: usize = 50;

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeType {
    /// Streaming status from the running agent.
    ProgressUpdate,
    /// Terminal result of the run.
    Completion,
    /// Fatal failure before the agent ran.
    Error,
}

/// Terminal status carried by a completion payload.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// Agent exited with code 0.
    Completed,
    /// Agent exited non-zero or could not be launched.
    Failed,
    /// Run was interrupted by a termination signal.
    Stopped,
}

/// Stable error codes reported in `error` envelopes.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A required environment variable is unset.
    MissingEnvVar,
    /// Input was unreadable, empty, or malformed.
    InvalidInput,
    /// The task request failed field validation.
    TaskFileInvalid,
    /// `git clone` failed.
    GitCloneFailed,
    /// Neither the tracking nor the fallback checkout succeeded.
    GitCheckoutFailed,
    /// The task file is missing from the provisioned workspace.
    TaskFileNotFound,
}

/// Payload of a `progress-update` envelope.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    /// Story the progress belongs to.
    pub story_id: String,
    /// Free-form status label (e.g. `in_progress`).
    pub status: String,
    /// Latest agent output, truncated to [`MAX_OUTPUT_CHARS`].
    pub output: String,
}

/// Payload of a `completion` envelope.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    /// Terminal status.
    pub status: CompletionStatus,
    /// Pull request URL; serialised as `null` when absent.
    pub pr_url: Option<String>,
    /// Diagnostics, capped in count and per-entry length.
    pub errors: Vec<String>,
}

/// Payload of an `error` envelope.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable description, truncated to [`MAX_OUTPUT_CHARS`].
    pub message: String,
}

/// One of the three payload kinds.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Payload {
    /// Progress update.
    Progress(ProgressPayload),
    /// Terminal completion.
    Completion(CompletionPayload),
    /// Fatal error.
    Error(ErrorPayload),
}

/// Identifiers stamped onto every envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Swarm UUID string.
    pub swarm_id: String,
    /// Container identifier.
    pub container_id: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            swarm_id: uuid::Uuid::nil().to_string(),
            container_id: "unknown".to_owned(),
        }
    }
}

/// Uniform wrapper for every protocol message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Payload discriminator.
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    /// UTC emission time, `YYYY-MM-DDTHH:MM:SSZ`.
    pub timestamp: String,
    /// Swarm identifier.
    pub swarm_id: String,
    /// Container identifier.
    pub container_id: String,
    /// Event payload.
    pub payload: Payload,
}

impl Envelope {
    /// Wrap `payload`, stamping the current UTC time and `identity`.
    #[must_use]
    pub fn new(identity: &Identity, payload: Payload) -> Self {
        let kind = match payload {
            Payload::Progress(_) => EnvelopeType::ProgressUpdate,
            Payload::Completion(_) => EnvelopeType::Completion,
            Payload::Error(_) => EnvelopeType::Error,
        };
        Self {
            kind,
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            swarm_id: identity.swarm_id.clone(),
            container_id: identity.container_id.clone(),
            payload,
        }
    }

    /// Whether this envelope ends the run from the host's point of view.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind, EnvelopeType::ProgressUpdate)
    }
}

impl Payload {
    /// Progress payload with `output` truncated.
    #[must_use]
    pub fn progress(story_id: &str, status: &str, output: &str) -> Self {
        Self::Progress(ProgressPayload {
            story_id: story_id.to_owned(),
            status: status.to_owned(),
            output: truncate_chars(output, MAX_OUTPUT_CHARS),
        })
    }

    /// Completion payload with `errors` capped and each entry truncated.
    #[must_use]
    pub fn completion(status: CompletionStatus, pr_url: Option<String>, errors: &[String]) -> Self {
        Self::Completion(CompletionPayload {
            status,
            pr_url,
            errors: errors
                .iter()
                .take(MAX_ERROR_ENTRIES)
                .map(|e| truncate_chars(e, MAX_ERROR_ENTRY_CHARS))
                .collect(),
        })
    }

    /// Error payload with `message` truncated.
    #[must_use]
    pub fn error(code: ErrorCode, message: &str) -> Self {
        Self::Error(ErrorPayload {
            code,
            message: truncate_chars(message, MAX_OUTPUT_CHARS),
        })
    }
}

/// Keep at most `max` characters of `text`.
#[must_use]
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_owned(),
        None => text.to_owned(),
    }
}
