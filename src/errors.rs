//! Error types shared across the adapter.

use std::fmt::{Display, Formatter};

/// Shared adapter result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Adapter error enumeration covering all internal failure modes.
///
/// These are diagnostics for the adapter itself. What the host sees is
/// decided by the controller, which maps each failure onto an
/// [`ErrorCode`](crate::acp::envelope::ErrorCode) or a `failed` completion.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Protocol framing, decoding, or output channel failure.
    Acp(String),
    /// Inbound task request was rejected.
    Validation(String),
    /// A git invocation failed to launch or exited non-zero.
    Git(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Git(msg) => write!(f, "git: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
