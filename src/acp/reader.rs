//! Inbound task-request acquisition.
//!
//! The adapter reads exactly one message per lifetime: the first line of
//! stdin (framed by [`AcpCodec`], so the 1 MiB limit applies), or the whole
//! contents of a file given with `--input`. Decoding stops at JSON; the
//! structural checks belong to [`crate::validator`].

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::debug;

use crate::acp::codec::AcpCodec;
use crate::{AppError, Result};

/// Where the task request comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// First line of the process stdin.
    Stdin,
    /// Entire contents of a file.
    File(PathBuf),
}

impl Display for InputSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdin => f.write_str("stdin"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl InputSource {
    /// Read the raw request text from this source.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the file cannot be read, or the codec's
    /// error if the stdin line is unreadable or too long.
    pub async fn read(&self) -> Result<String> {
        match self {
            Self::Stdin => read_first_line(tokio::io::stdin()).await,
            Self::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| AppError::Io(format!("cannot read {}: {e}", path.display()))),
        }
    }
}

/// Read the first line from `reader`; EOF before any data yields `""`.
///
/// # Errors
///
/// Returns [`AppError::Acp`] for an over-long line or [`AppError::Io`] on
/// read failure.
pub async fn read_first_line<R>(reader: R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut framed = FramedRead::new(reader, AcpCodec::new());
    match framed.next().await {
        Some(line) => line,
        None => {
            debug!("input closed before any line arrived");
            Ok(String::new())
        }
    }
}

/// Decode raw request text into a JSON value.
///
/// # Errors
///
/// - [`AppError::Acp`]`("empty input")` when the text is blank.
/// - [`AppError::Acp`]`("malformed json: …")` when it is not valid JSON.
pub fn decode_message(text: &str) -> Result<serde_json::Value> {
    if text.trim().is_empty() {
        return Err(AppError::Acp("empty input".into()));
    }
    serde_json::from_str(text).map_err(|e| AppError::Acp(format!("malformed json: {e}")))
}
