//! ACP event sink.
//!
//! The only writer of the protocol channel (stdout in production). Each
//! envelope is encoded into one buffer by [`AcpCodec`] and written with a
//! single `write_all` + `flush` while holding the output lock, so envelopes
//! from the main flow and the interrupt path can never interleave mid-line.
//!
//! The sink also latches the first terminal envelope. Later terminal
//! envelopes, and progress after a terminal one, are dropped and logged:
//! the host sees at most one `completion`/`error` per run, and nothing
//! after it.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::Encoder;
use tracing::{debug, warn};

use crate::acp::codec::AcpCodec;
use crate::acp::envelope::{CompletionStatus, Envelope, ErrorCode, Identity, Payload};
use crate::{AppError, Result};

/// Boxed output channel.
pub type OutputChannel = Box<dyn AsyncWrite + Send + Unpin>;

/// Single-writer protocol output with a terminal-envelope latch.
pub struct EventSink {
    out: Mutex<OutputChannel>,
    identity: Identity,
    terminal_sent: AtomicBool,
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("identity", &self.identity)
            .field("terminal_sent", &self.terminal_sent.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl EventSink {
    /// Wrap an output channel; every envelope is stamped with `identity`.
    #[must_use]
    pub fn new(out: OutputChannel, identity: Identity) -> Self {
        Self {
            out: Mutex::new(out),
            identity,
            terminal_sent: AtomicBool::new(false),
        }
    }

    /// Sink writing to the process stdout.
    #[must_use]
    pub fn stdout(identity: Identity) -> Self {
        Self::new(Box::new(tokio::io::stdout()), identity)
    }

    /// Whether a terminal envelope has already been written.
    #[must_use]
    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent.load(Ordering::SeqCst)
    }

    /// Emit a `progress-update` envelope.
    ///
    /// Returns `Ok(false)` without writing if a terminal envelope has
    /// already gone out.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the output channel write fails.
    pub async fn progress(&self, story_id: &str, status: &str, output: &str) -> Result<bool> {
        let envelope = Envelope::new(&self.identity, Payload::progress(story_id, status, output));
        self.write(&envelope).await
    }

    /// Emit the terminal `completion` envelope.
    ///
    /// Returns `Ok(false)` if another terminal envelope won the latch.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the output channel write fails.
    pub async fn completion(
        &self,
        status: CompletionStatus,
        pr_url: Option<String>,
        errors: &[String],
    ) -> Result<bool> {
        let envelope = Envelope::new(&self.identity, Payload::completion(status, pr_url, errors));
        self.write(&envelope).await
    }

    /// Emit the terminal `error` envelope.
    ///
    /// Returns `Ok(false)` if another terminal envelope won the latch.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the output channel write fails.
    pub async fn error(&self, code: ErrorCode, message: &str) -> Result<bool> {
        let envelope = Envelope::new(&self.identity, Payload::error(code, message));
        self.write(&envelope).await
    }

    /// Write one envelope; the latch is checked under the output lock.
    async fn write(&self, envelope: &Envelope) -> Result<bool> {
        let mut buf = BytesMut::new();
        AcpCodec::new().encode(envelope, &mut buf)?;

        let mut out = self.out.lock().await;
        if self.terminal_sent.load(Ordering::SeqCst) {
            if envelope.is_terminal() {
                warn!(payload = ?envelope.payload, "terminal envelope already sent, suppressing");
            } else {
                debug!("progress after terminal envelope dropped");
            }
            return Ok(false);
        }
        if envelope.is_terminal() {
            self.terminal_sent.store(true, Ordering::SeqCst);
        }

        out.write_all(&buf)
            .await
            .map_err(|e| AppError::Acp(format!("write failed: {e}")))?;
        out.flush()
            .await
            .map_err(|e| AppError::Acp(format!("flush failed: {e}")))?;
        Ok(true)
    }
}
