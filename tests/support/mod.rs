//! Helpers shared by the test binaries.
//!
//! Provides an in-memory output channel for [`EventSink`] so tests can
//! inspect exactly what the host would have read from stdout.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::io::AsyncWrite;

use acp_adapter::acp::envelope::Identity;
use acp_adapter::acp::writer::EventSink;

/// Swarm id stamped on envelopes in tests.
pub const TEST_SWARM_ID: &str = "6f1c2a34-9b1e-4c55-8d2e-0a7b3c9d1e2f";

/// Container id stamped on envelopes in tests.
pub const TEST_CONTAINER_ID: &str = "container-test-1";

/// `AsyncWrite` that appends everything into a shared buffer.
#[derive(Debug, Clone, Default)]
pub struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureWriter {
    /// Everything written so far, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }

    /// Raw output lines (without the trailing newline).
    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_owned).collect()
    }

    /// Every output line parsed as JSON.
    pub fn envelopes(&self) -> Vec<Value> {
        self.lines()
            .iter()
            .map(|line| serde_json::from_str(line).expect("every output line is JSON"))
            .collect()
    }

    /// Envelopes whose `type` is `completion` or `error`.
    pub fn terminal_envelopes(&self) -> Vec<Value> {
        self.envelopes()
            .into_iter()
            .filter(|env| env["type"] != "progress-update")
            .collect()
    }

    /// `payload.output` of every progress envelope, in order.
    pub fn progress_outputs(&self) -> Vec<String> {
        self.envelopes()
            .iter()
            .filter(|env| env["type"] == "progress-update")
            .map(|env| env["payload"]["output"].as_str().unwrap_or_default().to_owned())
            .collect()
    }
}

impl AsyncWrite for CaptureWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Identity used by [`capture_sink`].
pub fn test_identity() -> Identity {
    Identity {
        swarm_id: TEST_SWARM_ID.to_owned(),
        container_id: TEST_CONTAINER_ID.to_owned(),
    }
}

/// An event sink writing into a [`CaptureWriter`].
pub fn capture_sink() -> (Arc<EventSink>, CaptureWriter) {
    let capture = CaptureWriter::default();
    let sink = EventSink::new(Box::new(capture.clone()), test_identity());
    (Arc::new(sink), capture)
}
