//! NDJSON line codec for the adapter's channels.
//!
//! Decoding wraps [`tokio_util::codec::LinesCodec`] with a maximum line
//! length so a single unterminated line on stdin or from the agent cannot
//! exhaust memory. Encoding turns an [`Envelope`] into exactly one compact
//! JSON line; the writer then emits that buffer in a single write.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use acp_adapter::acp::codec::AcpCodec;
//!
//! let lines = FramedRead::new(child_stdout, AcpCodec::new());
//! ```

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::acp::envelope::Envelope;
use crate::{AppError, Result};

/// Maximum line length accepted by the decoder: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line codec for inbound text and outbound envelopes.
#[derive(Debug)]
pub struct AcpCodec {
    lines: LinesCodec,
    max_line_bytes: usize,
}

impl AcpCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom decode limit.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }

    fn map_error(&self, e: LinesCodecError) -> AppError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => AppError::Acp(format!(
                "line too long: exceeded {} bytes",
                self.max_line_bytes
            )),
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for AcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AcpCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next `\n`-terminated line (a trailing `\r` is stripped).
    ///
    /// Returns `Ok(None)` while `src` holds no complete line.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.lines.decode(src).map_err(|e| self.map_error(e))
    }

    /// Decode the final, possibly unterminated, line at EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.lines.decode_eof(src).map_err(|e| self.map_error(e))
    }
}

impl Encoder<&Envelope> for AcpCodec {
    type Error = AppError;

    /// Serialise `item` as compact JSON followed by a single `\n`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if serialisation fails.
    fn encode(&mut self, item: &Envelope, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(item)
            .map_err(|e| AppError::Acp(format!("failed to serialise envelope: {e}")))?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Lossy, never-failing line framing for agent output.
///
/// Agent stdout and stderr must be drained no matter what the agent
/// prints, so unlike [`AcpCodec`] this decoder does not reject input:
/// invalid UTF-8 is replaced, and a line longer than the limit is split
/// into limit-sized chunks instead of ending the stream.
#[derive(Debug)]
pub struct AgentOutputCodec {
    max_line_bytes: usize,
    scanned: usize,
}

impl AgentOutputCodec {
    /// Create a decoder with the default [`MAX_LINE_BYTES`] chunk size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    /// Create a decoder with a custom chunk size (at least one byte).
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes: max_line_bytes.max(1),
            scanned: 0,
        }
    }

    fn take(&mut self, src: &mut BytesMut, len: usize) -> String {
        self.scanned = 0;
        let chunk = src.split_to(len);
        let mut bytes: &[u8] = &chunk;
        if let Some(rest) = bytes.strip_suffix(b"\n") {
            bytes = rest;
        }
        if let Some(rest) = bytes.strip_suffix(b"\r") {
            bytes = rest;
        }
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl Default for AgentOutputCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AgentOutputCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let start = self.scanned.min(src.len());
        let newline = src[start..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|offset| start + offset);

        match newline {
            Some(pos) if pos < self.max_line_bytes => Ok(Some(self.take(src, pos + 1))),
            _ if src.len() >= self.max_line_bytes => {
                Ok(Some(self.take(src, self.max_line_bytes)))
            }
            _ => {
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            Ok(None)
        } else {
            let len = src.len();
            Ok(Some(self.take(src, len)))
        }
    }
}
