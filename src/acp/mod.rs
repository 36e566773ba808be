//! Agent Client Protocol (ACP) channel handling.
//!
//! The host talks to the adapter over newline-delimited JSON:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing and
//!   envelope encoding.
//! - `envelope`: outbound envelope and payload types.
//! - `reader`: acquisition and decoding of the single task request.
//! - `writer`: the single-writer event sink for stdout.

pub mod codec;
pub mod envelope;
pub mod reader;
pub mod writer;
