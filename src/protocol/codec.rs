// src/protocol/codec.rs

//! Incremental newline-delimited JSON decoder.
//!
//! One [`LineCodec`] is bound to exactly one output stream. Bytes are kept
//! undecoded until a newline arrives, so neither a JSON document nor a
//! multi-byte UTF-8 sequence split across reads is ever mangled, and the
//! produced envelopes do not depend on where read boundaries fall.

use serde_json::Value;
use tracing::trace;

use super::envelope::Envelope;

#[derive(Debug, Default)]
pub struct LineCodec {
    residual: Vec<u8>,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and decode every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Envelope> {
        self.residual.extend_from_slice(chunk);

        let Some(last_newline) = self.residual.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.residual.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.residual, rest);

        complete
            .split(|b| *b == b'\n')
            .filter_map(decode_line)
            .collect()
    }

    pub fn feed_str(&mut self, chunk: &str) -> Vec<Envelope> {
        self.feed(chunk.as_bytes())
    }

    /// End of stream: decode whatever unterminated text is left, then reset.
    pub fn finish(&mut self) -> Option<Envelope> {
        let rest = std::mem::take(&mut self.residual);
        decode_line(&rest)
    }

    /// Number of buffered bytes waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.residual.len()
    }
}

/// Decode one complete line.
///
/// Blank lines yield nothing. Anything that is not a JSON object with a
/// string `event` becomes a `log` envelope carrying the trimmed text.
pub fn decode_line(raw: &[u8]) -> Option<Envelope> {
    let text = String::from_utf8_lossy(raw);
    // `trim` also strips the `\r` of a `\r\n` terminator.
    let line = text.trim();
    if line.is_empty() {
        return None;
    }

    let envelope = serde_json::from_str::<Value>(line)
        .ok()
        .and_then(Envelope::from_value)
        .unwrap_or_else(|| {
            trace!(line = %line, "undecodable protocol line; passing through as log");
            Envelope::log(line)
        });

    Some(envelope)
}
