//! Decoding of newline-delimited JSON completion streams.
//!
//! Ollama streams one JSON object per line. Network chunks do not respect
//! line boundaries, so bytes are buffered until a `\n` arrives.

use crate::error::{RagEvalError, Result};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use tracing::warn;

/// Splits raw byte chunks into complete, non-empty lines.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Flush a final line that had no trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// One streamed chat response object.
#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Lazy, finite, non-restartable sequence of response lines.
pub struct ChunkStream<S> {
    inner: S,
    decoder: NdjsonDecoder,
    pending: VecDeque<String>,
    exhausted: bool,
}

impl<S, B, E> ChunkStream<S>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<RagEvalError>,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: NdjsonDecoder::new(),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next complete line, or `None` once the underlying stream has ended.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Ok(Some(line));
            }
            if self.exhausted {
                return Ok(None);
            }

            match self.inner.next().await {
                Some(Ok(bytes)) => {
                    self.pending.extend(self.decoder.push(bytes.as_ref()));
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    self.exhausted = true;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }

    /// Concatenate every `message.content` fragment in arrival order.
    ///
    /// Lines that are not valid chunks are skipped with a warning. Reading
    /// stops at the first chunk marked `done` or at the end of the stream.
    /// The result is trimmed.
    pub async fn collect_content(mut self) -> Result<String> {
        let mut answer = String::new();

        while let Some(line) = self.next_line().await? {
            let chunk: ChatChunk = match serde_json::from_str(&line) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(line = %line, error = %e, "Could not decode stream line");
                    continue;
                }
            };

            if let Some(error) = chunk.error {
                warn!(error = %error, "Completion server reported an error mid-stream");
            }

            if let Some(content) = chunk.message.and_then(|m| m.content) {
                answer.push_str(&content);
            }

            if chunk.done {
                break;
            }
        }

        Ok(answer.trim().to_string())
    }
}
