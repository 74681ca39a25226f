//! Incremental decoder for streamed completion responses.
//!
//! Turns the raw bytes of a chunked `text/event-stream` body into text
//! deltas. The wire payload is a sequence of newline-delimited frames,
//! each optionally prefixed with `data:`:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Here"}}]}
//! data: {"choices":[{"delta":{"content":" are the steps..."}}]}
//! data: [DONE]
//! ```
//!
//! Frames that are JSON objects with a `choices` array are read as
//! chat-completion chunks. Every other frame is passed through verbatim, so
//! plain-text streaming backends work unchanged and an unexpected payload
//! such as an error object is shown rather than lost.
//!
//! # Examples
//!
//! ```
//! use sahayak::chat::decoder::DeltaDecoder;
//!
//! let mut decoder = DeltaDecoder::new();
//! let mut deltas = decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Na\"}}]}\ndata: {\"cho");
//! deltas.extend(decoder.push(b"ices\":[{\"delta\":{\"content\":\"maste\"}}]}\ndata: [DONE]\n"));
//! assert_eq!(deltas.concat(), "Namaste");
//! assert!(decoder.is_done());
//! ```

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::error::ChatError;

/// Sentinel frame that ends a stream.
pub const DONE_MARKER: &str = "[DONE]";

/// SSE field names that carry no text for us.
const IGNORED_FIELDS: [&str; 3] = ["event", "id", "retry"];

/// Result of decoding one line-delimited frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text fragment to append to the assistant message.
    Delta(String),
    /// The end marker; nothing after it is decoded.
    Done,
    /// Blank lines, comments, metadata fields and content-less chunks.
    Skip,
}

/// Decode a single frame (one line, without its terminating newline).
pub fn decode_frame(line: &str) -> Frame {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() || line.starts_with(':') {
        return Frame::Skip;
    }

    let payload = match strip_data_prefix(line) {
        Some(payload) => payload,
        None if is_ignored_field(line) => return Frame::Skip,
        None => line,
    };

    if payload.trim() == DONE_MARKER {
        return Frame::Done;
    }
    if payload.is_empty() {
        return Frame::Skip;
    }

    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) if is_chunk(&value) => match chunk_content(&value) {
            Some(content) if !content.is_empty() => Frame::Delta(content.to_owned()),
            _ => Frame::Skip,
        },
        // Not a completion chunk: raw passthrough.
        _ => Frame::Delta(payload.to_owned()),
    }
}

/// A completion chunk is an object carrying a `choices` array.
fn is_chunk(value: &serde_json::Value) -> bool {
    value.get("choices").is_some_and(serde_json::Value::is_array)
}

/// Strip a `data:` marker and the single optional space after it.
fn strip_data_prefix(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn is_ignored_field(line: &str) -> bool {
    line.split_once(':')
        .is_some_and(|(field, _)| IGNORED_FIELDS.contains(&field))
}

/// Pull the text out of a chat-completion chunk.
///
/// Streaming chunks carry `choices[0].delta.content`; some backends send a
/// final non-delta `choices[0].message.content` instead.
fn chunk_content(value: &serde_json::Value) -> Option<&str> {
    let choice = value.get("choices")?.get(0)?;
    choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .or_else(|| {
            choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_str())
        })
}

/// Incremental frame decoder.
///
/// Buffers bytes rather than text so that a multi-byte UTF-8 character split
/// across two network chunks is decoded intact. Feed chunks with
/// [`push`](Self::push) and call [`finish`](Self::finish) when the transport
/// closes. A decoder serves exactly one response.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    line_buffer: Vec<u8>,
    done: bool,
}

impl DeltaDecoder {
    /// Create a decoder for a new response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the end marker has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Push a chunk of body bytes, returning the deltas completed by it.
    ///
    /// A trailing partial line stays buffered until a later chunk (or
    /// [`finish`](Self::finish)) completes it. Once the end marker is seen,
    /// the rest of the input is discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();
        if self.done {
            return deltas;
        }

        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.line_buffer.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];
            let line = std::mem::take(&mut self.line_buffer);
            self.process_line(&line, &mut deltas);
            if self.done {
                return deltas;
            }
        }
        self.line_buffer.extend_from_slice(rest);
        deltas
    }

    /// Flush the buffered trailing line when the transport has closed.
    pub fn finish(&mut self) -> Vec<String> {
        let mut deltas = Vec::new();
        if self.done || self.line_buffer.is_empty() {
            self.line_buffer.clear();
            return deltas;
        }
        let line = std::mem::take(&mut self.line_buffer);
        self.process_line(&line, &mut deltas);
        deltas
    }

    fn process_line(&mut self, line: &[u8], deltas: &mut Vec<String>) {
        let text = String::from_utf8_lossy(line);
        match decode_frame(&text) {
            Frame::Delta(delta) => deltas.push(delta),
            Frame::Done => self.done = true,
            Frame::Skip => {}
        }
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Internal state for [`delta_stream`].
struct DeltaStreamState {
    byte_stream: ByteStream,
    decoder: DeltaDecoder,
    pending: VecDeque<String>,
    closed: bool,
}

/// Lazily decode a response body into a stream of deltas.
///
/// The stream ends after the end marker, or when the body ends (after the
/// trailing line is flushed). A body read failure yields one
/// [`ChatError::Transport`] and then ends the stream. Dropping the returned
/// stream drops the underlying body, which aborts the transfer.
pub fn delta_stream(
    byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<String, ChatError>> + Send {
    futures_util::stream::unfold(
        DeltaStreamState {
            byte_stream: Box::pin(byte_stream),
            decoder: DeltaDecoder::new(),
            pending: VecDeque::new(),
            closed: false,
        },
        |mut state| async move {
            loop {
                if let Some(delta) = state.pending.pop_front() {
                    return Some((Ok(delta), state));
                }
                if state.closed || state.decoder.is_done() {
                    return None;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => state.pending.extend(state.decoder.push(&chunk)),
                    Some(Err(e)) => {
                        state.closed = true;
                        let err = ChatError::Transport(format!("stream read error: {e}"));
                        return Some((Err(err), state));
                    }
                    None => {
                        state.closed = true;
                        state.pending.extend(state.decoder.finish());
                    }
                }
            }
        },
    )
}
