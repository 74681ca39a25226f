//! HTTP client for the streaming chat completion endpoint.
//!
//! [`ChatStreamClient`] owns one request lifecycle per call: it POSTs the
//! conversation history, classifies failures, feeds the body through the
//! [`decoder`](super::decoder), and reports each delta to a [`DeltaSink`]
//! in arrival order.
//!
//! # Single-flight
//!
//! The client does not guard against concurrent calls. Callers must cancel
//! a previous session before starting the next one for the same
//! conversation; the [`conversation`](crate::conversation) actor does this.

use std::pin::pin;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::Message;
use super::decoder::delta_stream;
use super::error::ChatError;
use crate::config::ChatConfig;

/// How a stream session ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The body ended gracefully and `on_done` was called.
    Completed,
    /// The cancellation token fired first. Not an error.
    Cancelled,
}

/// Receiver of the deltas of one stream session.
pub trait DeltaSink {
    /// Called once per decoded delta, in arrival order.
    fn on_delta(&mut self, delta: &str);

    /// Called once after the last delta of a completed stream.
    fn on_done(&mut self);
}

/// A [`DeltaSink`] built from two closures.
///
/// `on_done` is an `FnOnce`, so it runs at most once no matter how the sink
/// is driven.
pub struct CallbackSink<D, F> {
    on_delta: D,
    on_done: Option<F>,
}

impl<D, F> CallbackSink<D, F>
where
    D: FnMut(&str),
    F: FnOnce(),
{
    pub fn new(on_delta: D, on_done: F) -> Self {
        Self {
            on_delta,
            on_done: Some(on_done),
        }
    }
}

impl<D, F> DeltaSink for CallbackSink<D, F>
where
    D: FnMut(&str),
    F: FnOnce(),
{
    fn on_delta(&mut self, delta: &str) {
        (self.on_delta)(delta);
    }

    fn on_done(&mut self) {
        if let Some(on_done) = self.on_done.take() {
            on_done();
        }
    }
}

/// Anything that can stream an assistant reply for a conversation history.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Stream a reply to `history` into `sink`.
    ///
    /// Resolves to [`StreamOutcome::Cancelled`] (never an error) when
    /// `cancel` fires; after that no further sink calls are made.
    async fn stream_chat(
        &self,
        history: &[Message],
        sink: &mut (dyn DeltaSink + Send),
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, ChatError>;
}

/// Request body sent to the completion endpoint.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

/// Streaming client for an OpenAI-compatible chat completion endpoint.
pub struct ChatStreamClient {
    config: ChatConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for ChatStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStreamClient")
            .field("endpoint", &self.config.endpoint)
            .field("model", &self.config.model)
            .finish()
    }
}

impl ChatStreamClient {
    /// Create a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] if the HTTP client cannot be built.
    pub fn new(config: ChatConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ChatError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// The endpoint this client posts to.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Stream a reply, calling `on_delta` per delta and `on_done` once at
    /// the end.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ChatError`]; cancellation is reported as
    /// [`StreamOutcome::Cancelled`] instead.
    pub async fn send<D, F>(
        &self,
        history: &[Message],
        on_delta: D,
        on_done: F,
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, ChatError>
    where
        D: FnMut(&str) + Send,
        F: FnOnce() + Send,
    {
        let mut sink = CallbackSink::new(on_delta, on_done);
        self.stream_chat(history, &mut sink, cancel).await
    }

    fn build_request(&self, history: &[Message]) -> reqwest::RequestBuilder {
        let body = ChatRequest {
            model: &self.config.model,
            messages: history,
            stream: true,
        };
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }
        request
    }
}

#[async_trait]
impl ChatBackend for ChatStreamClient {
    async fn stream_chat(
        &self,
        history: &[Message],
        sink: &mut (dyn DeltaSink + Send),
        cancel: &CancellationToken,
    ) -> Result<StreamOutcome, ChatError> {
        let started = Instant::now();
        info!(
            model = %self.config.model,
            messages = history.len(),
            "starting chat stream"
        );

        let request = self.build_request(history);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("chat stream cancelled before response headers");
                return Ok(StreamOutcome::Cancelled);
            }
            response = request.send() => response.map_err(|e| {
                warn!(error = %e, "chat request failed");
                ChatError::Transport(format!("request failed: {e}"))
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(
                        status = status.as_u16(),
                        "chat stream cancelled while reading error body"
                    );
                    return Ok(StreamOutcome::Cancelled);
                }
                body = response.text() => body.unwrap_or_default(),
            };
            let err = ChatError::from_http_status(status, &body);
            warn!(status = status.as_u16(), code = err.code(), "chat endpoint rejected request");
            return Err(err);
        }

        let mut deltas = pin!(delta_stream(response.bytes_stream()));
        let mut count = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(deltas = count, "chat stream cancelled");
                    return Ok(StreamOutcome::Cancelled);
                }
                next = deltas.next() => match next {
                    Some(Ok(delta)) => {
                        // The sink may have cancelled while handling the previous delta.
                        if cancel.is_cancelled() {
                            return Ok(StreamOutcome::Cancelled);
                        }
                        count += 1;
                        trace!(len = delta.len(), "delta");
                        sink.on_delta(&delta);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, deltas = count, "chat stream broke");
                        return Err(e);
                    }
                    None => break,
                },
            }
        }

        if cancel.is_cancelled() {
            return Ok(StreamOutcome::Cancelled);
        }
        sink.on_done();
        info!(
            deltas = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chat stream completed"
        );
        Ok(StreamOutcome::Completed)
    }
}
