//! LLM gateway -- the single capability every agent uses for inference.
//!
//! One operation: `complete(messages, temperature, response_format)`.
//! The gateway hides the vendor behind [`LlmProvider`], enforces a global
//! concurrency bound, applies a per-call timeout, and honors request
//! cancellation at every suspension point. JSON mode strips markdown
//! fences and retries once with a stricter system message before giving up
//! with [`LlmError::Parse`].

pub mod json;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default per-call timeout.
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

/// Default global concurrency bound for in-flight completions.
const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Buffer size for streaming deltas.
const STREAM_BUFFER: usize = 32;

/// Message role in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single turn handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Requested output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// The model must emit a single valid JSON document.
    JsonObject,
}

/// A completion request. Temperature is clamped to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatTurn>,
    pub temperature: f32,
    pub format: ResponseFormat,
    pub max_tokens: u32,
}

/// Default token budget per completion.
const DEFAULT_MAX_TOKENS: u32 = 2048;

impl CompletionRequest {
    /// Plain-text completion.
    pub fn text(messages: Vec<ChatTurn>, temperature: f32) -> Self {
        Self {
            messages,
            temperature: temperature.clamp(0.0, 1.0),
            format: ResponseFormat::Text,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// JSON-mode completion.
    pub fn json(messages: Vec<ChatTurn>, temperature: f32) -> Self {
        Self {
            messages,
            temperature: temperature.clamp(0.0, 1.0),
            format: ResponseFormat::JsonObject,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Gateway error types.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request to the provider failed.
    #[error("completion request failed: {0}")]
    RequestFailed(String),
    /// The requested model is not available.
    #[error("model not available: {0}")]
    ModelUnavailable(String),
    /// JSON mode returned non-conforming output after sanitization and one retry.
    #[error("model returned non-conforming JSON: {0}")]
    Parse(String),
    /// The per-call timeout elapsed.
    #[error("completion timed out")]
    Timeout,
    /// The request was cancelled; no side effects occurred.
    #[error("completion cancelled")]
    Cancelled,
}

/// Trait for LLM vendors.
///
/// Allows swapping between real HTTP providers and mocks for testing.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for the given request.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// Generate a completion as an ordered stream of deltas.
    ///
    /// The concatenation of all deltas is byte-accurate equal to the
    /// non-streaming result. The default implementation emits the full
    /// completion as a single delta.
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<mpsc::Receiver<String>, LlmError> {
        let full = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(1);
        // Receiver may already be dropped; nothing to do then.
        let _send = tx.send(full).await;
        Ok(rx)
    }
}

/// The LLM gateway: bounded, timed, cancellable access to one provider.
pub struct LlmGateway {
    provider: Box<dyn LlmProvider>,
    limiter: Arc<Semaphore>,
    call_timeout: Duration,
}

impl LlmGateway {
    /// Wrap a provider with the default concurrency bound and timeout.
    pub fn new(provider: Box<dyn LlmProvider>) -> Self {
        Self::with_limits(
            provider,
            DEFAULT_MAX_CONCURRENCY,
            Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        )
    }

    /// Wrap a provider with explicit limits.
    pub fn with_limits(
        provider: Box<dyn LlmProvider>,
        max_concurrency: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
            call_timeout,
        }
    }

    /// Run a completion.
    ///
    /// Suspension points (queueing for a permit, the provider call) honor
    /// `cancel`; a cancelled call returns [`LlmError::Cancelled`] without
    /// side effects.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            permit = self.limiter.acquire() => permit
                .map_err(|_| LlmError::RequestFailed("gateway shut down".to_owned()))?,
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = tokio::time::timeout(self.call_timeout, self.provider.complete(request)) => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(LlmError::Timeout),
                }
            }
        }
    }

    /// Run a JSON-mode completion and parse the result.
    ///
    /// Markdown fences are stripped before parsing. On a parse failure the
    /// call is retried exactly once with a stricter "return only JSON"
    /// system message; a second failure surfaces [`LlmError::Parse`].
    pub async fn complete_json(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, LlmError> {
        let mut first = request.clone();
        first.format = ResponseFormat::JsonObject;

        let raw = self.complete(&first, cancel).await?;
        match json::parse_json_lenient(&raw) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, "JSON completion failed to parse, retrying with strict prompt");

                let mut strict = first.clone();
                strict.messages.insert(
                    0,
                    ChatTurn::system(json::STRICT_JSON_SYSTEM_MESSAGE),
                );
                let retry_raw = self.complete(&strict, cancel).await?;
                json::parse_json_lenient(&retry_raw).map_err(|_| {
                    LlmError::Parse(json::truncate_for_error(&retry_raw, 200).to_owned())
                })
            }
        }
    }

    /// Run a completion as a stream of deltas.
    ///
    /// The concatenated deltas equal the non-streaming result byte for byte.
    pub async fn complete_stream(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<mpsc::Receiver<String>, LlmError> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            permit = self.limiter.acquire() => permit
                .map_err(|_| LlmError::RequestFailed("gateway shut down".to_owned()))?,
        };

        let inner = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = tokio::time::timeout(self.call_timeout, self.provider.complete_stream(request)) => {
                match result {
                    Ok(inner) => inner?,
                    Err(_) => return Err(LlmError::Timeout),
                }
            }
        };

        // Re-buffer so the permit can be released once the provider has
        // produced its stream; deltas are forwarded in order.
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let cancel = cancel.clone();
        let mut inner = inner;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    delta = inner.recv() => match delta {
                        Some(d) => {
                            if tx.send(d).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });

        debug!("streaming completion started");
        Ok(rx)
    }
}
