//! LLM provider abstraction layer for multi-model support.
//!
//! Response shapes differ across providers, so every backend is wrapped in
//! an adapter that exposes one normalized [`LlmProvider::send`] contract.
//! The agent loop's state machine stays provider-agnostic: it sees only
//! [`CompletionRequest`] in and [`ProviderReply`] out.
//!
//! # Architecture
//!
//! The [`LlmProvider`] trait is:
//!
//! - **Object-safe**: supports dynamic dispatch via `Arc<dyn LlmProvider>`
//! - **Thread-safe**: `Send + Sync` bounds enable concurrent sessions
//! - **Async-first**: the provider call is the loop's only suspension point
//!
//! Transient failures (HTTP 429/5xx, transport timeouts) are retried with
//! exponential backoff through [`send_with_retry`]; client errors (other
//! 4xx) never are.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmConfig;

// =============================================================================
// Backoff Constants and Calculation
// =============================================================================

/// Base backoff delay in milliseconds for retry attempts.
pub const RETRY_BACKOFF_BASE_MS: u64 = 2000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Multiplier for exponential backoff.
pub const BACKOFF_MULTIPLIER: u64 = 2;

/// Calculate exponential backoff delay for a given attempt number.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use warden::provider::calculate_backoff;
///
/// assert_eq!(calculate_backoff(1), Duration::from_millis(2000));
/// assert_eq!(calculate_backoff(2), Duration::from_millis(4000));
/// assert_eq!(calculate_backoff(3), Duration::from_millis(8000));
/// ```
#[must_use]
pub fn calculate_backoff(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let multiplier = BACKOFF_MULTIPLIER.saturating_pow(exponent);
    let delay = RETRY_BACKOFF_BASE_MS.saturating_mul(multiplier);
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}

// =============================================================================
// Normalized Request / Reply Types
// =============================================================================

/// Message roles in the running transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// A tool result fed back to the model.
    Tool,
}

/// One transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on `Role::Tool` messages: the tool call this result answers.
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// An assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// A tool result answering the given call.
    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// One declared tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A tool invocation returned by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Token accounting for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Accumulate another call's usage into this one.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    ToolUse,
    MaxTokens,
    #[default]
    Unknown,
}

/// Normalized request handed to every adapter.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
}

/// Normalized reply every adapter produces.
#[derive(Debug, Clone, Default)]
pub struct ProviderReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub stop_reason: StopReason,
}

// =============================================================================
// Provider Errors
// =============================================================================

/// Errors from provider interactions, classified for retry decisions.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Rate limit exceeded - retry with backoff.
    #[error("Rate limit exceeded: {message} (retry after {retry_after_secs}s)")]
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },

    /// Authentication failed - check API key. Never retried.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Invalid request - check prompt/parameters. Never retried.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Server-side failure - may be transient.
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Network/connection failure.
    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The response body could not be interpreted.
    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl ProviderError {
    /// Check whether the request should be retried.
    ///
    /// Only rate limits, server errors, connection failures, and timeouts
    /// qualify; a 4xx means the request itself is wrong and retrying would
    /// burn budget for the same answer.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::ConnectionError { .. }
                | Self::Timeout { .. }
        )
    }

    /// Recommended delay before the next attempt, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(Duration::from_secs(*retry_after_secs)),
            Self::ServerError { .. } | Self::ConnectionError { .. } => {
                Some(Duration::from_secs(5))
            }
            Self::Timeout { .. } => Some(Duration::from_secs(10)),
            _ => None,
        }
    }

    /// Classify an HTTP status + body into a provider error.
    #[must_use]
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed { message },
            429 => Self::RateLimited {
                message,
                retry_after_secs: 30,
            },
            400..=499 => Self::InvalidRequest { message },
            _ => Self::ServerError { status, message },
        }
    }

    /// Classify a transport-level reqwest failure.
    #[must_use]
    pub fn from_transport(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout_secs }
        } else {
            Self::ConnectionError {
                message: err.to_string(),
            }
        }
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// Abstraction over LLM backends.
#[async_trait]
pub trait LlmProvider: Send + Sync + std::fmt::Debug {
    /// Send one completion request and return the normalized reply.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ProviderError`]; callers decide on retries via
    /// [`ProviderError::is_retryable`].
    async fn send(&self, request: &CompletionRequest) -> Result<ProviderReply, ProviderError>;

    /// Provider name ("anthropic", "openai", "mock").
    fn name(&self) -> &str;

    /// Model identifier in use.
    fn model(&self) -> &str;
}

/// Send with a bounded retry budget for transient failures only.
///
/// `max_retries` counts *additional* attempts after the first; the backoff
/// between attempts is the larger of the exponential schedule and the
/// error's own recommended delay, capped at [`MAX_BACKOFF_MS`].
///
/// # Errors
///
/// Returns the final error once the budget is exhausted or immediately for
/// a non-retryable failure.
pub async fn send_with_retry(
    provider: &dyn LlmProvider,
    request: &CompletionRequest,
    max_retries: u32,
) -> Result<ProviderReply, ProviderError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match provider.send(request).await {
            Ok(reply) => return Ok(reply),
            Err(err) if err.is_retryable() && attempt <= max_retries => {
                let backoff = calculate_backoff(attempt)
                    .max(err.retry_after().unwrap_or(Duration::ZERO))
                    .min(Duration::from_millis(MAX_BACKOFF_MS));
                warn!(
                    "Provider {} attempt {} failed ({}), retrying in {:?}",
                    provider.name(),
                    attempt,
                    err,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => {
                debug!(
                    "Provider {} giving up after {} attempt(s): {}",
                    provider.name(),
                    attempt,
                    err
                );
                return Err(err);
            }
        }
    }
}

// =============================================================================
// Provider Factory
// =============================================================================

/// Create the configured provider.
///
/// # Errors
///
/// Returns a configuration error for an unknown provider or a missing API
/// key where one is required.
pub fn create_provider(
    config: &LlmConfig,
    api_key: Option<String>,
) -> crate::error::Result<Arc<dyn LlmProvider>> {
    config
        .validate()
        .map_err(crate::error::WardenError::config)?;

    let require_key = || {
        api_key.clone().ok_or_else(|| {
            crate::error::WardenError::config(format!(
                "provider '{}' requires an API key (set {})",
                config.provider, config.api_key_env
            ))
        })
    };

    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(
            require_key()?,
            config.model.clone(),
        ))),
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            require_key()?,
            config.model.clone(),
        ))),
        "mock" => Ok(Arc::new(MockProvider::new().completing("done"))),
        other => Err(crate::error::WardenError::config(format!(
            "Unknown provider '{other}'. Valid options: anthropic, openai, mock"
        ))),
    }
}

// =============================================================================
// Cost Estimation
// =============================================================================

/// Per-million-token rates (input, output) in USD for known models.
///
/// Token/cost arithmetic beyond this lookup lives with the caller; this is
/// just enough for the ledger to record real spend after a session.
#[must_use]
pub fn cost_per_million_tokens(model: &str) -> (f64, f64) {
    match model {
        m if m.contains("opus") => (15.0, 75.0),
        m if m.contains("sonnet") => (3.0, 15.0),
        m if m.contains("haiku") => (0.25, 1.25),
        m if m.contains("gpt-4o-mini") => (0.15, 0.60),
        m if m.contains("gpt-4o") => (2.50, 10.0),
        _ => (3.0, 15.0),
    }
}

/// Estimate the USD cost of accumulated usage for a model.
#[must_use]
pub fn estimate_cost(model: &str, usage: TokenUsage) -> f64 {
    let (input_rate, output_rate) = cost_per_million_tokens(model);
    (usage.input_tokens as f64 * input_rate + usage.output_tokens as f64 * output_rate) / 1_000_000.0
}

// =============================================================================
// Mock Provider
// =============================================================================

/// One scripted outcome for the mock: a reply or an injected failure.
#[derive(Debug, Clone)]
enum ScriptedOutcome {
    Reply(ProviderReply),
    Failure { retryable: bool },
}

/// Scripted provider for testing.
///
/// Outcomes are consumed in order; once the script is exhausted the mock
/// keeps returning its fallback reply. Failure injection mirrors the real
/// adapters' transient and client errors for retry testing.
#[derive(Debug)]
pub struct MockProvider {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    fallback: ProviderReply,
    model: String,
    call_count: AtomicU32,
    fail_count: AtomicU32,
    fail_retryable: bool,
    delay_ms: u64,
}

impl MockProvider {
    /// Create a mock with an empty script and a plain-text fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: ProviderReply {
                text: Some("ok".to_string()),
                ..ProviderReply::default()
            },
            model: "mock-model".to_string(),
            call_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(0),
            fail_retryable: true,
            delay_ms: 0,
        }
    }

    /// Sleep this long before every reply, to let tests overlap sessions.
    #[must_use]
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Push a scripted reply.
    #[must_use]
    pub fn with_reply(self, reply: ProviderReply) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedOutcome::Reply(reply));
        self
    }

    /// Push a scripted failure at this position in the script.
    #[must_use]
    pub fn with_scripted_failure(self, retryable: bool) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedOutcome::Failure { retryable });
        self
    }

    /// Push a scripted reply containing a single tool call.
    #[must_use]
    pub fn with_tool_call(self, name: &str, arguments: serde_json::Value) -> Self {
        let id = format!(
            "call-{}",
            self.script.lock().unwrap().len() + 1
        );
        self.with_reply(ProviderReply {
            text: None,
            tool_calls: vec![ToolCall {
                id,
                name: name.to_string(),
                arguments,
            }],
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            stop_reason: StopReason::ToolUse,
        })
    }

    /// Make the fallback reply a `mark_complete` call so any session using
    /// this mock terminates cleanly.
    #[must_use]
    pub fn completing(self, summary: &str) -> Self {
        let mut this = self;
        this.fallback = ProviderReply {
            text: None,
            tool_calls: vec![ToolCall {
                id: "call-complete".to_string(),
                name: "mark_complete".to_string(),
                arguments: serde_json::json!({ "summary": summary }),
            }],
            usage: TokenUsage {
                input_tokens: 50,
                output_tokens: 20,
            },
            stop_reason: StopReason::ToolUse,
        };
        this
    }

    /// Fail the first `count` calls before serving the script.
    #[must_use]
    pub fn with_fail_count(self, count: u32, retryable: bool) -> Self {
        self.fail_count.store(count, Ordering::SeqCst);
        let mut this = self;
        this.fail_retryable = retryable;
        this
    }

    /// Number of `send` calls made so far.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn send(&self, _request: &CompletionRequest) -> Result<ProviderReply, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        let mock_error = |retryable: bool| {
            if retryable {
                ProviderError::ServerError {
                    status: 503,
                    message: "mock overloaded".to_string(),
                }
            } else {
                ProviderError::InvalidRequest {
                    message: "mock bad request".to_string(),
                }
            }
        };

        if self.fail_count.load(Ordering::SeqCst) > 0 {
            self.fail_count.fetch_sub(1, Ordering::SeqCst);
            return Err(mock_error(self.fail_retryable));
        }

        match self.script.lock().unwrap().pop_front() {
            Some(ScriptedOutcome::Reply(reply)) => Ok(reply),
            Some(ScriptedOutcome::Failure { retryable }) => Err(mock_error(retryable)),
            None => Ok(self.fallback.clone()),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
