//! Core `LlmClient` trait with the HTTP (`ApiClient`) and offline
//! (`EchoLlm`) implementations.
//!
//! `ApiClient` calls any OpenAI-compatible `/v1/chat/completions` endpoint
//! (Ollama in OpenAI mode, OpenAI, Groq, LM Studio, vLLM).  With
//! `streaming = true` the reply arrives as server-sent events and each
//! `delta.content` is yielded as one fragment.
//! All connection details come from [`LlmConfig`]; nothing is hardcoded.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LlmConfig;

// ---------------------------------------------------------------------------
// LlmError
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to a language model.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("LLM request timed out")]
    Timeout,

    /// Non-2xx response.
    #[error("LLM endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The HTTP response could not be parsed as expected JSON.
    #[error("failed to parse LLM response: {0}")]
    Parse(String),

    /// The SSE stream broke off.
    #[error("LLM stream failed: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// One chat message in OpenAI wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Ordered reply fragments.
pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

// ---------------------------------------------------------------------------
// LlmClient trait
// ---------------------------------------------------------------------------

/// Async language-model client.
///
/// Implementors must be `Send + Sync` so they can be shared across tasks
/// (e.g. wrapped in `Arc<dyn LlmClient>`).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Start a completion and stream its text fragments in order.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<FragmentStream, LlmError>;

    /// Run a completion to the end and concatenate every fragment.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let mut stream = self.complete(messages).await?;
        let mut out = String::new();
        while let Some(fragment) = stream.next().await {
            out.push_str(&fragment?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// ApiClient
// ---------------------------------------------------------------------------

/// Calls an OpenAI-compatible `/v1/chat/completions` endpoint.
///
/// The `Authorization: Bearer …` header is attached **only** when
/// `config.api_key` is a non-empty string, which keeps local providers such
/// as Ollama working without credentials.
pub struct ApiClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl ApiClient {
    /// Build an `ApiClient` from application config.
    ///
    /// The HTTP client carries the per-request timeout from
    /// `config.timeout_secs`; a default client is used if the builder fails.
    pub fn from_config(config: &LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            config: config.clone(),
        }
    }

    fn body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        serde_json::json!({
            "model":       self.config.model,
            "messages":    messages,
            "stream":      self.config.streaming,
            "temperature": self.config.temperature,
            "max_tokens":  self.config.max_tokens,
        })
    }
}

/// `delta.content` of one streamed chunk, if any.
fn delta_content(data: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(data).ok()?;
    let choice = json["choices"].get(0)?;
    choice["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `message.content` of a blocking response.
fn message_content(json: &serde_json::Value) -> Result<String, LlmError> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| LlmError::Parse("missing choices[0].message.content".into()))
}

#[async_trait]
impl LlmClient for ApiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<FragmentStream, LlmError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut req = self.client.post(&url).json(&self.body(messages));

        let key = self.config.api_key.as_deref().unwrap_or("");
        if !key.is_empty() {
            req = req.bearer_auth(key);
        }

        log::debug!("llm: POST {url} ({} messages)", messages.len());
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if !self.config.streaming {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| LlmError::Parse(e.to_string()))?;
            let content = message_content(&json)?;
            return Ok(stream::once(async move { Ok(content) }).boxed());
        }

        let events = response.bytes_stream().eventsource();
        let fragments = events
            .take_while(|event| {
                let done = matches!(event, Ok(e) if e.data.trim() == "[DONE]");
                futures::future::ready(!done)
            })
            .filter_map(|event| async move {
                match event {
                    Ok(e) => {
                        let fragment = delta_content(&e.data);
                        if fragment.is_none() {
                            log::trace!("llm: skipping SSE event {:?}", e.data);
                        }
                        fragment.map(Ok)
                    }
                    Err(e) => Some(Err(LlmError::Stream(e.to_string()))),
                }
            });
        Ok(fragments.boxed())
    }
}

// ---------------------------------------------------------------------------
// EchoLlm
// ---------------------------------------------------------------------------

/// Offline stand-in that echoes the last message.
///
/// The reply is `"Echo reply: <last message>"` cut to `max_tokens`
/// characters.  Useful for wiring tests and running without credentials.
pub struct EchoLlm {
    max_tokens: usize,
}

impl EchoLlm {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

#[async_trait]
impl LlmClient for EchoLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<FragmentStream, LlmError> {
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        let reply: String = format!("Echo reply: {last}")
            .chars()
            .take(self.max_tokens)
            .collect();
        Ok(stream::once(async move { Ok(reply) }).boxed())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
