//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider takes a conversation and streams back an ordered sequence of
//! [`ProviderEvent`]s: content tokens, reasoning tokens, native tool calls,
//! usage, advisory retry notices, errors and a final done marker.
//!
//! Transport concerns (HTTP, SSE framing, retry/backoff) live entirely behind
//! this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "anthropic/claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// The conversation messages, in order
    pub messages: Vec<Message>,

    /// Temperature; provider default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A tool call returned natively by the provider (structured field, not text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeToolCall {
    /// Provider-assigned id; some providers omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Tool name
    pub name: String,

    /// Decoded arguments
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// One event on a provider stream.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Partial answer text
    Content(String),

    /// Partial "thinking" text on the secondary channel
    Reasoning(String),

    /// A fully assembled native tool call
    ToolCall(NativeToolCall),

    /// Token accounting, usually near the end of the stream
    Usage(Usage),

    /// The transport is about to retry the request
    Retry {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
    },

    /// The request failed; no further events follow
    Error(ProviderError),

    /// The response is complete
    Done,
}

/// The receiving half of a provider stream.
pub type ProviderStream = mpsc::Receiver<ProviderEvent>;

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The agent loop calls `stream()`
/// without knowing which provider is being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter", "ollama").
    fn name(&self) -> &str;

    /// Start a request and return its event stream.
    ///
    /// Errors returned here mean the request could not even be started;
    /// failures after that point arrive as [`ProviderEvent::Error`].
    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, ProviderError>;

    /// List available models for this provider.
    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
