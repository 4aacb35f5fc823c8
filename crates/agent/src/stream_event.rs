//! Agent-level streaming events.
//!
//! `AgentEvent` is the only thing that crosses the agent boundary outward.
//! A UI (or any other subscriber) renders content and reasoning as it
//! arrives, shows tool activity, and persists the final answer on
//! `Complete`.

use astrolabe_core::provider::Usage;
use astrolabe_core::tool::ToolCallRequest;
use serde::{Deserialize, Serialize};

/// Events emitted by the agent during one run.
///
/// - `content_chunk`      — partial answer token
/// - `reasoning_chunk`    — partial "thinking" token
/// - `tool_calls_started` — the model asked for one or more tools
/// - `tool_executing`     — a single tool call is about to run
/// - `tool_result`        — that tool call finished
/// - `token_usage`        — provider token accounting
/// - `retry_info`         — the transport is retrying (advisory)
/// - `model_info`         — which provider/model serves this run
/// - `error`              — the run failed; `retryable` says whether
///                          re-sending the turn may succeed
/// - `complete`           — the final answer; emitted at most once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Partial answer text from the LLM.
    ContentChunk { content: String },

    /// Partial reasoning text from the LLM.
    ReasoningChunk { content: String },

    /// The model requested tools; they will run in this order.
    ToolCallsStarted { calls: Vec<ToolCallRequest> },

    /// A tool call is being executed.
    ToolExecuting {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        success: bool,
        summary: String,
    },

    /// Token usage for one provider call.
    TokenUsage { usage: Usage },

    /// The provider transport is retrying.
    RetryInfo {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
    },

    /// Provider and model serving this run.
    ModelInfo { provider: String, model: String },

    /// Something went wrong.
    Error {
        kind: ErrorKind,
        message: String,
        retryable: bool,
    },

    /// The run finished with an answer.
    Complete {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        iterations: u32,
        tool_iterations: u32,
        tools_used: Vec<String>,
    },
}

/// What kind of failure an `Error` event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport or model failure
    Provider,
    /// Too many tool-bearing iterations
    ToolIterationCeiling,
    /// Too many iterations overall
    TotalIterationCeiling,
}

impl AgentEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ContentChunk { .. } => "content_chunk",
            Self::ReasoningChunk { .. } => "reasoning_chunk",
            Self::ToolCallsStarted { .. } => "tool_calls_started",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolResult { .. } => "tool_result",
            Self::TokenUsage { .. } => "token_usage",
            Self::RetryInfo { .. } => "retry_info",
            Self::ModelInfo { .. } => "model_info",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }

    /// Whether the run ends with this event.
    ///
    /// Every `Error` the loop emits ends the run, retryable or not; the flag
    /// is advice for the caller about re-sending the same turn, not a sign
    /// that the loop keeps going. `Complete` is followed by an `Error` only when a ceiling was hit, so a
    /// subscriber that stops at the first terminal event should keep draining
    /// until the channel closes if it cares about ceiling errors.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}
