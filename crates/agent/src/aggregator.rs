//! Per-iteration stream aggregation.
//!
//! Folds one provider stream into content/reasoning buffers and a list of
//! pending tool calls, forwarding display events to the caller as they
//! arrive.

use astrolabe_core::error::ProviderError;
use astrolabe_core::provider::{NativeToolCall, ProviderEvent, ProviderStream, Usage};
use astrolabe_core::tool::ToolCallRequest;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::emitter::EventEmitter;
use crate::extractor::extract_tool_calls;
use crate::stream_event::{AgentEvent, ErrorKind};

/// What one iteration produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationOutput {
    /// Raw content exactly as streamed
    pub content: String,
    /// Content with tool-call syntax removed, trimmed
    pub cleaned_content: String,
    /// Reasoning text (whitespace-only tokens dropped)
    pub reasoning: String,
    /// Tool calls to execute, native or extracted
    pub tool_calls: Vec<ToolCallRequest>,
    /// Whether `tool_calls` came from the provider's structured field
    pub native_tool_calls: bool,
    /// Last usage report seen
    pub usage: Option<Usage>,
}

/// How an iteration's stream ended.
#[derive(Debug)]
pub enum IterationOutcome {
    /// The stream finished normally.
    Completed(IterationOutput),
    /// The provider reported an error; `partial` holds what arrived before it.
    Failed {
        error: ProviderError,
        partial: IterationOutput,
    },
    /// The run was cancelled mid-stream.
    Cancelled { partial: IterationOutput },
}

enum Step {
    Continue,
    Done,
    Failed(ProviderError),
}

/// Folds provider events for a single iteration.
pub struct StreamAggregator<'a> {
    emitter: &'a EventEmitter,
    content: String,
    reasoning: String,
    pending: Vec<ToolCallRequest>,
    usage: Option<Usage>,
}

impl<'a> StreamAggregator<'a> {
    pub fn new(emitter: &'a EventEmitter) -> Self {
        Self {
            emitter,
            content: String::new(),
            reasoning: String::new(),
            pending: Vec::new(),
            usage: None,
        }
    }

    /// Drain `stream` until it finishes, fails, or `cancel` fires.
    ///
    /// On cancellation the stream is abandoned immediately; nothing received
    /// after that point is forwarded.
    pub async fn consume(
        mut self,
        stream: &mut ProviderStream,
        cancel: &CancellationToken,
    ) -> IterationOutcome {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Iteration cancelled mid-stream");
                    return IterationOutcome::Cancelled { partial: self.into_partial() };
                }
                event = stream.recv() => event,
            };

            let Some(event) = event else {
                debug!("Provider stream closed without a done marker");
                break;
            };

            match self.handle(event) {
                Step::Continue => {}
                Step::Done => break,
                Step::Failed(error) => {
                    return IterationOutcome::Failed {
                        error,
                        partial: self.into_partial(),
                    };
                }
            }

            if cancel.is_cancelled() {
                return IterationOutcome::Cancelled {
                    partial: self.into_partial(),
                };
            }
        }

        IterationOutcome::Completed(self.finish())
    }

    fn handle(&mut self, event: ProviderEvent) -> Step {
        match event {
            ProviderEvent::Content(text) => {
                if !text.is_empty() {
                    self.content.push_str(&text);
                    self.emitter.emit(AgentEvent::ContentChunk { content: text });
                }
            }
            ProviderEvent::Reasoning(text) => {
                if text.trim().is_empty() {
                    trace!("Dropping whitespace-only reasoning token");
                } else {
                    self.reasoning.push_str(&text);
                    self.emitter.emit(AgentEvent::ReasoningChunk { content: text });
                }
            }
            ProviderEvent::ToolCall(call) => self.push_native_call(call),
            ProviderEvent::Usage(usage) => {
                self.usage = Some(usage);
                self.emitter.emit(AgentEvent::TokenUsage { usage });
            }
            ProviderEvent::Retry {
                attempt,
                max_attempts,
                delay_ms,
                reason,
            } => {
                self.emitter.emit(AgentEvent::RetryInfo {
                    attempt,
                    max_attempts,
                    delay_ms,
                    reason,
                });
            }
            ProviderEvent::Error(error) => {
                self.emitter.emit(AgentEvent::Error {
                    kind: ErrorKind::Provider,
                    message: error.to_string(),
                    retryable: error.is_retryable(),
                });
                return Step::Failed(error);
            }
            ProviderEvent::Done => return Step::Done,
        }
        Step::Continue
    }

    fn push_native_call(&mut self, call: NativeToolCall) {
        let id = match call.id {
            Some(id) if !id.is_empty() && !self.pending.iter().any(|p| p.id == id) => id,
            _ => ToolCallRequest::generate_id(),
        };
        let arguments = match call.arguments {
            Value::Object(_) => call.arguments,
            Value::String(raw) => serde_json::from_str::<Value>(&raw)
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            _ => Value::Object(serde_json::Map::new()),
        };
        self.pending.push(ToolCallRequest {
            id,
            name: call.name,
            arguments,
        });
    }

    /// Close out a completed iteration, falling back to text extraction when
    /// the provider returned no structured tool calls.
    fn finish(self) -> IterationOutput {
        let extraction = extract_tool_calls(&self.content);
        let native_tool_calls = !self.pending.is_empty();
        let tool_calls = if native_tool_calls {
            self.pending
        } else {
            if !extraction.calls.is_empty() {
                debug!(count = extraction.calls.len(), "Extracted tool calls from content");
            }
            extraction.calls
        };

        IterationOutput {
            content: self.content,
            cleaned_content: extraction.cleaned,
            reasoning: self.reasoning,
            tool_calls,
            native_tool_calls,
            usage: self.usage,
        }
    }

    fn into_partial(self) -> IterationOutput {
        IterationOutput {
            cleaned_content: self.content.trim().to_string(),
            content: self.content,
            reasoning: self.reasoning,
            tool_calls: Vec::new(),
            native_tool_calls: false,
            usage: self.usage,
        }
    }
}
