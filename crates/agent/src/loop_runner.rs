//! The agent iteration loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use astrolabe_core::agent::AgentSettings;
use astrolabe_core::error::{Error, ToolError};
use astrolabe_core::message::{Message, MessageToolCall};
use astrolabe_core::provider::{Provider, ProviderRequest};
use astrolabe_core::tool::{ToolCallRequest, ToolContext, ToolDispatcher, ToolExecutionResult};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{IterationOutcome, IterationOutput, StreamAggregator};
use crate::emitter::EventEmitter;
use crate::state::IterationState;
use crate::stream_event::{AgentEvent, ErrorKind};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// A final answer was produced
    Completed,
    /// An iteration ceiling stopped the run after a best-effort answer
    CeilingReached,
    /// The provider failed
    Failed,
    /// The caller cancelled the run
    Cancelled,
}

/// Everything a caller needs after a run: the updated history for the next
/// turn plus whatever text should be persisted.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// The conversation with every message this run appended
    pub history: Vec<Message>,
    /// Final answer, or the partial text streamed before a failure/cancel
    pub content: Option<String>,
    /// Merged reasoning across iterations
    pub reasoning: Option<String>,
    pub iterations: u32,
    pub tool_iterations: u32,
    pub tools_used: Vec<String>,
    /// Failure description for `Failed` and `CeilingReached`
    pub error: Option<String>,
}

/// A run in progress.
///
/// Events arrive on `events` in production order. Dropping the event stream
/// cancels the run at its next suspension point.
pub struct AgentRun {
    pub events: UnboundedReceiverStream<AgentEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<RunOutcome>,
}

impl AgentRun {
    /// Abandon the run. No `Complete` is emitted afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event, or `None` once the run has finished.
    pub async fn next_event(&mut self) -> Option<AgentEvent> {
        self.events.next().await
    }

    /// Wait for the run to finish.
    pub async fn join(self) -> Result<RunOutcome, Error> {
        self.handle
            .await
            .map_err(|e| Error::Internal(format!("agent task failed: {e}")))
    }
}

#[derive(Debug, Clone, Copy)]
enum Ceiling {
    ToolIterations,
    TotalIterations,
}

impl Ceiling {
    fn label(self) -> &'static str {
        match self {
            Self::ToolIterations => "tool iteration",
            Self::TotalIterations => "total iteration",
        }
    }

    fn kind(self) -> ErrorKind {
        match self {
            Self::ToolIterations => ErrorKind::ToolIterationCeiling,
            Self::TotalIterations => ErrorKind::TotalIterationCeiling,
        }
    }
}

/// Drives one conversation turn: calls the model, runs the tools it asks
/// for, feeds results back and repeats until an answer is produced or a
/// ceiling is hit.
#[derive(Clone)]
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolDispatcher>,
    settings: AgentSettings,
    tool_context: ToolContext,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<dyn ToolDispatcher>) -> Self {
        Self {
            provider,
            tools,
            settings: AgentSettings::default(),
            tool_context: ToolContext::default(),
        }
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Ambient state passed to every tool dispatch.
    pub fn with_tool_context(mut self, context: ToolContext) -> Self {
        self.tool_context = context;
        self
    }

    pub fn with_max_tool_iterations(mut self, max: u32) -> Self {
        self.settings.max_tool_iterations = max;
        self
    }

    pub fn with_max_total_iterations(mut self, max: u32) -> Self {
        self.settings.max_total_iterations = max;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.settings.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.settings.max_tokens = Some(max);
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Spawn a run over `history` and return its event stream.
    pub fn start(&self, history: Vec<Message>, model: impl Into<String>) -> AgentRun {
        let cancel = CancellationToken::new();
        let (emitter, rx) = EventEmitter::channel(cancel.clone());
        let agent = self.clone();
        let model = model.into();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            agent.run(history, &model, &emitter, &task_cancel).await
        });

        AgentRun {
            events: UnboundedReceiverStream::new(rx),
            cancel,
            handle,
        }
    }

    /// Run the loop inside the caller's task.
    ///
    /// `cancel` is checked at every suspension point; it is normally the same
    /// token the emitter was built with.
    pub async fn run(
        &self,
        history: Vec<Message>,
        model: &str,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut history = history;
        let mut state = IterationState::new();
        let definitions = self.tools.definitions();

        info!(
            provider = self.provider.name(),
            model,
            messages = history.len(),
            "Starting agent run"
        );
        emitter.emit(AgentEvent::ModelInfo {
            provider: self.provider.name().to_string(),
            model: model.to_string(),
        });

        loop {
            if cancel.is_cancelled() {
                return self.cancelled(history, &state, None);
            }
            if state.total_iterations >= self.settings.max_total_iterations {
                return self.hit_ceiling(history, &mut state, emitter, Ceiling::TotalIterations);
            }

            state.begin_iteration();
            debug!(
                iteration = state.total_iterations,
                tool_iterations = state.tool_iterations,
                "Agent loop iteration"
            );

            let request = ProviderRequest {
                model: model.to_string(),
                messages: history.clone(),
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
                tools: definitions.clone(),
                stream: true,
            };

            let started = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(history, &state, None),
                started = self.provider.stream(request) => started,
            };

            let mut stream = match started {
                Ok(stream) => stream,
                Err(error) => {
                    warn!(error = %error, "Provider request failed");
                    emitter.emit(AgentEvent::Error {
                        kind: ErrorKind::Provider,
                        message: error.to_string(),
                        retryable: error.is_retryable(),
                    });
                    return self.failed(history, &state, None, error.to_string());
                }
            };

            let output = match StreamAggregator::new(emitter).consume(&mut stream, cancel).await {
                IterationOutcome::Completed(output) => output,
                IterationOutcome::Failed { error, partial } => {
                    warn!(error = %error, "Provider stream failed");
                    state.record_reasoning(&partial.reasoning);
                    return self.failed(history, &state, Some(partial), error.to_string());
                }
                IterationOutcome::Cancelled { partial } => {
                    state.record_reasoning(&partial.reasoning);
                    return self.cancelled(history, &state, Some(partial));
                }
            };
            drop(stream);
            state.record_reasoning(&output.reasoning);

            if !output.tool_calls.is_empty() {
                state.accept_content(&output.cleaned_content);

                if state.tool_iterations >= self.settings.max_tool_iterations {
                    return self.hit_ceiling(history, &mut state, emitter, Ceiling::ToolIterations);
                }

                if !self
                    .run_tool_phase(&output, &mut history, &mut state, emitter, cancel)
                    .await
                {
                    return self.cancelled(history, &state, None);
                }
                state.tool_iterations += 1;
                continue;
            }

            if output.cleaned_content.is_empty() && !output.reasoning.trim().is_empty() {
                if state.can_request_continuation(self.settings.max_total_iterations) {
                    debug!("Reasoning-only answer after tool use, asking for a final answer");
                    state.mark_continuation_applied();
                    history.push(
                        Message::user(self.settings.continuation_prompt.clone())
                            .with_metadata("synthetic", serde_json::Value::Bool(true)),
                    );
                    continue;
                }

                debug!(
                    continuation_applied = state.continuation_applied(),
                    "Using reasoning as the final answer"
                );
                let answer = output.reasoning.trim().to_string();
                return self.finalize(history, &mut state, emitter, Some(answer));
            }

            state.accept_content(&output.cleaned_content);
            return self.finalize(history, &mut state, emitter, None);
        }
    }

    /// Execute every pending call in order. Returns `false` if cancelled.
    async fn run_tool_phase(
        &self,
        output: &IterationOutput,
        history: &mut Vec<Message>,
        state: &mut IterationState,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> bool {
        let calls = &output.tool_calls;
        debug!(
            count = calls.len(),
            native = output.native_tool_calls,
            "Executing tool calls"
        );

        let refs: Vec<MessageToolCall> = calls.iter().map(ToolCallRequest::to_message_tool_call).collect();
        history.push(Message::assistant_with_tool_calls(
            output.cleaned_content.clone(),
            refs,
        ));
        emitter.emit(AgentEvent::ToolCallsStarted {
            calls: calls.clone(),
        });

        for (index, call) in calls.iter().enumerate() {
            let Some(result) = self.execute_tool(call, emitter, cancel).await else {
                // Every call in the assistant message needs a result, or the
                // history is rejected when it is replayed next turn.
                for pending in &calls[index..] {
                    let cancelled = ToolExecutionResult::failure(
                        "cancelled before completion",
                        format!("{} cancelled", pending.name),
                    );
                    history.push(Message::tool_result(
                        &pending.id,
                        &pending.name,
                        cancelled.to_message_content(),
                    ));
                }
                return false;
            };

            state.record_tool_use(&call.name);
            emitter.emit(AgentEvent::ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                success: result.success,
                summary: result.summary.clone(),
            });
            history.push(Message::tool_result(
                &call.id,
                &call.name,
                result.to_message_content(),
            ));
        }
        true
    }

    /// Dispatch one call. Errors and panics become failed results; `None`
    /// means the run was cancelled while the tool was running.
    async fn execute_tool(
        &self,
        call: &ToolCallRequest,
        emitter: &EventEmitter,
        cancel: &CancellationToken,
    ) -> Option<ToolExecutionResult> {
        emitter.emit(AgentEvent::ToolExecuting {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
        debug!(tool = %call.name, id = %call.id, "Dispatching tool");

        let dispatch = AssertUnwindSafe(self.tools.dispatch(
            &call.name,
            call.arguments.clone(),
            &self.tool_context,
        ))
        .catch_unwind();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            outcome = dispatch => outcome,
        };

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                warn!(tool = %call.name, error = %error, "Tool execution failed");
                ToolExecutionResult::failure(error.to_string(), format!("{} failed", call.name))
            }
            Err(panic) => {
                let error = ToolError::Panicked {
                    tool_name: call.name.clone(),
                    message: panic_message(&*panic),
                };
                warn!(tool = %call.name, error = %error, "Tool panicked");
                ToolExecutionResult::failure(error.to_string(), format!("{} failed", call.name))
            }
        };
        Some(result)
    }

    fn finalize(
        &self,
        mut history: Vec<Message>,
        state: &mut IterationState,
        emitter: &EventEmitter,
        answer: Option<String>,
    ) -> RunOutcome {
        let content = answer
            .or_else(|| state.final_content().map(str::to_string))
            .unwrap_or_else(|| self.settings.empty_response.clone());

        history.push(Message::assistant(content.clone()));
        self.emit_complete(state, emitter, &content);
        info!(
            iterations = state.total_iterations,
            tool_iterations = state.tool_iterations,
            "Agent run complete"
        );

        self.outcome(RunStatus::Completed, history, state, Some(content), None)
    }

    fn hit_ceiling(
        &self,
        mut history: Vec<Message>,
        state: &mut IterationState,
        emitter: &EventEmitter,
        ceiling: Ceiling,
    ) -> RunOutcome {
        let limit = match ceiling {
            Ceiling::ToolIterations => self.settings.max_tool_iterations,
            Ceiling::TotalIterations => self.settings.max_total_iterations,
        };
        let error = Error::IterationCeiling {
            ceiling: ceiling.label().to_string(),
            limit,
        };
        warn!(
            iterations = state.total_iterations,
            tool_iterations = state.tool_iterations,
            "{error}"
        );

        let content = state
            .final_content()
            .or_else(|| state.latest_reasoning())
            .map(str::to_string)
            .unwrap_or_else(|| self.settings.empty_response.clone());

        history.push(Message::assistant(content.clone()));
        self.emit_complete(state, emitter, &content);
        emitter.emit(AgentEvent::Error {
            kind: ceiling.kind(),
            message: error.to_string(),
            retryable: false,
        });

        self.outcome(
            RunStatus::CeilingReached,
            history,
            state,
            Some(content),
            Some(error.to_string()),
        )
    }

    fn emit_complete(&self, state: &mut IterationState, emitter: &EventEmitter, content: &str) {
        if state.done {
            return;
        }
        state.done = true;
        emitter.emit(AgentEvent::Complete {
            content: content.to_string(),
            reasoning: state.merged_reasoning(),
            iterations: state.total_iterations,
            tool_iterations: state.tool_iterations,
            tools_used: state.tools_used().to_vec(),
        });
    }

    fn failed(
        &self,
        history: Vec<Message>,
        state: &IterationState,
        partial: Option<IterationOutput>,
        error: String,
    ) -> RunOutcome {
        let content = partial_content(state, partial.as_ref());
        self.outcome(RunStatus::Failed, history, state, content, Some(error))
    }

    fn cancelled(
        &self,
        history: Vec<Message>,
        state: &IterationState,
        partial: Option<IterationOutput>,
    ) -> RunOutcome {
        info!(iterations = state.total_iterations, "Agent run cancelled");
        let content = partial_content(state, partial.as_ref());
        self.outcome(RunStatus::Cancelled, history, state, content, None)
    }

    fn outcome(
        &self,
        status: RunStatus,
        history: Vec<Message>,
        state: &IterationState,
        content: Option<String>,
        error: Option<String>,
    ) -> RunOutcome {
        RunOutcome {
            status,
            history,
            content,
            reasoning: state.merged_reasoning(),
            iterations: state.total_iterations,
            tool_iterations: state.tool_iterations,
            tools_used: state.tools_used().to_vec(),
            error,
        }
    }
}

/// Text streamed in the interrupted iteration, else the last accepted answer.
fn partial_content(state: &IterationState, partial: Option<&IterationOutput>) -> Option<String> {
    partial
        .map(|p| p.content.trim())
        .filter(|c| !c.is_empty())
        .or_else(|| state.final_content())
        .map(str::to_string)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
