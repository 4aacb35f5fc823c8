//! Shared test helpers for agent tests.

use std::sync::Mutex;

use astrolabe_core::error::{ProviderError, ToolError};
use astrolabe_core::provider::{
    NativeToolCall, Provider, ProviderEvent, ProviderRequest, ProviderStream, Usage,
};
use astrolabe_core::tool::{Tool, ToolContext, ToolExecutionResult};
use serde_json::Value;
use tokio::sync::mpsc;

/// A mock provider that replays one scripted event list per call.
///
/// Once the script runs out, `stream` fails with `NotConfigured`.
pub struct ScriptedProvider {
    turns: Mutex<Vec<Vec<ProviderEvent>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut turns = self.turns.lock().unwrap();
        if turns.is_empty() {
            return Err(ProviderError::NotConfigured("script exhausted".into()));
        }
        let events = turns.remove(0);

        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.try_send(event).unwrap();
        }
        Ok(rx)
    }
}

/// A provider that streams a few events and then never finishes.
pub struct HangingProvider {
    opening: Vec<ProviderEvent>,
    senders: Mutex<Vec<mpsc::Sender<ProviderEvent>>>,
}

impl HangingProvider {
    pub fn new(opening: Vec<ProviderEvent>) -> Self {
        Self {
            opening,
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Push a late event into every open stream.
    pub fn send_late(&self, event: ProviderEvent) {
        for tx in self.senders.lock().unwrap().iter() {
            let _ = tx.try_send(event.clone());
        }
    }
}

#[async_trait::async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ProviderStream, ProviderError> {
        let (tx, rx) = mpsc::channel(16);
        for event in &self.opening {
            tx.try_send(event.clone()).unwrap();
        }
        self.senders.lock().unwrap().push(tx);
        Ok(rx)
    }
}

/// A tool that records its calls and returns a fixed payload.
pub struct RecordingTool {
    name: String,
    payload: Value,
    calls: Mutex<Vec<(Value, ToolContext)>>,
}

impl RecordingTool {
    pub fn new(name: &str, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Value, ToolContext)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Returns a canned payload"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        arguments: Value,
        context: &ToolContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((arguments, context.clone()));
        Ok(ToolExecutionResult::success(
            self.payload.clone(),
            format!("{} ok", self.name),
        ))
    }
}

/// A tool whose execution always errors.
pub struct FailingTool;

#[async_trait::async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "get_broken"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _arguments: Value,
        _context: &ToolContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "get_broken".into(),
            reason: "ephemeris unavailable".into(),
        })
    }
}

/// A tool that never finishes on its own.
pub struct SlowTool;

#[async_trait::async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "get_slow"
    }

    fn description(&self) -> &str {
        "Takes an hour"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _arguments: Value,
        _context: &ToolContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(ToolExecutionResult::success(Value::Null, "done"))
    }
}

/// A tool that panics when executed.
pub struct PanickingTool;

#[async_trait::async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "get_panic"
    }

    fn description(&self) -> &str {
        "Always panics"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(
        &self,
        _arguments: Value,
        _context: &ToolContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        panic!("chart index out of range");
    }
}

pub fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

/// A plain text turn.
pub fn text_turn(text: &str) -> Vec<ProviderEvent> {
    vec![
        ProviderEvent::Content(text.into()),
        ProviderEvent::Usage(usage()),
        ProviderEvent::Done,
    ]
}

/// A turn with reasoning and no content.
pub fn reasoning_turn(reasoning: &str) -> Vec<ProviderEvent> {
    vec![ProviderEvent::Reasoning(reasoning.into()), ProviderEvent::Done]
}

/// A turn with optional content and one native tool call.
pub fn tool_turn(content: &str, name: &str, arguments: Value) -> Vec<ProviderEvent> {
    let mut events = Vec::new();
    if !content.is_empty() {
        events.push(ProviderEvent::Content(content.into()));
    }
    events.push(ProviderEvent::ToolCall(NativeToolCall {
        id: Some(format!("call_{name}")),
        name: name.into(),
        arguments,
    }));
    events.push(ProviderEvent::Done);
    events
}
