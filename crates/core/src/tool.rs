//! Tool trait and dispatcher contract.
//!
//! Tools are the domain capabilities the model can ask for (chart lookups,
//! profile updates, ...). The agent loop never calls a tool directly; it goes
//! through a [`ToolDispatcher`], which resolves a tool by name and returns a
//! structured [`ToolExecutionResult`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ToolError;
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;

/// A request to execute a tool, either native or extracted from text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique call ID within one iteration's batch
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value (an object in practice)
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    /// Generate a fresh synthetic call id.
    pub fn generate_id() -> String {
        format!("call_{}", uuid::Uuid::new_v4().simple())
    }

    /// Convert into the representation stored on an assistant message.
    pub fn to_message_tool_call(&self) -> MessageToolCall {
        MessageToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.to_string(),
        }
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Structured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Short human-readable line for the UI
    pub summary: String,
}

impl ToolExecutionResult {
    pub fn success(data: serde_json::Value, summary: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            summary: summary.into(),
        }
    }

    pub fn failure(error: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            summary: summary.into(),
        }
    }

    /// Serialize for a `Tool` role message fed back to the model.
    pub fn to_message_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.summary.clone())
    }
}

/// Ambient state handed to every tool invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolContext {
    /// The profile the conversation is about, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,

    /// The chat session driving this run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Free-form application state
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A single tool implementation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_planet_positions").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<ToolExecutionResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The call contract the agent loop depends on.
///
/// Implementations may return `Err`; the loop converts every error into a
/// failed [`ToolExecutionResult`] at the call site.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Definitions advertised to the provider.
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    /// Invoke `tool_name` with `arguments`.
    async fn dispatch(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<ToolExecutionResult, ToolError>;
}

/// A capability-keyed registry of tools.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn dispatch(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;
        tool.execute(arguments, context).await
    }
}
