//! Agent loop settings.

use serde::{Deserialize, Serialize};

/// Tunables for one agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Ceiling on iterations in which at least one tool was executed
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// Ceiling on all iterations, tool-bearing or not
    #[serde(default = "default_max_total_iterations")]
    pub max_total_iterations: u32,

    /// Sampling temperature forwarded to the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens per provider response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Synthetic user instruction injected when a model answers with
    /// reasoning only after using tools
    #[serde(default = "default_continuation_prompt")]
    pub continuation_prompt: String,

    /// Text used when a run ends with nothing to show
    #[serde(default = "default_empty_response")]
    pub empty_response: String,
}

fn default_max_tool_iterations() -> u32 {
    5
}
fn default_max_total_iterations() -> u32 {
    10
}
fn default_continuation_prompt() -> String {
    "Based on the tool results above, please provide your final answer to the user now.".into()
}
fn default_empty_response() -> String {
    "I wasn't able to put together a complete answer this time. Please try asking again.".into()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            max_total_iterations: default_max_total_iterations(),
            temperature: None,
            max_tokens: None,
            continuation_prompt: default_continuation_prompt(),
            empty_response: default_empty_response(),
        }
    }
}
