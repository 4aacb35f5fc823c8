//! # Astrolabe Core
//!
//! Domain types, traits, and error definitions for the Astrolabe agent driver.
//! This crate has **zero framework dependencies** — it defines the model that
//! the provider, agent and CLI crates implement against.
//!
//! ## Design Philosophy
//!
//! The two external collaborators of the agent loop — the LLM provider and
//! the tool dispatcher — are defined as traits here. Implementations live in
//! their respective crates (or in the embedding application). This enables:
//! - Swapping providers via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::AgentSettings;
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderEvent, ProviderRequest, ProviderStream, Usage};
pub use tool::{
    Tool, ToolCallRequest, ToolContext, ToolDispatcher, ToolExecutionResult, ToolRegistry,
};
