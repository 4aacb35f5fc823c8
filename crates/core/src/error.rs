//! Error types for the Astrolabe domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each external collaborator has its own error enum.

use thiserror::Error;

/// The top-level error type for Astrolabe operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Loop safety limits ---
    #[error("Iteration ceiling exceeded: {ceiling} limit of {limit} reached")]
    IterationCeiling { ceiling: String, limit: u32 },

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Collaborator errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether a caller could reasonably offer to retry the same request.
    ///
    /// Transient transport failures are retryable; configuration and
    /// authentication problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::RateLimited { .. }
            | Self::StreamInterrupted(_)
            | Self::Timeout(_)
            | Self::Network(_) => true,
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool panicked: {tool_name} — {message}")]
    Panicked { tool_name: String, message: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
