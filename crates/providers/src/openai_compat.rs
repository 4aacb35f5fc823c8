//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, DeepSeek, Ollama, vLLM, Together AI,
//! Fireworks AI, and any OpenAI-compatible endpoint.
//!
//! Supports:
//! - Streaming chat completions over SSE
//! - Reasoning deltas (`reasoning_content` / `reasoning`)
//! - Tool use / function calling, assembled from incremental deltas
//! - Retry with exponential backoff on 429/5xx/network failures
//! - Model listing and health checks

use std::collections::BTreeMap;
use std::time::Duration;

use astrolabe_core::error::ProviderError;
use astrolabe_core::message::{Message, Role};
use astrolabe_core::provider::*;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Default number of transport retries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 8_000;
const MAX_RETRY_AFTER_MS: u64 = 30_000;

/// An OpenAI-compatible LLM provider.
///
/// This handles the vast majority of LLM providers since most expose
/// an OpenAI-compatible `/v1/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_base_ms: u64,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_ms: DEFAULT_RETRY_BASE_MS,
        }
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "", // Ollama doesn't need a key
        )
    }

    /// Override the retry policy. The first retry waits `base_delay_ms`,
    /// doubling on each further attempt.
    pub fn with_retry_policy(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_ms = base_delay_ms;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    /// Send the request, retrying transient failures. Each retry is announced
    /// on `tx` before the backoff sleep. Returns `None` once a terminal error
    /// has been sent or the receiver has gone away.
    async fn send_with_retry(
        &self,
        body: &Value,
        tx: &mpsc::Sender<ProviderEvent>,
    ) -> Option<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut attempt = 0;

        loop {
            let result = self
                .authorized(self.client.post(&url))
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(body)
                .send()
                .await;

            let (error, retry_after_secs) = match result {
                Ok(response) if response.status().is_success() => return Some(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after_secs = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok());
                    let body = response.text().await.unwrap_or_default();
                    (status_error(status, body, retry_after_secs), retry_after_secs)
                }
                Err(e) if e.is_timeout() => (ProviderError::Timeout(e.to_string()), None),
                Err(e) => (ProviderError::Network(e.to_string()), None),
            };

            if attempt >= self.max_retries || !error.is_retryable() {
                warn!(provider = %self.name, attempt, error = %error, "Provider request failed");
                let _ = tx.send(ProviderEvent::Error(error)).await;
                return None;
            }

            attempt += 1;
            let delay_ms = retry_delay_ms(retry_after_secs, self.retry_base_ms, attempt);
            debug!(provider = %self.name, attempt, delay_ms, error = %error, "Retrying provider request");

            let notice = ProviderEvent::Retry {
                attempt,
                max_attempts: self.max_retries,
                delay_ms,
                reason: error.to_string(),
            };
            if tx.send(notice).await.is_err() {
                return None;
            }

            tokio::select! {
                _ = tx.closed() => return None,
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based).
fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// Delay before retry `attempt`. A server-supplied `Retry-After` wins but is
/// capped.
fn retry_delay_ms(retry_after_secs: Option<u64>, base_ms: u64, attempt: u32) -> u64 {
    match retry_after_secs {
        Some(secs) => secs.saturating_mul(1000).min(MAX_RETRY_AFTER_MS),
        None => backoff_delay_ms(base_ms, attempt),
    }
}

/// Map a non-success HTTP status to a provider error.
fn status_error(status: u16, body: String, retry_after_secs: Option<u64>) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after_secs.unwrap_or(5),
        },
        401 | 403 => ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        404 => ProviderError::ModelNotFound(body),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

/// Forward a streaming response as provider events until done.
async fn pump(response: reqwest::Response, tx: mpsc::Sender<ProviderEvent>, provider: String) {
    let mut byte_stream = response.bytes_stream();
    let mut parser = SseParser::new(provider);

    while let Some(chunk) = byte_stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx
                    .send(ProviderEvent::Error(ProviderError::StreamInterrupted(
                        e.to_string(),
                    )))
                    .await;
                return;
            }
        };

        for event in parser.push(&bytes) {
            let terminal = matches!(event, ProviderEvent::Done | ProviderEvent::Error(_));
            if tx.send(event).await.is_err() || terminal {
                return; // receiver dropped or stream finished
            }
        }
    }

    // Stream ended without [DONE]
    for event in parser.finish() {
        if tx.send(event).await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, ProviderError> {
        let body = Self::request_body(&request);
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let (tx, rx) = mpsc::channel(64);
        let provider = self.clone();
        tokio::spawn(async move {
            if let Some(response) = provider.send_with_retry(&body, &tx).await {
                pump(response, tx, provider.name).await;
            }
        });

        Ok(rx)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let models = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- SSE parsing ---

/// Incremental parser for an OpenAI-style SSE body.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly.
struct SseParser {
    provider: String,
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
}

impl SseParser {
    fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            buffer: Vec::new(),
            tool_calls: BTreeMap::new(),
            finished: false,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<ProviderEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw);
            self.handle_line(line.trim_end_matches(['\r', '\n']), &mut events);
        }

        events
    }

    /// Flush accumulated tool calls and the done marker.
    fn finish(&mut self) -> Vec<ProviderEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events: Vec<ProviderEvent> = std::mem::take(&mut self.tool_calls)
            .into_values()
            .filter_map(ToolCallAccumulator::into_event)
            .collect();
        events.push(ProviderEvent::Done);
        events
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<ProviderEvent>) {
        // Skip empty lines and SSE comments
        if self.finished || line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim();

        if data == "[DONE]" {
            events.extend(self.finish());
            return;
        }

        let chunk = match serde_json::from_str::<StreamResponse>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                trace!(
                    provider = %self.provider,
                    data = %data,
                    error = %e,
                    "Ignoring unparseable SSE chunk"
                );
                return;
            }
        };

        if let Some(error) = chunk.error {
            self.finished = true;
            events.push(ProviderEvent::Error(ProviderError::ApiError {
                status_code: error.code.unwrap_or(500),
                message: error.message,
            }));
            return;
        }

        for choice in chunk.choices {
            let delta = choice.delta;

            if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning)
                && !reasoning.is_empty()
            {
                events.push(ProviderEvent::Reasoning(reasoning));
            }

            if let Some(content) = delta.content
                && !content.is_empty()
            {
                events.push(ProviderEvent::Content(content));
            }

            for tc_delta in delta.tool_calls.unwrap_or_default() {
                let acc = self.tool_calls.entry(tc_delta.index).or_default();
                if let Some(id) = tc_delta.id {
                    acc.id = id;
                }
                if let Some(func) = tc_delta.function {
                    if let Some(name) = func.name {
                        acc.name.push_str(&name);
                    }
                    if let Some(args) = func.arguments {
                        acc.arguments.push_str(&args);
                    }
                }
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(ProviderEvent::Usage(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            }));
        }
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_event(self) -> Option<ProviderEvent> {
        if self.name.is_empty() {
            warn!(id = %self.id, "Dropping streamed tool call without a name");
            return None;
        }
        let arguments = if self.arguments.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&self.arguments).unwrap_or(Value::String(self.arguments))
        };
        Some(ProviderEvent::ToolCall(NativeToolCall {
            id: (!self.id.is_empty()).then_some(self.id),
            name: self.name,
            arguments,
        }))
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    /// DeepSeek-style reasoning channel
    #[serde(default)]
    reasoning_content: Option<String>,
    /// OpenRouter-style reasoning channel
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta — arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Mid-stream error object some gateways send instead of closing.
#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    code: Option<u16>,
    message: String,
}
