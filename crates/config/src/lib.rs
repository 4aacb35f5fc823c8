//! Configuration loading and validation for Astrolabe.
//!
//! Loads configuration from `~/.astrolabe/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use astrolabe_core::agent::AgentSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.astrolabe/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// System prompt placed at the head of every new conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Agent loop ceilings and fallback texts
    #[serde(default)]
    pub agent: AgentSettings,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_system_prompt() -> String {
    "You are Astrolabe, a helpful assistant. Use the available tools when they help answer the user's question.".into()
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("system_prompt", &self.system_prompt)
            .field("agent", &self.agent)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Per-provider overrides, keyed by provider name under `[providers.<name>]`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Transport retry attempts for 429/5xx/network failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.astrolabe/config.toml).
    ///
    /// Also checks environment variables:
    /// - `ASTROLABE_API_KEY` (highest priority), then `OPENROUTER_API_KEY`,
    ///   then `OPENAI_API_KEY`, used when the file sets no key
    /// - `ASTROLABE_PROVIDER` and `ASTROLABE_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("ASTROLABE_API_KEY")
                .or_else(|| lookup("OPENROUTER_API_KEY"))
                .or_else(|| lookup("OPENAI_API_KEY"));
        }

        if let Some(provider) = lookup("ASTROLABE_PROVIDER").filter(|p| !p.is_empty()) {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("ASTROLABE_MODEL").filter(|m| !m.is_empty()) {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".astrolabe")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if let Some(temperature) = self.agent.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be at least 1".into(),
            ));
        }

        if self.agent.max_total_iterations <= self.agent.max_tool_iterations {
            return Err(ConfigError::ValidationError(
                "agent.max_total_iterations must be greater than agent.max_tool_iterations".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
            || self
                .providers
                .get(&self.default_provider)
                .is_some_and(|p| p.api_key.is_some())
    }

    /// Agent settings with the top-level sampling defaults filled in.
    pub fn agent_settings(&self) -> AgentSettings {
        let mut settings = self.agent.clone();
        settings.temperature = settings.temperature.or(Some(self.default_temperature));
        settings.max_tokens = settings.max_tokens.or(Some(self.default_max_tokens));
        settings
    }

    /// Model for `provider`: its own default if set, else the global one.
    pub fn model_for(&self, provider: &str) -> String {
        self.providers
            .get(provider)
            .and_then(|p| p.default_model.clone())
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            agent: AgentSettings::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "openrouter");
        assert_eq!(config.agent.max_tool_iterations, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.agent, config.agent);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn total_ceiling_must_exceed_tool_ceiling() {
        let mut config = AppConfig::default();
        config.agent.max_tool_iterations = 4;
        config.agent.max_total_iterations = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_total_iterations"));

        config.agent.max_tool_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_provider, "openrouter");
    }

    #[test]
    fn load_from_file_with_agent_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
default_provider = "openai"
default_model = "gpt-4o-mini"

[agent]
max_tool_iterations = 3
max_total_iterations = 6

[providers.openai]
api_key = "sk-test"
max_retries = 2
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_provider, "openai");
        assert_eq!(config.agent.max_tool_iterations, 3);
        assert_eq!(config.agent.max_total_iterations, 6);
        assert!(!config.agent.continuation_prompt.is_empty());
        assert_eq!(config.providers["openai"].max_retries, Some(2));
        assert!(config.has_api_key());
    }

    #[test]
    fn invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[agent]\nmax_tool_iterations = 8\nmax_total_iterations = 2\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(file.path()),
            Err(ConfigError::ValidationError(_))
        ));

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "default_provider = [").unwrap();
        assert!(matches!(
            AppConfig::load_from(broken.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_apply_in_priority_order() {
        let env: HashMap<&str, &str> = [
            ("OPENROUTER_API_KEY", "or-key"),
            ("OPENAI_API_KEY", "oa-key"),
            ("ASTROLABE_MODEL", "openai/gpt-4o"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("or-key"));
        assert_eq!(config.default_model, "openai/gpt-4o");
        assert_eq!(config.default_provider, "openrouter");
    }

    #[test]
    fn file_api_key_wins_over_env() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env_overrides(|key| (key == "ASTROLABE_API_KEY").then(|| "env".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_redacts_keys() {
        let mut config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-other".into()),
                ..ProviderConfig::default()
            },
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("sk-other"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn agent_settings_inherit_sampling_defaults() {
        let config = AppConfig::default();
        let settings = config.agent_settings();
        assert_eq!(settings.temperature, Some(0.7));
        assert_eq!(settings.max_tokens, Some(4096));
        assert_eq!(config.model_for("ollama"), config.default_model);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("max_tool_iterations"));
    }
}
