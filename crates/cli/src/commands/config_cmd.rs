//! `astrolabe config` — Configuration management commands.

use std::path::Path;

use anyhow::Context;
use astrolabe_config::AppConfig;
use clap::Subcommand;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (keys redacted)
    Show,
    /// Print the config file path
    Path,
    /// Check the configuration for errors
    Validate,
    /// Write a default config file if none exists
    Init,
}

pub fn run(action: ConfigAction) -> anyhow::Result<()> {
    let config_path = AppConfig::config_dir().join("config.toml");
    match action {
        ConfigAction::Show => {
            let config = AppConfig::load().context("Failed to load config")?;
            println!("{}", render_redacted(&config)?);
        }
        ConfigAction::Path => println!("{}", config_path.display()),
        ConfigAction::Validate => validate(),
        ConfigAction::Init => {
            if init(&config_path)? {
                println!("  Wrote default config to {}", config_path.display());
            } else {
                println!("  Config already exists at {}", config_path.display());
            }
        }
    }
    Ok(())
}

fn validate() {
    println!("  Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("  Config error: {e}");
            return;
        }
    };

    println!("  Config parsed successfully");
    if !config.has_api_key() && config.default_provider != "ollama" {
        println!("  Warning: no API key set (set ASTROLABE_API_KEY or OPENROUTER_API_KEY)");
    }

    println!();
    println!("  Provider:  {}", config.default_provider);
    println!("  Model:     {}", config.model_for(&config.default_provider));
    println!(
        "  Ceilings:  {} tool / {} total iterations",
        config.agent.max_tool_iterations, config.agent.max_total_iterations
    );
}

/// TOML for `config`, with every API key removed.
fn render_redacted(config: &AppConfig) -> anyhow::Result<String> {
    let mut config = config.clone();
    config.api_key = None;
    for provider in config.providers.values_mut() {
        provider.api_key = None;
    }
    Ok(toml::to_string_pretty(&config)?)
}

/// Returns `false` when a file is already present.
fn init(path: &Path) -> anyhow::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}
