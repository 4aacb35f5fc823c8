//! Astrolabe CLI — the main entry point.
//!
//! Commands:
//! - `chat`    — Interactive chat or single-message mode
//! - `config`  — Show, validate or initialize configuration

use clap::{Parser, Subcommand};

mod commands;
mod render;
mod tools;

#[derive(Parser)]
#[command(
    name = "astrolabe",
    about = "Astrolabe — a streaming, tool-using LLM agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Override the configured provider
        #[arg(long, env = "ASTROLABE_PROVIDER")]
        provider: Option<String>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,

        /// Profile id handed to tools
        #[arg(long)]
        profile: Option<String>,

        /// Hide reasoning output
        #[arg(long)]
        no_reasoning: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config_cmd::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the answer stream.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            provider,
            model,
            profile,
            no_reasoning,
        } => {
            let options = commands::chat::ChatOptions {
                message,
                provider,
                model,
                profile,
                show_reasoning: !no_reasoning,
            };
            commands::chat::run(options).await?
        }
        Commands::Config { action } => commands::config_cmd::run(action)?,
    }

    Ok(())
}
