//! `astrolabe chat` — Interactive or single-message chat mode.

use std::sync::Arc;

use anyhow::{Context, bail};
use astrolabe_agent::{AgentLoop, RunOutcome, RunStatus};
use astrolabe_config::AppConfig;
use astrolabe_core::message::{Conversation, Message};
use astrolabe_core::tool::ToolContext;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::render::Renderer;
use crate::tools;

pub struct ChatOptions {
    pub message: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub profile: Option<String>,
    pub show_reasoning: bool,
}

pub async fn run(options: ChatOptions) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;
    if let Some(provider) = &options.provider {
        config.default_provider = provider.clone();
    }

    if !config.has_api_key() && config.default_provider != "ollama" {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENROUTER_API_KEY = 'sk-or-v1-...'   (recommended)");
        eprintln!("    OPENAI_API_KEY     = 'sk-...'         (for OpenAI direct)");
        eprintln!("    ASTROLABE_API_KEY  = 'sk-...'         (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        bail!("No API key found. See above for setup instructions.");
    }

    let router = astrolabe_providers::build_from_config(&config);
    let provider = router
        .default()
        .context("No default provider configured")?;
    let model = options
        .model
        .clone()
        .unwrap_or_else(|| config.model_for(&config.default_provider));

    let mut conversation = Conversation::with_system_prompt(config.system_prompt.clone());
    let context = ToolContext {
        profile_id: options.profile.clone(),
        session_id: Some(conversation.id.to_string()),
        ..ToolContext::default()
    };
    let agent = AgentLoop::new(provider, Arc::new(tools::default_registry()))
        .with_settings(config.agent_settings())
        .with_tool_context(context);

    if let Some(message) = options.message {
        conversation.push(Message::user(message));
        let outcome =
            run_turn(&agent, conversation.messages, &model, options.show_reasoning).await?;
        if outcome.status == RunStatus::Failed {
            bail!(outcome.error.unwrap_or_else(|| "agent run failed".into()));
        }
        return Ok(());
    }

    println!();
    println!("  Astrolabe — interactive mode");
    println!();
    println!("  Provider:  {}", router.default_name());
    println!("  Model:     {model}");
    println!(
        "  Ceilings:  {} tool / {} total iterations",
        agent.settings().max_tool_iterations,
        agent.settings().max_total_iterations
    );
    println!();
    println!("  Type your message and press Enter. Ctrl+C stops the current answer.");
    println!("  Type 'exit' to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("  You > ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        conversation.push(Message::user(input));
        let outcome = run_turn(
            &agent,
            conversation.messages.clone(),
            &model,
            options.show_reasoning,
        )
        .await?;
        conversation.replace_history(carry_forward(outcome));
        println!();
    }

    println!("  Goodbye!");
    Ok(())
}

/// Run one turn, rendering events until the run ends. Ctrl+C cancels the
/// turn, not the program.
async fn run_turn(
    agent: &AgentLoop,
    history: Vec<Message>,
    model: &str,
    show_reasoning: bool,
) -> anyhow::Result<RunOutcome> {
    let mut run = agent.start(history, model);
    let mut renderer = Renderer::new(show_reasoning);
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = run.next_event() => {
                let Some(event) = event else { break };
                renderer.render(&event, &mut stdout, &mut stderr)?;
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                run.cancel();
                eprintln!();
                eprintln!("  [cancelled]");
            }
        }
    }

    let outcome = run.join().await?;
    debug!(
        status = ?outcome.status,
        iterations = outcome.iterations,
        tool_iterations = outcome.tool_iterations,
        "Turn finished"
    );
    Ok(outcome)
}

/// History for the next turn. Text from an interrupted turn is kept so the
/// model can see what it had already said.
fn carry_forward(outcome: RunOutcome) -> Vec<Message> {
    let mut history = outcome.history;
    if matches!(outcome.status, RunStatus::Cancelled | RunStatus::Failed)
        && let Some(partial) = outcome.content.filter(|c| !c.trim().is_empty())
    {
        history.push(
            Message::assistant(partial).with_metadata("partial", serde_json::Value::Bool(true)),
        );
    }
    history
}
