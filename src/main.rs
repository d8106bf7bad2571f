use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::*;
use pulse_core::{
    ChatRole, ChatTurn, Config, CoordinatorSettings, Conversation, GroqClient, PerplexityClient,
    Provider, ResponseCoordinator, TurnOutcome, TurnStream,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod render;

use render::TerminalRenderer;

#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "Ask the Pulse medical assistant and get streamed, cited answers")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single health question
    Ask {
        /// Your question
        question: String,
        /// Print the model's reasoning trace
        #[arg(long)]
        show_thinking: bool,
        /// Override the chat model
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Analyze a medical document (plain text)
    Document {
        /// Path to the document
        path: PathBuf,
        /// Print the model's reasoning trace
        #[arg(long)]
        show_thinking: bool,
    },
    /// Interactive chat, one question per line
    Chat {
        /// Print the model's reasoning trace
        #[arg(long)]
        show_thinking: bool,
    },
    /// List chat models available from Groq
    Models,
    /// Show or change stored configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current configuration and key sources
    Show,
    /// Store an API key (groq or perplexity)
    SetKey { provider: String, key: String },
    /// Set the default chat model
    SetModel { model: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that write the file must not overwrite one they couldn't read.
    let writes_config = matches!(cli.command, Commands::Config { .. });
    let config = resolve_config(Config::load(), writes_config)?;

    match cli.command {
        Commands::Ask { question, show_thinking, model } => {
            let mut config = config;
            if model.is_some() {
                config.chat_model = model;
            }
            let coordinator = build_coordinator(&config);
            let mut interrupts = listen_for_interrupts();
            let outcome = run_turn(coordinator.submit(&question), show_thinking, &mut interrupts).await;
            exit_on_failure(&outcome);
        }
        Commands::Document { path, show_thinking } => {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
            if content.trim().is_empty() {
                return Err(anyhow!("{} is empty", path.display()));
            }
            println!("📄 Analyzing {}...\n", path.display().to_string().cyan());
            let coordinator = build_coordinator(&config);
            let mut interrupts = listen_for_interrupts();
            let outcome =
                run_turn(coordinator.submit_document(&content), show_thinking, &mut interrupts).await;
            exit_on_failure(&outcome);
        }
        Commands::Chat { show_thinking } => chat_loop(&config, show_thinking).await?,
        Commands::Models => list_models(&config).await?,
        Commands::Config { action } => handle_config(config, action)?,
    }

    Ok(())
}

fn resolve_config(loaded: Result<Config>, strict: bool) -> Result<Config> {
    match loaded {
        Ok(config) => Ok(config),
        Err(e) if strict => Err(e.context("Could not read config; fix or remove the file first")),
        Err(e) => {
            eprintln!("{} {}", "Could not read config, using defaults:".yellow(), e);
            Ok(Config::new())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Build the clients from config and wire them into a coordinator.
fn build_coordinator(config: &Config) -> ResponseCoordinator {
    let groq_key = config.api_key(Provider::Groq);
    let groq = GroqClient::new(groq_key.as_deref()).with_base_url(config.base_url(Provider::Groq));
    let mut coordinator = ResponseCoordinator::new(Arc::new(groq), CoordinatorSettings::from_config(config));

    if config.enable_source_search {
        if let Some(key) = config.api_key(Provider::Perplexity) {
            let search = PerplexityClient::new(&key).with_base_url(config.base_url(Provider::Perplexity));
            coordinator = coordinator.with_search(Arc::new(search));
        }
    }

    debug!(search = coordinator.has_search(), "source search configured");
    info!(model = %coordinator.settings().chat_model, "coordinator ready");
    coordinator
}

/// Forward every Ctrl-C for the rest of the process. Once installed, SIGINT
/// no longer terminates the program, so callers decide what it means.
fn listen_for_interrupts() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

/// Render one turn; an interrupt cancels it without ending the program.
async fn run_turn(
    turn: TurnStream,
    show_thinking: bool,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> TurnOutcome {
    let token = turn.cancellation_token();
    let mut renderer = TerminalRenderer::new(show_thinking);
    let drive = turn.drive(&mut renderer);
    tokio::pin!(drive);

    let outcome = loop {
        tokio::select! {
            outcome = &mut drive => break outcome,
            Some(()) = interrupts.recv() => token.cancel(),
        }
    };

    if let TurnOutcome::Cancelled = outcome {
        println!("\n{}", "Cancelled.".yellow());
    }
    outcome
}

fn exit_on_failure(outcome: &TurnOutcome) {
    if let TurnOutcome::Failed(_) = outcome {
        std::process::exit(1);
    }
}

async fn chat_loop(config: &Config, show_thinking: bool) -> Result<()> {
    let coordinator = build_coordinator(config);
    let mut conversation = Conversation::new();

    println!("{}", "🩺 Pulse - ask a health question (empty line, Ctrl-D or Ctrl-C to quit)".bold().blue());
    println!("{}", "Pulse provides general information, not medical advice.".dimmed());

    let mut interrupts = listen_for_interrupts();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n{} ", ">".bold().cyan());
        io::stdout().flush()?;

        // Ctrl-C at the prompt ends the session.
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = interrupts.recv() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            break;
        }

        conversation.push(ChatTurn::user(question));
        println!();
        // Input stays blocked until this turn is done.
        match run_turn(coordinator.submit(question), show_thinking, &mut interrupts).await {
            TurnOutcome::Complete(turn) => conversation.push(turn),
            TurnOutcome::Failed(_) | TurnOutcome::Cancelled => {}
        }
    }

    let answered = conversation
        .turns
        .iter()
        .filter(|t| t.role == ChatRole::Assistant)
        .count();
    println!("{}", format!("Session ended after {} answered question(s).", answered).dimmed());
    Ok(())
}

async fn list_models(config: &Config) -> Result<()> {
    let groq = GroqClient::new(config.api_key(Provider::Groq).as_deref())
        .with_base_url(config.base_url(Provider::Groq));

    println!("\n{}", "🤖 Available Groq Models".bold().blue());
    println!("{}", "=".repeat(30).dimmed());

    match groq.list_models().await {
        Ok(models) => {
            if models.is_empty() {
                println!("{}", "No models returned".yellow());
            }
            for model in models {
                let marker = if model == config.chat_model() { " (default)" } else { "" };
                println!("  • {}{}", model.green(), marker.dimmed());
            }
        }
        Err(e) => {
            println!("{}: {}", "Error listing models".red(), e.user_message());
        }
    }

    Ok(())
}

fn handle_config(mut config: Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{} {}", "Config file:".bold(), Config::get_config_path()?.display());
            println!("{} {}", "Chat model:".bold(), config.chat_model());
            println!("{} {}", "Suggestion model:".bold(), config.suggestion_model());
            println!("{} {}", "Temperature:".bold(), config.temperature);
            println!("{} {}", "Max tokens:".bold(), config.max_tokens);
            println!("{} {}", "Source search:".bold(), config.enable_source_search);
            for provider in Provider::all() {
                let source = config.key_source(provider).unwrap_or("not set");
                println!("{} {}", format!("{} key:", provider.display_name()).bold(), source);
            }
        }
        ConfigAction::SetKey { provider, key } => {
            let provider = Provider::from_str(&provider)
                .ok_or_else(|| anyhow!("Unknown provider '{}'. Use groq or perplexity.", provider))?;
            config.set_api_key(provider, &key);
            config.save()?;
            println!("{} {} key saved", "✓".green(), provider.as_str());
        }
        ConfigAction::SetModel { model } => {
            config.chat_model = Some(model.clone());
            config.save()?;
            println!("{} default model set to {}", "✓".green(), model.bold());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pulse_core::ai::{ByteStream, ChatRequest};
    use pulse_core::config::DEFAULT_MAX_TOKENS;
    use pulse_core::{ChatBackend, PulseError, PulseResult};
    use std::time::Duration;

    struct Stalled;

    #[async_trait]
    impl ChatBackend for Stalled {
        async fn stream_chat(&self, _request: &ChatRequest) -> PulseResult<ByteStream> {
            Ok(Box::pin(futures_util::stream::pending::<PulseResult<Bytes>>()))
        }

        async fn complete(&self, _request: &ChatRequest) -> PulseResult<String> {
            Err(PulseError::UpstreamUnavailable("not used".to_string()))
        }
    }

    #[tokio::test]
    async fn test_interrupt_cancels_in_flight_turn() {
        let coordinator = ResponseCoordinator::new(Arc::new(Stalled), CoordinatorSettings::default());
        let (tx, mut interrupts) = mpsc::unbounded_channel();
        tx.send(()).unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            run_turn(coordinator.submit("slow question"), false, &mut interrupts),
        )
        .await
        .expect("interrupted turn should end promptly");

        assert!(matches!(outcome, TurnOutcome::Cancelled));
    }

    #[test]
    fn test_unreadable_config_blocks_writes() {
        assert!(resolve_config(Err(anyhow!("expected value at line 1")), true).is_err());
    }

    #[test]
    fn test_unreadable_config_falls_back_for_reads() {
        let config = resolve_config(Err(anyhow!("expected value at line 1")), false).unwrap();
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(config.groq_api_key.is_none());
    }
}
