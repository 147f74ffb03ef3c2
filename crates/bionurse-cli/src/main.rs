use anyhow::{Context, Result, bail};
use bionurse_core::context::ASSISTANT_NAME;
use bionurse_core::{
    ChatMessage, ConversationStore, Dispatcher, EMERGENCY_DISCLAIMER, GeminiProvider,
    OpenAiProvider, ProviderKind, Role, StoreEvent, SubmitOutcome,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::BioNurseConfig;

#[derive(Parser)]
#[command(name = "bionurse")]
#[command(version)]
#[command(about = "BioNurse Pro, an AI medical assistant in your terminal")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Provider to start with (gemini or openai)
        #[arg(short, long)]
        provider: Option<ProviderKind>,
    },

    /// Send a one-shot message and print the reply
    Ask {
        /// Provider to use (gemini or openai)
        #[arg(short, long)]
        provider: Option<ProviderKind>,

        /// The message to send
        message: String,
    },

    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Ask { provider, message } => cmd_ask(&cli.config, provider, &message).await,
        Commands::Chat { provider } => cmd_chat(&cli.config, provider).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }

        info!("Created default config at {}", config_path.display());
    }

    println!("BioNurse initialized at {}", config_dir.display());
    println!(
        "Export GEMINI_API_KEY and/or OPENAI_API_KEY, or edit {}.",
        config_path.display()
    );
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = BioNurseConfig::load(config_path)?;
    println!("{:#?}", cfg);
    Ok(())
}

/// Both backends are always registered; a missing key surfaces as a
/// configuration reply rather than a startup failure.
fn build_dispatcher(cfg: &BioNurseConfig) -> Dispatcher {
    let gemini = &cfg.providers.gemini;
    let openai = &cfg.providers.openai;

    Dispatcher::new()
        .with_provider(Box::new(
            GeminiProvider::new(gemini.resolved_api_key(), gemini.model.clone())
                .with_base_url(gemini.base_url.clone()),
        ))
        .with_provider(Box::new(
            OpenAiProvider::new(
                openai.resolved_api_key(),
                openai.model.clone(),
                openai.base_url.clone(),
            )
            .with_temperature(openai.temperature)
            .with_max_tokens(openai.max_tokens),
        ))
}

fn build_store(cfg: &BioNurseConfig, provider: Option<ProviderKind>) -> ConversationStore {
    let provider = provider.unwrap_or(cfg.assistant.default_provider);
    ConversationStore::new(build_dispatcher(cfg), provider)
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    provider: Option<ProviderKind>,
    message: &str,
) -> Result<()> {
    let cfg = BioNurseConfig::load(config_path)?;
    let store = build_store(&cfg, provider);

    match store.submit(message).await {
        SubmitOutcome::Replied { reply, .. } => {
            println!("{}", reply.text);
            Ok(())
        }
        SubmitOutcome::Ignored => bail!("Message is empty"),
        SubmitOutcome::Busy => bail!("A request is already in flight"),
    }
}

async fn cmd_chat(config_path: &Option<PathBuf>, provider: Option<ProviderKind>) -> Result<()> {
    let cfg = BioNurseConfig::load(config_path)?;
    let store = Arc::new(build_store(&cfg, provider));
    let status = tokio::spawn(render_status(store.subscribe()));

    println!("\n  {}  ·  {}", ASSISTANT_NAME, store.provider().display_name());
    println!("  {}", EMERGENCY_DISCLAIMER);
    println!("  Commands: /provider <gemini|openai>, /history, /quit\n");
    for msg in store.transcript() {
        println!("{}\n", format_message(&msg));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match parse_input(&line) {
            Input::Quit => break,
            Input::Empty => {}
            Input::History => {
                for msg in store.transcript() {
                    println!("{}\n", format_message(&msg));
                }
            }
            Input::Provider(Ok(kind)) => store.select_provider(kind),
            Input::Provider(Err(e)) => eprintln!("  {}", e),
            Input::Message(text) => match store.submit(text).await {
                SubmitOutcome::Replied { reply, .. } => println!("{}\n", format_message(&reply)),
                SubmitOutcome::Busy => eprintln!("  Still waiting for the previous reply."),
                SubmitOutcome::Ignored => {}
            },
        }
    }

    status.abort();
    info!("Chat ended after {} messages", store.message_count());
    Ok(())
}

/// Prints the thinking indicator and provider switches as they happen
async fn render_status(mut rx: broadcast::Receiver<StoreEvent>) {
    loop {
        match rx.recv().await {
            Ok(StoreEvent::InFlightChanged(true)) => eprintln!("  …thinking"),
            Ok(StoreEvent::ProviderChanged(kind)) => {
                println!("  Switched to {}\n", kind.display_name())
            }
            Ok(event) => debug!("Store event: {:?}", event),
            Err(broadcast::error::RecvError::Lagged(n)) => debug!("Skipped {} store events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Input<'a> {
    Empty,
    Quit,
    History,
    Provider(Result<ProviderKind, String>),
    Message(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }

    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Message(trimmed);
    };

    let mut parts = command.split_whitespace();
    match parts.next() {
        Some("quit" | "exit") => Input::Quit,
        Some("history") => Input::History,
        Some("provider") => match parts.next() {
            Some(name) => Input::Provider(name.parse::<ProviderKind>().map_err(|e| e.to_string())),
            None => Input::Provider(Err("Usage: /provider <gemini|openai>".to_string())),
        },
        _ => Input::Message(trimmed),
    }
}

fn format_message(msg: &ChatMessage) -> String {
    match msg.role {
        Role::User => format!("You › {}", msg.text),
        Role::System => format!("{} › {}", ASSISTANT_NAME, msg.text),
        Role::Model => {
            let label = msg
                .provider
                .map(|p| p.display_name())
                .unwrap_or(ASSISTANT_NAME);
            format!("[{}] › {}", label, msg.text)
        }
    }
}
