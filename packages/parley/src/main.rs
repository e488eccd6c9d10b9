use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_session::{ConversationId, Credentials, UserId};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::prelude::*;

mod cli;
mod config;
mod console;
mod gateway;
mod stomp;

use cli::ChatTarget;
use config::{FileConfig, ParleyDirs};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Terminal client for STOMP-based one-to-one chat")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom config directory (defaults to ~/.parley)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Bearer token for the chat backend
    #[arg(long, global = true, env = "PARLEY_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and chat interactively
    Chat(ChatArgs),

    /// List your conversations
    Conversations,

    /// Show a page of a conversation's history
    History(HistoryArgs),

    /// Show the total number of unread messages
    Unread,
}

#[derive(Parser)]
struct ChatArgs {
    /// Open (or create) the conversation with this user
    #[arg(long, conflicts_with = "conversation")]
    with: Option<String>,

    /// Open this conversation
    #[arg(long)]
    conversation: Option<String>,
}

#[derive(Parser)]
struct HistoryArgs {
    /// Conversation id
    conversation: String,

    /// Zero-based page number
    #[arg(long, default_value = "0")]
    page: u32,

    /// Messages per page (defaults to session.page_size)
    #[arg(long)]
    size: Option<u32>,
}

/// Everything a subcommand needs: resolved file config and the credential.
pub struct Settings {
    pub file: FileConfig,
    pub credentials: Credentials,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with chat output.
    let default_directive = if cli.debug {
        "parley=debug,parley_session=debug,warn"
    } else {
        "parley=info,parley_session=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let dirs = ParleyDirs::new(cli.config_dir.clone())?;
    let file: FileConfig = config::load_config(&dirs.config_dir)
        .extract()
        .with_context(|| format!("Invalid configuration in {}", dirs.config_toml_path().display()))?;
    debug!(api = %file.server.api_url, ws = %file.server.ws_url, "configuration loaded");

    let token = cli
        .token
        .filter(|t| !t.trim().is_empty())
        .context("No token given; pass --token or set PARLEY_TOKEN")?;
    let settings = Settings {
        file,
        credentials: Credentials::bearer(token),
    };

    match cli.command {
        Commands::Chat(args) => {
            let target = match (args.with, args.conversation) {
                (Some(user), _) => ChatTarget::User(UserId::new(user)),
                (None, Some(id)) => ChatTarget::Conversation(ConversationId::new(id)),
                (None, None) => ChatTarget::None,
            };
            cli::chat_command(&settings, target).await
        }
        Commands::Conversations => cli::conversations_command(&settings).await,
        Commands::History(args) => {
            cli::history_command(
                &settings,
                ConversationId::new(args.conversation),
                args.page,
                args.size,
            )
            .await
        }
        Commands::Unread => cli::unread_command(&settings).await,
    }
}
