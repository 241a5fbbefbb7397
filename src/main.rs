use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telegram_channel::config::Config;
use telegram_channel::listener::{EchoListener, Listeners, LoggingListener};
use telegram_channel::platform::telegram::{LongPoller, StatusLog, TelegramChannel};
use telegram_channel::session::{
    MemorySessionRepository, SessionRepository, SqliteSessionRepository,
};
use telegram_channel::webhook::{self, Endpoint, WebhookState};

#[derive(Parser)]
#[command(name = "telegram-channel", about = "Telegram Bot API channel adapter")]
struct Cli {
    /// Path to the TOML configuration
    #[arg(long, short, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Receive updates by long polling
    Poll {
        #[arg(default_value = "telegram")]
        channel: String,
        /// Answer text messages with the same text
        #[arg(long)]
        echo: bool,
    },
    /// Register the webhook URL with Telegram, or delete it
    Webhook {
        #[arg(default_value = "telegram")]
        channel: String,
        #[arg(long)]
        delete: bool,
    },
    /// Receive updates for every configured channel over HTTP
    Serve {
        #[arg(long)]
        echo: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,telegram_channel=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Loading configuration from: {}", cli.config.display());
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    info!("  Channels: {}", config.channels.len());

    let sessions = open_sessions(&config)?;

    match cli.command {
        Command::Poll { channel, echo } => {
            let channel = Arc::new(TelegramChannel::new(
                channel.as_str(),
                config.channel(&channel)?.clone(),
                sessions,
            ));
            let listeners = listeners_for(&channel, echo);
            let cancel = shutdown_token();

            if let Err(e) = LongPoller::new(channel)
                .run(&listeners, &mut StatusLog, &cancel)
                .await
            {
                error!("{}", e);
                return Err(e.into());
            }
        }
        Command::Webhook { channel, delete } => {
            let telegram = TelegramChannel::new(
                channel.as_str(),
                config.channel(&channel)?.clone(),
                sessions,
            );
            if delete {
                telegram.delete_webhook().await?;
            } else {
                let url = config.webhook_url(&channel)?;
                telegram.register_webhook(&url).await?;
            }
        }
        Command::Serve { echo } => {
            if config.channels.is_empty() {
                warn!("No channels configured, every webhook call will be rejected");
            }
            let endpoints = config.channels.iter().map(|(name, channel_config)| {
                let channel = Arc::new(TelegramChannel::new(
                    name.as_str(),
                    channel_config.clone(),
                    sessions.clone(),
                ));
                let listeners = Arc::new(listeners_for(&channel, echo));
                Endpoint { channel, listeners }
            });
            let state = WebhookState::new(endpoints);

            webhook::serve(
                &config.webhook.bind,
                &config.webhook.path_prefix,
                state,
                shutdown_token(),
            )
            .await?;
        }
    }

    Ok(())
}

fn open_sessions(config: &Config) -> Result<Arc<dyn SessionRepository>> {
    let sessions: Arc<dyn SessionRepository> = match &config.sessions.database_path {
        Some(path) => {
            info!("  Sessions: {}", path.display());
            Arc::new(SqliteSessionRepository::open(path)?)
        }
        None => {
            info!("  Sessions: in memory");
            Arc::new(MemorySessionRepository::new())
        }
    };
    Ok(sessions)
}

fn listeners_for(channel: &Arc<TelegramChannel>, echo: bool) -> Listeners {
    let mut listeners = Listeners::new();
    listeners.register(Arc::new(LoggingListener));
    if echo {
        listeners.register(Arc::new(EchoListener::new(channel.clone())));
    }
    info!("[{}] {} listener(s) registered", channel.name(), listeners.len());
    listeners
}

/// Cancelled on Ctrl-C
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            trigger.cancel();
        }
    });
    cancel
}
