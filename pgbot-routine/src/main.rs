use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pgbot_core::{BotCounters, DocumentStore};
use pgbot_discord::DiscordClient;
use pgbot_routine::{logging, AppConfig, ConsoleBuffer, Scheduler};
use tracing::{info, warn};

/// Background routines for the pygame community bot.
#[derive(Debug, Parser)]
#[command(name = "pgbot", version, about)]
struct Cli {
    /// Path to the TOML configuration. A missing file means all defaults.
    #[arg(short, long, env = "PGBOT_CONFIG", default_value = "pgbot.toml")]
    config: PathBuf,

    /// Check the configuration and the database, then exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AppConfig::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        AppConfig::default()
    };

    let console = ConsoleBuffer::new(config.console.capacity);
    logging::init(&config.bot.general.log_level, console.clone())
        .context("installing tracing subscriber")?;

    let store = DocumentStore::open(&config.bot.store).context("opening document store")?;
    info!(keys = ?store.keys()?, "document store ready");
    if cli.check {
        info!("configuration ok");
        return Ok(());
    }

    let client =
        Arc::new(DiscordClient::from_env(&config.discord).context("creating Discord client")?);
    if !client.presence_attached() && !config.scheduler.presence.is_empty() {
        warn!("no gateway session attached, presence rotation will not reach Discord");
    }
    let counters = Arc::new(BotCounters::new());

    let handle = Scheduler::new(store, client, console, &config)
        .with_counters(Arc::clone(&counters))
        .spawn();
    info!(bot = %config.bot.general.bot_name, "routines running");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");
    handle.shutdown().await;

    info!(summary = %counters.snapshot().summary(), "stopped");
    Ok(())
}
