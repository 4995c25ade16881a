//! Binary entrypoint: loads configuration, runs migrations, wires the
//! engine and the teloxide dispatcher, and races the dispatcher against the
//! memory guard (§9 redesign: one `Engine`, constructed once, instead of
//! the source system's module-level globals).

mod cli;
mod handlers;
mod menu;
mod metrics_server;
mod summary_action;
mod telegram_transport;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use health_monitor::{ActivityProbe, MemoryGuardConfig};
use reqwest::ClientBuilder;
use teloxide::prelude::*;
use tracing_subscriber::EnvFilter;

use doracore::config::Config;
use doracore::engine::Engine;
use doracore::oracle::{HttpSttOracle, HttpSummaryOracle, SttOracle, SummaryOracle};
use doracore::storage::Store;
use doracore::transport::Transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = cli::Cli::parse();
    let mut config = Config::load()?;
    if let Some(path) = cli.database_path {
        config.database_path = path;
    }
    if let Some(dir) = cli.download_dir {
        config.download_dir = dir;
    }

    if cli.migrate_only {
        Store::open(&config.database_path)?;
        tracing::info!("migrations applied, exiting (--migrate-only)");
        return Ok(());
    }

    let bot = create_bot()?;
    let transport: Arc<dyn Transport> = Arc::new(telegram_transport::TelegramTransport::new(bot.clone()));
    let stt: Arc<dyn SttOracle> = Arc::new(HttpSttOracle::new(stt_endpoint(), stt_api_key()));
    let summary: Arc<dyn SummaryOracle> =
        Arc::new(HttpSummaryOracle::new(summary_endpoint(), summary_api_key(), summary_model(), summary_system_prompt()));

    let metrics_port = config.metrics_port;
    let engine = Arc::new(Engine::new(config, transport, stt, summary)?);
    engine.spawn_background_tasks();

    tokio::spawn(async move {
        if let Err(e) = metrics_server::spawn(metrics_port).await {
            tracing::warn!(error = %e, "metrics server exited");
        }
    });

    let activity = ActivityProbe::new();
    let guard = health_monitor::spawn(activity.clone(), MemoryGuardConfig::default());

    let deps = handlers::HandlerDeps::new(engine.clone(), activity);

    let mut dispatcher = Dispatcher::builder(bot, handlers::schema(deps)).enable_ctrlc_handler().build();

    tokio::select! {
        () = dispatcher.dispatch() => {}
        reason = guard => {
            if let Ok(reason) = reason {
                tracing::warn!(?reason, "memory guard requested a restart, exiting for the supervisor to relaunch");
            }
        }
    }

    Ok(())
}

/// Mirrors the teacher's `create_bot`: an optional `BOT_API_URL` override
/// for a local Bot API server, otherwise the standard `from_env` client.
fn create_bot() -> anyhow::Result<Bot> {
    let client = ClientBuilder::new().timeout(Duration::from_secs(60)).build()?;
    let bot = if let Ok(url) = std::env::var("BOT_API_URL") {
        let url = url::Url::parse(&url)?;
        Bot::from_env_with_client(client).set_api_url(url)
    } else {
        Bot::from_env_with_client(client)
    };
    Ok(bot)
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn stt_endpoint() -> String {
    std::env::var("DORADURA_STT_ENDPOINT").unwrap_or_default()
}

fn stt_api_key() -> String {
    std::env::var("DORADURA_STT_API_KEY").unwrap_or_default()
}

fn summary_endpoint() -> String {
    std::env::var("DORADURA_SUMMARY_ENDPOINT").unwrap_or_default()
}

fn summary_api_key() -> String {
    std::env::var("DORADURA_SUMMARY_API_KEY").unwrap_or_default()
}

fn summary_model() -> String {
    std::env::var("DORADURA_SUMMARY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string())
}

fn summary_system_prompt() -> String {
    std::env::var("DORADURA_SUMMARY_PROMPT")
        .unwrap_or_else(|_| "Summarize the following transcript concisely.".to_string())
}
