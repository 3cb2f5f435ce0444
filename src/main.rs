use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use opinion_taskbot::alerts::AlertClient;
use opinion_taskbot::api::{self, AppState};
use opinion_taskbot::config::Config;
use opinion_taskbot::exchange::OpinionClient;
use opinion_taskbot::task::TaskRegistry;
use opinion_taskbot::token_store::TokenStore;
use opinion_taskbot::trade_db::TradeLedger;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config
    let config = Config::from_env()?;

    // Setup logging
    FmtSubscriber::builder()
        .with_max_level(match config.log_level.as_str() {
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("╔═══════════════════════════════════════╗");
    info!("║     Opinion.trade Task Bot            ║");
    info!("╠═══════════════════════════════════════╣");
    info!("║ Mode: {:31} ║", if config.dry_run { "DRY RUN (no real orders)" } else { "LIVE TRADING" });
    info!("║ API: {:32} ║", config.bind_addr);
    info!("║ Ledger: {:29} ║", config.db_path);
    info!("╚═══════════════════════════════════════╝");

    let ledger = Arc::new(TradeLedger::open(&config.db_path)?);
    let stats = ledger.stats()?;
    info!("📒 Ledger: {}", stats);

    let tokens = Arc::new(TokenStore::new());
    match &config.auth_token {
        Some(token) => {
            tokens.set(token.clone());
        }
        None => warn!("AUTH_TOKEN not set, tasks will wait for POST /api/settings/token"),
    }

    let exchange = Arc::new(OpinionClient::new(&config)?);
    let alerts = AlertClient::new(config.discord_webhook.clone());
    let registry = TaskRegistry::new(exchange, tokens, ledger, config.engine_settings(), alerts);

    let state = AppState {
        registry: registry.clone(),
    };

    tokio::select! {
        result = api::serve(state, &config.bind_addr) => result?,
        _ = shutdown_signal() => info!("Shutdown signal received, stopping tasks..."),
    }

    // Running tasks cancel their open orders before we exit
    registry.stop_all().await;
    info!("👋 Bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
