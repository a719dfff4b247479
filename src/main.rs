use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use bybit_spot_bot::config::{Config, LoggingConfig};
use bybit_spot_bot::execution::{OrderSink, PaperOrderSink};
use bybit_spot_bot::market_data::MarketDataSource;
use bybit_spot_bot::{BybitAuth, BybitClient, StopSignal, TradingLoop};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!("🚀 Bybit Spot Bot - Starting...");
    info!("✅ Configuration loaded");
    info!("   Symbol: {}", config.trading.symbol);
    info!("   Trade amount: {}", config.trading.trade_amount);
    info!("   Testnet: {}", config.bybit.testnet);
    info!("   Paper trading: {}", config.trading.paper_trading);

    let auth = match (&config.bybit.api_key, &config.bybit.api_secret) {
        (Some(api_key), Some(api_secret)) if config.bybit.has_credentials() => {
            Some(BybitAuth::new(api_key.clone(), api_secret.clone()))
        }
        _ => None,
    };

    let client = Arc::new(BybitClient::new(
        config.bybit.rest_url(),
        auth,
        config.bybit.recv_window_ms,
    )?);
    info!("✅ REST client initialized ({})", config.bybit.rest_url());

    let market: Arc<dyn MarketDataSource> = client.clone();
    let orders: Arc<dyn OrderSink> = if config.trading.paper_trading {
        info!("📝 Paper trading enabled, orders will only be logged");
        Arc::new(PaperOrderSink::new())
    } else {
        client.clone()
    };

    let mut bot = TradingLoop::new(config.clone(), market, orders);
    spawn_stop_listeners(bot.stop_handle());
    info!("⏹  Press Enter or Ctrl-C to stop");

    let result = bot.run().await;

    info!("📋 Session | {}", bot.stats());
    match result {
        Ok(()) => {
            info!("👋 Bot stopped");
            Ok(())
        }
        Err(e) => {
            error!("🛑 Bot halted on fatal error: {}", e);
            Err(e.into())
        }
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid log level")?;

    let file = match logging.file.as_deref().filter(|path| !path.is_empty()) {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path))?,
        ),
        None => None,
    };

    let (text_file_layer, json_file_layer) = match file {
        Some(file) if logging.json => (None, Some(fmt::layer().json().with_writer(Mutex::new(file)))),
        Some(file) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(text_file_layer)
        .with(json_file_layer)
        .try_init()?;

    Ok(())
}

/// Stop the loop on Ctrl-C or when the operator presses Enter. A cycle in
/// progress finishes; a poll sleep is cut short.
fn spawn_stop_listeners(stop: Arc<StopSignal>) {
    let on_signal = Arc::clone(&stop);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping after the current cycle");
                on_signal.stop();
            }
            Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    // Plain thread: a blocking stdin read must not hold up runtime shutdown
    std::thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = std::io::stdin().read_line(&mut line) {
            if n > 0 {
                info!("Enter pressed, stopping after the current cycle");
                stop.stop();
            }
        }
    });
}
