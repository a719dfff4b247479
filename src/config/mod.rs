use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::BotError;

const MAINNET_REST_URL: &str = "https://api.bybit.com";
const TESTNET_REST_URL: &str = "https://api-testnet.bybit.com";
/// Longest accepted trade cooldown: 30 days
pub const MAX_COOLDOWN_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bybit: BybitConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BybitConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    #[serde(default)]
    pub testnet: bool,
    /// Overrides the mainnet/testnet default when set
    pub rest_url: Option<String>,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            testnet: false,
            rest_url: None,
            recv_window_ms: default_recv_window_ms(),
        }
    }
}

impl BybitConfig {
    pub fn rest_url(&self) -> String {
        match &self.rest_url {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ if self.testnet => TESTNET_REST_URL.to_string(),
            _ => MAINNET_REST_URL.to_string(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.api_key, &self.api_secret),
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty()
        )
    }
}

fn default_recv_window_ms() -> u64 { 5000 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradingConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Order size in base coin units
    #[serde(default = "default_trade_amount")]
    pub trade_amount: f64,
    #[serde(default)]
    pub paper_trading: bool,
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,               // Bybit interval code: "1", "5", "60", "D"...
    #[serde(default = "default_kline_limit")]
    pub kline_limit: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            trade_amount: default_trade_amount(),
            paper_trading: false,
            kline_interval: default_kline_interval(),
            kline_limit: default_kline_limit(),
            poll_interval_secs: default_poll_interval_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_symbol() -> String { "BTCUSDT".to_string() }
fn default_trade_amount() -> f64 { 0.001 }
fn default_kline_interval() -> String { "1".to_string() }
fn default_kline_limit() -> usize { 100 }
fn default_poll_interval_secs() -> u64 { 5 }
fn default_cooldown_secs() -> u64 { 300 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    // Indicator windows
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_volume_ma_period")]
    pub volume_ma_period: usize,
    #[serde(default = "default_trend_ma_period")]
    pub trend_ma_period: usize,
    #[serde(default = "default_momentum_period")]
    pub momentum_period: usize,

    // Entry/exit thresholds
    #[serde(default = "default_atr_buy_multiplier")]
    pub atr_buy_multiplier: f64,
    #[serde(default = "default_atr_sell_multiplier")]
    pub atr_sell_multiplier: f64,
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_base_atr_multiplier")]
    pub base_atr_multiplier: f64,
    #[serde(default = "default_trend_buffer")]
    pub trend_buffer: f64,
    #[serde(default = "default_volume_buffer")]
    pub volume_buffer: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            atr_period: default_atr_period(),
            rsi_period: default_rsi_period(),
            volume_ma_period: default_volume_ma_period(),
            trend_ma_period: default_trend_ma_period(),
            momentum_period: default_momentum_period(),
            atr_buy_multiplier: default_atr_buy_multiplier(),
            atr_sell_multiplier: default_atr_sell_multiplier(),
            rsi_oversold: default_rsi_oversold(),
            rsi_overbought: default_rsi_overbought(),
            base_atr_multiplier: default_base_atr_multiplier(),
            trend_buffer: default_trend_buffer(),
            volume_buffer: default_volume_buffer(),
        }
    }
}

impl StrategyConfig {
    /// Smallest candle window that yields a valid indicator snapshot
    pub fn min_candles(&self) -> usize {
        self.atr_period
            .max(self.rsi_period)
            .max(self.trend_ma_period)
    }
}

fn default_atr_period() -> usize { 7 }
fn default_rsi_period() -> usize { 7 }
fn default_volume_ma_period() -> usize { 20 }
fn default_trend_ma_period() -> usize { 50 }
fn default_momentum_period() -> usize { 3 }
fn default_atr_buy_multiplier() -> f64 { 0.025 }
fn default_atr_sell_multiplier() -> f64 { 0.025 }
fn default_rsi_oversold() -> f64 { 35.0 }
fn default_rsi_overbought() -> f64 { 70.0 }
fn default_base_atr_multiplier() -> f64 { 0.02 }
fn default_trend_buffer() -> f64 { 0.992 }
fn default_volume_buffer() -> f64 { 0.5 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    #[serde(default = "default_trailing_sl_multiplier")]
    pub trailing_sl_multiplier: f64,
    /// When true, a triggered stop waits for the trade cooldown to expire
    #[serde(default)]
    pub stop_loss_respects_cooldown: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            trailing_sl_multiplier: default_trailing_sl_multiplier(),
            stop_loss_respects_cooldown: false,
        }
    }
}

fn default_trailing_sl_multiplier() -> f64 { 1.5 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_file")]
    pub file: Option<String>,
    /// Write the log file as JSON lines
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            json: false,
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_file() -> Option<String> { Some("trading_bot.log".to_string()) }

impl Config {
    pub fn load() -> Result<Arc<Self>> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("BOT")
                    .separator("__")
                    .try_parsing(true),
            );

        // Load API keys from environment
        if let Ok(api_key) = std::env::var("BYBIT_API_KEY") {
            builder = builder.set_override("bybit.api_key", api_key)?;
        }

        if let Ok(api_secret) = std::env::var("BYBIT_API_SECRET") {
            builder = builder.set_override("bybit.api_secret", api_secret)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(Arc::new(config))
    }

    pub fn validate(&self) -> std::result::Result<(), BotError> {
        let trading = &self.trading;
        let strategy = &self.strategy;

        if trading.symbol.trim().is_empty() {
            return Err(BotError::Config("trading.symbol is empty".into()));
        }
        if !(trading.trade_amount > 0.0) {
            return Err(BotError::Config(format!(
                "trading.trade_amount must be positive, got {}",
                trading.trade_amount
            )));
        }
        if trading.kline_limit < strategy.min_candles() {
            return Err(BotError::Config(format!(
                "trading.kline_limit {} is below the {} candles the indicators need",
                trading.kline_limit,
                strategy.min_candles()
            )));
        }

        if trading.kline_limit < strategy.volume_ma_period {
            return Err(BotError::Config(format!(
                "trading.kline_limit {} is below strategy.volume_ma_period {}",
                trading.kline_limit, strategy.volume_ma_period
            )));
        }
        if trading.kline_limit < strategy.momentum_period + 1 {
            return Err(BotError::Config(format!(
                "trading.kline_limit {} cannot hold the {} closes momentum_period {} compares",
                trading.kline_limit,
                strategy.momentum_period + 1,
                strategy.momentum_period
            )));
        }
        if trading.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(BotError::Config(format!(
                "trading.cooldown_secs {} exceeds the {}s maximum",
                trading.cooldown_secs, MAX_COOLDOWN_SECS
            )));
        }

        let periods = [
            ("atr_period", strategy.atr_period),
            ("rsi_period", strategy.rsi_period),
            ("volume_ma_period", strategy.volume_ma_period),
            ("trend_ma_period", strategy.trend_ma_period),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, p)| *p == 0) {
            return Err(BotError::Config(format!("strategy.{} must be at least 1", name)));
        }

        if !(strategy.base_atr_multiplier > 0.0) {
            return Err(BotError::Config("strategy.base_atr_multiplier must be positive".into()));
        }
        if strategy.rsi_oversold >= strategy.rsi_overbought {
            return Err(BotError::Config(format!(
                "strategy.rsi_oversold ({}) must be below rsi_overbought ({})",
                strategy.rsi_oversold, strategy.rsi_overbought
            )));
        }
        if !trading.paper_trading && !self.bybit.has_credentials() {
            return Err(BotError::Config(
                "live trading requires BYBIT_API_KEY and BYBIT_API_SECRET (or enable paper_trading)".into(),
            ));
        }

        Ok(())
    }
}
