pub mod config;
pub mod error;
pub mod bybit;
pub mod market_data;
pub mod indicators;
pub mod strategy;
pub mod risk;
pub mod execution;
pub mod engine;

pub use config::Config;
pub use error::BotError;
pub use bybit::{BybitAuth, BybitClient};
pub use engine::{CycleOutcome, SessionStats, StopSignal, TradingLoop};
