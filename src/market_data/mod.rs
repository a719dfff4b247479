use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One OHLCV sample. Windows of candles are always ordered oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
}

/// Pull-based source of ticker prices and candle windows.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Last traded price for the symbol
    async fn fetch_price(&self, symbol: &str) -> Result<f64>;

    /// Most recent `limit` candles of the given interval, oldest first
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>>;
}
