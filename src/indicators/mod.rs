//! Technical indicators over an explicit candle window.
//!
//! Everything here is a pure function of its input slice, so the decision
//! engine can be exercised with hand-built windows.

use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::error::{BotError, Result};
use crate::market_data::Candle;

/// Latest indicator readings for one trading cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub atr: f64,
    pub rsi: f64,
    pub volume: f64,
    pub volume_ma: f64,
    pub trend_ma: f64,
    pub close_price: f64,
    /// Last `momentum_period + 1` closes, oldest first
    pub recent_closes: Vec<f64>,
}

/// Compute the snapshot for the newest candle in `candles`.
///
/// Fails with `InsufficientData` when the window is shorter than
/// `max(atr_period, rsi_period, trend_ma_period)`, and with
/// `DataUnavailable` when any reading cannot be produced.
pub fn compute_indicators(candles: &[Candle], cfg: &StrategyConfig) -> Result<IndicatorSnapshot> {
    let needed = cfg.min_candles();
    if candles.is_empty() || candles.len() < needed {
        return Err(BotError::InsufficientData {
            needed,
            got: candles.len(),
        });
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let atr = calculate_atr(candles, cfg.atr_period)
        .ok_or_else(|| unavailable("ATR"))?;
    let rsi = calculate_rsi(&closes, cfg.rsi_period)
        .ok_or_else(|| unavailable("RSI"))?;
    let volume_ma = calculate_sma(&volumes, cfg.volume_ma_period)
        .ok_or_else(|| unavailable("volume MA"))?;
    let trend_ma = calculate_sma(&closes, cfg.trend_ma_period)
        .ok_or_else(|| unavailable("trend MA"))?;

    let last = &candles[candles.len() - 1];
    let keep = (cfg.momentum_period + 1).min(closes.len());
    let recent_closes = closes[closes.len() - keep..].to_vec();

    let snapshot = IndicatorSnapshot {
        atr,
        rsi,
        volume: last.volume,
        volume_ma,
        trend_ma,
        close_price: last.close,
        recent_closes,
    };

    let readings = [
        snapshot.atr,
        snapshot.rsi,
        snapshot.volume,
        snapshot.volume_ma,
        snapshot.trend_ma,
        snapshot.close_price,
    ];
    if readings.iter().any(|v| !v.is_finite()) || snapshot.close_price <= 0.0 {
        return Err(BotError::DataUnavailable(format!(
            "non-finite indicator readings: {:?}",
            readings
        )));
    }

    Ok(snapshot)
}

fn unavailable(name: &str) -> BotError {
    BotError::DataUnavailable(format!("{} could not be computed", name))
}

/// True range per candle. The first candle has no previous close, so its
/// range is just high - low.
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    let mut ranges = Vec::with_capacity(candles.len());

    for (i, current) in candles.iter().enumerate() {
        let tr1 = current.high - current.low;
        let true_range = match i.checked_sub(1).map(|p| &candles[p]) {
            Some(previous) => {
                let tr2 = (current.high - previous.close).abs();
                let tr3 = (current.low - previous.close).abs();
                tr1.max(tr2).max(tr3)
            }
            None => tr1,
        };
        ranges.push(true_range);
    }

    ranges
}

/// Average True Range with Wilder smoothing.
///
/// Seeded with the mean of the first `period` true ranges; needs at least
/// `period` candles.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let ranges = true_ranges(candles);
    let seed = ranges[..period].iter().sum::<f64>() / period as f64;
    let n = period as f64;

    Some(
        ranges[period..]
            .iter()
            .fold(seed, |atr, tr| (atr * (n - 1.0) + tr) / n),
    )
}

/// Relative Strength Index with Wilder smoothing (alpha = 1/period).
///
/// The first close contributes a zero change, so `period` closes are enough
/// for a reading. Returns 100 when the average loss is zero.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let alpha = 1.0 / period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for window in closes.windows(2) {
        let change = window[1] - window[0];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (1.0 - alpha) * avg_gain + alpha * gain;
        avg_loss = (1.0 - alpha) * avg_loss + alpha * loss;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Simple moving average of the trailing `period` values
pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let sum: f64 = values.iter().rev().take(period).sum();
    Some(sum / period as f64)
}
