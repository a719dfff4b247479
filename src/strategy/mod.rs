use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::StrategyConfig;
use crate::indicators::IndicatorSnapshot;

/// Below this RSI the volume gate relaxes to half the volume MA
const EXTREME_OVERSOLD_RSI: f64 = 25.0;
const EXTREME_OVERSOLD_VOLUME_BUFFER: f64 = 0.5;
/// Signal exits must clear the entry by at least 0.1%
const MIN_EXIT_MARKUP: f64 = 1.001;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    Signal,
    StopLoss,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Decision {
    Buy,
    Sell(ExitReason),
    Hold,
}

/// ATR multiplier that shrinks as volatility grows
#[derive(Debug, Clone)]
pub struct AdaptiveParameters {
    base_multiplier: f64,
    atr_multiplier: f64,
}

impl AdaptiveParameters {
    pub fn new(base_multiplier: f64) -> Self {
        Self {
            base_multiplier,
            atr_multiplier: base_multiplier,
        }
    }

    /// Recompute the multiplier from the latest ATR. No hysteresis: the
    /// previous value plays no part.
    pub fn update(&mut self, atr: Option<f64>) {
        let Some(atr) = atr else {
            warn!("Adaptive update skipped: ATR unavailable");
            return;
        };

        self.atr_multiplier = if atr > 200.0 {
            self.base_multiplier * 0.6
        } else if atr > 150.0 {
            self.base_multiplier * 0.8
        } else {
            self.base_multiplier
        };
    }

    pub fn atr_multiplier(&self) -> f64 {
        self.atr_multiplier
    }

    pub fn base_multiplier(&self) -> f64 {
        self.base_multiplier
    }
}

/// Position bookkeeping owned by the trading loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionState {
    pub in_position: bool,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub high_watermark: Option<f64>,
    pub low_watermark: Option<f64>,
}

impl PositionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cooldown_active(&self, now: DateTime<Utc>, cooldown_secs: u64) -> bool {
        let Some(last) = self.last_trade_at else {
            return false;
        };

        // A cooldown too long to represent never expires
        match i64::try_from(cooldown_secs).ok().and_then(Duration::try_seconds) {
            Some(cooldown) => now - last < cooldown,
            None => true,
        }
    }

    /// Record a filled buy
    pub fn open(&mut self, entry_price: f64, stop_loss: f64, now: DateTime<Utc>) {
        self.in_position = true;
        self.entry_price = Some(entry_price);
        self.stop_loss = Some(stop_loss);
        self.last_trade_at = Some(now);
    }

    /// Record a filled sell
    pub fn close(&mut self, now: DateTime<Utc>) {
        self.in_position = false;
        self.entry_price = None;
        self.stop_loss = None;
        self.last_trade_at = Some(now);
    }

    /// A buy that never filled leaves no position behind
    pub fn abandon_entry(&mut self) {
        self.in_position = false;
        self.entry_price = None;
        self.stop_loss = None;
    }

    /// A sell that failed: assume the asset is still held
    pub fn assume_still_open(&mut self) {
        self.in_position = true;
    }

    /// Unrealized P&L against the entry, in percent
    pub fn pnl_pct(&self, price: f64) -> Option<f64> {
        self.entry_price
            .filter(|entry| *entry > 0.0)
            .map(|entry| (price - entry) / entry * 100.0)
    }

    fn update_watermarks(&mut self, price: f64) -> (f64, f64) {
        let high = self.high_watermark.map_or(price, |h| h.max(price));
        let low = self.low_watermark.map_or(price, |l| l.min(price));
        self.high_watermark = Some(high);
        self.low_watermark = Some(low);
        (high, low)
    }
}

/// Gate results and thresholds from one evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalEvaluation {
    pub buy: bool,
    pub sell: bool,
    pub cooldown: bool,
    pub drop_threshold: Option<f64>,
    pub rise_threshold: Option<f64>,
    pub volume_condition: bool,
    pub trend_condition: bool,
    pub momentum_condition: bool,
}

impl SignalEvaluation {
    fn cooling_down() -> Self {
        Self {
            cooldown: true,
            ..Self::default()
        }
    }

    pub fn decision(&self) -> Decision {
        if self.buy {
            Decision::Buy
        } else if self.sell {
            Decision::Sell(ExitReason::Signal)
        } else {
            Decision::Hold
        }
    }
}

/// True when the last `momentum_period + 1` closes rise strictly
pub fn momentum_condition(closes: &[f64], momentum_period: usize) -> bool {
    let needed = momentum_period + 1;
    if closes.len() < needed {
        return false;
    }

    closes[closes.len() - needed..]
        .windows(2)
        .all(|pair| pair[1] > pair[0])
}

/// Entry/exit rules over watermarks, RSI, volume, trend and momentum
pub struct SignalEvaluator {
    cfg: StrategyConfig,
    cooldown_secs: u64,
}

impl SignalEvaluator {
    pub fn new(cfg: StrategyConfig, cooldown_secs: u64) -> Self {
        Self { cfg, cooldown_secs }
    }

    pub fn evaluate(
        &self,
        price: f64,
        snapshot: &IndicatorSnapshot,
        state: &mut PositionState,
        now: DateTime<Utc>,
    ) -> SignalEvaluation {
        if state.cooldown_active(now, self.cooldown_secs) {
            return SignalEvaluation::cooling_down();
        }

        let cfg = &self.cfg;
        let atr = snapshot.atr;
        let rsi = snapshot.rsi;

        let (high, low) = state.update_watermarks(price);
        let drop_threshold = high - atr * cfg.atr_buy_multiplier;
        let rise_threshold = low + atr * cfg.atr_sell_multiplier;

        let volume_buffer = if rsi < EXTREME_OVERSOLD_RSI {
            EXTREME_OVERSOLD_VOLUME_BUFFER
        } else {
            cfg.volume_buffer
        };
        let volume_condition = snapshot.volume > snapshot.volume_ma * volume_buffer;
        let trend_condition = price > snapshot.trend_ma * cfg.trend_buffer;
        let momentum = momentum_condition(&snapshot.recent_closes, cfg.momentum_period);

        let buy_condition = price <= drop_threshold
            && rsi < cfg.rsi_oversold
            && volume_condition
            && trend_condition
            && momentum;

        let sell_condition = price >= rise_threshold
            && rsi > cfg.rsi_overbought
            && state
                .entry_price
                .map_or(false, |entry| price > entry * MIN_EXIT_MARKUP);

        info!(
            "📈 Indicators | ATR: {:.2} | RSI: {:.2} | Volume: {:.2}/{:.2} | TrendMA: {:.2}",
            atr, rsi, snapshot.volume, snapshot.volume_ma, snapshot.trend_ma
        );
        info!(
            "🎯 Thresholds | Buy <= {:.2} | Sell >= {:.2}",
            drop_threshold, rise_threshold
        );
        info!(
            "🔎 Gates | Trend: {} | Momentum: {} | Volume: {}",
            trend_condition, momentum, volume_condition
        );

        SignalEvaluation {
            buy: buy_condition && !state.in_position,
            sell: sell_condition && state.in_position,
            cooldown: false,
            drop_threshold: Some(drop_threshold),
            rise_threshold: Some(rise_threshold),
            volume_condition,
            trend_condition,
            momentum_condition: momentum,
        }
    }
}
