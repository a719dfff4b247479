use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::strategy::{AdaptiveParameters, PositionState};

/// Stop used when no ATR reading exists yet: 5% under the price
const FALLBACK_STOP_RATIO: f64 = 0.95;

/// Outcome of one trailing-stop check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopLossCheck {
    /// No open position or no ATR reading
    Inactive,
    Holding { stop_loss: f64 },
    Triggered { stop_loss: f64 },
    /// Price is through the stop but the trade cooldown is still running
    Deferred { stop_loss: f64 },
}

/// Trailing stop that only ever tightens while a position is open
pub struct RiskManager {
    cfg: RiskConfig,
    cooldown_secs: u64,
}

impl RiskManager {
    pub fn new(cfg: RiskConfig, cooldown_secs: u64) -> Self {
        Self { cfg, cooldown_secs }
    }

    /// Stop level for `price`: ATR distance widened by the current
    /// volatility adjustment, or a flat 5% when ATR is unknown.
    pub fn calculate_stop_loss(&self, price: f64, atr: Option<f64>, params: &AdaptiveParameters) -> f64 {
        let Some(atr) = atr else {
            warn!("Cannot size stop-loss from ATR, using fallback {:.0}% of price", FALLBACK_STOP_RATIO * 100.0);
            return price * FALLBACK_STOP_RATIO;
        };

        let volatility_adjustment = 1.0 + params.atr_multiplier() / params.base_multiplier();
        price - atr * self.cfg.trailing_sl_multiplier * volatility_adjustment
    }

    /// Ratchet the stop for the current price and report whether it fired
    pub fn check(
        &self,
        current_price: f64,
        atr: Option<f64>,
        params: &AdaptiveParameters,
        state: &mut PositionState,
        now: DateTime<Utc>,
    ) -> StopLossCheck {
        if !state.in_position || atr.is_none() {
            return StopLossCheck::Inactive;
        }

        let candidate = self.calculate_stop_loss(current_price, atr, params);
        let stop_loss = state.stop_loss.map_or(candidate, |existing| existing.max(candidate));
        state.stop_loss = Some(stop_loss);

        if current_price > stop_loss {
            info!("🛡️  Current stop-loss: {:.2}", stop_loss);
            return StopLossCheck::Holding { stop_loss };
        }

        if self.cfg.stop_loss_respects_cooldown && state.cooldown_active(now, self.cooldown_secs) {
            warn!("⏳ Stop-loss {:.2} hit during cooldown, exit deferred", stop_loss);
            return StopLossCheck::Deferred { stop_loss };
        }

        warn!("🔥 Stop-loss triggered: {:.2}", stop_loss);
        StopLossCheck::Triggered { stop_loss }
    }
}
