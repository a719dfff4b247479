use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{BotError, Result};
use crate::execution::{OrderRequest, OrderSide, OrderSink};
use crate::indicators::compute_indicators;
use crate::market_data::MarketDataSource;
use crate::risk::{RiskManager, StopLossCheck};
use crate::strategy::{AdaptiveParameters, Decision, ExitReason, PositionState, SignalEvaluator};

/// What a single cycle ended up doing
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped { reason: String },
    Cooldown,
    Held,
    StopDeferred { stop_loss: f64 },
    Bought { price: f64, stop_loss: f64 },
    Sold { price: f64, reason: ExitReason, pnl_pct: f64 },
    OrderFailed { side: OrderSide, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub cycles: u64,
    pub skipped: u64,
    pub buys: u64,
    pub sells: u64,
    pub stop_loss_sells: u64,
    pub order_failures: u64,
    pub realized_pnl_pct: f64,
}

impl std::fmt::Display for SessionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycles: {} | skipped: {} | buys: {} | sells: {} (stop-loss: {}) | order failures: {} | realized P&L: {:+.2}%",
            self.cycles,
            self.skipped,
            self.buys,
            self.sells,
            self.stop_loss_sells,
            self.order_failures,
            self.realized_pnl_pct
        )
    }
}

/// Shared stop request. The loop checks it before every cycle and wakes
/// early from its poll sleep when it fires.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // notify_one keeps a permit if the loop is not sleeping yet
        self.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn notified(&self) {
        self.notify.notified().await
    }
}

/// Sequential poll → decide → execute loop for one symbol
pub struct TradingLoop {
    config: Arc<Config>,
    market: Arc<dyn MarketDataSource>,
    orders: Arc<dyn OrderSink>,
    evaluator: SignalEvaluator,
    risk: RiskManager,
    adaptive: AdaptiveParameters,
    state: PositionState,
    current_atr: Option<f64>,
    stats: SessionStats,
    stop: Arc<StopSignal>,
}

impl TradingLoop {
    pub fn new(config: Arc<Config>, market: Arc<dyn MarketDataSource>, orders: Arc<dyn OrderSink>) -> Self {
        let cooldown_secs = config.trading.cooldown_secs;

        Self {
            evaluator: SignalEvaluator::new(config.strategy.clone(), cooldown_secs),
            risk: RiskManager::new(config.risk.clone(), cooldown_secs),
            adaptive: AdaptiveParameters::new(config.strategy.base_atr_multiplier),
            state: PositionState::new(),
            current_atr: None,
            stats: SessionStats::default(),
            stop: Arc::new(StopSignal::new()),
            config,
            market,
            orders,
        }
    }

    /// Resume from a known position, e.g. one opened before a restart
    pub fn restore_state(&mut self, state: PositionState) {
        self.state = state;
    }

    /// Handle for stopping the loop from another task or thread
    pub fn stop_handle(&self) -> Arc<StopSignal> {
        Arc::clone(&self.stop)
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn adaptive(&self) -> &AdaptiveParameters {
        &self.adaptive
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Run cycles until a stop is requested or a fatal error occurs
    pub async fn run(&mut self) -> Result<()> {
        let poll_interval = Duration::from_secs(self.config.trading.poll_interval_secs);
        info!(
            "🚀 Trading loop started | {} | poll every {}s | paper: {}",
            self.config.trading.symbol, poll_interval.as_secs(), self.config.trading.paper_trading
        );

        while !self.stop.is_stopped() {
            if let Err(e) = self.run_cycle(Utc::now()).await {
                error!("💥 Fatal error, stopping: {}", e);
                return Err(e);
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = self.stop.notified() => {}
            }
        }

        info!("🛑 Stop requested, trading loop finished");
        Ok(())
    }

    /// One full cycle at wall-clock time `now`.
    ///
    /// Recoverable failures come back as `Skipped` or `OrderFailed`; an
    /// `Err` means the loop must not continue.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        self.stats.cycles += 1;
        let outcome = self.cycle(now).await?;

        if let CycleOutcome::Skipped { reason } = &outcome {
            self.stats.skipped += 1;
            warn!("⏭️  Cycle skipped: {}", reason);
        }

        Ok(outcome)
    }

    async fn cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let trading = &self.config.trading;

        let price = match self.market.fetch_price(&trading.symbol).await {
            Ok(price) => price,
            Err(e) => return skip_or_fail("price fetch", e),
        };

        let candles = match self
            .market
            .fetch_candles(&trading.symbol, &trading.kline_interval, trading.kline_limit)
            .await
        {
            Ok(candles) => candles,
            Err(e) => return skip_or_fail("candle fetch", e),
        };

        let snapshot = match compute_indicators(&candles, &self.config.strategy) {
            Ok(snapshot) => snapshot,
            Err(e) => return skip_or_fail("indicators", e),
        };

        info!("📊 {} | Price: ${:.2} | Close: ${:.2}", trading.symbol, price, snapshot.close_price);

        self.current_atr = Some(snapshot.atr);
        self.adaptive.update(self.current_atr);

        match self.risk.check(price, self.current_atr, &self.adaptive, &mut self.state, now) {
            StopLossCheck::Triggered { .. } => {
                return self.execute_sell(price, ExitReason::StopLoss, now).await;
            }
            StopLossCheck::Deferred { stop_loss } => {
                return Ok(CycleOutcome::StopDeferred { stop_loss });
            }
            StopLossCheck::Holding { .. } | StopLossCheck::Inactive => {}
        }

        let evaluation = self.evaluator.evaluate(price, &snapshot, &mut self.state, now);
        if evaluation.cooldown {
            return Ok(CycleOutcome::Cooldown);
        }

        match evaluation.decision() {
            Decision::Buy => self.execute_buy(price, now).await,
            Decision::Sell(reason) => self.execute_sell(price, reason, now).await,
            Decision::Hold => Ok(CycleOutcome::Held),
        }
    }

    async fn execute_buy(&mut self, price: f64, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let stop_loss = self.risk.calculate_stop_loss(price, self.current_atr, &self.adaptive);
        let request = self.order_request(OrderSide::Buy, price);

        match self.orders.submit_order(&request).await {
            Ok(ack) => {
                self.state.open(price, stop_loss, now);
                self.stats.buys += 1;
                info!(
                    "🟢 Bought {} {} @ ${:.2} | order: {} | initial stop-loss: ${:.2}",
                    request.qty, request.symbol, price, ack.order_id, stop_loss
                );
                Ok(CycleOutcome::Bought { price, stop_loss })
            }
            Err(e) => {
                self.state.abandon_entry();
                self.order_failed(OrderSide::Buy, e)
            }
        }
    }

    async fn execute_sell(&mut self, price: f64, reason: ExitReason, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let pnl_pct = self.state.pnl_pct(price).unwrap_or(0.0);
        let request = self.order_request(OrderSide::Sell, price);

        match self.orders.submit_order(&request).await {
            Ok(ack) => {
                self.state.close(now);
                self.stats.sells += 1;
                if reason == ExitReason::StopLoss {
                    self.stats.stop_loss_sells += 1;
                }
                self.stats.realized_pnl_pct += pnl_pct;
                info!(
                    "🔴 Sold {} {} @ ${:.2} ({:+.2}%) | reason: {:?} | order: {}",
                    request.qty, request.symbol, price, pnl_pct, reason, ack.order_id
                );
                Ok(CycleOutcome::Sold { price, reason, pnl_pct })
            }
            Err(e) => {
                // Keep risk coverage on an asset that may still be held
                self.state.assume_still_open();
                self.order_failed(OrderSide::Sell, e)
            }
        }
    }

    fn order_failed(&mut self, side: OrderSide, e: BotError) -> Result<CycleOutcome> {
        self.stats.order_failures += 1;
        error!("❌ {} order failed: {}", side, e);

        if e.is_recoverable() {
            Ok(CycleOutcome::OrderFailed { side, reason: e.to_string() })
        } else {
            Err(e)
        }
    }

    fn order_request(&self, side: OrderSide, price: f64) -> OrderRequest {
        OrderRequest {
            symbol: self.config.trading.symbol.clone(),
            side,
            qty: self.config.trading.trade_amount,
            reference_price: price,
        }
    }
}

fn skip_or_fail(stage: &str, e: BotError) -> Result<CycleOutcome> {
    if e.is_recoverable() {
        Ok(CycleOutcome::Skipped { reason: format!("{}: {}", stage, e) })
    } else {
        Err(e)
    }
}
