use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bybit_spot_bot::config::Config;
use bybit_spot_bot::error::{BotError, Result};
use bybit_spot_bot::execution::{OrderAck, OrderRequest, OrderSide, OrderSink};
use bybit_spot_bot::market_data::{Candle, MarketDataSource};
use bybit_spot_bot::strategy::{ExitReason, PositionState};
use bybit_spot_bot::{CycleOutcome, StopSignal, TradingLoop};

#[derive(Clone, Copy)]
enum Failure {
    Unavailable,
    Malformed,
}

struct FakeMarket {
    price: Mutex<f64>,
    candles: Mutex<Vec<Candle>>,
    failure: Mutex<Option<Failure>>,
    fetches: AtomicUsize,
    stop_after: Mutex<Option<(usize, Arc<StopSignal>)>>,
}

impl FakeMarket {
    fn new(price: f64, candles: Vec<Candle>) -> Arc<Self> {
        Arc::new(Self {
            price: Mutex::new(price),
            candles: Mutex::new(candles),
            failure: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            stop_after: Mutex::new(None),
        })
    }

    fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }

    fn fail_with(&self, failure: Option<Failure>) {
        *self.failure.lock().unwrap() = failure;
    }
}

#[async_trait]
impl MarketDataSource for FakeMarket {
    async fn fetch_price(&self, _symbol: &str) -> Result<f64> {
        let fetches = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, stop)) = self.stop_after.lock().unwrap().as_ref() {
            if fetches >= *limit {
                stop.stop();
            }
        }

        match *self.failure.lock().unwrap() {
            Some(Failure::Unavailable) => Err(BotError::DataUnavailable("ticker timeout".into())),
            Some(Failure::Malformed) => Err(BotError::MalformedResponse("lastPrice missing".into())),
            None => Ok(*self.price.lock().unwrap()),
        }
    }

    async fn fetch_candles(&self, _symbol: &str, _interval: &str, _limit: usize) -> Result<Vec<Candle>> {
        Ok(self.candles.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct RecordingSink {
    orders: Mutex<Vec<OrderRequest>>,
    failing: Mutex<Vec<OrderSide>>,
}

impl RecordingSink {
    fn fail_side(&self, side: OrderSide) {
        self.failing.lock().unwrap().push(side);
    }

    fn sides(&self) -> Vec<OrderSide> {
        self.orders.lock().unwrap().iter().map(|o| o.side).collect()
    }
}

#[async_trait]
impl OrderSink for RecordingSink {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        self.orders.lock().unwrap().push(request.clone());

        if self.failing.lock().unwrap().contains(&request.side) {
            return Err(BotError::OrderRejected("retCode 170131: Insufficient balance.".into()));
        }

        Ok(OrderAck {
            order_id: format!("test-{}", self.orders.lock().unwrap().len()),
            side: request.side,
            qty: request.qty,
            fill_price: None,
        })
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn test_config() -> Arc<Config> {
    let mut config = Config::default();
    config.trading.paper_trading = true;
    config.trading.poll_interval_secs = 0;
    Arc::new(config)
}

fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    let origin = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Candle {
            start: origin + Duration::minutes(i as i64),
            open: close,
            high: close + 0.1,
            low: close - 0.1,
            close,
            volume: 10.0,
            turnover: close * 10.0,
        })
        .collect()
}

/// Flat market around 100: ATR 0.2, RSI 100
fn flat_candles() -> Vec<Candle> {
    candles_from_closes(&[100.0; 60])
}

/// Flat market, a short dip, then three rising closes: RSI ~13,
/// price just under the trend MA, momentum up
fn dip_and_recovery_candles() -> Vec<Candle> {
    let mut closes = vec![100.0; 52];
    closes.extend_from_slice(&[99.7, 99.4, 99.42, 99.44, 99.46]);
    candles_from_closes(&closes)
}

fn open_position(entry: f64, stop: f64) -> PositionState {
    let mut state = PositionState::new();
    state.open(entry, stop, now() - Duration::hours(2));
    state
}

fn build(market: &Arc<FakeMarket>, sink: &Arc<RecordingSink>) -> TradingLoop {
    TradingLoop::new(test_config(), market.clone(), sink.clone())
}

fn build_with(config: Config, market: &Arc<FakeMarket>, sink: &Arc<RecordingSink>) -> TradingLoop {
    TradingLoop::new(Arc::new(config), market.clone(), sink.clone())
}

#[tokio::test]
async fn test_buy_after_dip_from_watermark() {
    let market = FakeMarket::new(100.0, dip_and_recovery_candles());
    let sink = Arc::new(RecordingSink::default());
    let mut bot = build(&market, &sink);

    // First observation only sets the watermark
    let outcome = bot.run_cycle(now()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Held);
    assert_eq!(bot.state().high_watermark, Some(100.0));

    market.set_price(99.46);
    let outcome = bot.run_cycle(now() + Duration::seconds(5)).await.unwrap();

    let CycleOutcome::Bought { price, stop_loss } = outcome else {
        panic!("expected a buy, got {:?}", outcome);
    };
    assert_eq!(price, 99.46);
    assert!(stop_loss < price && stop_loss > 98.0);

    let state = bot.state();
    assert!(state.in_position);
    assert_eq!(state.entry_price, Some(99.46));
    assert_eq!(state.stop_loss, Some(stop_loss));
    assert_eq!(state.last_trade_at, Some(now() + Duration::seconds(5)));
    assert_eq!(sink.sides(), vec![OrderSide::Buy]);
    assert_eq!(bot.stats().buys, 1);
}

#[tokio::test]
async fn test_cooldown_after_trade_holds() {
    let market = FakeMarket::new(100.0, dip_and_recovery_candles());
    let sink = Arc::new(RecordingSink::default());
    let mut bot = build(&market, &sink);

    bot.run_cycle(now()).await.unwrap();
    market.set_price(99.46);
    bot.run_cycle(now()).await.unwrap();
    assert!(bot.state().in_position);

    let outcome = bot.run_cycle(now() + Duration::seconds(60)).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Cooldown);
    assert_eq!(sink.sides().len(), 1);

    let outcome = bot.run_cycle(now() + Duration::seconds(301)).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Held);
}

#[tokio::test]
async fn test_stop_loss_forces_sell() {
    let market = FakeMarket::new(99.5, flat_candles());
    let sink = Arc::new(RecordingSink::default());
    let mut bot = build(&market, &sink);
    bot.restore_state(open_position(100.0, 99.8));

    let outcome = bot.run_cycle(now()).await.unwrap();

    let CycleOutcome::Sold { price, reason, pnl_pct } = outcome else {
        panic!("expected a stop-loss sell, got {:?}", outcome);
    };
    assert_eq!(price, 99.5);
    assert_eq!(reason, ExitReason::StopLoss);
    assert!((pnl_pct + 0.5).abs() < 1e-9);

    let state = bot.state();
    assert!(!state.in_position);
    assert_eq!(state.entry_price, None);
    assert_eq!(state.stop_loss, None);
    assert_eq!(sink.sides(), vec![OrderSide::Sell]);
    assert_eq!(bot.stats().stop_loss_sells, 1);
}

#[tokio::test]
async fn test_failed_sell_keeps_position_open() {
    let market = FakeMarket::new(99.5, flat_candles());
    let sink = Arc::new(RecordingSink::default());
    sink.fail_side(OrderSide::Sell);
    let mut bot = build(&market, &sink);
    bot.restore_state(open_position(100.0, 99.8));

    let outcome = bot.run_cycle(now()).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::OrderFailed { side: OrderSide::Sell, .. }));

    let state = bot.state();
    assert!(state.in_position);
    assert_eq!(state.entry_price, Some(100.0));
    assert_eq!(state.stop_loss, Some(99.8));
    assert_eq!(bot.stats().order_failures, 1);
    assert_eq!(bot.stats().sells, 0);

    // The stop keeps firing on later cycles until the sell goes through
    sink.failing.lock().unwrap().clear();
    let outcome = bot.run_cycle(now() + Duration::seconds(5)).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Sold { reason: ExitReason::StopLoss, .. }));
}

#[tokio::test]
async fn test_failed_buy_leaves_no_position() {
    let market = FakeMarket::new(100.0, dip_and_recovery_candles());
    let sink = Arc::new(RecordingSink::default());
    sink.fail_side(OrderSide::Buy);
    let mut bot = build(&market, &sink);

    bot.run_cycle(now()).await.unwrap();
    market.set_price(99.46);
    let outcome = bot.run_cycle(now()).await.unwrap();

    assert!(matches!(outcome, CycleOutcome::OrderFailed { side: OrderSide::Buy, .. }));
    let state = bot.state();
    assert!(!state.in_position);
    assert_eq!(state.entry_price, None);
    assert_eq!(state.stop_loss, None);
    assert_eq!(state.last_trade_at, None);
}

#[tokio::test]
async fn test_short_candle_window_skips_without_mutation() {
    let market = FakeMarket::new(99.5, candles_from_closes(&[100.0; 30]));
    let sink = Arc::new(RecordingSink::default());
    let mut bot = build(&market, &sink);
    let before = open_position(100.0, 99.8);
    bot.restore_state(before.clone());

    let outcome = bot.run_cycle(now()).await.unwrap();

    assert!(matches!(outcome, CycleOutcome::Skipped { .. }));
    assert_eq!(bot.state(), &before);
    assert_eq!(bot.adaptive().atr_multiplier(), 0.02);
    assert!(sink.sides().is_empty());
    assert_eq!(bot.stats().skipped, 1);
}

#[tokio::test]
async fn test_price_outage_skips_cycle() {
    let market = FakeMarket::new(100.0, flat_candles());
    market.fail_with(Some(Failure::Unavailable));
    let sink = Arc::new(RecordingSink::default());
    let mut bot = build(&market, &sink);

    let outcome = bot.run_cycle(now()).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Skipped { ref reason } if reason.contains("ticker timeout")));
    assert_eq!(bot.state(), &PositionState::new());
}

#[tokio::test]
async fn test_malformed_response_is_fatal() {
    let market = FakeMarket::new(100.0, flat_candles());
    market.fail_with(Some(Failure::Malformed));
    let sink = Arc::new(RecordingSink::default());
    let mut bot = build(&market, &sink);

    let err = bot.run().await.unwrap_err();
    assert!(matches!(err, BotError::MalformedResponse(_)));
    assert_eq!(bot.stats().cycles, 1);
}

#[tokio::test]
async fn test_stop_flag_ends_loop_between_cycles() {
    let market = FakeMarket::new(100.0, flat_candles());
    let sink = Arc::new(RecordingSink::default());
    let mut bot = build(&market, &sink);
    *market.stop_after.lock().unwrap() = Some((3, bot.stop_handle()));

    bot.run().await.unwrap();

    assert_eq!(bot.stats().cycles, 3);
    assert_eq!(market.fetches.load(Ordering::SeqCst), 3);
    assert!(sink.sides().is_empty());
}

#[tokio::test]
async fn test_stop_never_loosens_across_cycles() {
    let market = FakeMarket::new(100.0, flat_candles());
    let sink = Arc::new(RecordingSink::default());
    let mut bot = build(&market, &sink);
    // Entry above every price so no signal exit fires; stop distance is 0.6
    bot.restore_state(open_position(110.0, 95.0));

    let mut previous = 95.0;
    for (i, price) in [100.0, 100.5, 100.2, 101.0, 100.7, 100.9].into_iter().enumerate() {
        market.set_price(price);
        bot.run_cycle(now() + Duration::seconds(5 * i as i64)).await.unwrap();

        let state = bot.state();
        assert!(state.in_position);
        let stop = state.stop_loss.unwrap();
        assert!(stop >= previous, "stop loosened from {} to {}", previous, stop);
        previous = stop;
    }
}

#[tokio::test]
async fn test_signal_exit_books_profit() {
    let market = FakeMarket::new(100.5, flat_candles());
    let sink = Arc::new(RecordingSink::default());
    let mut bot = build(&market, &sink);
    bot.restore_state(open_position(100.0, 95.0));

    // Sets the low watermark at 100.5; rise threshold 100.505
    let outcome = bot.run_cycle(now()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Held);

    market.set_price(101.0);
    let later = now() + Duration::seconds(5);
    let outcome = bot.run_cycle(later).await.unwrap();

    let CycleOutcome::Sold { price, reason, pnl_pct } = outcome else {
        panic!("expected a signal exit, got {:?}", outcome);
    };
    assert_eq!(price, 101.0);
    assert_eq!(reason, ExitReason::Signal);
    assert!((pnl_pct - 1.0).abs() < 1e-9);

    let state = bot.state();
    assert!(!state.in_position);
    assert_eq!(state.entry_price, None);
    assert_eq!(state.stop_loss, None);
    assert_eq!(state.last_trade_at, Some(later));

    let stats = bot.stats();
    assert_eq!(stats.sells, 1);
    assert_eq!(stats.stop_loss_sells, 0);
    assert!((stats.realized_pnl_pct - 1.0).abs() < 1e-9);
    assert_eq!(sink.sides(), vec![OrderSide::Sell]);
}

#[tokio::test]
async fn test_stop_waits_for_cooldown_when_configured() {
    let mut config = Config::default();
    config.trading.paper_trading = true;
    config.trading.poll_interval_secs = 0;
    config.risk.stop_loss_respects_cooldown = true;

    let market = FakeMarket::new(94.0, flat_candles());
    let sink = Arc::new(RecordingSink::default());
    let mut bot = build_with(config, &market, &sink);

    let mut state = PositionState::new();
    state.open(100.0, 95.0, now() - Duration::seconds(10));
    bot.restore_state(state);

    let outcome = bot.run_cycle(now()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::StopDeferred { stop_loss: 95.0 });

    let state = bot.state();
    assert!(state.in_position);
    assert_eq!(state.entry_price, Some(100.0));
    assert_eq!(state.stop_loss, Some(95.0));
    assert!(sink.sides().is_empty());

    // Cooldown over: the same breach now sells
    let outcome = bot.run_cycle(now() + Duration::seconds(300)).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Sold { reason: ExitReason::StopLoss, .. }));
    assert_eq!(sink.sides(), vec![OrderSide::Sell]);
}

#[tokio::test]
async fn test_stop_cuts_poll_sleep_short() {
    let mut config = Config::default();
    config.trading.paper_trading = true;
    config.trading.poll_interval_secs = 3600;

    let market = FakeMarket::new(100.0, flat_candles());
    let sink = Arc::new(RecordingSink::default());
    let mut bot = build_with(config, &market, &sink);

    let stop = bot.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop.stop();
    });

    let result = tokio::time::timeout(std::time::Duration::from_secs(5), bot.run()).await;
    assert!(matches!(result, Ok(Ok(()))), "loop kept sleeping after stop");
    assert_eq!(bot.stats().cycles, 1);
}
