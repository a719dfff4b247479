use chrono::{TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};
use crate::market_data::Candle;

/// Envelope shared by every V5 REST response
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    #[serde(rename = "retCode")]
    pub ret_code: i64,

    #[serde(rename = "retMsg", default)]
    pub ret_msg: String,

    #[serde(default)]
    pub result: serde_json::Value,
}

impl ApiResponse {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body)
            .map_err(|e| BotError::MalformedResponse(format!("{}: {}", e, truncate(body))))
    }

    /// Unwrap `result` into `T`, mapping a non-zero `retCode` with `on_error`.
    /// Bybit sends `result: {}` alongside errors, so the code is checked first.
    pub fn into_result<T, F>(self, on_error: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnOnce(String) -> BotError,
    {
        if self.ret_code != 0 {
            return Err(on_error(format!("retCode {}: {}", self.ret_code, self.ret_msg)));
        }

        serde_json::from_value(self.result)
            .map_err(|e| BotError::MalformedResponse(format!("unexpected result shape: {}", e)))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TickerList {
    pub list: Vec<TickerData>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TickerData {
    #[serde(rename = "symbol")]
    pub symbol: String,

    #[serde(rename = "lastPrice")]
    pub last_price: String,
}

/// Kline rows arrive as `[start, open, high, low, close, volume, turnover]`
/// string arrays, newest first
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KlineList {
    #[serde(default)]
    pub symbol: Option<String>,

    pub list: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderCreated {
    #[serde(rename = "orderId")]
    pub order_id: String,

    #[serde(rename = "orderLinkId", default)]
    pub order_link_id: String,
}

/// Last traded price from a `/v5/market/tickers` body
pub fn parse_ticker_price(body: &str) -> Result<f64> {
    let tickers: TickerList = ApiResponse::parse(body)?.into_result(BotError::DataUnavailable)?;

    let ticker = tickers
        .list
        .first()
        .ok_or_else(|| BotError::DataUnavailable("empty ticker list".to_string()))?;

    let price: f64 = ticker
        .last_price
        .parse()
        .map_err(|_| BotError::MalformedResponse(format!("lastPrice {:?}", ticker.last_price)))?;

    if !price.is_finite() || price <= 0.0 {
        return Err(BotError::DataUnavailable(format!("non-positive price {}", price)));
    }

    Ok(price)
}

/// Candles from a `/v5/market/kline` body, sorted oldest first
pub fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let klines: KlineList = ApiResponse::parse(body)?.into_result(BotError::DataUnavailable)?;

    if klines.list.is_empty() {
        return Err(BotError::DataUnavailable("empty kline list".to_string()));
    }

    let mut candles = klines
        .list
        .iter()
        .map(|row| parse_kline_row(row))
        .collect::<Result<Vec<_>>>()?;

    candles.sort_by_key(|c| c.start);
    Ok(candles)
}

/// Order id from a `/v5/order/create` body
pub fn parse_order_created(body: &str) -> Result<OrderCreated> {
    ApiResponse::parse(body)?.into_result(BotError::OrderRejected)
}

fn parse_kline_row(row: &[String]) -> Result<Candle> {
    if row.len() < 7 {
        return Err(BotError::MalformedResponse(format!("kline row has {} fields", row.len())));
    }

    let number = |i: usize| -> Result<f64> {
        row[i]
            .parse::<f64>()
            .map_err(|_| BotError::MalformedResponse(format!("kline field {} = {:?}", i, row[i])))
    };

    let start_ms: i64 = row[0]
        .parse()
        .map_err(|_| BotError::MalformedResponse(format!("kline start {:?}", row[0])))?;
    let start = Utc
        .timestamp_millis_opt(start_ms)
        .single()
        .ok_or_else(|| BotError::MalformedResponse(format!("kline start {} out of range", start_ms)))?;

    Ok(Candle {
        start,
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        volume: number(5)?,
        turnover: number(6)?,
    })
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
