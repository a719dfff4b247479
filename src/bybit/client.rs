use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::bybit::auth::BybitAuth;
use crate::bybit::types::{parse_klines, parse_order_created, parse_ticker_price};
use crate::error::{BotError, Result};
use crate::execution::{OrderAck, OrderRequest, OrderSink};
use crate::market_data::{Candle, MarketDataSource};

const CATEGORY: &str = "spot";

/// Bybit V5 REST client for spot market data and market orders
pub struct BybitClient {
    client: Client,
    auth: Option<BybitAuth>,
    rest_url: String,
    recv_window: u64,
}

impl BybitClient {
    pub fn new(rest_url: String, auth: Option<BybitAuth>, recv_window: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BotError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            auth,
            rest_url,
            recv_window,
        })
    }

    pub async fn get_ticker_price(&self, symbol: &str) -> Result<f64> {
        let body = self
            .public_get("/v5/market/tickers", &[("category", CATEGORY), ("symbol", symbol)])
            .await?;
        parse_ticker_price(&body)
    }

    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let limit = limit.to_string();
        let body = self
            .public_get(
                "/v5/market/kline",
                &[
                    ("category", CATEGORY),
                    ("symbol", symbol),
                    ("interval", interval),
                    ("limit", limit.as_str()),
                ],
            )
            .await?;
        parse_klines(&body)
    }

    pub async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let url = format!("{}/v5/order/create", self.rest_url);

        // marketUnit=baseCoin keeps qty in base units for buys as well as sells
        let body = json!({
            "category": CATEGORY,
            "symbol": request.symbol,
            "side": request.side.as_str(),
            "orderType": "Market",
            "qty": request.qty.to_string(),
            "marketUnit": "baseCoin",
        });

        let response_body = signed_post(&self.client, &url, self.auth.as_ref(), &body, self.recv_window).await?;
        let created = parse_order_created(&response_body).map_err(|e| {
            if let BotError::OrderRejected(ref msg) = e {
                warn!("⚠️  Bybit rejected {} order: {} | Request: {}", request.side, msg, body);
            }
            e
        })?;

        debug!("Order accepted: {} ({})", created.order_id, created.order_link_id);

        Ok(OrderAck {
            order_id: created.order_id,
            side: request.side,
            qty: request.qty,
            fill_price: None,
        })
    }

    async fn public_get(&self, path: &str, query: &[(&str, &str)]) -> Result<String> {
        let url = format!("{}{}", self.rest_url, path);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| BotError::DataUnavailable(format!("GET {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::DataUnavailable(format!("GET {} returned HTTP {}", path, status)));
        }

        response
            .text()
            .await
            .map_err(|e| BotError::DataUnavailable(format!("GET {} body: {}", path, e)))
    }
}

#[async_trait]
impl MarketDataSource for BybitClient {
    async fn fetch_price(&self, symbol: &str) -> Result<f64> {
        self.get_ticker_price(symbol).await
    }

    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        self.get_klines(symbol, interval, limit).await
    }
}

#[async_trait]
impl OrderSink for BybitClient {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        self.place_order(request).await
    }
}

async fn signed_post(
    client: &Client,
    url: &str,
    auth: Option<&BybitAuth>,
    body: &serde_json::Value,
    recv_window: u64,
) -> Result<String> {
    let auth = auth.ok_or_else(|| BotError::Config("order placement requires API credentials".to_string()))?;

    let timestamp = BybitAuth::get_timestamp();
    let body_str = body.to_string();
    let sign = auth.generate_signature(timestamp, recv_window, &body_str);

    let response = client
        .post(url)
        .header("X-BAPI-API-KEY", auth.get_api_key())
        .header("X-BAPI-SIGN", sign)
        .header("X-BAPI-SIGN-TYPE", "2")
        .header("X-BAPI-TIMESTAMP", timestamp.to_string())
        .header("X-BAPI-RECV-WINDOW", recv_window.to_string())
        .header("Content-Type", "application/json")
        .body(body_str)
        .send()
        .await
        .map_err(|e| BotError::OrderRejected(format!("HTTP request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(BotError::OrderRejected(format!("HTTP {}", status)));
    }

    response
        .text()
        .await
        .map_err(|e| BotError::OrderRejected(format!("reading response failed: {}", e)))
}
