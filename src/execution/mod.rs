use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market order for `qty` base-coin units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: f64,
    /// Price the decision was made at; used for logs and simulated fills
    pub reference_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub side: OrderSide,
    pub qty: f64,
    /// Known only for simulated fills; live market orders report an id
    pub fill_price: Option<f64>,
}

/// Destination for market orders
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck>;
}

/// Logs orders instead of sending them
#[derive(Debug, Default)]
pub struct PaperOrderSink {
    next_id: AtomicU64,
}

impl PaperOrderSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderSink for PaperOrderSink {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        info!(
            "📝 [PAPER] {} {} {} @ ${:.2}",
            request.side, request.qty, request.symbol, request.reference_price
        );

        Ok(OrderAck {
            order_id: format!("paper-{}", id),
            side: request.side,
            qty: request.qty,
            fill_price: Some(request.reference_price),
        })
    }
}
