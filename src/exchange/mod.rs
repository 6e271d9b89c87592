// Exchange seam: the trait the engine trades through, plus wire types
pub mod clob;

pub use clob::ClobClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// An order as the engine wants it on the book. The intent key is
/// client-generated and stable across retries of the same intent.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub intent_key: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Live,
    PartiallyFilled,
    Filled,
    Canceled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Failed
        )
    }
}

/// Authoritative order state as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: String,
    pub status: OrderStatus,
    pub avg_fill_price: Option<f64>,
    pub filled_size: f64,
}

/// The remote exchange. Any call may time out or return partial
/// information; callers re-query rather than infer.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Submit an order; returns the exchange order id on acceptance.
    async fn place_order(&self, request: &OrderRequest) -> Result<String, ExchangeError>;

    /// Cancel an order. `Ok(false)` means the order was already done.
    async fn cancel_order(&self, order_id: &str) -> Result<bool, ExchangeError>;

    async fn get_order(&self, order_id: &str) -> Result<OrderInfo, ExchangeError>;

    /// Look up an order by its client intent key. `Ok(None)` is an
    /// authoritative "never accepted".
    async fn get_order_by_intent(
        &self,
        intent_key: &str,
    ) -> Result<Option<OrderInfo>, ExchangeError>;

    /// Outcome-token balance held for an instrument.
    async fn get_balance(&self, token_id: &str) -> Result<f64, ExchangeError>;

    /// Top-of-book quote for the decision and monitor loops.
    async fn get_quote(&self, token_id: &str) -> Result<crate::feed::FeedMessage, ExchangeError>;
}
