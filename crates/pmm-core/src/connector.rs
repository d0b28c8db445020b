//! Interfaces to the exchange side of the engine.
//!
//! The strategy never talks to a venue directly. It reads prices and
//! balances, submits and cancels orders, and consumes order events through
//! [`ExchangeConnector`]. External reference prices come from a
//! [`PriceSource`] delegate.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::execution::{OrderEvent, OrderRequest};
use crate::order::{ClientOrderId, OrderSide};
use crate::types::{PriceType, TradingRules};
use crate::{Price, Size};

/// Typed outcome of a failed connector call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Transient failure (network, rate limit). Safe to retry next tick.
    #[error("Retryable connector error: {0}")]
    Retryable(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// The connector does not know this order.
    #[error("Unknown order: {0}")]
    UnknownOrder(ClientOrderId),

    /// Unrecoverable failure. The caller must stop trading.
    #[error("Fatal connector error: {0}")]
    Fatal(String),
}

impl ConnectorError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Retryable(_) => "retryable",
            Self::InsufficientBalance(_) => "insufficient_balance",
            Self::UnknownOrder(_) => "unknown_order",
            Self::Fatal(_) => "fatal",
        }
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// External reference price provider (another market's book, a custom feed).
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait PriceSource: Send + Sync {
    /// Returns `None` while the source has no usable price.
    fn price_by_type(&self, price_type: PriceType) -> Option<Price>;
}

/// Single-market exchange connector.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait ExchangeConnector {
    /// Whether the connector has market data and balances to trade on.
    fn is_ready(&self) -> bool;

    fn trading_rules(&self) -> TradingRules;

    /// Best bid, best ask, mid or last trade of this market's book.
    fn price_by_type(&self, price_type: PriceType) -> Option<Price>;

    /// Price of the level on the `side` half of the book (buy = bids) at
    /// which cumulative volume reaches `depth`. A zero depth yields the
    /// best price. `None` when that half is empty.
    fn price_at_depth(&self, side: OrderSide, depth: Size) -> Option<Price>;

    /// Free balance of `asset`, net of amounts reserved by open orders.
    fn available_balance(&self, asset: &str) -> Decimal;

    /// Submit an order. Returns the client order id once accepted.
    fn create_order(&mut self, request: &OrderRequest) -> ConnectorResult<ClientOrderId>;

    /// Request cancellation. `Ok(true)` means the request was accepted; the
    /// confirmation arrives later as an [`OrderEvent::Cancelled`].
    fn cancel_order(&mut self, order_id: &ClientOrderId) -> ConnectorResult<bool>;

    /// Take every order event delivered since the previous call.
    fn drain_events(&mut self) -> Vec<OrderEvent>;
}
