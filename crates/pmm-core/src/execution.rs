//! Order lifecycle types shared between the strategy and connectors.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::order::{ClientOrderId, OrderSide, OrderType};
use crate::{Price, Size};

/// State of an order in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Accepted by the connector, not yet confirmed open.
    #[default]
    Pending,
    /// Confirmed resting on the book.
    Open,
    PartiallyFilled,
    /// Cancel sent, confirmation outstanding.
    PendingCancel,
    Filled,
    Cancelled,
    Failed,
}

impl OrderState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Failed)
    }

    /// Returns true while the order can still trade or be cancelled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Open | Self::PartiallyFilled | Self::PendingCancel
        )
    }
}

/// Order submission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub order_type: OrderType,
}

impl OrderRequest {
    /// Create a limit order request. Rejects non-positive prices and sizes.
    pub fn limit(side: OrderSide, price: Price, size: Size) -> Result<Self> {
        if !price.is_positive() {
            return Err(CoreError::InvalidPrice(price.to_string()));
        }
        if !size.is_positive() {
            return Err(CoreError::InvalidSize(size.to_string()));
        }
        Ok(Self {
            side,
            price,
            size,
            order_type: OrderType::Limit,
        })
    }

    /// Reject instead of taking liquidity if the order would cross.
    pub fn post_only(mut self) -> Self {
        self.order_type = OrderType::LimitMaker;
        self
    }
}

/// Order notification delivered by a connector between ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    /// Order confirmed resting on the book.
    Created {
        order_id: ClientOrderId,
        timestamp_ms: u64,
    },
    /// Partial or full fill of `amount` at `price`.
    Filled {
        order_id: ClientOrderId,
        side: OrderSide,
        price: Price,
        amount: Size,
        timestamp_ms: u64,
    },
    /// The order has been filled completely.
    Completed {
        order_id: ClientOrderId,
        side: OrderSide,
        timestamp_ms: u64,
    },
    Cancelled {
        order_id: ClientOrderId,
        timestamp_ms: u64,
    },
    /// The exchange rejected or dropped the order.
    Failed {
        order_id: ClientOrderId,
        timestamp_ms: u64,
    },
}

impl OrderEvent {
    pub fn order_id(&self) -> &ClientOrderId {
        match self {
            Self::Created { order_id, .. }
            | Self::Filled { order_id, .. }
            | Self::Completed { order_id, .. }
            | Self::Cancelled { order_id, .. }
            | Self::Failed { order_id, .. } => order_id,
        }
    }

    pub fn timestamp_ms(&self) -> u64 {
        match self {
            Self::Created { timestamp_ms, .. }
            | Self::Filled { timestamp_ms, .. }
            | Self::Completed { timestamp_ms, .. }
            | Self::Cancelled { timestamp_ms, .. }
            | Self::Failed { timestamp_ms, .. } => *timestamp_ms,
        }
    }

    /// Whether this event ends the order's life.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_state_transitions() {
        assert!(OrderState::Pending.is_active());
        assert!(OrderState::PendingCancel.is_active());
        assert!(!OrderState::PendingCancel.is_terminal());
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Cancelled.is_terminal());
        assert!(OrderState::Failed.is_terminal());
        assert!(!OrderState::Failed.is_active());
    }

    #[test]
    fn test_limit_request_validation() {
        let ok = OrderRequest::limit(OrderSide::Buy, Price::new(dec!(99)), Size::new(dec!(1)));
        assert!(ok.is_ok());
        let ok = ok.unwrap();
        assert_eq!(ok.order_type, OrderType::Limit);
        assert_eq!(ok.post_only().order_type, OrderType::LimitMaker);

        let zero_px = OrderRequest::limit(OrderSide::Buy, Price::ZERO, Size::new(dec!(1)));
        assert!(matches!(zero_px, Err(CoreError::InvalidPrice(_))));

        let neg_size = OrderRequest::limit(OrderSide::Sell, Price::ONE, Size::new(dec!(-1)));
        assert!(matches!(neg_size, Err(CoreError::InvalidSize(_))));
    }

    #[test]
    fn test_event_accessors_and_json() {
        let ev = OrderEvent::Completed {
            order_id: ClientOrderId::from("buy-HBOT-ETH-1"),
            side: OrderSide::Buy,
            timestamp_ms: 42,
        };
        assert_eq!(ev.order_id().as_str(), "buy-HBOT-ETH-1");
        assert_eq!(ev.timestamp_ms(), 42);
        assert!(ev.is_terminal());

        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"completed\""));
        let back: OrderEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
