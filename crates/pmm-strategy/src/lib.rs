//! Pure market making strategy.
//!
//! Quotes a ladder of buy and sell orders around a reference price on a
//! single market, keeps the ladder fresh as the market moves, and adapts
//! sizes to inventory and available balance.
//!
//! # Modules
//!
//! - [`pricing`]: reference price to quote ladder, price modifiers
//! - [`inventory`]: inventory skew and inventory cost
//! - [`budget`]: fit proposals to available balances
//! - [`order_tracker`]: active orders and in-flight cancels
//! - [`hanging`]: hanging order bookkeeping
//! - [`ping_pong`]: alternate sides after fills
//! - [`volatility`]: wick statistics for spread widening
//! - [`strategy`]: the tick loop tying them together

pub mod budget;
pub mod config;
pub mod error;
pub mod hanging;
pub mod inventory;
pub mod order_tracker;
pub mod ping_pong;
pub mod pricing;
pub mod proposal;
pub mod strategy;
pub mod volatility;

pub use config::{OrderOverride, StrategyConfig};
pub use error::{StrategyError, StrategyResult};
pub use inventory::{InventoryCostTracker, InventorySkew};
pub use order_tracker::{ActiveOrder, OrderTracker};
pub use proposal::{Proposal, Quote};
pub use strategy::{
    CancelReason, CancelledOrder, ConnectorFailure, CreatedOrder, FillRecord, OrderStatus,
    PureMarketMaking, SkipReason, StrategyStatus, TickReport,
};
pub use volatility::VolatilityStats;
