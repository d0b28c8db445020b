//! In-process paper exchange for the pure market making engine.
//!
//! - [`OrderBook`]: price levels, top of book and depth queries
//! - [`PaperExchange`]: an [`pmm_core::ExchangeConnector`] with balances,
//!   reservations, resting-order matching and an event queue
//! - [`OrderBookPriceDelegate`], [`CustomPriceDelegate`]: external prices
//! - [`BacktestClock`]: deterministic fixed-step clock
//! - [`replay`]: JSON-lines market replay files

pub mod clock;
pub mod delegate;
pub mod error;
pub mod exchange;
pub mod order_book;
pub mod replay;

pub use clock::BacktestClock;
pub use delegate::{CustomPriceDelegate, OrderBookPriceDelegate};
pub use error::{SimError, SimResult};
pub use exchange::{PaperExchange, RestingOrder};
pub use order_book::{BookLevel, OrderBook, SharedOrderBook};
pub use replay::{load_replay, parse_replay, ReplayEvent, ReplayFeed, ReplayKind};
