//! Core domain types for the pure market making engine.
//!
//! - `Price`, `Size`: precision-safe numeric types
//! - `OrderSide`, `OrderType`, `ClientOrderId`: order enums and ids
//! - `PriceType`, `TradingPair`, `TradingRules`, `Bbo`: market description
//! - `OrderRequest`, `OrderEvent`, `OrderState`: order lifecycle
//! - `ExchangeConnector`, `PriceSource`, `Clock`: collaborator interfaces

pub mod clock;
pub mod connector;
pub mod decimal;
pub mod error;
pub mod execution;
pub mod order;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use connector::{ConnectorError, ConnectorResult, ExchangeConnector, PriceSource};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use execution::{OrderEvent, OrderRequest, OrderState};
pub use order::{ClientOrderId, OrderSide, OrderType};
pub use types::{Bbo, BboState, PriceSourceKind, PriceType, TradingPair, TradingRules};

#[cfg(feature = "mock")]
pub use connector::{MockExchangeConnector, MockPriceSource};
