//! Strategy error types.

use pmm_core::{ConnectorError, CoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    /// Rejected at strategy start; never raised from a tick.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Fatal connector failure surfaced from a tick.
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

pub type StrategyResult<T> = Result<T, StrategyError>;
