//! Pure market making bot.
//!
//! Wires the strategy to the paper exchange and runs it either over a
//! replay file on simulated time or on the wall clock.

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, RunSummary};
pub use config::{AppConfig, RunMode};
pub use error::{AppError, AppResult};
