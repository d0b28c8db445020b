//! Prometheus metrics and structured logging for the market making engine.
//!
//! - Prometheus collectors for ticks, order flow, fills and connector failures
//! - Structured logging with tracing (JSON in production, pretty otherwise)
//! - End-of-session summary built from the collected counters

pub mod error;
pub mod logging;
pub mod metrics;
pub mod session_stats;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, LogFormat, DEFAULT_LOG_FILTER};
pub use metrics::Metrics;
pub use session_stats::{SessionStats, SessionStatsReporter};
