//! Time sources that drive the tick loop.

/// Source of the current time, so that the same loop can run on wall time
/// or on simulated backtest time.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    fn name(&self) -> &'static str;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }

    fn name(&self) -> &'static str {
        "realtime"
    }
}
