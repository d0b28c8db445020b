//! Fixed-step clock for backtests.

use std::sync::atomic::{AtomicU64, Ordering};

use pmm_core::Clock;

use crate::error::{SimError, SimResult};

/// Simulated time that only moves when [`BacktestClock::advance`] is called.
/// Starts at `start_ms` and never passes `end_ms`.
#[derive(Debug)]
pub struct BacktestClock {
    now: AtomicU64,
    start_ms: u64,
    end_ms: u64,
    step_ms: u64,
}

impl BacktestClock {
    pub fn new(start_ms: u64, end_ms: u64, step_ms: u64) -> SimResult<Self> {
        if step_ms == 0 {
            return Err(SimError::InvalidClock("step must be positive".to_string()));
        }
        if end_ms < start_ms {
            return Err(SimError::InvalidClock(format!(
                "end {end_ms} is before start {start_ms}"
            )));
        }
        Ok(Self {
            now: AtomicU64::new(start_ms),
            start_ms,
            end_ms,
            step_ms,
        })
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> u64 {
        self.end_ms
    }

    pub fn step_ms(&self) -> u64 {
        self.step_ms
    }

    /// Move one step forward. `None` once the next step would pass the end.
    pub fn advance(&self) -> Option<u64> {
        let now = self.now.load(Ordering::Acquire);
        let next = now.checked_add(self.step_ms)?;
        if next > self.end_ms {
            return None;
        }
        self.now.store(next, Ordering::Release);
        Some(next)
    }

    pub fn is_finished(&self) -> bool {
        let now = self.now.load(Ordering::Acquire);
        now.checked_add(self.step_ms).map_or(true, |next| next > self.end_ms)
    }
}

impl Clock for BacktestClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    fn name(&self) -> &'static str {
        "backtest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_until_end() {
        let clock = BacktestClock::new(1_000, 3_000, 1_000).unwrap();
        assert_eq!(clock.now_ms(), 1_000);
        assert_eq!(clock.advance(), Some(2_000));
        assert!(!clock.is_finished());
        assert_eq!(clock.advance(), Some(3_000));
        assert!(clock.is_finished());
        assert_eq!(clock.advance(), None);
        assert_eq!(clock.now_ms(), 3_000);
        assert_eq!(clock.name(), "backtest");
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(matches!(
            BacktestClock::new(0, 10, 0),
            Err(SimError::InvalidClock(_))
        ));
        assert!(BacktestClock::new(10, 5, 1).is_err());
        assert!(BacktestClock::new(5, 5, 1).unwrap().is_finished());
    }
}
