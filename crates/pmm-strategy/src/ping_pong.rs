//! Ping-pong: after a fill, stop quoting the filled side until the other
//! side fills too, or until one full refresh cycle has run with the side
//! withheld.

use pmm_core::OrderSide;
use serde::Serialize;
use tracing::debug;

use crate::proposal::Proposal;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PingPongState {
    pub filled_buys: u32,
    pub filled_sells: u32,
    /// Start of the first creation cycle that withheld a side.
    cycle_start_ms: Option<u64>,
}

impl PingPongState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a completed (non-hanging) order. Balanced counters reset.
    ///
    /// A new fill restarts the wait for the next creation cycle.
    pub fn record_fill(&mut self, side: OrderSide) {
        match side {
            OrderSide::Buy => self.filled_buys += 1,
            OrderSide::Sell => self.filled_sells += 1,
        }
        self.cycle_start_ms = None;
        if self.filled_buys == self.filled_sells {
            self.reset();
        }
    }

    /// A creation cycle began at `now_ms` with the current counters applied.
    pub fn start_cycle(&mut self, now_ms: u64) {
        if self.is_active() && self.cycle_start_ms.is_none() {
            debug!(
                filled_buys = self.filled_buys,
                filled_sells = self.filled_sells,
                cycle_start_ms = now_ms,
                "Ping-pong suppression applied"
            );
            self.cycle_start_ms = Some(now_ms);
        }
    }

    /// Reset once a full refresh cycle has run since the suppression was
    /// first applied.
    pub fn expire(&mut self, now_ms: u64, refresh_ms: u64) {
        if let Some(start) = self.cycle_start_ms {
            if now_ms.saturating_sub(start) >= refresh_ms {
                debug!(
                    filled_buys = self.filled_buys,
                    filled_sells = self.filled_sells,
                    "Ping-pong counters reset after refresh cycle"
                );
                self.reset();
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.filled_buys != self.filled_sells
    }

    fn reset(&mut self) {
        self.filled_buys = 0;
        self.filled_sells = 0;
        self.cycle_start_ms = None;
    }

    /// Unmatched fills on one side.
    pub fn unmatched(&self, side: OrderSide) -> u32 {
        match side {
            OrderSide::Buy => self.filled_buys.saturating_sub(self.filled_sells),
            OrderSide::Sell => self.filled_sells.saturating_sub(self.filled_buys),
        }
    }

    /// Remove the first N levels of a side with N unmatched fills.
    pub fn apply(&self, proposal: &mut Proposal) {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let n = self.unmatched(side) as usize;
            if n == 0 {
                continue;
            }
            let quotes = proposal.side_mut(side);
            let drop = n.min(quotes.len());
            quotes.drain(..drop);
        }
    }
}
