//! Market replay files.
//!
//! One JSON object per line, tagged by `type`. Decimals are written as
//! strings so they survive parsing exactly:
//!
//! ```text
//! {"timestamp_ms": 1000, "type": "balanced", "mid": "100", "step": "1", "levels": 10, "volume_step": "10"}
//! {"timestamp_ms": 7500, "type": "trade", "side": "sell", "price": "98.9", "amount": "5"}
//! {"timestamp_ms": 9000, "type": "widen", "top_bid": "97", "top_ask": "103"}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use pmm_core::{OrderSide, Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SimError, SimResult};
use crate::exchange::PaperExchange;
use crate::order_book::BookLevel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEvent {
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub kind: ReplayKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayKind {
    /// Replace the whole book.
    Snapshot {
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
    },
    /// Replace the book with `levels` evenly spaced levels per side.
    Balanced {
        mid: Price,
        step: Decimal,
        levels: u32,
        volume_step: Size,
    },
    /// A public trade; `side` is the taker side.
    Trade {
        side: OrderSide,
        price: Price,
        amount: Size,
    },
    /// Pull liquidity inside the given prices.
    Widen { top_bid: Price, top_ask: Price },
}

impl ReplayKind {
    fn validate(&self) -> Result<(), String> {
        match self {
            Self::Balanced { step, mid, .. } if *step <= Decimal::ZERO || !mid.is_positive() => {
                Err("balanced book needs a positive mid and step".to_string())
            }
            Self::Trade { price, amount, .. } if !price.is_positive() || !amount.is_positive() => {
                Err("trade needs a positive price and amount".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Parse a replay stream. Events come back sorted by timestamp; events
/// sharing a timestamp keep their file order.
pub fn parse_replay<R: BufRead>(reader: R) -> SimResult<Vec<ReplayEvent>> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event: ReplayEvent = serde_json::from_str(trimmed).map_err(|e| SimError::Replay {
            line: idx + 1,
            message: e.to_string(),
        })?;
        event.kind.validate().map_err(|message| SimError::Replay {
            line: idx + 1,
            message,
        })?;
        events.push(event);
    }
    events.sort_by_key(|e| e.timestamp_ms);
    Ok(events)
}

pub fn load_replay(path: impl AsRef<Path>) -> SimResult<Vec<ReplayEvent>> {
    let file = File::open(path.as_ref())?;
    let events = parse_replay(BufReader::new(file))?;
    debug!(path = %path.as_ref().display(), events = events.len(), "Loaded replay");
    Ok(events)
}

/// Cursor over replay events, applied as simulated time passes.
#[derive(Debug, Clone, Default)]
pub struct ReplayFeed {
    events: Vec<ReplayEvent>,
    cursor: usize,
}

impl ReplayFeed {
    pub fn new(mut events: Vec<ReplayEvent>) -> Self {
        events.sort_by_key(|e| e.timestamp_ms);
        Self { events, cursor: 0 }
    }

    /// Apply every event at or before `now_ms`. Returns how many were applied.
    pub fn apply_due(&mut self, now_ms: u64, exchange: &mut PaperExchange) -> usize {
        let start = self.cursor;
        while let Some(event) = self.events.get(self.cursor) {
            if event.timestamp_ms > now_ms {
                break;
            }
            exchange.apply_replay(event);
            self.cursor += 1;
        }
        self.cursor - start
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.events.len()
    }

    pub fn remaining(&self) -> usize {
        self.events.len() - self.cursor
    }

    pub fn first_timestamp_ms(&self) -> Option<u64> {
        self.events.first().map(|e| e.timestamp_ms)
    }

    pub fn last_timestamp_ms(&self) -> Option<u64> {
        self.events.last().map(|e| e.timestamp_ms)
    }
}
