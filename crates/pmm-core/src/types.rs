//! Market description types: price types, trading pair, trading rules, BBO.

use crate::error::{CoreError, Result};
use crate::order::OrderSide;
use crate::{Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which price a price source should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceType {
    #[default]
    MidPrice,
    BestBid,
    BestAsk,
    #[serde(rename = "last_price")]
    LastTrade,
    #[serde(rename = "last_own_trade_price")]
    LastOwnTrade,
    InventoryCost,
    /// Externally supplied price (custom API feed).
    Custom,
}

impl fmt::Display for PriceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MidPrice => "mid_price",
            Self::BestBid => "best_bid",
            Self::BestAsk => "best_ask",
            Self::LastTrade => "last_price",
            Self::LastOwnTrade => "last_own_trade_price",
            Self::InventoryCost => "inventory_cost",
            Self::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

/// Where the reference price comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSourceKind {
    /// The book of the market being quoted.
    #[default]
    CurrentMarket,
    /// The book of another market, through a price delegate.
    ExternalMarket,
    /// A custom feed, through a price delegate.
    CustomApi,
}

impl PriceSourceKind {
    pub fn needs_delegate(&self) -> bool {
        !matches!(self, Self::CurrentMarket)
    }
}

/// Trading pair in `BASE-QUOTE` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Asset that a resting order of `side` reserves.
    pub fn reserved_asset(&self, side: OrderSide) -> &str {
        match side {
            OrderSide::Buy => &self.quote,
            OrderSide::Sell => &self.base,
        }
    }
}

impl FromStr for TradingPair {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('-') {
            Some((base, quote))
                if !base.is_empty() && !quote.is_empty() && !quote.contains('-') =>
            {
                Ok(Self::new(base, quote))
            }
            _ => Err(CoreError::InvalidTradingPair(s.to_string())),
        }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

/// Exchange trading rules for one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingRules {
    pub tick_size: Price,
    pub lot_size: Size,
    pub min_order_size: Size,
    /// Maker fee as a fraction of notional.
    pub maker_fee_pct: Decimal,
    /// Taker fee as a fraction of notional.
    pub taker_fee_pct: Decimal,
}

impl TradingRules {
    /// Quantize a price onto the tick grid, away from the reference:
    /// buys round down, sells round up.
    pub fn quantize_price(&self, side: OrderSide, price: Price) -> Price {
        match side {
            OrderSide::Buy => price.round_to_tick(self.tick_size),
            OrderSide::Sell => price.round_up_to_tick(self.tick_size),
        }
    }

    pub fn quantize_size(&self, size: Size) -> Size {
        size.round_to_lot(self.lot_size)
    }

    /// Whether a quantized size can be submitted.
    pub fn is_tradeable_size(&self, size: Size) -> bool {
        size.is_positive() && size >= self.min_order_size
    }
}

impl Default for TradingRules {
    fn default() -> Self {
        Self {
            tick_size: Price::new(Decimal::new(1, 4)),
            lot_size: Size::new(Decimal::new(1, 4)),
            min_order_size: Size::new(Decimal::new(1, 4)),
            maker_fee_pct: Decimal::ZERO,
            taker_fee_pct: Decimal::ZERO,
        }
    }
}

/// BBO validity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BboState {
    Valid,
    NoBid,
    NoAsk,
    Empty,
    /// Crossed or non-positive prices.
    Invalid,
}

impl BboState {
    pub fn is_tradeable(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for BboState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "VALID"),
            Self::NoBid => write!(f, "NO_BID"),
            Self::NoAsk => write!(f, "NO_ASK"),
            Self::Empty => write!(f, "EMPTY"),
            Self::Invalid => write!(f, "INVALID"),
        }
    }
}

/// Best bid and offer of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bbo {
    pub bid_price: Option<Price>,
    pub ask_price: Option<Price>,
}

impl Bbo {
    pub fn new(bid_price: Option<Price>, ask_price: Option<Price>) -> Self {
        Self {
            bid_price,
            ask_price,
        }
    }

    pub fn state(&self) -> BboState {
        match (self.bid_price, self.ask_price) {
            (None, None) => BboState::Empty,
            (Some(b), None) if b.is_positive() => BboState::NoAsk,
            (None, Some(a)) if a.is_positive() => BboState::NoBid,
            (Some(b), Some(a)) if b.is_positive() && a.is_positive() && b < a => {
                BboState::Valid
            }
            _ => BboState::Invalid,
        }
    }

    /// Mid price, only when both sides are valid.
    pub fn mid_price(&self) -> Option<Price> {
        if !self.state().is_tradeable() {
            return None;
        }
        let (bid, ask) = (self.bid_price?, self.ask_price?);
        Some(Price::new((bid.inner() + ask.inner()) / Decimal::TWO))
    }
}
