//! Aggregated price-level order book.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pmm_core::{Bbo, OrderSide, Price, PriceType, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Book shared between an exchange and the price delegates reading it.
pub type SharedOrderBook = Arc<RwLock<OrderBook>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Price,
    pub size: Size,
}

impl BookLevel {
    pub fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BTreeMap<Price, Size>,
    asks: BTreeMap<Price, Size>,
    last_trade: Option<Price>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symmetric book around `mid`: levels every `step` down to `min_price`
    /// and up to `max_price`, volume growing by `volume_step` per level.
    pub fn balanced(
        mid: Price,
        min_price: Price,
        max_price: Price,
        step: Decimal,
        volume_step: Size,
    ) -> Self {
        let mut book = Self::new();
        if step <= Decimal::ZERO {
            return book;
        }

        let mut i = Decimal::ONE;
        loop {
            let price = mid.inner() - step * i;
            if price < min_price.inner() || price <= Decimal::ZERO {
                break;
            }
            book.bids.insert(Price::new(price), volume_step * i);
            i += Decimal::ONE;
        }

        let mut i = Decimal::ONE;
        loop {
            let price = mid.inner() + step * i;
            if price > max_price.inner() {
                break;
            }
            book.asks.insert(Price::new(price), volume_step * i);
            i += Decimal::ONE;
        }
        book
    }

    pub fn into_shared(self) -> SharedOrderBook {
        Arc::new(RwLock::new(self))
    }

    /// Set one level. A zero size removes it.
    pub fn set_level(&mut self, side: OrderSide, price: Price, size: Size) {
        let levels = self.levels_mut(side);
        if size.is_positive() {
            levels.insert(price, size);
        } else {
            levels.remove(&price);
        }
    }

    /// Add `size` on top of whatever rests at `price`.
    pub fn add_to_level(&mut self, side: OrderSide, price: Price, size: Size) {
        if size.is_positive() {
            let level = self.levels_mut(side).entry(price).or_insert(Size::ZERO);
            *level = *level + size;
        }
    }

    /// Replace both sides.
    pub fn apply_snapshot(&mut self, bids: &[BookLevel], asks: &[BookLevel]) {
        self.bids.clear();
        self.asks.clear();
        for level in bids {
            self.set_level(OrderSide::Buy, level.price, level.size);
        }
        for level in asks {
            self.set_level(OrderSide::Sell, level.price, level.size);
        }
    }

    /// Replace the levels with another book's, keeping the last trade.
    pub fn replace_levels(&mut self, other: OrderBook) {
        self.bids = other.bids;
        self.asks = other.asks;
    }

    /// Drop bids above `top_bid` and asks below `top_ask`.
    pub fn widen(&mut self, top_bid: Price, top_ask: Price) {
        self.bids.retain(|p, _| *p <= top_bid);
        self.asks.retain(|p, _| *p >= top_ask);
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.keys().next().copied()
    }

    pub fn bbo(&self) -> Bbo {
        Bbo::new(self.best_bid(), self.best_ask())
    }

    pub fn mid_price(&self) -> Option<Price> {
        self.bbo().mid_price()
    }

    pub fn last_trade(&self) -> Option<Price> {
        self.last_trade
    }

    pub fn set_last_trade(&mut self, price: Price) {
        self.last_trade = Some(price);
    }

    pub fn depth(&self, side: OrderSide) -> usize {
        match side {
            OrderSide::Buy => self.bids.len(),
            OrderSide::Sell => self.asks.len(),
        }
    }

    pub fn price_by_type(&self, price_type: PriceType) -> Option<Price> {
        match price_type {
            PriceType::BestBid => self.best_bid(),
            PriceType::BestAsk => self.best_ask(),
            PriceType::MidPrice => self.mid_price(),
            PriceType::LastTrade => self.last_trade,
            PriceType::LastOwnTrade | PriceType::InventoryCost | PriceType::Custom => None,
        }
    }

    /// Price of the level where cumulative volume on `side` (buy = bids)
    /// reaches `depth`. Zero depth is the best price; a depth beyond the
    /// book yields the deepest level.
    pub fn price_at_depth(&self, side: OrderSide, depth: Size) -> Option<Price> {
        let levels: Box<dyn Iterator<Item = (&Price, &Size)>> = match side {
            OrderSide::Buy => Box::new(self.bids.iter().rev()),
            OrderSide::Sell => Box::new(self.asks.iter()),
        };

        let mut cumulative = Size::ZERO;
        let mut last = None;
        for (price, size) in levels {
            last = Some(*price);
            cumulative = cumulative + *size;
            if cumulative >= depth {
                return Some(*price);
            }
        }
        last
    }

    /// Remove up to `amount` from the best levels of `side`. Returns the
    /// volume-weighted price consumed, if any.
    pub fn consume(&mut self, side: OrderSide, amount: Size) -> Option<Price> {
        let mut remaining = amount;
        let mut notional = Decimal::ZERO;
        let mut taken = Size::ZERO;

        while remaining.is_positive() {
            let best = match side {
                OrderSide::Buy => self.best_bid(),
                OrderSide::Sell => self.best_ask(),
            };
            let Some(price) = best else { break };
            let levels = self.levels_mut(side);
            let available = levels.get(&price).copied().unwrap_or(Size::ZERO);
            let take = remaining.min(available);
            notional += take.notional(price);
            taken = taken + take;
            remaining = remaining - take;
            if take >= available {
                levels.remove(&price);
            } else {
                levels.insert(price, available - take);
            }
        }

        (taken.is_positive()).then(|| Price::new(notional / taken.inner()))
    }

    fn levels_mut(&mut self, side: OrderSide) -> &mut BTreeMap<Price, Size> {
        match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        }
    }
}
