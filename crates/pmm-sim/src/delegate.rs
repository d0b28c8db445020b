//! Reference price delegates.

use std::sync::Arc;

use parking_lot::RwLock;
use pmm_core::{Price, PriceSource, PriceType};

use crate::order_book::SharedOrderBook;

/// Prices read from another market's book.
#[derive(Debug, Clone)]
pub struct OrderBookPriceDelegate {
    book: SharedOrderBook,
}

impl OrderBookPriceDelegate {
    pub fn new(book: SharedOrderBook) -> Self {
        Self { book }
    }
}

impl PriceSource for OrderBookPriceDelegate {
    fn price_by_type(&self, price_type: PriceType) -> Option<Price> {
        self.book.read().price_by_type(price_type)
    }
}

/// A single externally pushed price, reported for every price type.
/// Clones share the same value, so a feed task can keep one handle while
/// the strategy owns another.
#[derive(Debug, Clone, Default)]
pub struct CustomPriceDelegate {
    price: Arc<RwLock<Option<Price>>>,
}

impl CustomPriceDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, price: Price) {
        *self.price.write() = Some(price);
    }

    pub fn clear(&self) {
        *self.price.write() = None;
    }
}

impl PriceSource for CustomPriceDelegate {
    fn price_by_type(&self, _price_type: PriceType) -> Option<Price> {
        *self.price.read()
    }
}
