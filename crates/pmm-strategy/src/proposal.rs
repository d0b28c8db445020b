//! Quotes proposed for one tick.

use pmm_core::{OrderSide, Price, Size};
use serde::Serialize;

/// A candidate order. Built fresh each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    /// 0 = closest to the reference price.
    pub level: u32,
}

impl Quote {
    pub fn new(side: OrderSide, price: Price, size: Size, level: u32) -> Self {
        Self {
            side,
            price,
            size,
            level,
        }
    }
}

/// Buy and sell quotes, each side ordered from best to worst.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Proposal {
    pub buys: Vec<Quote>,
    pub sells: Vec<Quote>,
}

impl Proposal {
    pub fn new(buys: Vec<Quote>, sells: Vec<Quote>) -> Self {
        Self { buys, sells }
    }

    pub fn is_empty(&self) -> bool {
        self.buys.is_empty() && self.sells.is_empty()
    }

    pub fn side(&self, side: OrderSide) -> &[Quote] {
        match side {
            OrderSide::Buy => &self.buys,
            OrderSide::Sell => &self.sells,
        }
    }

    pub fn side_mut(&mut self, side: OrderSide) -> &mut Vec<Quote> {
        match side {
            OrderSide::Buy => &mut self.buys,
            OrderSide::Sell => &mut self.sells,
        }
    }

    /// Drop quotes whose size did not survive sizing.
    pub fn retain_positive(&mut self) {
        self.buys.retain(|q| q.size.is_positive());
        self.sells.retain(|q| q.size.is_positive());
    }

    /// Prices of one side, ascending.
    pub fn sorted_prices(&self, side: OrderSide) -> Vec<Price> {
        let mut prices: Vec<Price> = self.side(side).iter().map(|q| q.price).collect();
        prices.sort();
        prices
    }

    pub fn iter(&self) -> impl Iterator<Item = &Quote> {
        self.buys.iter().chain(self.sells.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(side: OrderSide, price: rust_decimal::Decimal, size: rust_decimal::Decimal) -> Quote {
        Quote::new(side, Price::new(price), Size::new(size), 0)
    }

    #[test]
    fn test_retain_positive_drops_zero_sizes() {
        let mut proposal = Proposal::new(
            vec![quote(OrderSide::Buy, dec!(99), dec!(1)), quote(OrderSide::Buy, dec!(98), dec!(0))],
            vec![quote(OrderSide::Sell, dec!(101), dec!(0))],
        );
        proposal.retain_positive();
        assert_eq!(proposal.buys.len(), 1);
        assert!(proposal.sells.is_empty());
        assert!(!proposal.is_empty());
    }

    #[test]
    fn test_sorted_prices() {
        let proposal = Proposal::new(
            vec![quote(OrderSide::Buy, dec!(99), dec!(1)), quote(OrderSide::Buy, dec!(98), dec!(1))],
            vec![],
        );
        assert_eq!(
            proposal.sorted_prices(OrderSide::Buy),
            vec![Price::new(dec!(98)), Price::new(dec!(99))]
        );
        assert!(proposal.sorted_prices(OrderSide::Sell).is_empty());
    }
}
