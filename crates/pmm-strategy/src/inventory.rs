//! Inventory-driven sizing.
//!
//! - Inventory skew: scale bid and ask sizes to steer the base share of the
//!   portfolio toward a target.
//! - Inventory cost: average cost of base acquired through fills, used by
//!   the `inventory_cost` price type.

use pmm_core::{OrderSide, Price, Size, TradingRules};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::proposal::Proposal;

/// Size multipliers for each side, both within `[0, 2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InventorySkew {
    pub bid_ratio: Decimal,
    pub ask_ratio: Decimal,
}

impl InventorySkew {
    pub const NEUTRAL: Self = Self {
        bid_ratio: Decimal::ONE,
        ask_ratio: Decimal::ONE,
    };
    pub const HALTED: Self = Self {
        bid_ratio: Decimal::ZERO,
        ask_ratio: Decimal::ZERO,
    };
}

/// Base size quoted across both sides of a full ladder.
pub fn total_order_size(order_amount: Decimal, order_level_amount: Decimal, levels: u32) -> Decimal {
    let n = Decimal::from(levels);
    let per_side = n * order_amount + order_level_amount * n * (n - Decimal::ONE) / Decimal::TWO;
    per_side * Decimal::TWO
}

/// Bid/ask size ratios for the current balances.
///
/// The bid ratio falls linearly from 2 (base value at `target - range`) to
/// 1 (at target) to 0 (at `target + range`), clamped outside the range.
/// `range` is `base_asset_range` valued at `price`, capped at half the
/// portfolio value. The ask ratio mirrors it: `2 - bid`.
pub fn calculate_bid_ask_ratios(
    base_balance: Decimal,
    quote_balance: Decimal,
    price: Price,
    target_base_pct: Decimal,
    base_asset_range: Decimal,
) -> InventorySkew {
    let px = price.inner();
    let base_value = base_balance * px;
    let total_value = base_value + quote_balance;
    if total_value <= Decimal::ZERO || base_asset_range <= Decimal::ZERO || px <= Decimal::ZERO {
        return InventorySkew::HALTED;
    }

    let range_value = (base_asset_range * px).min(total_value * dec!(0.5));
    let target_value = total_value * target_base_pct;
    let left = (target_value - range_value).max(Decimal::ZERO);
    let right = target_value + range_value;

    let bid_ratio = if base_value < target_value {
        let width = target_value - left;
        if width <= Decimal::ZERO {
            Decimal::TWO
        } else {
            Decimal::ONE + ((target_value - base_value) / width).min(Decimal::ONE)
        }
    } else {
        let width = right - target_value;
        Decimal::ONE - ((base_value - target_value) / width).min(Decimal::ONE)
    };
    let bid_ratio = bid_ratio.max(Decimal::ZERO).min(Decimal::TWO);

    InventorySkew {
        bid_ratio,
        ask_ratio: Decimal::TWO - bid_ratio,
    }
}

/// Multiply every quote size by its side's ratio, rounded down to the lot.
pub fn apply_inventory_skew(proposal: &mut Proposal, skew: InventorySkew, rules: &TradingRules) {
    for quote in proposal.buys.iter_mut() {
        quote.size = rules.quantize_size(quote.size * skew.bid_ratio);
    }
    for quote in proposal.sells.iter_mut() {
        quote.size = rules.quantize_size(quote.size * skew.ask_ratio);
    }
}

/// Average-cost accounting of base acquired through the strategy's fills.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InventoryCostTracker {
    /// Base bought through fills and not yet sold.
    pub net_base: Decimal,
    /// Average price paid for `net_base`.
    pub avg_cost: Decimal,
    pub fill_count: u64,
    /// Realized PnL in quote units.
    pub realized_pnl: Decimal,
}

impl InventoryCostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fill(&mut self, side: OrderSide, price: Price, size: Size) {
        let qty = size.inner();
        let px = price.inner();
        self.fill_count += 1;

        match side {
            OrderSide::Buy => {
                let new_base = self.net_base + qty;
                if !new_base.is_zero() {
                    self.avg_cost = (self.net_base * self.avg_cost + qty * px) / new_base;
                }
                self.net_base = new_base;
            }
            OrderSide::Sell => {
                // Only the part covered by tracked inventory has a known cost.
                let covered = qty.min(self.net_base);
                self.realized_pnl += (px - self.avg_cost) * covered;
                self.net_base -= covered;
                if self.net_base.is_zero() {
                    self.avg_cost = Decimal::ZERO;
                }
            }
        }
    }

    /// Average cost of tracked inventory, if any is held.
    pub fn cost_price(&self) -> Option<Price> {
        (self.net_base > Decimal::ZERO && self.avg_cost > Decimal::ZERO)
            .then(|| Price::new(self.avg_cost))
    }

    pub fn unrealized_pnl(&self, mark: Price) -> Decimal {
        (mark.inner() - self.avg_cost) * self.net_base
    }
}
