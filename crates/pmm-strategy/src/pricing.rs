//! Pricing proposal generator.
//!
//! Builds the quote ladder from a reference price and then applies the
//! price modifiers of one tick, in order:
//!
//! ```text
//! create_base_proposal → apply_price_band → (ping-pong) → apply_order_optimization
//!   → apply_transaction_costs → (skew, budget) → apply_minimum_spread → filter_out_takers
//! ```

use pmm_core::{Bbo, OrderSide, Price, Size, TradingRules};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::StrategyConfig;
use crate::proposal::{Proposal, Quote};
use crate::volatility::{volatility_spread, VolatilityStats};

/// Bid and ask spreads in effect for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveSpreads {
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Reference prices for one tick.
///
/// `sell` differs from `mid` only under inventory-cost pricing, where
/// sells are never placed below the average cost of held inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferencePrices {
    pub mid: Price,
    pub buy: Price,
    pub sell: Price,
}

impl ReferencePrices {
    pub fn uniform(price: Price) -> Self {
        Self {
            mid: price,
            buy: price,
            sell: price,
        }
    }
}

/// Configured spreads, widened to the volatility floor when enabled.
pub fn effective_spreads(config: &StrategyConfig, stats: Option<&VolatilityStats>) -> EffectiveSpreads {
    let configured = EffectiveSpreads {
        bid: config.bid_spread,
        ask: config.ask_spread,
    };
    if !config.volatility_spread_enabled {
        return configured;
    }
    match stats.and_then(|s| volatility_spread(s, config.volatility_spread_multiplier)) {
        Some(floor) => EffectiveSpreads {
            bid: configured.bid.max(floor),
            ask: configured.ask.max(floor),
        },
        None => configured,
    }
}

/// Level ladder (or order overrides) around the reference prices.
pub fn create_base_proposal(
    config: &StrategyConfig,
    reference: ReferencePrices,
    spreads: EffectiveSpreads,
    rules: &TradingRules,
) -> Proposal {
    if !config.order_override.is_empty() {
        return create_override_proposal(config, reference, rules);
    }

    let mut buys = Vec::with_capacity(config.order_levels as usize);
    let mut sells = Vec::with_capacity(config.order_levels as usize);

    for level in 0..config.order_levels {
        let step = config.order_level_spread * Decimal::from(level);
        let size = rules.quantize_size(Size::new(
            config.order_amount + config.order_level_amount * Decimal::from(level),
        ));

        let bid = reference.buy * (Decimal::ONE - spreads.bid - step);
        if bid.is_positive() {
            let bid = rules.quantize_price(OrderSide::Buy, bid);
            buys.push(Quote::new(OrderSide::Buy, bid, size, level));
        }

        let ask = rules.quantize_price(
            OrderSide::Sell,
            reference.sell * (Decimal::ONE + spreads.ask + step),
        );
        sells.push(Quote::new(OrderSide::Sell, ask, size, level));
    }

    Proposal::new(buys, sells)
}

fn create_override_proposal(
    config: &StrategyConfig,
    reference: ReferencePrices,
    rules: &TradingRules,
) -> Proposal {
    let hundred = Decimal::ONE_HUNDRED;
    let mut proposal = Proposal::default();

    for entry in config.order_override.values() {
        let size = rules.quantize_size(Size::new(entry.size));
        let spread = entry.spread_pct / hundred;
        let quote = match entry.side {
            OrderSide::Buy => {
                let price = reference.buy * (Decimal::ONE - spread);
                if !price.is_positive() {
                    continue;
                }
                Quote::new(OrderSide::Buy, rules.quantize_price(OrderSide::Buy, price), size, 0)
            }
            OrderSide::Sell => {
                let price = reference.sell * (Decimal::ONE + spread);
                Quote::new(OrderSide::Sell, rules.quantize_price(OrderSide::Sell, price), size, 0)
            }
        };
        proposal.side_mut(entry.side).push(quote);
    }

    proposal.buys.sort_by(|a, b| b.price.cmp(&a.price));
    proposal.sells.sort_by(|a, b| a.price.cmp(&b.price));
    for (i, q) in proposal.buys.iter_mut().enumerate() {
        q.level = i as u32;
    }
    for (i, q) in proposal.sells.iter_mut().enumerate() {
        q.level = i as u32;
    }
    proposal
}

/// Drop buys at or above the ceiling and sells at or below the floor.
pub fn apply_price_band(config: &StrategyConfig, reference: Price, proposal: &mut Proposal) {
    if let Some(ceiling) = config.price_ceiling {
        if reference.inner() >= ceiling && !proposal.buys.is_empty() {
            debug!(reference = %reference, ceiling = %ceiling, "Reference at ceiling, no buys");
            proposal.buys.clear();
        }
    }
    if let Some(floor) = config.price_floor {
        if reference.inner() <= floor && !proposal.sells.is_empty() {
            debug!(reference = %reference, floor = %floor, "Reference at floor, no sells");
            proposal.sells.clear();
        }
    }
}

/// Pull the first level to one tick inside the top of book when that is
/// still behind the proposed price, and re-space deeper levels from it.
///
/// `top_bid` / `top_ask` should already skip the configured depth and the
/// strategy's own resting size.
pub fn apply_order_optimization(
    config: &StrategyConfig,
    proposal: &mut Proposal,
    top_bid: Option<Price>,
    top_ask: Option<Price>,
    rules: &TradingRules,
) {
    let tick = rules.tick_size.inner();
    if tick.is_zero() {
        return;
    }

    if let (Some(top_bid), Some(first)) = (top_bid, proposal.buys.first()) {
        let above_bid = Price::new(((top_bid.inner() / tick).ceil() + Decimal::ONE) * tick);
        let best = first.price.min(above_bid);
        for (i, quote) in proposal.buys.iter_mut().enumerate() {
            let step = config.order_level_spread * Decimal::from(i as u32);
            quote.price = rules.quantize_price(OrderSide::Buy, best * (Decimal::ONE - step));
        }
    }

    if let (Some(top_ask), Some(first)) = (top_ask, proposal.sells.first()) {
        let below_ask = Price::new(((top_ask.inner() / tick).floor() - Decimal::ONE) * tick);
        let best = first.price.max(below_ask);
        for (i, quote) in proposal.sells.iter_mut().enumerate() {
            let step = config.order_level_spread * Decimal::from(i as u32);
            quote.price = rules.quantize_price(OrderSide::Sell, best * (Decimal::ONE + step));
        }
    }
}

/// Widen prices by the maker fee so fills net the configured spread.
pub fn apply_transaction_costs(proposal: &mut Proposal, rules: &TradingRules) {
    let fee = rules.maker_fee_pct;
    if fee.is_zero() {
        return;
    }
    for quote in proposal.buys.iter_mut() {
        quote.price = rules.quantize_price(OrderSide::Buy, quote.price * (Decimal::ONE - fee));
    }
    for quote in proposal.sells.iter_mut() {
        quote.price = rules.quantize_price(OrderSide::Sell, quote.price * (Decimal::ONE + fee));
    }
}

/// Distance of `price` from `reference` on the profitable side: positive
/// when a buy is below or a sell is above the reference.
pub fn spread_from_reference(side: OrderSide, price: Price, reference: Price) -> Option<Decimal> {
    let ratio = price.ratio_from(reference)?;
    Some(match side {
        OrderSide::Buy => -ratio,
        OrderSide::Sell => ratio,
    })
}

/// Whether a price sits closer to the reference than the minimum spread.
pub fn violates_minimum_spread(
    side: OrderSide,
    price: Price,
    reference: Price,
    minimum_spread: Decimal,
) -> bool {
    spread_from_reference(side, price, reference).map_or(false, |s| s < minimum_spread)
}

/// Suppress quotes that are too close to the reference price.
pub fn apply_minimum_spread(proposal: &mut Proposal, reference: Price, minimum_spread: Decimal) {
    proposal
        .buys
        .retain(|q| !violates_minimum_spread(q.side, q.price, reference, minimum_spread));
    proposal
        .sells
        .retain(|q| !violates_minimum_spread(q.side, q.price, reference, minimum_spread));
}

/// Drop quotes that would take liquidity from the current book.
pub fn filter_out_takers(proposal: &mut Proposal, bbo: &Bbo) {
    if let Some(best_ask) = bbo.ask_price {
        proposal.buys.retain(|q| q.price < best_ask);
    }
    if let Some(best_bid) = bbo.bid_price {
        proposal.sells.retain(|q| q.price > best_bid);
    }
}
