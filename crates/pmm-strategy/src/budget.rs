//! Budget constraint on proposed sizes.

use pmm_core::{OrderSide, TradingRules};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::order_tracker::{ActiveOrder, OrderTracker};
use crate::proposal::Proposal;

/// Balances that new quotes may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AdjustedBalances {
    pub base: Decimal,
    pub quote: Decimal,
}

/// Available balances plus what every tracked order reserves: the whole
/// inventory the strategy controls.
pub fn total_balances(
    base_available: Decimal,
    quote_available: Decimal,
    tracker: &OrderTracker,
) -> AdjustedBalances {
    with_reservations(base_available, quote_available, tracker.orders().iter())
}

/// Available balances plus what our own refreshable orders reserve.
///
/// Those orders are replaced on refresh, so their funds are counted as
/// available to the new proposal. Hanging orders keep their reservations,
/// and so do orders with a cancel in flight until the cancel is confirmed.
pub fn adjusted_balances(
    base_available: Decimal,
    quote_available: Decimal,
    tracker: &OrderTracker,
) -> AdjustedBalances {
    with_reservations(base_available, quote_available, tracker.refreshable())
}

fn with_reservations<'a>(
    base_available: Decimal,
    quote_available: Decimal,
    orders: impl Iterator<Item = &'a ActiveOrder>,
) -> AdjustedBalances {
    let mut balances = AdjustedBalances {
        base: base_available,
        quote: quote_available,
    };
    for order in orders {
        let remaining = order.remaining();
        match order.side {
            OrderSide::Buy => balances.quote += remaining.notional(order.price),
            OrderSide::Sell => balances.base += remaining.inner(),
        }
    }
    balances.base = balances.base.max(Decimal::ZERO);
    balances.quote = balances.quote.max(Decimal::ZERO);
    balances
}

/// Scale each side down proportionally so it fits its balance, then drop
/// sizes that fall below the exchange minimum.
pub fn apply_budget_constraint(
    proposal: &mut Proposal,
    balances: AdjustedBalances,
    rules: &TradingRules,
) {
    let fee_factor = Decimal::ONE + rules.maker_fee_pct;

    let quote_needed: Decimal = proposal
        .buys
        .iter()
        .map(|q| q.size.notional(q.price) * fee_factor)
        .sum();
    if quote_needed > balances.quote {
        let factor = balances.quote / quote_needed;
        debug!(needed = %quote_needed, available = %balances.quote, factor = %factor, "Scaling buys to quote budget");
        for quote in proposal.buys.iter_mut() {
            quote.size = rules.quantize_size(quote.size * factor);
        }
    }

    let base_needed: Decimal = proposal.sells.iter().map(|q| q.size.inner()).sum();
    if base_needed > balances.base {
        let factor = balances.base / base_needed;
        debug!(needed = %base_needed, available = %balances.base, factor = %factor, "Scaling sells to base budget");
        for quote in proposal.sells.iter_mut() {
            quote.size = rules.quantize_size(quote.size * factor);
        }
    }

    proposal.buys.retain(|q| rules.is_tradeable_size(q.size));
    proposal.sells.retain(|q| rules.is_tradeable_size(q.size));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::Quote;
    use pmm_core::{ClientOrderId, Price, Size};
    use rust_decimal_macros::dec;

    fn rules() -> TradingRules {
        TradingRules {
            tick_size: Price::new(dec!(0.01)),
            lot_size: Size::new(dec!(0.001)),
            min_order_size: Size::new(dec!(0.01)),
            ..TradingRules::default()
        }
    }

    fn ladder() -> Proposal {
        let q = |side, p, s, l| Quote::new(side, Price::new(p), Size::new(s), l);
        Proposal::new(
            vec![q(OrderSide::Buy, dec!(99), dec!(1), 0), q(OrderSide::Buy, dec!(98), dec!(2), 1)],
            vec![q(OrderSide::Sell, dec!(101), dec!(1), 0), q(OrderSide::Sell, dec!(102), dec!(2), 1)],
        )
    }

    fn sum_notional(proposal: &Proposal) -> Decimal {
        proposal.buys.iter().map(|q| q.size.notional(q.price)).sum()
    }

    #[test]
    fn test_within_budget_untouched() {
        let mut p = ladder();
        apply_budget_constraint(&mut p, AdjustedBalances { base: dec!(10), quote: dec!(1000) }, &rules());
        assert_eq!(p, ladder());
    }

    #[test]
    fn test_proportional_scaling() {
        let mut p = ladder();
        // Buys need 99 + 196 = 295 quote; sells need 3 base
        apply_budget_constraint(&mut p, AdjustedBalances { base: dec!(1.5), quote: dec!(147.5) }, &rules());

        assert_eq!(p.buys[0].size.inner(), dec!(0.5));
        assert_eq!(p.buys[1].size.inner(), dec!(1));
        assert!(sum_notional(&p) <= dec!(147.5));

        assert_eq!(p.sells[0].size.inner(), dec!(0.5));
        assert_eq!(p.sells[1].size.inner(), dec!(1));
    }

    #[test]
    fn test_fee_counted_against_quote() {
        let mut p = ladder();
        p.buys.truncate(1);
        let r = TradingRules {
            maker_fee_pct: dec!(0.01),
            ..rules()
        };
        apply_budget_constraint(&mut p, AdjustedBalances { base: dec!(10), quote: dec!(99) }, &r);
        // 99 / (99 × 1.01) = 0.990099.. → 0.990
        assert_eq!(p.buys[0].size.inner(), dec!(0.990));
    }

    #[test]
    fn test_zero_balance_side_dropped() {
        let mut p = ladder();
        apply_budget_constraint(&mut p, AdjustedBalances { base: dec!(0), quote: dec!(1000) }, &rules());
        assert!(p.sells.is_empty());
        assert_eq!(p.buys.len(), 2);
    }

    #[test]
    fn test_dust_dropped_after_scaling() {
        let mut p = ladder();
        apply_budget_constraint(&mut p, AdjustedBalances { base: dec!(0.02), quote: dec!(1000) }, &rules());
        // 1/3 and 2/3 of 0.02 base: 0.006 is below the 0.01 minimum
        assert_eq!(p.sells.len(), 1);
        assert_eq!(p.sells[0].size.inner(), dec!(0.013));
    }

    #[test]
    fn test_adjusted_balances_add_back_refreshable_orders() {
        let mut tracker = OrderTracker::new();
        let buy = ActiveOrder::new(
            ClientOrderId::from("b"),
            OrderSide::Buy,
            Price::new(dec!(99)),
            Size::new(dec!(1)),
            0,
            0,
        );
        let sell = ActiveOrder::new(
            ClientOrderId::from("s"),
            OrderSide::Sell,
            Price::new(dec!(101)),
            Size::new(dec!(2)),
            0,
            0,
        );
        let hanging = ActiveOrder {
            is_hanging: true,
            ..ActiveOrder::new(
                ClientOrderId::from("h"),
                OrderSide::Sell,
                Price::new(dec!(105)),
                Size::new(dec!(5)),
                1,
                0,
            )
        };
        let cancelling = ActiveOrder::new(
            ClientOrderId::from("c"),
            OrderSide::Buy,
            Price::new(dec!(90)),
            Size::new(dec!(1)),
            1,
            0,
        );
        tracker.track(buy);
        tracker.track(sell);
        tracker.track(hanging);
        tracker.track(cancelling);
        tracker.mark_cancel_sent(&ClientOrderId::from("c"), 0);

        let balances = adjusted_balances(dec!(10), dec!(100), &tracker);
        assert_eq!(balances.base, dec!(12));
        assert_eq!(balances.quote, dec!(199));

        let total = total_balances(dec!(10), dec!(100), &tracker);
        assert_eq!(total.base, dec!(17));
        assert_eq!(total.quote, dec!(289));
    }
}
