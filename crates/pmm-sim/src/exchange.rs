//! Paper exchange.
//!
//! Holds balances for one market, reserves funds for resting orders and
//! fills them against simulated trades. Orders that cross the book on
//! arrival fill immediately at the book's price. Every state change is
//! queued as an [`OrderEvent`] and handed out by `drain_events`, so the
//! strategy observes it on its next tick.

use std::collections::{BTreeMap, VecDeque};

use pmm_core::{
    ClientOrderId, ConnectorError, ConnectorResult, ExchangeConnector, OrderEvent, OrderRequest,
    OrderSide, OrderType, Price, PriceType, Size, TradingPair, TradingRules,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::order_book::{OrderBook, SharedOrderBook};
use crate::replay::{ReplayEvent, ReplayKind};

/// An order resting on the paper exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestingOrder {
    pub id: ClientOrderId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub filled: Size,
    pub created_at_ms: u64,
}

impl RestingOrder {
    pub fn remaining(&self) -> Size {
        self.size - self.filled
    }
}

pub struct PaperExchange {
    trading_pair: TradingPair,
    pair_label: String,
    rules: TradingRules,
    book: SharedOrderBook,
    /// Total balances; available = total - reserved.
    balances: BTreeMap<String, Decimal>,
    /// Resting orders in arrival order.
    orders: Vec<RestingOrder>,
    events: VecDeque<OrderEvent>,
    nonce: u64,
    now_ms: u64,
    ready: bool,
    create_failures: VecDeque<ConnectorError>,
    cancel_failures: VecDeque<ConnectorError>,
    hold_cancels: bool,
    held_cancels: Vec<ClientOrderId>,
}

impl PaperExchange {
    pub fn new(trading_pair: TradingPair, rules: TradingRules, book: SharedOrderBook) -> Self {
        let pair_label = trading_pair.to_string();
        Self {
            trading_pair,
            pair_label,
            rules,
            book,
            balances: BTreeMap::new(),
            orders: Vec::new(),
            events: VecDeque::new(),
            nonce: 0,
            now_ms: 0,
            ready: true,
            create_failures: VecDeque::new(),
            cancel_failures: VecDeque::new(),
            hold_cancels: false,
            held_cancels: Vec::new(),
        }
    }

    pub fn with_balance(mut self, asset: &str, amount: Decimal) -> Self {
        self.set_balance(asset, amount);
        self
    }

    pub fn set_balance(&mut self, asset: &str, amount: Decimal) {
        self.balances.insert(asset.to_string(), amount);
    }

    /// Total balance, reservations included.
    pub fn balance(&self, asset: &str) -> Decimal {
        self.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Amount of `asset` locked by resting orders.
    pub fn reserved(&self, asset: &str) -> Decimal {
        let fee_factor = Decimal::ONE + self.rules.maker_fee_pct;
        self.orders
            .iter()
            .filter(|o| self.trading_pair.reserved_asset(o.side) == asset)
            .map(|o| match o.side {
                OrderSide::Buy => o.remaining().notional(o.price) * fee_factor,
                OrderSide::Sell => o.remaining().inner(),
            })
            .sum()
    }

    pub fn trading_pair(&self) -> &TradingPair {
        &self.trading_pair
    }

    pub fn book(&self) -> SharedOrderBook {
        self.book.clone()
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Timestamp stamped on events that are not tied to a trade.
    pub fn set_time(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn open_orders(&self) -> &[RestingOrder] {
        &self.orders
    }

    /// Fail the next `create_order` call with `err`.
    pub fn push_create_failure(&mut self, err: ConnectorError) {
        self.create_failures.push_back(err);
    }

    /// Fail the next `cancel_order` call with `err`.
    pub fn push_cancel_failure(&mut self, err: ConnectorError) {
        self.cancel_failures.push_back(err);
    }

    /// While held, accepted cancels take the order off the book but their
    /// confirmations wait for [`Self::release_held_cancels`].
    pub fn hold_cancel_confirmations(&mut self, hold: bool) {
        self.hold_cancels = hold;
    }

    pub fn release_held_cancels(&mut self) -> usize {
        let released = self.held_cancels.len();
        for order_id in std::mem::take(&mut self.held_cancels) {
            self.events.push_back(OrderEvent::Cancelled {
                order_id,
                timestamp_ms: self.now_ms,
            });
        }
        released
    }

    /// A public trade where the taker was on `taker_side`. Resting orders
    /// on the other side at or through `price` fill at their own price,
    /// best first, until `amount` is used up.
    pub fn simulate_trade(
        &mut self,
        taker_side: OrderSide,
        price: Price,
        amount: Size,
        timestamp_ms: u64,
    ) -> Vec<ClientOrderId> {
        self.book.write().set_last_trade(price);

        let maker_side = taker_side.opposite();
        let mut candidates: Vec<usize> = self
            .orders
            .iter()
            .enumerate()
            .filter(|(_, o)| {
                o.side == maker_side
                    && match maker_side {
                        OrderSide::Buy => o.price >= price,
                        OrderSide::Sell => o.price <= price,
                    }
            })
            .map(|(i, _)| i)
            .collect();
        // Price priority, then arrival (the sort is stable)
        match maker_side {
            OrderSide::Buy => candidates.sort_by(|a, b| self.orders[*b].price.cmp(&self.orders[*a].price)),
            OrderSide::Sell => candidates.sort_by(|a, b| self.orders[*a].price.cmp(&self.orders[*b].price)),
        }

        let mut remaining = amount;
        let mut filled_ids = Vec::new();
        let mut completed = Vec::new();
        for idx in candidates {
            if !remaining.is_positive() {
                break;
            }
            let order = &self.orders[idx];
            let take = remaining.min(order.remaining());
            let (id, side, order_price) = (order.id.clone(), order.side, order.price);

            self.settle(side, order_price, take, self.rules.maker_fee_pct);
            self.orders[idx].filled = self.orders[idx].filled + take;
            remaining = remaining - take;

            self.events.push_back(OrderEvent::Filled {
                order_id: id.clone(),
                side,
                price: order_price,
                amount: take,
                timestamp_ms,
            });
            if !self.orders[idx].remaining().is_positive() {
                completed.push(idx);
                self.events.push_back(OrderEvent::Completed {
                    order_id: id.clone(),
                    side,
                    timestamp_ms,
                });
            }
            info!(order_id = %id, side = %side, price = %order_price, amount = %take, "Paper fill");
            filled_ids.push(id);
        }

        completed.sort_unstable();
        for idx in completed.into_iter().rev() {
            self.orders.remove(idx);
        }
        filled_ids
    }

    /// Apply one replayed market event.
    pub fn apply_replay(&mut self, event: &ReplayEvent) {
        match &event.kind {
            ReplayKind::Snapshot { bids, asks } => self.book.write().apply_snapshot(bids, asks),
            ReplayKind::Balanced {
                mid,
                step,
                levels,
                volume_step,
            } => {
                let span = *step * Decimal::from(*levels);
                let balanced = OrderBook::balanced(
                    *mid,
                    Price::new(mid.inner() - span),
                    Price::new(mid.inner() + span),
                    *step,
                    *volume_step,
                );
                self.book.write().replace_levels(balanced);
            }
            ReplayKind::Trade {
                side,
                price,
                amount,
            } => {
                self.simulate_trade(*side, *price, *amount, event.timestamp_ms);
            }
            ReplayKind::Widen { top_bid, top_ask } => self.book.write().widen(*top_bid, *top_ask),
        }
    }

    fn available(&self, asset: &str) -> Decimal {
        (self.balance(asset) - self.reserved(asset)).max(Decimal::ZERO)
    }

    fn settle(&mut self, side: OrderSide, price: Price, amount: Size, fee_pct: Decimal) {
        let notional = amount.notional(price);
        let base = self.trading_pair.base.clone();
        let quote = self.trading_pair.quote.clone();
        let (base_delta, quote_delta) = match side {
            OrderSide::Buy => (amount.inner(), -notional * (Decimal::ONE + fee_pct)),
            OrderSide::Sell => (-amount.inner(), notional * (Decimal::ONE - fee_pct)),
        };
        *self.balances.entry(base).or_insert(Decimal::ZERO) += base_delta;
        *self.balances.entry(quote).or_insert(Decimal::ZERO) += quote_delta;
    }

    fn next_order_id(&mut self, side: OrderSide) -> ClientOrderId {
        self.nonce += 1;
        ClientOrderId::new(side, &self.pair_label, self.nonce)
    }
}

impl ExchangeConnector for PaperExchange {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn trading_rules(&self) -> TradingRules {
        self.rules.clone()
    }

    fn price_by_type(&self, price_type: PriceType) -> Option<Price> {
        self.book.read().price_by_type(price_type)
    }

    /// Depth counts our own resting orders, as a live venue's book would.
    fn price_at_depth(&self, side: OrderSide, depth: Size) -> Option<Price> {
        let mut book = self.book.read().clone();
        for order in self.orders.iter().filter(|o| o.side == side) {
            book.add_to_level(side, order.price, order.remaining());
        }
        book.price_at_depth(side, depth)
    }

    fn available_balance(&self, asset: &str) -> Decimal {
        self.available(asset)
    }

    fn create_order(&mut self, request: &OrderRequest) -> ConnectorResult<ClientOrderId> {
        if let Some(err) = self.create_failures.pop_front() {
            return Err(err);
        }
        if !self.ready {
            return Err(ConnectorError::Retryable("exchange not ready".to_string()));
        }
        if request.size < self.rules.min_order_size {
            return Err(ConnectorError::Retryable(format!(
                "order size {} below minimum {}",
                request.size, self.rules.min_order_size
            )));
        }

        let crossing = {
            let book = self.book.read();
            match request.side {
                OrderSide::Buy => book.best_ask().filter(|ask| request.price >= *ask),
                OrderSide::Sell => book.best_bid().filter(|bid| request.price <= *bid),
            }
        };
        if crossing.is_some() && request.order_type == OrderType::LimitMaker {
            return Err(ConnectorError::Retryable(format!(
                "post-only {} at {} would cross the book",
                request.side, request.price
            )));
        }

        let fee_pct = if crossing.is_some() {
            self.rules.taker_fee_pct
        } else {
            self.rules.maker_fee_pct
        };
        let asset = self.trading_pair.reserved_asset(request.side).to_string();
        let needed = match request.side {
            OrderSide::Buy => request.size.notional(request.price) * (Decimal::ONE + fee_pct),
            OrderSide::Sell => request.size.inner(),
        };
        let available = self.available(&asset);
        if needed > available {
            return Err(ConnectorError::InsufficientBalance(format!(
                "{asset}: need {needed}, available {available}"
            )));
        }

        let id = self.next_order_id(request.side);
        self.events.push_back(OrderEvent::Created {
            order_id: id.clone(),
            timestamp_ms: self.now_ms,
        });

        if crossing.is_some() {
            // Taker fill against the opposite side of the book
            let book_side = request.side.opposite();
            let fill_price = self
                .book
                .write()
                .consume(book_side, request.size)
                .unwrap_or(request.price);
            self.settle(request.side, fill_price, request.size, fee_pct);
            self.book.write().set_last_trade(fill_price);
            self.events.push_back(OrderEvent::Filled {
                order_id: id.clone(),
                side: request.side,
                price: fill_price,
                amount: request.size,
                timestamp_ms: self.now_ms,
            });
            self.events.push_back(OrderEvent::Completed {
                order_id: id.clone(),
                side: request.side,
                timestamp_ms: self.now_ms,
            });
            info!(order_id = %id, side = %request.side, price = %fill_price, size = %request.size, "Paper taker fill");
        } else {
            self.orders.push(RestingOrder {
                id: id.clone(),
                side: request.side,
                price: request.price,
                size: request.size,
                filled: Size::ZERO,
                created_at_ms: self.now_ms,
            });
            debug!(order_id = %id, side = %request.side, price = %request.price, size = %request.size, "Paper order resting");
        }
        Ok(id)
    }

    fn cancel_order(&mut self, order_id: &ClientOrderId) -> ConnectorResult<bool> {
        if let Some(err) = self.cancel_failures.pop_front() {
            return Err(err);
        }
        let Some(idx) = self.orders.iter().position(|o| &o.id == order_id) else {
            return Err(ConnectorError::UnknownOrder(order_id.clone()));
        };
        self.orders.remove(idx);

        if self.hold_cancels {
            self.held_cancels.push(order_id.clone());
        } else {
            self.events.push_back(OrderEvent::Cancelled {
                order_id: order_id.clone(),
                timestamp_ms: self.now_ms,
            });
        }
        debug!(order_id = %order_id, "Paper order cancelled");
        Ok(true)
    }

    fn drain_events(&mut self) -> Vec<OrderEvent> {
        self.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn px(d: Decimal) -> Price {
        Price::new(d)
    }

    fn exchange() -> PaperExchange {
        let book = OrderBook::balanced(px(dec!(100)), px(dec!(90)), px(dec!(110)), dec!(1), Size::new(dec!(10)))
            .into_shared();
        let rules = TradingRules {
            tick_size: px(dec!(0.01)),
            lot_size: Size::new(dec!(0.001)),
            min_order_size: Size::new(dec!(0.01)),
            ..TradingRules::default()
        };
        PaperExchange::new(TradingPair::new("ETH", "USDT"), rules, book)
            .with_balance("ETH", dec!(10))
            .with_balance("USDT", dec!(1000))
    }

    fn limit(side: OrderSide, price: Decimal, size: Decimal) -> OrderRequest {
        OrderRequest::limit(side, px(price), Size::new(size)).unwrap()
    }

    #[test]
    fn test_resting_order_reserves_funds() {
        let mut ex = exchange();
        let id = ex.create_order(&limit(OrderSide::Buy, dec!(99.5), dec!(2))).unwrap();
        assert_eq!(id.as_str(), "buy-ETH-USDT-1");
        assert_eq!(ex.available_balance("USDT"), dec!(801));
        assert_eq!(ex.balance("USDT"), dec!(1000));

        ex.create_order(&limit(OrderSide::Sell, dec!(100.5), dec!(3))).unwrap();
        assert_eq!(ex.available_balance("ETH"), dec!(7));

        let events = ex.drain_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], OrderEvent::Created { .. }));
        assert!(ex.drain_events().is_empty());
    }

    #[test]
    fn test_insufficient_balance() {
        let mut ex = exchange();
        let err = ex.create_order(&limit(OrderSide::Sell, dec!(101), dec!(11))).unwrap_err();
        assert!(matches!(err, ConnectorError::InsufficientBalance(_)));
        let err = ex.create_order(&limit(OrderSide::Buy, dec!(99), dec!(11))).unwrap_err();
        assert!(matches!(err, ConnectorError::InsufficientBalance(_)));
    }

    #[test]
    fn test_trade_fills_resting_buy() {
        let mut ex = exchange();
        let id = ex.create_order(&limit(OrderSide::Buy, dec!(99.5), dec!(1))).unwrap();
        ex.drain_events();

        let filled = ex.simulate_trade(OrderSide::Sell, px(dec!(99.4)), Size::new(dec!(100)), 5_000);
        assert_eq!(filled, vec![id.clone()]);
        assert!(ex.open_orders().is_empty());
        assert_eq!(ex.balance("ETH"), dec!(11));
        assert_eq!(ex.balance("USDT"), dec!(900.5));
        assert_eq!(ex.price_by_type(PriceType::LastTrade), Some(px(dec!(99.4))));

        let events = ex.drain_events();
        assert_eq!(
            events,
            vec![
                OrderEvent::Filled {
                    order_id: id.clone(),
                    side: OrderSide::Buy,
                    price: px(dec!(99.5)),
                    amount: Size::new(dec!(1)),
                    timestamp_ms: 5_000,
                },
                OrderEvent::Completed {
                    order_id: id,
                    side: OrderSide::Buy,
                    timestamp_ms: 5_000,
                },
            ]
        );
    }

    #[test]
    fn test_trade_partial_fill_and_price_priority() {
        let mut ex = exchange();
        let far = ex.create_order(&limit(OrderSide::Sell, dec!(100.8), dec!(1))).unwrap();
        let near = ex.create_order(&limit(OrderSide::Sell, dec!(100.6), dec!(1))).unwrap();

        let filled = ex.simulate_trade(OrderSide::Buy, px(dec!(100.9)), Size::new(dec!(1.5)), 1_000);
        assert_eq!(filled, vec![near, far.clone()]);
        assert_eq!(ex.open_orders().len(), 1);
        assert_eq!(ex.open_orders()[0].id, far);
        assert_eq!(ex.open_orders()[0].remaining(), Size::new(dec!(0.5)));
    }

    #[test]
    fn test_trade_does_not_fill_behind_price() {
        let mut ex = exchange();
        ex.create_order(&limit(OrderSide::Buy, dec!(99), dec!(1))).unwrap();
        assert!(ex
            .simulate_trade(OrderSide::Sell, px(dec!(99.5)), Size::new(dec!(1)), 0)
            .is_empty());
    }

    #[test]
    fn test_crossing_order_fills_as_taker() {
        let mut ex = exchange();
        let id = ex.create_order(&limit(OrderSide::Buy, dec!(101), dec!(1))).unwrap();
        assert!(ex.open_orders().is_empty());
        let events = ex.drain_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            OrderEvent::Filled { price, .. } if *price == px(dec!(101))
        ));
        assert!(matches!(&events[2], OrderEvent::Completed { order_id, .. } if *order_id == id));
        assert_eq!(ex.balance("ETH"), dec!(11));
    }

    #[test]
    fn test_taker_buy_checks_funds_with_taker_fee() {
        let rules = TradingRules {
            tick_size: px(dec!(0.01)),
            lot_size: Size::new(dec!(0.001)),
            min_order_size: Size::new(dec!(0.01)),
            maker_fee_pct: dec!(0),
            taker_fee_pct: dec!(0.01),
        };
        let book = OrderBook::balanced(px(dec!(100)), px(dec!(90)), px(dec!(110)), dec!(1), Size::new(dec!(10)))
            .into_shared();
        let mut ex = PaperExchange::new(TradingPair::new("ETH", "USDT"), rules, book)
            .with_balance("USDT", dec!(101));

        // 101 notional plus a 1% taker fee does not fit in 101.
        let err = ex.create_order(&limit(OrderSide::Buy, dec!(101), dec!(1))).unwrap_err();
        assert!(matches!(err, ConnectorError::InsufficientBalance(_)));
        assert_eq!(ex.balance("USDT"), dec!(101));

        // The same size rests at the maker fee.
        ex.create_order(&limit(OrderSide::Buy, dec!(99), dec!(1))).unwrap();
        assert_eq!(ex.available_balance("USDT"), dec!(2));

        ex.set_balance("USDT", dec!(300));
        ex.create_order(&limit(OrderSide::Buy, dec!(101), dec!(1))).unwrap();
        assert_eq!(ex.balance("USDT"), dec!(300) - dec!(102.01));
        assert!(ex.balance("USDT") >= Decimal::ZERO);
    }

    #[test]
    fn test_price_at_depth_counts_own_orders() {
        let mut ex = exchange();
        // 10 at 99, 20 at 98
        assert_eq!(ex.price_at_depth(OrderSide::Buy, Size::new(dec!(12))), Some(px(dec!(98))));

        ex.create_order(&limit(OrderSide::Buy, dec!(99), dec!(2))).unwrap();
        assert_eq!(ex.price_at_depth(OrderSide::Buy, Size::new(dec!(12))), Some(px(dec!(99))));
        assert_eq!(ex.price_at_depth(OrderSide::Sell, Size::new(dec!(12))), Some(px(dec!(102))));
        // The shared book itself is untouched.
        assert_eq!(ex.book().read().price_at_depth(OrderSide::Buy, Size::new(dec!(12))), Some(px(dec!(98))));
    }

    #[test]
    fn test_crossing_post_only_rejected() {
        let mut ex = exchange();
        let request = limit(OrderSide::Buy, dec!(101), dec!(1)).post_only();
        assert!(matches!(ex.create_order(&request), Err(ConnectorError::Retryable(_))));
        assert!(ex.drain_events().is_empty());
        assert_eq!(ex.balance("ETH"), dec!(10));

        let resting = limit(OrderSide::Buy, dec!(99), dec!(1)).post_only();
        ex.create_order(&resting).unwrap();
        assert_eq!(ex.open_orders().len(), 1);
    }

    #[test]
    fn test_cancel_and_hold() {
        let mut ex = exchange();
        let id = ex.create_order(&limit(OrderSide::Buy, dec!(99), dec!(1))).unwrap();
        ex.drain_events();

        ex.hold_cancel_confirmations(true);
        assert!(ex.cancel_order(&id).unwrap());
        assert!(ex.drain_events().is_empty());
        assert_eq!(ex.available_balance("USDT"), dec!(1000));

        assert_eq!(ex.release_held_cancels(), 1);
        assert!(matches!(ex.drain_events()[0], OrderEvent::Cancelled { .. }));

        assert!(matches!(
            ex.cancel_order(&id),
            Err(ConnectorError::UnknownOrder(_))
        ));
    }

    #[test]
    fn test_injected_failures() {
        let mut ex = exchange();
        ex.push_create_failure(ConnectorError::Retryable("rate limited".into()));
        assert!(ex.create_order(&limit(OrderSide::Buy, dec!(99), dec!(1))).is_err());
        let id = ex.create_order(&limit(OrderSide::Buy, dec!(99), dec!(1))).unwrap();

        ex.push_cancel_failure(ConnectorError::Retryable("timeout".into()));
        assert!(ex.cancel_order(&id).is_err());
        assert!(ex.cancel_order(&id).unwrap());
    }

    #[test]
    fn test_not_ready_rejects_orders() {
        let mut ex = exchange();
        ex.set_ready(false);
        assert!(!ex.is_ready());
        assert!(matches!(
            ex.create_order(&limit(OrderSide::Buy, dec!(99), dec!(1))),
            Err(ConnectorError::Retryable(_))
        ));
    }
}
