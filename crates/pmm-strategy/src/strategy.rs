//! Pure market making tick loop.
//!
//! One [`PureMarketMaking::tick`] call:
//!
//! 1. drains order events from the connector and applies them
//! 2. expires in-flight cancels older than `cancel_timeout_ms`
//! 3. resolves the reference price (skipping the tick when unavailable)
//! 4. builds the proposal: pricing, ping-pong, optimization, fees, skew,
//!    budget, minimum spread, taker filter
//! 5. cancels stale orders: refresh (unless within tolerance), hanging
//!    orders, minimum spread violations, max order age
//! 6. creates the proposal once the create timer has passed, no
//!    non-hanging order is active and no cancel is in flight
//!
//! The tick never blocks or awaits. Identical inputs produce identical
//! connector calls.

use std::fmt;

use pmm_core::{
    Bbo, BboState, ClientOrderId, ConnectorError, ExchangeConnector, OrderEvent, OrderRequest,
    OrderSide, Price, PriceSource, PriceSourceKind, PriceType, Size, TradingPair, TradingRules,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::budget::{adjusted_balances, apply_budget_constraint, total_balances, AdjustedBalances};
use crate::config::StrategyConfig;
use crate::error::{StrategyError, StrategyResult};
use crate::hanging::{HangingCancelReason, HangingOrders};
use crate::inventory::{
    apply_inventory_skew, calculate_bid_ask_ratios, total_order_size, InventoryCostTracker,
    InventorySkew,
};
use crate::order_tracker::{ActiveOrder, OrderTracker};
use crate::ping_pong::PingPongState;
use crate::pricing::{
    apply_minimum_spread, apply_order_optimization, apply_price_band, apply_transaction_costs,
    create_base_proposal, effective_spreads, filter_out_takers, spread_from_reference,
    violates_minimum_spread, ReferencePrices,
};
use crate::proposal::Proposal;
use crate::volatility::{VolatilityStats, VolatilityTracker};

const OP_CREATE: &str = "create";
const OP_CANCEL: &str = "cancel";

/// Why a tick (or one side of it) proposed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ConnectorNotReady,
    NoReferencePrice,
    /// Zero adjusted balance for this side.
    NoBalance(OrderSide),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectorNotReady => write!(f, "connector_not_ready"),
            Self::NoReferencePrice => write!(f, "no_reference_price"),
            Self::NoBalance(side) => write!(f, "no_balance_{side}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Refresh,
    MaxAge,
    MinimumSpread,
    HangingDistance,
    HangingRenewal,
    Shutdown,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
            Self::MaxAge => "max_age",
            Self::MinimumSpread => "minimum_spread",
            Self::HangingDistance => "hanging_distance",
            Self::HangingRenewal => "hanging_renewal",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedOrder {
    pub order_id: ClientOrderId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub level: u32,
    pub is_hanging: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelledOrder {
    pub order_id: ClientOrderId,
    pub side: OrderSide,
    pub reason: CancelReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FillRecord {
    pub order_id: ClientOrderId,
    pub side: OrderSide,
    pub price: Price,
    pub amount: Size,
}

/// A non-fatal connector failure absorbed by the tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorFailure {
    /// `create` or `cancel`.
    pub operation: &'static str,
    pub order_id: Option<ClientOrderId>,
    /// See [`ConnectorError::kind`]; `rejected` for a refused cancel.
    pub kind: &'static str,
    pub message: String,
}

/// Everything one tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub timestamp_ms: u64,
    pub reference_price: Option<Price>,
    pub proposal: Option<Proposal>,
    pub created: Vec<CreatedOrder>,
    /// Cancels accepted by the connector this tick.
    pub cancelled: Vec<CancelledOrder>,
    pub fills: Vec<FillRecord>,
    pub completed: Vec<ClientOrderId>,
    pub skipped: Vec<SkipReason>,
    pub failures: Vec<ConnectorFailure>,
    pub active_buys: usize,
    pub active_sells: usize,
    pub hanging: usize,
    pub in_flight_cancels: usize,
}

impl TickReport {
    fn new(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            ..Self::default()
        }
    }

    pub fn created_ids(&self) -> Vec<ClientOrderId> {
        self.created.iter().map(|c| c.order_id.clone()).collect()
    }

    pub fn cancelled_ids(&self) -> Vec<ClientOrderId> {
        self.cancelled.iter().map(|c| c.order_id.clone()).collect()
    }

    pub fn was_skipped(&self) -> bool {
        self.skipped
            .iter()
            .any(|s| matches!(s, SkipReason::ConnectorNotReady | SkipReason::NoReferencePrice))
    }
}

/// One resting order in a status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct OrderStatus {
    pub order_id: ClientOrderId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub filled: Size,
    pub level: u32,
    pub age_ms: u64,
    pub is_hanging: bool,
    pub pending_cancel: bool,
    /// Distance from the reference price, as a fraction.
    pub spread: Option<Decimal>,
}

/// Serializable snapshot of the strategy.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyStatus {
    pub trading_pair: String,
    pub timestamp_ms: u64,
    pub reference_price: Option<Price>,
    pub base_balance: Decimal,
    pub quote_balance: Decimal,
    /// Share of portfolio value held in base.
    pub base_ratio: Option<Decimal>,
    pub target_base_ratio: Decimal,
    pub skew: Option<InventorySkew>,
    pub orders: Vec<OrderStatus>,
    pub in_flight_cancels: usize,
    pub pending_hanging_renewals: usize,
    pub ping_pong: PingPongState,
    pub inventory_cost: InventoryCostTracker,
    pub volatility: Option<VolatilityStats>,
    pub next_create_ms: u64,
    pub next_cancel_ms: u64,
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_opt = |v: Option<Decimal>| v.map_or_else(|| "n/a".to_string(), |d| d.normalize().to_string());

        writeln!(f, "  Market: {}", self.trading_pair)?;
        writeln!(
            f,
            "  Reference price: {}",
            self.reference_price.map_or_else(|| "n/a".to_string(), |p| p.to_string())
        )?;
        writeln!(
            f,
            "  Assets: base {} | quote {} | base ratio {} (target {})",
            self.base_balance.normalize(),
            self.quote_balance.normalize(),
            fmt_opt(self.base_ratio.map(|r| r.round_dp(4))),
            self.target_base_ratio.normalize()
        )?;
        if let Some(skew) = &self.skew {
            writeln!(
                f,
                "  Inventory skew: bid {} | ask {}",
                skew.bid_ratio.round_dp(4),
                skew.ask_ratio.round_dp(4)
            )?;
        }

        if self.orders.is_empty() {
            writeln!(f, "  No active maker orders.")?;
        } else {
            writeln!(f, "  Orders:")?;
            writeln!(
                f,
                "    {:<6} {:>5} {:>14} {:>12} {:>9} {:>8}  {}",
                "Side", "Level", "Price", "Size", "Spread", "Age(s)", "Flags"
            )?;
            for o in &self.orders {
                let mut flags = Vec::new();
                if o.is_hanging {
                    flags.push("hanging");
                }
                if o.pending_cancel {
                    flags.push("cancelling");
                }
                writeln!(
                    f,
                    "    {:<6} {:>5} {:>14} {:>12} {:>9} {:>8}  {}",
                    o.side,
                    o.level,
                    o.price,
                    o.size,
                    fmt_opt(o.spread.map(|s| (s * Decimal::ONE_HUNDRED).round_dp(2))),
                    o.age_ms / 1000,
                    flags.join(",")
                )?;
            }
        }

        if self.ping_pong.filled_buys > 0 || self.ping_pong.filled_sells > 0 {
            writeln!(
                f,
                "  Ping-pong: filled buys {} | filled sells {}",
                self.ping_pong.filled_buys, self.ping_pong.filled_sells
            )?;
        }
        if let Some(cost) = self.inventory_cost.cost_price() {
            writeln!(
                f,
                "  Inventory cost: {} on {} base, realized PnL {}",
                cost,
                self.inventory_cost.net_base.normalize(),
                self.inventory_cost.realized_pnl.round_dp(8).normalize()
            )?;
        }
        if let Some(vol) = self.volatility.as_ref().filter(|v| v.sample_count > 0) {
            writeln!(
                f,
                "  Volatility: {} wick {:.1} bps over {} samples{}",
                vol.optimal_percentile,
                vol.optimal_wick_bps,
                vol.sample_count,
                if vol.is_valid { "" } else { " (warming up)" }
            )?;
        }
        Ok(())
    }
}

enum Submitted {
    Placed,
    Failed(ConnectorError),
}

/// Single-market pure market making strategy.
pub struct PureMarketMaking {
    config: StrategyConfig,
    trading_pair: TradingPair,
    price_delegate: Option<Box<dyn PriceSource>>,
    tracker: OrderTracker,
    hanging: HangingOrders,
    ping_pong: PingPongState,
    inventory_cost: InventoryCostTracker,
    volatility: VolatilityTracker,
    create_timestamp_ms: u64,
    cancel_timestamp_ms: u64,
    last_own_trade_price: Option<Price>,
    last_reference: Option<Price>,
    last_skew: Option<InventorySkew>,
}

impl PureMarketMaking {
    /// Validate `config` and build the strategy. `external_market` and
    /// `custom_api` price sources need a `price_delegate`.
    pub fn new(
        config: StrategyConfig,
        price_delegate: Option<Box<dyn PriceSource>>,
    ) -> StrategyResult<Self> {
        config.validate()?;
        let trading_pair = config.parsed_trading_pair()?;

        if config.price_source.needs_delegate() && price_delegate.is_none() {
            return Err(StrategyError::InvalidConfig(format!(
                "price_source {:?} requires a price delegate",
                config.price_source
            )));
        }
        if config.price_type == PriceType::Custom && config.price_source != PriceSourceKind::CustomApi {
            return Err(StrategyError::InvalidConfig(
                "price_type custom requires price_source custom_api".to_string(),
            ));
        }

        let volatility = VolatilityTracker::new(
            config.volatility_sample_interval_ms,
            config.volatility_window_size,
            config.volatility_min_samples,
            config.volatility_cache_ttl_ms,
            config.volatility_breakpoint_min_jump,
        );

        info!(
            trading_pair = %trading_pair,
            order_levels = config.order_levels,
            bid_spread = %config.bid_spread,
            ask_spread = %config.ask_spread,
            order_amount = %config.order_amount,
            price_type = %config.price_type,
            hanging_orders = config.hanging_orders_enabled,
            ping_pong = config.ping_pong_enabled,
            inventory_skew = config.inventory_skew_enabled,
            "Pure market making strategy initialized"
        );

        Ok(Self {
            config,
            trading_pair,
            price_delegate,
            tracker: OrderTracker::new(),
            hanging: HangingOrders::new(),
            ping_pong: PingPongState::new(),
            inventory_cost: InventoryCostTracker::new(),
            volatility,
            create_timestamp_ms: 0,
            cancel_timestamp_ms: 0,
            last_own_trade_price: None,
            last_reference: None,
            last_skew: None,
        })
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn trading_pair(&self) -> &TradingPair {
        &self.trading_pair
    }

    pub fn tracker(&self) -> &OrderTracker {
        &self.tracker
    }

    /// Active buys, best price first.
    pub fn active_buys(&self) -> Vec<&ActiveOrder> {
        self.tracker.side(OrderSide::Buy)
    }

    /// Active sells, best price first.
    pub fn active_sells(&self) -> Vec<&ActiveOrder> {
        self.tracker.side(OrderSide::Sell)
    }

    pub fn hanging_order_ids(&self) -> Vec<ClientOrderId> {
        self.tracker.hanging().map(|o| o.client_order_id.clone()).collect()
    }

    pub fn create_timestamp_ms(&self) -> u64 {
        self.create_timestamp_ms
    }

    pub fn cancel_timestamp_ms(&self) -> u64 {
        self.cancel_timestamp_ms
    }

    pub fn ping_pong(&self) -> &PingPongState {
        &self.ping_pong
    }

    pub fn inventory_cost(&self) -> &InventoryCostTracker {
        &self.inventory_cost
    }

    pub fn last_reference_price(&self) -> Option<Price> {
        self.last_reference
    }

    /// Run one strategy cycle at `now_ms`.
    ///
    /// Only a fatal connector error is returned as `Err`; every other
    /// failure is logged, recorded in the report and retried next tick.
    pub fn tick(
        &mut self,
        now_ms: u64,
        connector: &mut dyn ExchangeConnector,
    ) -> StrategyResult<TickReport> {
        let mut report = TickReport::new(now_ms);

        for event in connector.drain_events() {
            self.apply_event(event, &mut report);
        }
        for id in self
            .tracker
            .expire_stale_cancels(now_ms, self.config.cancel_timeout_ms)
        {
            warn!(order_id = %id, timeout_ms = self.config.cancel_timeout_ms, "Cancel not confirmed in time");
            self.hanging.forget(&id);
        }
        if self.config.ping_pong_enabled {
            self.ping_pong.expire(now_ms, self.config.order_refresh_time_ms);
        }

        if !connector.is_ready() {
            warn!("Connector not ready, skipping tick");
            report.skipped.push(SkipReason::ConnectorNotReady);
            self.finish_report(&mut report);
            return Ok(report);
        }

        let Some(reference) = self.reference_prices(&*connector) else {
            warn!(price_type = %self.config.price_type, "No reference price, skipping tick");
            report.skipped.push(SkipReason::NoReferencePrice);
            self.finish_report(&mut report);
            return Ok(report);
        };
        self.last_reference = Some(reference.mid);
        report.reference_price = Some(reference.mid);
        self.volatility.record(reference.mid, now_ms);

        let rules = connector.trading_rules();
        let proposal = self.create_proposal(now_ms, reference, &*connector, &rules, &mut report);
        debug!(
            reference = %reference.mid,
            buys = proposal.buys.len(),
            sells = proposal.sells.len(),
            "Proposal built"
        );

        self.cancel_active_orders(now_ms, &proposal, connector, &mut report)?;
        self.manage_hanging_orders(now_ms, reference.mid, connector, &mut report)?;
        self.cancel_below_minimum_spread(now_ms, reference.mid, connector, &mut report)?;
        self.cancel_expired_orders(now_ms, connector, &mut report)?;
        self.execute_proposal(now_ms, &proposal, connector, &mut report)?;

        report.proposal = Some(proposal);
        self.finish_report(&mut report);
        Ok(report)
    }

    /// Cancel every tracked order, hanging ones included.
    pub fn cancel_all(
        &mut self,
        now_ms: u64,
        connector: &mut dyn ExchangeConnector,
    ) -> StrategyResult<Vec<ClientOrderId>> {
        let mut report = TickReport::new(now_ms);
        let ids: Vec<ClientOrderId> = self
            .tracker
            .orders()
            .iter()
            .filter(|o| !o.is_pending_cancel())
            .map(|o| o.client_order_id.clone())
            .collect();
        for id in ids {
            self.hanging.forget(&id);
            self.send_cancel(now_ms, &id, CancelReason::Shutdown, connector, &mut report)?;
        }
        info!(cancelled = report.cancelled.len(), failed = report.failures.len(), "Cancel all requested");
        Ok(report.cancelled_ids())
    }

    /// Snapshot for status output.
    pub fn status(&mut self, now_ms: u64, connector: &dyn ExchangeConnector) -> StrategyStatus {
        let balances = total_balances(
            connector.available_balance(&self.trading_pair.base),
            connector.available_balance(&self.trading_pair.quote),
            &self.tracker,
        );
        let reference = self.last_reference;
        let base_ratio = reference.and_then(|p| {
            let base_value = balances.base * p.inner();
            let total = base_value + balances.quote;
            (total > Decimal::ZERO).then(|| base_value / total)
        });

        let mut orders: Vec<OrderStatus> = self
            .tracker
            .orders()
            .iter()
            .map(|o| OrderStatus {
                order_id: o.client_order_id.clone(),
                side: o.side,
                price: o.price,
                size: o.size,
                filled: o.filled,
                level: o.level,
                age_ms: o.age_ms(now_ms),
                is_hanging: o.is_hanging,
                pending_cancel: o.is_pending_cancel(),
                spread: reference.and_then(|r| spread_from_reference(o.side, o.price, r)),
            })
            .collect();
        // Asks high to low, then bids high to low
        orders.sort_by(|a, b| {
            a.side
                .is_buy()
                .cmp(&b.side.is_buy())
                .then(b.price.cmp(&a.price))
        });

        let volatility = (self.volatility.sample_count() > 0).then(|| self.volatility.stats(now_ms));

        StrategyStatus {
            trading_pair: self.trading_pair.to_string(),
            timestamp_ms: now_ms,
            reference_price: reference,
            base_balance: balances.base,
            quote_balance: balances.quote,
            base_ratio,
            target_base_ratio: self.config.inventory_target_base_pct,
            skew: self.last_skew,
            orders,
            in_flight_cancels: self.tracker.in_flight_count(),
            pending_hanging_renewals: self.hanging.pending_renewals(),
            ping_pong: self.ping_pong.clone(),
            inventory_cost: self.inventory_cost.clone(),
            volatility,
            next_create_ms: self.create_timestamp_ms,
            next_cancel_ms: self.cancel_timestamp_ms,
        }
    }

    /// Human-readable status block.
    pub fn format_status(&mut self, now_ms: u64, connector: &dyn ExchangeConnector) -> String {
        self.status(now_ms, connector).to_string()
    }

    fn apply_event(&mut self, event: OrderEvent, report: &mut TickReport) {
        match event {
            OrderEvent::Created { order_id, .. } => {
                if self.tracker.get(&order_id).is_some() {
                    self.tracker.mark_open(&order_id);
                } else {
                    debug!(order_id = %order_id, "Created event for untracked order");
                }
            }
            OrderEvent::Filled {
                order_id,
                side,
                price,
                amount,
                ..
            } => {
                if !price.is_positive() || !amount.is_positive() {
                    warn!(order_id = %order_id, price = %price, amount = %amount, "Dropping fill with non-positive price or amount");
                    return;
                }
                if self.tracker.record_fill(&order_id, amount).is_none() {
                    warn!(order_id = %order_id, "Fill for unknown order dropped");
                    return;
                }
                self.inventory_cost.record_fill(side, price, amount);
                self.last_own_trade_price = Some(price);
                info!(order_id = %order_id, side = %side, price = %price, amount = %amount, "Order filled");
                report.fills.push(FillRecord {
                    order_id,
                    side,
                    price,
                    amount,
                });
            }
            OrderEvent::Completed {
                order_id,
                timestamp_ms,
                ..
            } => self.on_completed(order_id, timestamp_ms, report),
            OrderEvent::Cancelled { order_id, .. } => match self.tracker.remove(&order_id) {
                Some(order) => {
                    debug!(order_id = %order_id, side = %order.side, price = %order.price, "Cancel confirmed");
                    if self.hanging.on_cancelled(&order_id) {
                        debug!(order_id = %order_id, "Hanging order queued for renewal");
                    }
                }
                None => debug!(order_id = %order_id, "Cancel confirmation for untracked order"),
            },
            OrderEvent::Failed { order_id, .. } => {
                self.hanging.forget(&order_id);
                match self.tracker.remove(&order_id) {
                    Some(order) => {
                        warn!(order_id = %order_id, side = %order.side, price = %order.price, "Order failed")
                    }
                    None => debug!(order_id = %order_id, "Failure event for untracked order"),
                }
            }
        }
    }

    fn on_completed(&mut self, order_id: ClientOrderId, timestamp_ms: u64, report: &mut TickReport) {
        let Some(order) = self.tracker.remove(&order_id) else {
            warn!(order_id = %order_id, "Completion for unknown order dropped");
            return;
        };
        self.hanging.forget(&order_id);
        report.completed.push(order_id.clone());

        if order.is_hanging {
            info!(order_id = %order_id, side = %order.side, price = %order.price, "Hanging order completely filled");
            return;
        }
        info!(
            order_id = %order_id,
            side = %order.side,
            price = %order.price,
            level = order.level,
            "Order completely filled"
        );

        self.create_timestamp_ms = timestamp_ms + self.config.filled_order_delay_ms;
        self.cancel_timestamp_ms = self.cancel_timestamp_ms.min(self.create_timestamp_ms);

        if self.config.hanging_orders_enabled {
            let counterpart = HangingOrders::counterpart_of(&self.tracker, &order)
                .map(|o| o.client_order_id.clone());
            if let Some(id) = counterpart {
                self.tracker.mark_hanging(&id);
                info!(order_id = %id, level = order.level, "Counterpart order left hanging");
            }
        }
        if self.config.ping_pong_enabled {
            self.ping_pong.record_fill(order.side);
        }
    }

    fn price_from_source(&self, connector: &dyn ExchangeConnector, price_type: PriceType) -> Option<Price> {
        match &self.price_delegate {
            Some(delegate) if self.config.price_source.needs_delegate() => delegate.price_by_type(price_type),
            _ => connector.price_by_type(price_type),
        }
    }

    fn reference_prices(&self, connector: &dyn ExchangeConnector) -> Option<ReferencePrices> {
        let prices = match self.config.price_type {
            PriceType::LastOwnTrade => ReferencePrices::uniform(
                self.last_own_trade_price
                    .or_else(|| self.price_from_source(connector, PriceType::MidPrice))?,
            ),
            PriceType::InventoryCost => {
                let mid = self.price_from_source(connector, PriceType::MidPrice)?;
                match self.inventory_cost.cost_price() {
                    Some(cost) => ReferencePrices {
                        mid,
                        buy: mid,
                        sell: cost.max(mid),
                    },
                    None => ReferencePrices::uniform(mid),
                }
            }
            other => ReferencePrices::uniform(self.price_from_source(connector, other)?),
        };

        if !prices.mid.is_positive() {
            warn!(price = %prices.mid, "Non-positive reference price dropped");
            return None;
        }
        Some(prices)
    }

    fn create_proposal(
        &mut self,
        now_ms: u64,
        reference: ReferencePrices,
        connector: &dyn ExchangeConnector,
        rules: &TradingRules,
        report: &mut TickReport,
    ) -> Proposal {
        let stats = self
            .config
            .volatility_spread_enabled
            .then(|| self.volatility.stats(now_ms));
        let spreads = effective_spreads(&self.config, stats.as_ref());

        let mut proposal = create_base_proposal(&self.config, reference, spreads, rules);
        apply_price_band(&self.config, reference.mid, &mut proposal);

        if self.config.ping_pong_enabled {
            self.ping_pong.apply(&mut proposal);
        }

        if self.config.order_optimization_enabled {
            let own_size = |side: OrderSide| -> Size {
                self.tracker
                    .non_hanging()
                    .filter(|o| o.side == side)
                    .map(|o| o.remaining())
                    .sum()
            };
            let top_bid = connector.price_at_depth(
                OrderSide::Buy,
                Size::new(self.config.bid_order_optimization_depth) + own_size(OrderSide::Buy),
            );
            let top_ask = connector.price_at_depth(
                OrderSide::Sell,
                Size::new(self.config.ask_order_optimization_depth) + own_size(OrderSide::Sell),
            );
            apply_order_optimization(&self.config, &mut proposal, top_bid, top_ask, rules);
        }

        if self.config.add_transaction_costs {
            apply_transaction_costs(&mut proposal, rules);
        }

        let base_available = connector.available_balance(&self.trading_pair.base);
        let quote_available = connector.available_balance(&self.trading_pair.quote);

        if self.config.inventory_skew_enabled {
            let total = total_balances(base_available, quote_available, &self.tracker);
            let base_range = total_order_size(
                self.config.order_amount,
                self.config.order_level_amount,
                self.config.order_levels,
            ) * self.config.inventory_range_multiplier;
            let skew = calculate_bid_ask_ratios(
                total.base,
                total.quote,
                reference.mid,
                self.config.inventory_target_base_pct,
                base_range,
            );
            apply_inventory_skew(&mut proposal, skew, rules);
            proposal.retain_positive();
            self.last_skew = Some(skew);
        }

        let balances = adjusted_balances(base_available, quote_available, &self.tracker);
        self.note_empty_balances(&proposal, balances, report);
        apply_budget_constraint(&mut proposal, balances, rules);

        if let Some(minimum) = self.config.minimum_spread() {
            apply_minimum_spread(&mut proposal, reference.mid, minimum);
        }

        if !self.config.take_if_crossed {
            let bbo = Bbo::new(
                connector.price_by_type(PriceType::BestBid),
                connector.price_by_type(PriceType::BestAsk),
            );
            if bbo.state() == BboState::Invalid {
                warn!(bid = ?bbo.bid_price, ask = ?bbo.ask_price, "Crossed book");
            }
            filter_out_takers(&mut proposal, &bbo);
        }

        proposal
    }

    fn note_empty_balances(&self, proposal: &Proposal, balances: AdjustedBalances, report: &mut TickReport) {
        if !proposal.buys.is_empty() && balances.quote.is_zero() {
            debug!(asset = %self.trading_pair.quote, "No quote balance, skipping buys");
            report.skipped.push(SkipReason::NoBalance(OrderSide::Buy));
        }
        if !proposal.sells.is_empty() && balances.base.is_zero() {
            debug!(asset = %self.trading_pair.base, "No base balance, skipping sells");
            report.skipped.push(SkipReason::NoBalance(OrderSide::Sell));
        }
    }

    fn cancel_active_orders(
        &mut self,
        now_ms: u64,
        proposal: &Proposal,
        connector: &mut dyn ExchangeConnector,
        report: &mut TickReport,
    ) -> StrategyResult<()> {
        if self.cancel_timestamp_ms > now_ms {
            return Ok(());
        }
        let active: Vec<&ActiveOrder> = self.tracker.refreshable().collect();
        if active.is_empty() {
            return Ok(());
        }

        if let Some(tolerance) = self.config.refresh_tolerance() {
            if within_tolerance(&active, proposal, tolerance) {
                debug!(orders = active.len(), "Active orders within refresh tolerance, keeping");
                self.set_timers(now_ms);
                return Ok(());
            }
        }

        let ids: Vec<ClientOrderId> = active.iter().map(|o| o.client_order_id.clone()).collect();
        for id in ids {
            self.send_cancel(now_ms, &id, CancelReason::Refresh, connector, report)?;
        }
        Ok(())
    }

    fn manage_hanging_orders(
        &mut self,
        now_ms: u64,
        reference: Price,
        connector: &mut dyn ExchangeConnector,
        report: &mut TickReport,
    ) -> StrategyResult<()> {
        if !self.config.hanging_orders_enabled {
            return Ok(());
        }

        let to_cancel = HangingOrders::to_cancel(
            &self.tracker,
            reference,
            self.config.hanging_orders_cancel_pct,
            self.config.max_order_age_ms,
            now_ms,
        );
        for (id, reason) in to_cancel {
            let snapshot = self.tracker.get(&id).cloned();
            let cancel_reason = match reason {
                HangingCancelReason::PriceDistance => CancelReason::HangingDistance,
                HangingCancelReason::Renewal => CancelReason::HangingRenewal,
            };
            let accepted = self.send_cancel(now_ms, &id, cancel_reason, connector, report)?;
            if let (true, HangingCancelReason::Renewal, Some(order)) = (accepted, reason, snapshot) {
                self.hanging.renewal_requested(&order);
            }
        }

        for renewal in self.hanging.take_ready() {
            let too_far = renewal
                .price
                .ratio_from(reference)
                .map_or(true, |r| r.abs() >= self.config.hanging_orders_cancel_pct);
            if too_far {
                info!(side = %renewal.side, price = %renewal.price, "Hanging renewal dropped, price too far from reference");
                continue;
            }
            match self.submit(now_ms, renewal.side, renewal.price, renewal.size, renewal.level, true, connector, report)? {
                Submitted::Placed => {}
                Submitted::Failed(ConnectorError::Retryable(_)) => self.hanging.requeue(renewal),
                Submitted::Failed(err) => {
                    warn!(side = %renewal.side, price = %renewal.price, error = %err, "Hanging renewal abandoned");
                }
            }
        }
        Ok(())
    }

    fn cancel_below_minimum_spread(
        &mut self,
        now_ms: u64,
        reference: Price,
        connector: &mut dyn ExchangeConnector,
        report: &mut TickReport,
    ) -> StrategyResult<()> {
        let Some(minimum) = self.config.minimum_spread() else {
            return Ok(());
        };
        let ids: Vec<ClientOrderId> = self
            .tracker
            .refreshable()
            .filter(|o| violates_minimum_spread(o.side, o.price, reference, minimum))
            .map(|o| o.client_order_id.clone())
            .collect();
        for id in ids {
            self.send_cancel(now_ms, &id, CancelReason::MinimumSpread, connector, report)?;
        }
        Ok(())
    }

    fn cancel_expired_orders(
        &mut self,
        now_ms: u64,
        connector: &mut dyn ExchangeConnector,
        report: &mut TickReport,
    ) -> StrategyResult<()> {
        let max_age = self.config.max_order_age_ms;
        let ids: Vec<ClientOrderId> = self
            .tracker
            .refreshable()
            .filter(|o| o.age_ms(now_ms) >= max_age)
            .map(|o| o.client_order_id.clone())
            .collect();
        for id in ids {
            self.send_cancel(now_ms, &id, CancelReason::MaxAge, connector, report)?;
        }
        Ok(())
    }

    fn execute_proposal(
        &mut self,
        now_ms: u64,
        proposal: &Proposal,
        connector: &mut dyn ExchangeConnector,
        report: &mut TickReport,
    ) -> StrategyResult<()> {
        if self.create_timestamp_ms >= now_ms || self.tracker.has_active_non_hanging() {
            return Ok(());
        }
        if self.tracker.has_in_flight_cancels() {
            debug!(
                in_flight = self.tracker.in_flight_count(),
                "Waiting for cancel confirmations before creating orders"
            );
            return Ok(());
        }
        if proposal.is_empty() {
            // Nothing to place, but the withheld side still sat out this cycle.
            if self.config.ping_pong_enabled {
                self.ping_pong.start_cycle(now_ms);
            }
            return Ok(());
        }

        let mut placed = 0usize;
        let mut failed = 0usize;
        for quote in proposal.iter() {
            match self.submit(now_ms, quote.side, quote.price, quote.size, quote.level, false, connector, report)? {
                Submitted::Placed => placed += 1,
                Submitted::Failed(_) => failed += 1,
            }
        }
        // A partial batch leaves the timers alone so the next tick refreshes it.
        if placed > 0 && failed == 0 {
            self.set_timers(now_ms);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn submit(
        &mut self,
        now_ms: u64,
        side: OrderSide,
        price: Price,
        size: Size,
        level: u32,
        is_hanging: bool,
        connector: &mut dyn ExchangeConnector,
        report: &mut TickReport,
    ) -> StrategyResult<Submitted> {
        let mut request = OrderRequest::limit(side, price, size)?;
        if !self.config.take_if_crossed {
            request = request.post_only();
        }
        match connector.create_order(&request) {
            Ok(order_id) => {
                let order = ActiveOrder {
                    is_hanging,
                    ..ActiveOrder::new(order_id.clone(), side, price, size, level, now_ms)
                };
                if self.tracker.track(order) {
                    info!(
                        order_id = %order_id,
                        side = %side,
                        price = %price,
                        size = %size,
                        level = level,
                        hanging = is_hanging,
                        "Order created"
                    );
                    report.created.push(CreatedOrder {
                        order_id,
                        side,
                        price,
                        size,
                        level,
                        is_hanging,
                    });
                }
                Ok(Submitted::Placed)
            }
            Err(err) if err.is_fatal() => {
                error!(side = %side, price = %price, size = %size, error = %err, "Fatal error creating order");
                Err(err.into())
            }
            Err(err) => {
                warn!(side = %side, price = %price, size = %size, error = %err, "Order creation failed, retrying next tick");
                report.failures.push(ConnectorFailure {
                    operation: OP_CREATE,
                    order_id: None,
                    kind: err.kind(),
                    message: err.to_string(),
                });
                Ok(Submitted::Failed(err))
            }
        }
    }

    /// Returns whether the connector accepted the cancel.
    fn send_cancel(
        &mut self,
        now_ms: u64,
        id: &ClientOrderId,
        reason: CancelReason,
        connector: &mut dyn ExchangeConnector,
        report: &mut TickReport,
    ) -> StrategyResult<bool> {
        let Some(side) = self.tracker.get(id).map(|o| o.side) else {
            return Ok(false);
        };

        match connector.cancel_order(id) {
            Ok(true) => {
                self.tracker.mark_cancel_sent(id, now_ms);
                debug!(order_id = %id, reason = %reason, "Cancel requested");
                report.cancelled.push(CancelledOrder {
                    order_id: id.clone(),
                    side,
                    reason,
                });
                Ok(true)
            }
            Ok(false) => {
                warn!(order_id = %id, reason = %reason, "Cancel not accepted, retrying next tick");
                report.failures.push(ConnectorFailure {
                    operation: OP_CANCEL,
                    order_id: Some(id.clone()),
                    kind: "rejected",
                    message: "cancel not accepted".to_string(),
                });
                Ok(false)
            }
            Err(err @ ConnectorError::UnknownOrder(_)) => {
                warn!(order_id = %id, "Connector does not know order, dropping it");
                self.tracker.remove(id);
                self.hanging.forget(id);
                report.failures.push(ConnectorFailure {
                    operation: OP_CANCEL,
                    order_id: Some(id.clone()),
                    kind: err.kind(),
                    message: err.to_string(),
                });
                Ok(false)
            }
            Err(err) if err.is_fatal() => {
                error!(order_id = %id, error = %err, "Fatal error cancelling order");
                Err(err.into())
            }
            Err(err) => {
                warn!(order_id = %id, error = %err, "Cancel failed, retrying next tick");
                report.failures.push(ConnectorFailure {
                    operation: OP_CANCEL,
                    order_id: Some(id.clone()),
                    kind: err.kind(),
                    message: err.to_string(),
                });
                Ok(false)
            }
        }
    }

    fn set_timers(&mut self, now_ms: u64) {
        let next_cycle = now_ms + self.config.order_refresh_time_ms;
        if self.create_timestamp_ms <= now_ms {
            // A creation cycle starts here with the current ping-pong trim.
            if self.config.ping_pong_enabled {
                self.ping_pong.start_cycle(now_ms);
            }
            self.create_timestamp_ms = next_cycle;
        }
        if self.cancel_timestamp_ms <= now_ms {
            self.cancel_timestamp_ms = self.create_timestamp_ms.min(next_cycle);
        }
    }

    fn finish_report(&self, report: &mut TickReport) {
        report.active_buys = self.tracker.orders().iter().filter(|o| o.side.is_buy()).count();
        report.active_sells = self.tracker.len() - report.active_buys;
        report.hanging = self.tracker.hanging().count();
        report.in_flight_cancels = self.tracker.in_flight_count();
    }
}

/// Same count per side and every price within `tolerance` of the resting one.
fn within_tolerance(active: &[&ActiveOrder], proposal: &Proposal, tolerance: Decimal) -> bool {
    [OrderSide::Buy, OrderSide::Sell].into_iter().all(|side| {
        let mut current: Vec<Price> = active.iter().filter(|o| o.side == side).map(|o| o.price).collect();
        current.sort();
        let proposed = proposal.sorted_prices(side);
        current.len() == proposed.len()
            && current
                .iter()
                .zip(&proposed)
                .all(|(c, p)| p.ratio_from(*c).map_or(false, |r| r.abs() <= tolerance))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmm_core::{MockExchangeConnector, MockPriceSource};
    use rust_decimal_macros::dec;

    fn px(d: Decimal) -> Price {
        Price::new(d)
    }

    fn rules() -> TradingRules {
        TradingRules {
            tick_size: px(dec!(0.01)),
            lot_size: Size::new(dec!(0.001)),
            min_order_size: Size::new(dec!(0.001)),
            ..TradingRules::default()
        }
    }

    fn config() -> StrategyConfig {
        StrategyConfig {
            trading_pair: "ETH-USDT".to_string(),
            order_refresh_time_ms: 10_000,
            filled_order_delay_ms: 5_000,
            ..StrategyConfig::default()
        }
    }

    /// Ready connector with mid 100, a 99.5/100.5 book and ample balances.
    fn connector() -> MockExchangeConnector {
        let mut c = MockExchangeConnector::new();
        c.expect_is_ready().return_const(true);
        c.expect_trading_rules().returning(rules);
        c.expect_price_by_type().returning(|t| match t {
            PriceType::MidPrice => Some(Price::new(dec!(100))),
            PriceType::BestBid => Some(Price::new(dec!(99.5))),
            PriceType::BestAsk => Some(Price::new(dec!(100.5))),
            _ => None,
        });
        c.expect_price_at_depth().returning(|_, _| None);
        c.expect_available_balance().returning(|_| dec!(1000));
        c.expect_drain_events().returning(Vec::new);
        c
    }

    fn accept_creates(c: &mut MockExchangeConnector) {
        let mut nonce = 0u64;
        c.expect_create_order().returning(move |req| {
            nonce += 1;
            Ok(ClientOrderId::new(req.side, "ETH-USDT", nonce))
        });
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let cfg = StrategyConfig {
            order_levels: 0,
            ..config()
        };
        assert!(matches!(
            PureMarketMaking::new(cfg, None),
            Err(StrategyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_new_requires_delegate_for_external_source() {
        let cfg = StrategyConfig {
            price_source: PriceSourceKind::ExternalMarket,
            ..config()
        };
        assert!(PureMarketMaking::new(cfg.clone(), None).is_err());
        let delegate: Box<dyn PriceSource> = Box::new(MockPriceSource::new());
        assert!(PureMarketMaking::new(cfg, Some(delegate)).is_ok());
    }

    #[test]
    fn test_custom_price_type_requires_custom_source() {
        let cfg = StrategyConfig {
            price_type: PriceType::Custom,
            ..config()
        };
        assert!(PureMarketMaking::new(cfg, None).is_err());
    }

    #[test]
    fn test_first_tick_creates_one_level_each_side() {
        let mut c = connector();
        accept_creates(&mut c);
        let mut strategy = PureMarketMaking::new(config(), None).unwrap();

        let report = strategy.tick(1_000, &mut c).unwrap();
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.reference_price, Some(px(dec!(100))));

        let buys = strategy.active_buys();
        let sells = strategy.active_sells();
        assert_eq!(buys[0].price, px(dec!(99)));
        assert_eq!(sells[0].price, px(dec!(101)));
        assert_eq!(strategy.create_timestamp_ms(), 11_000);
        assert_eq!(strategy.cancel_timestamp_ms(), 11_000);
    }

    #[test]
    fn test_not_ready_skips_without_orders() {
        let mut c = MockExchangeConnector::new();
        c.expect_drain_events().returning(Vec::new);
        c.expect_is_ready().return_const(false);
        c.expect_create_order().never();
        let mut strategy = PureMarketMaking::new(config(), None).unwrap();

        let report = strategy.tick(1_000, &mut c).unwrap();
        assert_eq!(report.skipped, vec![SkipReason::ConnectorNotReady]);
        assert!(report.was_skipped());
    }

    #[test]
    fn test_missing_reference_price_skips() {
        let mut c = MockExchangeConnector::new();
        c.expect_drain_events().returning(Vec::new);
        c.expect_is_ready().return_const(true);
        c.expect_price_by_type().returning(|_| None);
        c.expect_create_order().never();
        let mut strategy = PureMarketMaking::new(config(), None).unwrap();

        let report = strategy.tick(1_000, &mut c).unwrap();
        assert_eq!(report.skipped, vec![SkipReason::NoReferencePrice]);
        assert!(strategy.last_reference_price().is_none());
    }

    #[test]
    fn test_retryable_create_error_retried_next_tick() {
        let mut c = connector();
        let mut calls = 0u64;
        c.expect_create_order().returning(move |req| {
            calls += 1;
            if calls <= 2 {
                Err(ConnectorError::Retryable("timeout".into()))
            } else {
                Ok(ClientOrderId::new(req.side, "ETH-USDT", calls))
            }
        });
        let mut strategy = PureMarketMaking::new(config(), None).unwrap();

        let first = strategy.tick(1_000, &mut c).unwrap();
        assert!(first.created.is_empty());
        assert_eq!(first.failures.len(), 2);
        assert!(first.failures.iter().all(|f| f.kind == "retryable" && f.operation == "create"));
        assert!(strategy.tracker().is_empty());

        let second = strategy.tick(2_000, &mut c).unwrap();
        assert_eq!(second.created.len(), 2);
        assert!(second.failures.is_empty());
    }

    #[test]
    fn test_fatal_create_error_aborts_tick() {
        let mut c = connector();
        c.expect_create_order()
            .returning(|_| Err(ConnectorError::Fatal("account disabled".into())));
        let mut strategy = PureMarketMaking::new(config(), None).unwrap();

        let result = strategy.tick(1_000, &mut c);
        assert!(matches!(
            result,
            Err(StrategyError::Connector(ConnectorError::Fatal(_)))
        ));
        assert!(strategy.tracker().is_empty());
    }

    #[test]
    fn test_unknown_order_on_cancel_dropped() {
        let mut c = connector();
        accept_creates(&mut c);
        c.expect_cancel_order()
            .returning(|id| Err(ConnectorError::UnknownOrder(id.clone())));
        let cfg = StrategyConfig {
            order_refresh_tolerance_pct: dec!(-1),
            ..config()
        };
        let mut strategy = PureMarketMaking::new(cfg, None).unwrap();

        strategy.tick(1_000, &mut c).unwrap();
        assert_eq!(strategy.tracker().len(), 2);

        let report = strategy.tick(11_000, &mut c).unwrap();
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|f| f.kind == "unknown_order"));
        assert!(strategy.tracker().is_empty());
        assert!(!strategy.tracker().has_in_flight_cancels());
    }

    #[test]
    fn test_rejected_cancel_keeps_order() {
        let mut c = connector();
        accept_creates(&mut c);
        c.expect_cancel_order().returning(|_| Ok(false));
        let cfg = StrategyConfig {
            order_refresh_tolerance_pct: dec!(-1),
            ..config()
        };
        let mut strategy = PureMarketMaking::new(cfg, None).unwrap();

        strategy.tick(1_000, &mut c).unwrap();
        let report = strategy.tick(11_000, &mut c).unwrap();
        assert!(report.cancelled.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert_eq!(strategy.tracker().len(), 2);
        assert!(!strategy.tracker().has_in_flight_cancels());
    }

    #[test]
    fn test_external_price_delegate_used() {
        let mut c = connector();
        accept_creates(&mut c);
        let mut delegate = MockPriceSource::new();
        delegate
            .expect_price_by_type()
            .returning(|_| Some(Price::new(dec!(200))));
        let cfg = StrategyConfig {
            price_source: PriceSourceKind::ExternalMarket,
            take_if_crossed: true,
            ..config()
        };
        let mut strategy = PureMarketMaking::new(cfg, Some(Box::new(delegate))).unwrap();

        let report = strategy.tick(1_000, &mut c).unwrap();
        assert_eq!(report.reference_price, Some(px(dec!(200))));
        assert_eq!(strategy.active_buys()[0].price, px(dec!(198)));
        assert_eq!(strategy.active_sells()[0].price, px(dec!(202)));
    }

    #[test]
    fn test_takers_filtered_by_default() {
        let mut c = connector();
        accept_creates(&mut c);
        let mut delegate = MockPriceSource::new();
        delegate
            .expect_price_by_type()
            .returning(|_| Some(Price::new(dec!(200))));
        let cfg = StrategyConfig {
            price_source: PriceSourceKind::ExternalMarket,
            ..config()
        };
        let mut strategy = PureMarketMaking::new(cfg, Some(Box::new(delegate))).unwrap();

        // The 198 buy would cross the 100.5 ask
        strategy.tick(1_000, &mut c).unwrap();
        assert!(strategy.active_buys().is_empty());
        assert_eq!(strategy.active_sells().len(), 1);
    }

    #[test]
    fn test_within_tolerance() {
        let order = |side, p: Decimal| {
            ActiveOrder::new(ClientOrderId::from(format!("{side}-{p}")), side, px(p), Size::ONE, 0, 0)
        };
        let buy = order(OrderSide::Buy, dec!(99));
        let sell = order(OrderSide::Sell, dec!(101));
        let active = vec![&buy, &sell];
        let quote = |side, p| crate::proposal::Quote::new(side, px(p), Size::ONE, 0);

        let close = Proposal::new(vec![quote(OrderSide::Buy, dec!(99.05))], vec![quote(OrderSide::Sell, dec!(101))]);
        assert!(within_tolerance(&active, &close, dec!(0.001)));
        assert!(!within_tolerance(&active, &close, dec!(0)));

        let fewer = Proposal::new(vec![], vec![quote(OrderSide::Sell, dec!(101))]);
        assert!(!within_tolerance(&active, &fewer, dec!(0.5)));
    }

    #[test]
    fn test_status_snapshot() {
        let mut c = connector();
        accept_creates(&mut c);
        let mut strategy = PureMarketMaking::new(config(), None).unwrap();
        strategy.tick(1_000, &mut c).unwrap();

        let status = strategy.status(3_000, &c);
        assert_eq!(status.trading_pair, "ETH-USDT");
        assert_eq!(status.orders.len(), 2);
        assert_eq!(status.orders[0].side, OrderSide::Sell);
        assert_eq!(status.orders[0].age_ms, 2_000);
        assert_eq!(status.orders[1].spread, Some(dec!(0.01)));
        // 1000 + 1 reserved base and 1000 + 99 reserved quote at 100
        assert_eq!(status.base_balance, dec!(1001));
        assert_eq!(status.quote_balance, dec!(1099));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["orders"][0]["side"], "sell");

        let text = strategy.format_status(3_000, &c);
        assert!(text.contains("ETH-USDT"));
        assert!(text.contains("Reference price: 100"));
    }
}
