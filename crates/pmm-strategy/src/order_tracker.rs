//! Active orders and in-flight cancels of the strategy.

use std::collections::BTreeMap;

use pmm_core::{ClientOrderId, OrderSide, OrderState, Price, Size};
use serde::Serialize;
use tracing::{debug, warn};

/// An order acknowledged by the connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveOrder {
    pub client_order_id: ClientOrderId,
    pub side: OrderSide,
    pub price: Price,
    /// Original size.
    pub size: Size,
    pub filled: Size,
    pub level: u32,
    pub created_at_ms: u64,
    /// Orphaned by a fill of its counterpart; kept out of refresh cycles.
    pub is_hanging: bool,
    pub state: OrderState,
}

impl ActiveOrder {
    pub fn new(
        client_order_id: ClientOrderId,
        side: OrderSide,
        price: Price,
        size: Size,
        level: u32,
        created_at_ms: u64,
    ) -> Self {
        Self {
            client_order_id,
            side,
            price,
            size,
            filled: Size::ZERO,
            level,
            created_at_ms,
            is_hanging: false,
            state: OrderState::Pending,
        }
    }

    pub fn remaining(&self) -> Size {
        if self.filled >= self.size {
            Size::ZERO
        } else {
            self.size - self.filled
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at_ms)
    }

    pub fn is_pending_cancel(&self) -> bool {
        self.state == OrderState::PendingCancel
    }
}

/// Orders in insertion order plus the in-flight cancel map.
#[derive(Debug, Default)]
pub struct OrderTracker {
    orders: Vec<ActiveOrder>,
    /// Cancel send time by order id.
    in_flight_cancels: BTreeMap<ClientOrderId, u64>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an acknowledged order. Duplicate ids are ignored.
    pub fn track(&mut self, order: ActiveOrder) -> bool {
        if self.get(&order.client_order_id).is_some() {
            warn!(order_id = %order.client_order_id, "Duplicate order id, not tracked");
            return false;
        }
        self.orders.push(order);
        true
    }

    pub fn get(&self, id: &ClientOrderId) -> Option<&ActiveOrder> {
        self.orders.iter().find(|o| &o.client_order_id == id)
    }

    pub fn get_mut(&mut self, id: &ClientOrderId) -> Option<&mut ActiveOrder> {
        self.orders.iter_mut().find(|o| &o.client_order_id == id)
    }

    pub fn orders(&self) -> &[ActiveOrder] {
        &self.orders
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Active orders of one side, best price first.
    pub fn side(&self, side: OrderSide) -> Vec<&ActiveOrder> {
        let mut orders: Vec<&ActiveOrder> = self.orders.iter().filter(|o| o.side == side).collect();
        match side {
            OrderSide::Buy => orders.sort_by(|a, b| b.price.cmp(&a.price)),
            OrderSide::Sell => orders.sort_by(|a, b| a.price.cmp(&b.price)),
        }
        orders
    }

    pub fn non_hanging(&self) -> impl Iterator<Item = &ActiveOrder> {
        self.orders.iter().filter(|o| !o.is_hanging)
    }

    pub fn hanging(&self) -> impl Iterator<Item = &ActiveOrder> {
        self.orders.iter().filter(|o| o.is_hanging)
    }

    pub fn has_active_non_hanging(&self) -> bool {
        self.non_hanging().next().is_some()
    }

    /// Non-hanging orders that can still be cancelled by a refresh.
    pub fn refreshable(&self) -> impl Iterator<Item = &ActiveOrder> {
        self.non_hanging().filter(|o| !o.is_pending_cancel())
    }

    pub fn mark_open(&mut self, id: &ClientOrderId) {
        if let Some(order) = self.get_mut(id) {
            if order.state == OrderState::Pending {
                order.state = OrderState::Open;
            }
        }
    }

    pub fn mark_hanging(&mut self, id: &ClientOrderId) -> bool {
        match self.get_mut(id) {
            Some(order) if !order.is_hanging => {
                order.is_hanging = true;
                true
            }
            _ => false,
        }
    }

    /// Apply a partial or full fill.
    pub fn record_fill(&mut self, id: &ClientOrderId, amount: Size) -> Option<&ActiveOrder> {
        let order = self.get_mut(id)?;
        order.filled = order.filled + amount;
        if order.state != OrderState::PendingCancel {
            order.state = OrderState::PartiallyFilled;
        }
        Some(order)
    }

    /// Record a cancel request accepted by the connector.
    pub fn mark_cancel_sent(&mut self, id: &ClientOrderId, now_ms: u64) {
        if let Some(order) = self.get_mut(id) {
            order.state = OrderState::PendingCancel;
            self.in_flight_cancels.insert(id.clone(), now_ms);
        }
    }

    pub fn is_cancel_in_flight(&self, id: &ClientOrderId) -> bool {
        self.in_flight_cancels.contains_key(id)
    }

    pub fn has_in_flight_cancels(&self) -> bool {
        !self.in_flight_cancels.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight_cancels.len()
    }

    /// Forget a terminal order and any cancel in flight for it.
    pub fn remove(&mut self, id: &ClientOrderId) -> Option<ActiveOrder> {
        self.in_flight_cancels.remove(id);
        let idx = self.orders.iter().position(|o| &o.client_order_id == id)?;
        Some(self.orders.remove(idx))
    }

    /// Clear cancels older than `timeout_ms`. Their orders become
    /// cancellable again on a later tick.
    pub fn expire_stale_cancels(&mut self, now_ms: u64, timeout_ms: u64) -> Vec<ClientOrderId> {
        let stale: Vec<ClientOrderId> = self
            .in_flight_cancels
            .iter()
            .filter(|(_, sent_at)| now_ms.saturating_sub(**sent_at) >= timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.in_flight_cancels.remove(id);
            if let Some(order) = self.get_mut(id) {
                order.state = if order.filled.is_positive() {
                    OrderState::PartiallyFilled
                } else {
                    OrderState::Open
                };
            }
            debug!(order_id = %id, "In-flight cancel expired");
        }
        stale
    }
}
