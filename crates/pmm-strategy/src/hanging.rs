//! Hanging orders.
//!
//! When one side of a level fills, its counterpart is left resting at its
//! original price and size instead of being refreshed. A hanging order is
//! cancelled once the market moves too far from it, and renewed in place
//! once it reaches the maximum order age.

use std::collections::BTreeMap;

use pmm_core::{ClientOrderId, OrderSide, Price, Size};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::order_tracker::{ActiveOrder, OrderTracker};

/// Why a hanging order is being cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HangingCancelReason {
    /// Too far from the reference price.
    PriceDistance,
    /// Past the maximum age; re-created after the cancel is confirmed.
    Renewal,
}

/// Frozen parameters of a hanging order awaiting re-creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HangingRenewal {
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub level: u32,
}

#[derive(Debug, Default)]
pub struct HangingOrders {
    /// Cancels sent for renewal, by order id.
    awaiting_cancel: BTreeMap<ClientOrderId, HangingRenewal>,
    /// Confirmed cancels ready to be placed again.
    ready: Vec<HangingRenewal>,
}

impl HangingOrders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counterpart that should start hanging after `filled` completed.
    pub fn counterpart_of<'a>(tracker: &'a OrderTracker, filled: &ActiveOrder) -> Option<&'a ActiveOrder> {
        let side = filled.side.opposite();
        tracker
            .non_hanging()
            .find(|o| o.side == side && o.level == filled.level && !o.is_pending_cancel())
    }

    /// Hanging orders to cancel this tick.
    pub fn to_cancel(
        tracker: &OrderTracker,
        reference: Price,
        cancel_pct: Decimal,
        max_age_ms: u64,
        now_ms: u64,
    ) -> Vec<(ClientOrderId, HangingCancelReason)> {
        tracker
            .hanging()
            .filter(|o| !o.is_pending_cancel())
            .filter_map(|o| {
                let distance = o.price.ratio_from(reference).map(|r| r.abs());
                if distance.map_or(false, |d| d >= cancel_pct) {
                    Some((o.client_order_id.clone(), HangingCancelReason::PriceDistance))
                } else if o.age_ms(now_ms) >= max_age_ms {
                    Some((o.client_order_id.clone(), HangingCancelReason::Renewal))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Remember a renewal cancel that the connector accepted.
    pub fn renewal_requested(&mut self, order: &ActiveOrder) {
        self.awaiting_cancel.insert(
            order.client_order_id.clone(),
            HangingRenewal {
                side: order.side,
                price: order.price,
                size: order.remaining(),
                level: order.level,
            },
        );
    }

    /// A cancel was confirmed. Returns true when it queued a renewal.
    pub fn on_cancelled(&mut self, id: &ClientOrderId) -> bool {
        match self.awaiting_cancel.remove(id) {
            Some(renewal) => {
                self.ready.push(renewal);
                true
            }
            None => false,
        }
    }

    /// Drop a renewal whose order filled, failed, or whose cancel timed out.
    pub fn forget(&mut self, id: &ClientOrderId) {
        self.awaiting_cancel.remove(id);
    }

    pub fn take_ready(&mut self) -> Vec<HangingRenewal> {
        std::mem::take(&mut self.ready)
    }

    /// Put back renewals that could not be placed this tick.
    pub fn requeue(&mut self, renewal: HangingRenewal) {
        self.ready.push(renewal);
    }

    pub fn pending_renewals(&self) -> usize {
        self.awaiting_cancel.len() + self.ready.len()
    }
}
