//! Prometheus metrics for the market making engine.
//!
//! Every collector is labelled by `market` so several strategies can share
//! one process.
//!
//! # Panics
//!
//! Registration unwraps. A failure means two collectors share a name, which
//! is a programming error that should stop the process at first use.

use once_cell::sync::Lazy;
use pmm_core::OrderSide;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Strategy ticks.
/// Labels: outcome (quoted/skipped)
pub static TICKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("pmm_ticks_total", "Total strategy ticks", &["market", "outcome"]).unwrap()
});

/// Tick processing time.
pub static TICK_DURATION_US: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "pmm_tick_duration_us",
        "Strategy tick processing time in microseconds",
        &["market"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 10000.0]
    )
    .unwrap()
});

/// Orders accepted by the connector.
/// Labels: kind (level/hanging)
pub static ORDERS_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_orders_created_total",
        "Total orders accepted by the connector",
        &["market", "side", "kind"]
    )
    .unwrap()
});

/// Cancel requests accepted by the connector.
pub static ORDERS_CANCELLED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_orders_cancelled_total",
        "Total cancel requests accepted by the connector",
        &["market", "reason"]
    )
    .unwrap()
});

pub static FILLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("pmm_fills_total", "Total fills on own orders", &["market", "side"]).unwrap()
});

/// Filled volume in base units.
pub static FILLED_BASE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_filled_base_total",
        "Filled volume in base asset units",
        &["market", "side"]
    )
    .unwrap()
});

/// Connector calls that failed without stopping the strategy.
/// Labels: operation (create/cancel), kind (retryable/insufficient_balance/...)
pub static CONNECTOR_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pmm_connector_failures_total",
        "Total non-fatal connector failures",
        &["market", "operation", "kind"]
    )
    .unwrap()
});

pub static ACTIVE_ORDERS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("pmm_active_orders", "Tracked resting orders", &["market", "side"]).unwrap()
});

pub static HANGING_ORDERS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("pmm_hanging_orders", "Tracked hanging orders", &["market"]).unwrap()
});

pub static IN_FLIGHT_CANCELS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pmm_in_flight_cancels",
        "Cancels sent and not yet confirmed",
        &["market"]
    )
    .unwrap()
});

pub static REFERENCE_PRICE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("pmm_reference_price", "Last reference price", &["market"]).unwrap()
});

/// Share of portfolio value held in the base asset.
pub static BASE_RATIO: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("pmm_base_ratio", "Base asset share of portfolio value", &["market"]).unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn tick(market: &str, quoted: bool, duration_us: f64) {
        let outcome = if quoted { "quoted" } else { "skipped" };
        TICKS_TOTAL.with_label_values(&[market, outcome]).inc();
        TICK_DURATION_US.with_label_values(&[market]).observe(duration_us);
    }

    pub fn order_created(market: &str, side: OrderSide, hanging: bool) {
        let kind = if hanging { "hanging" } else { "level" };
        ORDERS_CREATED_TOTAL
            .with_label_values(&[market, side_label(side), kind])
            .inc();
    }

    pub fn order_cancelled(market: &str, reason: &str) {
        ORDERS_CANCELLED_TOTAL.with_label_values(&[market, reason]).inc();
    }

    pub fn fill(market: &str, side: OrderSide, base_amount: f64) {
        let side = side_label(side);
        FILLS_TOTAL.with_label_values(&[market, side]).inc();
        FILLED_BASE_TOTAL.with_label_values(&[market, side]).inc_by(base_amount.max(0.0));
    }

    pub fn connector_failure(market: &str, operation: &str, kind: &str) {
        CONNECTOR_FAILURES_TOTAL
            .with_label_values(&[market, operation, kind])
            .inc();
    }

    /// Order book state after a tick.
    pub fn order_state(market: &str, buys: usize, sells: usize, hanging: usize, in_flight: usize) {
        ACTIVE_ORDERS.with_label_values(&[market, "buy"]).set(buys as f64);
        ACTIVE_ORDERS.with_label_values(&[market, "sell"]).set(sells as f64);
        HANGING_ORDERS.with_label_values(&[market]).set(hanging as f64);
        IN_FLIGHT_CANCELS.with_label_values(&[market]).set(in_flight as f64);
    }

    pub fn reference_price(market: &str, price: f64) {
        REFERENCE_PRICE.with_label_values(&[market]).set(price);
    }

    pub fn base_ratio(market: &str, ratio: f64) {
        BASE_RATIO.with_label_values(&[market]).set(ratio);
    }

    /// Everything registered in the default registry, in the text
    /// exposition format.
    pub fn gather_text() -> TelemetryResult<String> {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

fn side_label(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_flow_counters() {
        let market = "METRICS-TEST";
        Metrics::order_created(market, OrderSide::Buy, false);
        Metrics::order_created(market, OrderSide::Buy, false);
        Metrics::order_created(market, OrderSide::Sell, true);
        Metrics::fill(market, OrderSide::Buy, 0.5);
        Metrics::fill(market, OrderSide::Buy, 0.25);

        assert_eq!(
            ORDERS_CREATED_TOTAL
                .with_label_values(&[market, "buy", "level"])
                .get(),
            2.0
        );
        assert_eq!(
            ORDERS_CREATED_TOTAL
                .with_label_values(&[market, "sell", "hanging"])
                .get(),
            1.0
        );
        assert_eq!(FILLS_TOTAL.with_label_values(&[market, "buy"]).get(), 2.0);
        assert_eq!(FILLED_BASE_TOTAL.with_label_values(&[market, "buy"]).get(), 0.75);
    }

    #[test]
    fn test_order_state_gauges() {
        let market = "GAUGE-TEST";
        Metrics::order_state(market, 3, 2, 1, 4);
        assert_eq!(ACTIVE_ORDERS.with_label_values(&[market, "buy"]).get(), 3.0);
        assert_eq!(ACTIVE_ORDERS.with_label_values(&[market, "sell"]).get(), 2.0);
        assert_eq!(HANGING_ORDERS.with_label_values(&[market]).get(), 1.0);
        assert_eq!(IN_FLIGHT_CANCELS.with_label_values(&[market]).get(), 4.0);
    }

    #[test]
    fn test_gather_text_contains_metrics() {
        Metrics::tick("GATHER-TEST", true, 42.0);
        Metrics::reference_price("GATHER-TEST", 100.5);
        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("pmm_ticks_total"));
        assert!(text.contains("pmm_reference_price{market=\"GATHER-TEST\"} 100.5"));
    }
}
