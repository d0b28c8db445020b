//! End-of-session summary read back from the Prometheus counters.

use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use prometheus::CounterVec;
use serde::Serialize;
use tracing::info;

use crate::metrics::{
    CONNECTOR_FAILURES_TOTAL, FILLED_BASE_TOTAL, FILLS_TOTAL, ORDERS_CANCELLED_TOTAL,
    ORDERS_CREATED_TOTAL, TICKS_TOTAL,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub market: String,
    pub started_at: DateTime<Utc>,
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub orders_created: u64,
    pub orders_cancelled: u64,
    pub buy_fills: u64,
    pub sell_fills: u64,
    pub bought_base: f64,
    pub sold_base: f64,
    pub connector_failures: u64,
}

pub struct SessionStatsReporter {
    market: String,
    start_time: DateTime<Utc>,
}

impl SessionStatsReporter {
    pub fn new(market: impl Into<String>) -> Self {
        Self {
            market: market.into(),
            start_time: Utc::now(),
        }
    }

    pub fn stats(&self) -> SessionStats {
        let market = self.market.as_str();
        let quoted = TICKS_TOTAL.with_label_values(&[market, "quoted"]).get() as u64;
        let skipped = TICKS_TOTAL.with_label_values(&[market, "skipped"]).get() as u64;

        SessionStats {
            market: self.market.clone(),
            started_at: self.start_time,
            ticks: quoted + skipped,
            skipped_ticks: skipped,
            orders_created: sum_for_market(&ORDERS_CREATED_TOTAL, market) as u64,
            orders_cancelled: sum_for_market(&ORDERS_CANCELLED_TOTAL, market) as u64,
            buy_fills: FILLS_TOTAL.with_label_values(&[market, "buy"]).get() as u64,
            sell_fills: FILLS_TOTAL.with_label_values(&[market, "sell"]).get() as u64,
            bought_base: FILLED_BASE_TOTAL.with_label_values(&[market, "buy"]).get(),
            sold_base: FILLED_BASE_TOTAL.with_label_values(&[market, "sell"]).get(),
            connector_failures: sum_for_market(&CONNECTOR_FAILURES_TOTAL, market) as u64,
        }
    }

    pub fn output_summary(&self) {
        let s = self.stats();
        let duration = Utc::now() - self.start_time;

        info!("========== Session Summary ==========");
        info!(
            "Market {} since {} ({} min {} s)",
            s.market,
            self.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
            duration.num_minutes(),
            duration.num_seconds() % 60
        );
        info!("  Ticks: {} ({} skipped)", s.ticks, s.skipped_ticks);
        info!(
            "  Orders: {} created, {} cancelled",
            s.orders_created, s.orders_cancelled
        );
        info!(
            "  Fills: {} buys ({:.6} base), {} sells ({:.6} base)",
            s.buy_fills, s.bought_base, s.sell_fills, s.sold_base
        );
        info!("  Connector failures: {}", s.connector_failures);
        info!("=====================================");
    }
}

/// Sum of every series of `counter` whose first label is `market`.
fn sum_for_market(counter: &CounterVec, market: &str) -> f64 {
    counter
        .collect()
        .iter()
        .flat_map(|mf| mf.get_metric())
        .filter(|m| m.get_label().iter().any(|l| l.get_name() == "market" && l.get_value() == market))
        .map(|m| m.get_counter().get_value())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use pmm_core::OrderSide;

    #[test]
    fn test_stats_aggregate_market_series() {
        let market = "SESSION-TEST";
        Metrics::tick(market, true, 10.0);
        Metrics::tick(market, true, 10.0);
        Metrics::tick(market, false, 5.0);
        Metrics::order_created(market, OrderSide::Buy, false);
        Metrics::order_created(market, OrderSide::Sell, true);
        Metrics::order_cancelled(market, "refresh");
        Metrics::order_cancelled(market, "max_age");
        Metrics::order_cancelled("OTHER-MARKET", "refresh");
        Metrics::fill(market, OrderSide::Sell, 1.5);
        Metrics::connector_failure(market, "create", "retryable");

        let stats = SessionStatsReporter::new(market).stats();
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.skipped_ticks, 1);
        assert_eq!(stats.orders_created, 2);
        assert_eq!(stats.orders_cancelled, 2);
        assert_eq!(stats.sell_fills, 1);
        assert_eq!(stats.buy_fills, 0);
        assert_eq!(stats.sold_base, 1.5);
        assert_eq!(stats.connector_failures, 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["market"], "SESSION-TEST");
    }
}
