//! Wick-based volatility context for spread widening.
//!
//! The reference price is sampled once per tick. Samples are grouped into
//! fixed intervals; each finished interval yields one wick
//! `(high - low) / mid × 10000` bps, where the range also covers the close
//! of the previous interval so that a one-sample interval still records the
//! move into it.
//!
//! Rather than reading a fixed percentile, the spread floor uses the
//! *breakpoint* of the wick distribution: the adjacent-percentile pair with
//! the largest jump. A fixed P99 tends to shrink as quiet samples pile up.

use std::collections::VecDeque;

use pmm_core::Price;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

/// Wick samples are capped here so a single gap does not dominate.
const MAX_WICK_BPS: f64 = 500.0;

/// Percentile statistics from the wick distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolatilityStats {
    pub p90_wick_bps: f64,
    pub p95_wick_bps: f64,
    pub p99_wick_bps: f64,
    pub p995_wick_bps: f64,
    pub p998_wick_bps: f64,
    pub p999_wick_bps: f64,
    pub p100_wick_bps: f64,
    pub sample_count: usize,
    /// Enough samples to act on.
    pub is_valid: bool,
    /// Breakpoint wick (bps).
    pub optimal_wick_bps: f64,
    /// Percentile chosen as the breakpoint.
    pub optimal_percentile: &'static str,
}

impl Default for VolatilityStats {
    fn default() -> Self {
        Self {
            p90_wick_bps: 0.0,
            p95_wick_bps: 0.0,
            p99_wick_bps: 0.0,
            p995_wick_bps: 0.0,
            p998_wick_bps: 0.0,
            p999_wick_bps: 0.0,
            p100_wick_bps: 0.0,
            sample_count: 0,
            is_valid: false,
            optimal_wick_bps: 0.0,
            optimal_percentile: "N/A",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    index: u64,
    high: Decimal,
    low: Decimal,
    last: Decimal,
}

#[derive(Debug, Clone)]
struct CachedStats {
    stats: VolatilityStats,
    computed_at_ms: u64,
}

/// Rolling wick tracker for the quoted market.
#[derive(Debug)]
pub struct VolatilityTracker {
    interval_ms: u64,
    max_samples: usize,
    min_samples: usize,
    cache_ttl_ms: u64,
    min_jump_ratio: f64,
    current: Option<Bucket>,
    wicks: VecDeque<f64>,
    cached: Option<CachedStats>,
}

impl VolatilityTracker {
    pub fn new(
        interval_ms: u64,
        max_samples: usize,
        min_samples: usize,
        cache_ttl_ms: u64,
        min_jump_ratio: f64,
    ) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            max_samples,
            min_samples,
            cache_ttl_ms,
            min_jump_ratio,
            current: None,
            wicks: VecDeque::new(),
            cached: None,
        }
    }

    /// Record a reference price observation.
    pub fn record(&mut self, price: Price, now_ms: u64) {
        if !price.is_positive() {
            return;
        }
        let px = price.inner();
        let index = now_ms / self.interval_ms;

        match self.current.as_mut() {
            None => {
                self.current = Some(Bucket {
                    index,
                    high: px,
                    low: px,
                    last: px,
                });
            }
            Some(bucket) if bucket.index == index => {
                bucket.high = bucket.high.max(px);
                bucket.low = bucket.low.min(px);
                bucket.last = px;
            }
            Some(bucket) => {
                let finished = *bucket;
                // The new interval opens at the previous close.
                *bucket = Bucket {
                    index,
                    high: finished.last.max(px),
                    low: finished.last.min(px),
                    last: px,
                };
                self.push_wick(&finished);
            }
        }
    }

    fn push_wick(&mut self, bucket: &Bucket) {
        let mid = (bucket.high + bucket.low) / Decimal::TWO;
        if mid.is_zero() {
            return;
        }
        let wick_bps = ((bucket.high - bucket.low) / mid * Decimal::from(10000))
            .to_f64()
            .unwrap_or(0.0)
            .min(MAX_WICK_BPS);

        self.wicks.push_back(wick_bps);
        while self.wicks.len() > self.max_samples {
            self.wicks.pop_front();
        }
        self.cached = None;
    }

    pub fn sample_count(&self) -> usize {
        self.wicks.len()
    }

    /// Current statistics, recomputed at most once per cache TTL unless new
    /// wicks arrived.
    pub fn stats(&mut self, now_ms: u64) -> VolatilityStats {
        if let Some(cached) = &self.cached {
            if now_ms.saturating_sub(cached.computed_at_ms) < self.cache_ttl_ms {
                return cached.stats.clone();
            }
        }
        let stats = compute_stats(&self.wicks, self.min_samples, self.min_jump_ratio);
        self.cached = Some(CachedStats {
            stats: stats.clone(),
            computed_at_ms: now_ms,
        });
        stats
    }
}

fn compute_stats(wicks: &VecDeque<f64>, min_samples: usize, min_jump_ratio: f64) -> VolatilityStats {
    if wicks.is_empty() {
        return VolatilityStats::default();
    }

    let mut sorted: Vec<f64> = wicks.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    let percentile = |p: f64| -> f64 {
        let idx = (p / 100.0 * (n - 1) as f64).round() as usize;
        sorted[idx.min(n - 1)]
    };

    let p90 = percentile(90.0);
    let p95 = percentile(95.0);
    let p99 = percentile(99.0);
    let p995 = percentile(99.5);
    let p998 = percentile(99.8);
    let p999 = percentile(99.9);

    let (optimal_percentile, optimal_wick_bps) =
        detect_breakpoint(&[p90, p95, p99, p995, p998, p999], min_jump_ratio);

    VolatilityStats {
        p90_wick_bps: p90,
        p95_wick_bps: p95,
        p99_wick_bps: p99,
        p995_wick_bps: p995,
        p998_wick_bps: p998,
        p999_wick_bps: p999,
        p100_wick_bps: sorted[n - 1],
        sample_count: n,
        is_valid: n >= min_samples,
        optimal_wick_bps,
        optimal_percentile,
    }
}

/// Pick the percentile right after the largest adjacent jump of at least
/// `min_jump_ratio`. Falls back to P99.
fn detect_breakpoint(values: &[f64; 6], min_jump_ratio: f64) -> (&'static str, f64) {
    const NAMES: [&str; 6] = ["P90", "P95", "P99", "P99.5", "P99.8", "P99.9"];

    let mut best: Option<(f64, usize)> = None;
    for i in 1..values.len() {
        let (low, high) = (values[i - 1], values[i]);
        if low <= 0.0 {
            continue;
        }
        let jump = high / low;
        if jump >= min_jump_ratio && best.map_or(true, |(b, _)| jump > b) {
            best = Some((jump, i));
        }
    }

    match best {
        Some((_, i)) => (NAMES[i], values[i]),
        None => ("P99", values[2]),
    }
}

/// Spread implied by the volatility breakpoint, as a fraction of price.
pub fn volatility_spread(stats: &VolatilityStats, multiplier: Decimal) -> Option<Decimal> {
    if !stats.is_valid {
        return None;
    }
    let wick = Decimal::try_from(stats.optimal_wick_bps).ok()?;
    Some((wick / Decimal::from(10000) * multiplier).round_dp(8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tracker() -> VolatilityTracker {
        VolatilityTracker::new(1_000, 3600, 1, 10_000, 1.5)
    }

    fn px(d: Decimal) -> Price {
        Price::new(d)
    }

    #[test]
    fn test_empty_tracker() {
        let mut t = tracker();
        let stats = t.stats(0);
        assert!(!stats.is_valid);
        assert_eq!(stats.sample_count, 0);
        assert_eq!(volatility_spread(&stats, dec!(2)), None);
    }

    #[test]
    fn test_wick_finalized_on_next_interval() {
        let mut t = tracker();
        t.record(px(dec!(100.10)), 1_000);
        t.record(px(dec!(99.90)), 1_500);
        assert_eq!(t.sample_count(), 0);

        t.record(px(dec!(100.00)), 2_000);
        assert_eq!(t.sample_count(), 1);

        let stats = t.stats(2_000);
        // (100.10 - 99.90) / 100.00 = 20 bps
        assert!((stats.p100_wick_bps - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_single_sample_intervals_capture_moves() {
        let mut t = tracker();
        t.record(px(dec!(100)), 0);
        t.record(px(dec!(101)), 1_000);
        t.record(px(dec!(101)), 2_000);

        let stats = t.stats(2_000);
        assert_eq!(stats.sample_count, 2);
        // First interval: only 100. Second interval opens at 100 and sees 101.
        assert!(stats.p100_wick_bps > 99.0 && stats.p100_wick_bps < 100.0);
    }

    #[test]
    fn test_wick_capped() {
        let mut t = tracker();
        t.record(px(dec!(100)), 0);
        t.record(px(dec!(200)), 500);
        t.record(px(dec!(200)), 1_000);
        assert!((t.stats(1_000).p100_wick_bps - MAX_WICK_BPS).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rolling_window_eviction() {
        let mut t = VolatilityTracker::new(1_000, 5, 1, 10_000, 1.5);
        for sec in 0u64..10 {
            t.record(px(Decimal::new(10000 + (sec as i64 % 3) * 10, 2)), sec * 1000);
        }
        assert_eq!(t.sample_count(), 5);
    }

    #[test]
    fn test_min_samples_threshold() {
        let mut t = VolatilityTracker::new(1_000, 3600, 10, 10_000, 1.5);
        for sec in 0u64..6 {
            t.record(px(Decimal::new(10000 + sec as i64 * 5, 2)), sec * 1000);
        }
        let stats = t.stats(6_000);
        assert!(!stats.is_valid);
        assert_eq!(stats.sample_count, 5);
    }

    #[test]
    fn test_cache_invalidated_on_new_wick() {
        let mut t = tracker();
        t.record(px(dec!(100)), 0);
        t.record(px(dec!(100)), 1_000);
        assert_eq!(t.stats(1_000).sample_count, 1);

        t.record(px(dec!(100.5)), 2_000);
        // Within TTL but a new wick arrived
        assert_eq!(t.stats(1_500).sample_count, 2);
    }

    #[test]
    fn test_breakpoint_no_jump_defaults_p99() {
        let (name, val) = detect_breakpoint(&[10.0, 11.0, 12.0, 12.5, 13.0, 13.5], 1.5);
        assert_eq!(name, "P99");
        assert!((val - 12.0).abs() < 0.01);
    }

    #[test]
    fn test_breakpoint_largest_jump_wins() {
        let (name, val) = detect_breakpoint(&[5.0, 10.0, 11.0, 12.0, 13.0, 39.0], 1.5);
        assert_eq!(name, "P99.9");
        assert!((val - 39.0).abs() < 0.01);
    }

    #[test]
    fn test_volatility_spread_from_stats() {
        let stats = VolatilityStats {
            is_valid: true,
            optimal_wick_bps: 50.0,
            sample_count: 100,
            ..VolatilityStats::default()
        };
        // 50 bps × 2 = 1%
        assert_eq!(volatility_spread(&stats, dec!(2)), Some(dec!(0.01)));
    }
}
