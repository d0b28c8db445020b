//! Pure market making configuration.
//!
//! Spreads and percentages are fractions (`0.01` = 1%). Durations are in
//! milliseconds. Every field has a serde default so a config file only
//! needs to name what it changes.

use std::collections::BTreeMap;

use pmm_core::{OrderSide, PriceSourceKind, PriceType, TradingPair};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{StrategyError, StrategyResult};

/// A single hand-placed order that replaces the level ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOverride {
    pub side: OrderSide,
    /// Distance from the reference price in percent (`0.5` = 0.5%).
    pub spread_pct: Decimal,
    /// Order size in base units.
    pub size: Decimal,
}

/// Strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Market to quote, `BASE-QUOTE`.
    #[serde(default = "default_trading_pair")]
    pub trading_pair: String,

    /// Distance of the first bid below the reference price.
    #[serde(default = "default_spread")]
    pub bid_spread: Decimal,

    /// Distance of the first ask above the reference price.
    #[serde(default = "default_spread")]
    pub ask_spread: Decimal,

    /// Quotes closer to the reference than this are suppressed and resting
    /// orders are cancelled. Negative disables the check.
    #[serde(default = "default_minimum_spread")]
    pub minimum_spread: Decimal,

    /// Base size of the first level.
    #[serde(default = "default_order_amount")]
    pub order_amount: Decimal,

    /// Number of levels per side.
    #[serde(default = "default_order_levels")]
    pub order_levels: u32,

    /// Extra spread added per level.
    #[serde(default = "default_order_level_spread")]
    pub order_level_spread: Decimal,

    /// Extra size added per level.
    #[serde(default)]
    pub order_level_amount: Decimal,

    #[serde(default = "default_order_refresh_time_ms")]
    pub order_refresh_time_ms: u64,

    /// Resting orders whose prices are all within this fraction of the new
    /// proposal are kept. Negative means always refresh.
    #[serde(default)]
    pub order_refresh_tolerance_pct: Decimal,

    /// Wait after a fill before placing new orders.
    #[serde(default = "default_filled_order_delay_ms")]
    pub filled_order_delay_ms: u64,

    /// Orders older than this are cancelled (hanging orders are renewed).
    #[serde(default = "default_max_order_age_ms")]
    pub max_order_age_ms: u64,

    /// An unconfirmed cancel is forgotten after this long.
    #[serde(default = "default_cancel_timeout_ms")]
    pub cancel_timeout_ms: u64,

    #[serde(default)]
    pub inventory_skew_enabled: bool,

    /// Target share of total portfolio value held in base (0..=1).
    #[serde(default = "default_inventory_target_base_pct")]
    pub inventory_target_base_pct: Decimal,

    /// Width of the skew range in multiples of total order size.
    #[serde(default = "default_inventory_range_multiplier")]
    pub inventory_range_multiplier: Decimal,

    #[serde(default)]
    pub hanging_orders_enabled: bool,

    /// Hanging orders further than this fraction from the reference price
    /// are cancelled.
    #[serde(default = "default_hanging_orders_cancel_pct")]
    pub hanging_orders_cancel_pct: Decimal,

    #[serde(default)]
    pub ping_pong_enabled: bool,

    /// No buys at or above this reference price.
    #[serde(default)]
    pub price_ceiling: Option<Decimal>,

    /// No sells at or below this reference price.
    #[serde(default)]
    pub price_floor: Option<Decimal>,

    /// Move the first level to one tick inside the current top of book.
    #[serde(default)]
    pub order_optimization_enabled: bool,

    /// Book volume to ignore on the bid side when finding the top bid.
    #[serde(default)]
    pub bid_order_optimization_depth: Decimal,

    /// Book volume to ignore on the ask side when finding the top ask.
    #[serde(default)]
    pub ask_order_optimization_depth: Decimal,

    /// Widen quotes by the maker fee.
    #[serde(default)]
    pub add_transaction_costs: bool,

    /// Keep quotes that cross the book and let them fill as takers.
    #[serde(default)]
    pub take_if_crossed: bool,

    #[serde(default)]
    pub price_type: PriceType,

    #[serde(default)]
    pub price_source: PriceSourceKind,

    /// Named hand-placed orders. When non-empty, replaces the level ladder.
    #[serde(default)]
    pub order_override: BTreeMap<String, OrderOverride>,

    /// Widen spreads to the observed wick breakpoint.
    #[serde(default)]
    pub volatility_spread_enabled: bool,

    /// Rolling window of wick samples.
    #[serde(default = "default_volatility_window_size")]
    pub volatility_window_size: usize,

    /// Samples required before volatility affects spreads.
    #[serde(default = "default_volatility_min_samples")]
    pub volatility_min_samples: usize,

    /// Length of one wick sample.
    #[serde(default = "default_volatility_sample_interval_ms")]
    pub volatility_sample_interval_ms: u64,

    #[serde(default = "default_volatility_cache_ttl_ms")]
    pub volatility_cache_ttl_ms: u64,

    /// Minimum adjacent-percentile ratio treated as a breakpoint.
    #[serde(default = "default_volatility_breakpoint_min_jump")]
    pub volatility_breakpoint_min_jump: f64,

    /// Spread floor = breakpoint wick × multiplier.
    #[serde(default = "default_volatility_spread_multiplier")]
    pub volatility_spread_multiplier: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            trading_pair: default_trading_pair(),
            bid_spread: default_spread(),
            ask_spread: default_spread(),
            minimum_spread: default_minimum_spread(),
            order_amount: default_order_amount(),
            order_levels: default_order_levels(),
            order_level_spread: default_order_level_spread(),
            order_level_amount: Decimal::ZERO,
            order_refresh_time_ms: default_order_refresh_time_ms(),
            order_refresh_tolerance_pct: Decimal::ZERO,
            filled_order_delay_ms: default_filled_order_delay_ms(),
            max_order_age_ms: default_max_order_age_ms(),
            cancel_timeout_ms: default_cancel_timeout_ms(),
            inventory_skew_enabled: false,
            inventory_target_base_pct: default_inventory_target_base_pct(),
            inventory_range_multiplier: default_inventory_range_multiplier(),
            hanging_orders_enabled: false,
            hanging_orders_cancel_pct: default_hanging_orders_cancel_pct(),
            ping_pong_enabled: false,
            price_ceiling: None,
            price_floor: None,
            order_optimization_enabled: false,
            bid_order_optimization_depth: Decimal::ZERO,
            ask_order_optimization_depth: Decimal::ZERO,
            add_transaction_costs: false,
            take_if_crossed: false,
            price_type: PriceType::default(),
            price_source: PriceSourceKind::default(),
            order_override: BTreeMap::new(),
            volatility_spread_enabled: false,
            volatility_window_size: default_volatility_window_size(),
            volatility_min_samples: default_volatility_min_samples(),
            volatility_sample_interval_ms: default_volatility_sample_interval_ms(),
            volatility_cache_ttl_ms: default_volatility_cache_ttl_ms(),
            volatility_breakpoint_min_jump: default_volatility_breakpoint_min_jump(),
            volatility_spread_multiplier: default_volatility_spread_multiplier(),
        }
    }
}

impl StrategyConfig {
    /// Reject configurations the strategy cannot run with.
    pub fn validate(&self) -> StrategyResult<()> {
        self.parsed_trading_pair()?;

        if self.order_levels == 0 {
            return Err(invalid("order_levels must be at least 1"));
        }
        if self.order_amount <= Decimal::ZERO {
            return Err(invalid("order_amount must be positive"));
        }
        if self.bid_spread < Decimal::ZERO || self.ask_spread < Decimal::ZERO {
            return Err(invalid("bid_spread and ask_spread must not be negative"));
        }
        if self.order_level_spread < Decimal::ZERO {
            return Err(invalid("order_level_spread must not be negative"));
        }
        if self.order_refresh_time_ms == 0 {
            return Err(invalid("order_refresh_time_ms must be positive"));
        }
        if self.inventory_target_base_pct < Decimal::ZERO
            || self.inventory_target_base_pct > Decimal::ONE
        {
            return Err(invalid("inventory_target_base_pct must be within [0, 1]"));
        }
        if self.inventory_range_multiplier <= Decimal::ZERO {
            return Err(invalid("inventory_range_multiplier must be positive"));
        }
        if self.hanging_orders_cancel_pct <= Decimal::ZERO {
            return Err(invalid("hanging_orders_cancel_pct must be positive"));
        }
        if let (Some(ceiling), Some(floor)) = (self.price_ceiling, self.price_floor) {
            if ceiling <= floor {
                return Err(StrategyError::InvalidConfig(format!(
                    "price_ceiling ({ceiling}) must be above price_floor ({floor})"
                )));
            }
        }
        if self.bid_order_optimization_depth < Decimal::ZERO
            || self.ask_order_optimization_depth < Decimal::ZERO
        {
            return Err(invalid("order optimization depths must not be negative"));
        }
        for (name, entry) in &self.order_override {
            if entry.size <= Decimal::ZERO || entry.spread_pct < Decimal::ZERO {
                return Err(StrategyError::InvalidConfig(format!(
                    "order_override '{name}' needs a positive size and a non-negative spread"
                )));
            }
        }
        if self.volatility_min_samples == 0
            || self.volatility_window_size < self.volatility_min_samples
        {
            return Err(invalid(
                "volatility_window_size must be at least volatility_min_samples (>= 1)",
            ));
        }
        if self.volatility_sample_interval_ms == 0 {
            return Err(invalid("volatility_sample_interval_ms must be positive"));
        }
        Ok(())
    }

    pub fn parsed_trading_pair(&self) -> StrategyResult<TradingPair> {
        self.trading_pair
            .parse()
            .map_err(|e| StrategyError::InvalidConfig(format!("{e}")))
    }

    /// Minimum spread, when the check is enabled.
    pub fn minimum_spread(&self) -> Option<Decimal> {
        (self.minimum_spread >= Decimal::ZERO).then_some(self.minimum_spread)
    }

    /// Refresh tolerance, when resting orders may be kept.
    pub fn refresh_tolerance(&self) -> Option<Decimal> {
        (self.order_refresh_tolerance_pct >= Decimal::ZERO)
            .then_some(self.order_refresh_tolerance_pct)
    }
}

fn invalid(msg: &str) -> StrategyError {
    StrategyError::InvalidConfig(msg.to_string())
}

fn default_trading_pair() -> String {
    "BTC-USDT".to_string()
}
fn default_spread() -> Decimal {
    Decimal::new(1, 2) // 1%
}
fn default_minimum_spread() -> Decimal {
    Decimal::NEGATIVE_ONE // disabled
}
fn default_order_amount() -> Decimal {
    Decimal::ONE
}
fn default_order_levels() -> u32 {
    1
}
fn default_order_level_spread() -> Decimal {
    Decimal::new(1, 2)
}
fn default_order_refresh_time_ms() -> u64 {
    30_000
}
fn default_filled_order_delay_ms() -> u64 {
    60_000
}
fn default_max_order_age_ms() -> u64 {
    1_800_000 // 30 minutes
}
fn default_cancel_timeout_ms() -> u64 {
    60_000
}
fn default_inventory_target_base_pct() -> Decimal {
    Decimal::new(5, 1)
}
fn default_inventory_range_multiplier() -> Decimal {
    Decimal::ONE
}
fn default_hanging_orders_cancel_pct() -> Decimal {
    Decimal::new(1, 1) // 10%
}
fn default_volatility_window_size() -> usize {
    360 // one hour of 10s samples
}
fn default_volatility_min_samples() -> usize {
    30
}
fn default_volatility_sample_interval_ms() -> u64 {
    10_000
}
fn default_volatility_cache_ttl_ms() -> u64 {
    10_000
}
fn default_volatility_breakpoint_min_jump() -> f64 {
    1.5
}
fn default_volatility_spread_multiplier() -> Decimal {
    Decimal::TWO
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = StrategyConfig::default();
        assert_eq!(config.trading_pair, "BTC-USDT");
        assert_eq!(config.bid_spread, dec!(0.01));
        assert_eq!(config.ask_spread, dec!(0.01));
        assert_eq!(config.order_levels, 1);
        assert_eq!(config.order_amount, dec!(1));
        assert_eq!(config.order_refresh_time_ms, 30_000);
        assert_eq!(config.filled_order_delay_ms, 60_000);
        assert_eq!(config.inventory_target_base_pct, dec!(0.5));
        assert_eq!(config.hanging_orders_cancel_pct, dec!(0.1));
        assert_eq!(config.price_type, PriceType::MidPrice);
        assert_eq!(config.price_source, PriceSourceKind::CurrentMarket);
        assert!(config.minimum_spread().is_none());
        assert_eq!(config.refresh_tolerance(), Some(dec!(0)));
        assert!(config.order_override.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde_defaults() {
        let toml_str = r#"
trading_pair = "HBOT-ETH"
bid_spread = "0.02"
order_levels = 3
hanging_orders_enabled = true
price_type = "last_price"
"#;
        let config: StrategyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.trading_pair, "HBOT-ETH");
        assert_eq!(config.bid_spread, dec!(0.02));
        assert_eq!(config.ask_spread, dec!(0.01));
        assert_eq!(config.order_levels, 3);
        assert!(config.hanging_orders_enabled);
        assert!(!config.ping_pong_enabled);
        assert_eq!(config.price_type, PriceType::LastTrade);
    }

    #[test]
    fn test_order_override_from_toml() {
        let toml_str = r#"
[order_override.order_1]
side = "buy"
spread_pct = "0.5"
size = "7"

[order_override.order_2]
side = "sell"
spread_pct = "0.4"
size = "3"
"#;
        let config: StrategyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.order_override.len(), 2);
        let first = &config.order_override["order_1"];
        assert_eq!(first.side, OrderSide::Buy);
        assert_eq!(first.spread_pct, dec!(0.5));
        assert_eq!(first.size, dec!(7));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_price_band_conflict_rejected() {
        let config = StrategyConfig {
            price_ceiling: Some(dec!(90)),
            price_floor: Some(dec!(100)),
            ..StrategyConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, StrategyError::InvalidConfig(_)));
        assert!(err.to_string().contains("price_ceiling"));

        let equal = StrategyConfig {
            price_ceiling: Some(dec!(100)),
            price_floor: Some(dec!(100)),
            ..StrategyConfig::default()
        };
        assert!(equal.validate().is_err());

        let one_sided = StrategyConfig {
            price_ceiling: Some(dec!(100)),
            ..StrategyConfig::default()
        };
        assert!(one_sided.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            StrategyConfig {
                order_levels: 0,
                ..StrategyConfig::default()
            },
            StrategyConfig {
                order_amount: dec!(0),
                ..StrategyConfig::default()
            },
            StrategyConfig {
                bid_spread: dec!(-0.01),
                ..StrategyConfig::default()
            },
            StrategyConfig {
                inventory_target_base_pct: dec!(1.5),
                ..StrategyConfig::default()
            },
            StrategyConfig {
                inventory_range_multiplier: dec!(0),
                ..StrategyConfig::default()
            },
            StrategyConfig {
                trading_pair: "BTCUSDT".to_string(),
                ..StrategyConfig::default()
            },
            StrategyConfig {
                volatility_min_samples: 10,
                volatility_window_size: 5,
                ..StrategyConfig::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "accepted {config:?}");
        }
    }

    #[test]
    fn test_negative_tolerance_disables_keep() {
        let config = StrategyConfig {
            order_refresh_tolerance_pct: dec!(-1),
            minimum_spread: dec!(0),
            ..StrategyConfig::default()
        };
        assert!(config.refresh_tolerance().is_none());
        assert_eq!(config.minimum_spread(), Some(dec!(0)));
    }
}
