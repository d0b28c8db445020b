//! Application configuration.
//!
//! Loaded from a TOML file, with `PMM__SECTION__KEY` environment variables
//! layered on top (`PMM__STRATEGY__BID_SPREAD=0.02`). Every section has
//! defaults so a file only needs to name what it changes.

use std::path::Path;

use pmm_core::{Price, Size, TradingRules};
use pmm_sim::OrderBook;
use pmm_strategy::StrategyConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// How the tick loop is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Replay market data on simulated time, as fast as possible.
    #[default]
    Backtest,
    /// Tick on the wall clock until interrupted.
    Realtime,
}

/// Trading rules of the quoted market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,
    #[serde(default = "default_lot_size")]
    pub lot_size: Decimal,
    #[serde(default = "default_lot_size")]
    pub min_order_size: Decimal,
    #[serde(default)]
    pub maker_fee_pct: Decimal,
    #[serde(default)]
    pub taker_fee_pct: Decimal,
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 2)
}

fn default_lot_size() -> Decimal {
    Decimal::new(1, 3)
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            tick_size: default_tick_size(),
            lot_size: default_lot_size(),
            min_order_size: default_lot_size(),
            maker_fee_pct: Decimal::ZERO,
            taker_fee_pct: Decimal::ZERO,
        }
    }
}

impl MarketConfig {
    pub fn trading_rules(&self) -> TradingRules {
        TradingRules {
            tick_size: Price::new(self.tick_size),
            lot_size: Size::new(self.lot_size),
            min_order_size: Size::new(self.min_order_size),
            maker_fee_pct: self.maker_fee_pct,
            taker_fee_pct: self.taker_fee_pct,
        }
    }
}

/// Evenly spaced book around a mid price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookConfig {
    pub mid: Decimal,
    #[serde(default = "default_book_step")]
    pub step: Decimal,
    #[serde(default = "default_book_levels")]
    pub levels: u32,
    #[serde(default = "default_volume_step")]
    pub volume_step: Decimal,
}

fn default_book_step() -> Decimal {
    Decimal::new(1, 1)
}

fn default_book_levels() -> u32 {
    20
}

fn default_volume_step() -> Decimal {
    Decimal::ONE
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            mid: Decimal::ONE_HUNDRED,
            step: default_book_step(),
            levels: default_book_levels(),
            volume_step: default_volume_step(),
        }
    }
}

impl BookConfig {
    pub fn build(&self) -> OrderBook {
        let span = self.step * Decimal::from(self.levels);
        OrderBook::balanced(
            Price::new(self.mid),
            Price::new(self.mid - span),
            Price::new(self.mid + span),
            self.step,
            Size::new(self.volume_step),
        )
    }
}

/// Paper exchange the strategy trades against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_base_balance")]
    pub base_balance: Decimal,
    #[serde(default = "default_quote_balance")]
    pub quote_balance: Decimal,
    #[serde(default)]
    pub initial_book: BookConfig,
    /// Book behind the `external_market` price source.
    #[serde(default)]
    pub external_book: Option<BookConfig>,
    /// Starting value of the `custom_api` price source.
    #[serde(default)]
    pub custom_price: Option<Decimal>,
}

fn default_base_balance() -> Decimal {
    Decimal::TEN
}

fn default_quote_balance() -> Decimal {
    Decimal::ONE_THOUSAND
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            base_balance: default_base_balance(),
            quote_balance: default_quote_balance(),
            initial_book: BookConfig::default(),
            external_book: None,
            custom_price: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// JSON-lines replay file. Without one the initial book never moves.
    #[serde(default)]
    pub replay_path: Option<String>,
    /// Defaults to the first replay event, or 0.
    #[serde(default)]
    pub start_ms: Option<u64>,
    /// Defaults to the last replay event, or `start_ms + duration_ms`.
    #[serde(default)]
    pub end_ms: Option<u64>,
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_duration_ms() -> u64 {
    3_600_000
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            replay_path: None,
            start_ms: None,
            end_ms: None,
            duration_ms: default_duration_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub mode: RunMode,
    /// Realtime tick interval.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How often realtime mode logs the status block.
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_filter: Option<String>,
    /// Print the Prometheus text exposition after a realtime run. Backtests
    /// always print it.
    #[serde(default)]
    pub print_metrics: bool,
}

fn default_status_interval_ms() -> u64 {
    30_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            tick_interval_ms: default_tick_interval_ms(),
            status_interval_ms: default_status_interval_ms(),
            log_filter: None,
            print_metrics: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// Load `path` with `PMM__` environment overrides applied.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AppError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix("PMM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.strategy.validate()?;

        let market = &self.market;
        if market.tick_size <= Decimal::ZERO || market.lot_size <= Decimal::ZERO {
            return Err(AppError::Config(
                "market tick_size and lot_size must be positive".to_string(),
            ));
        }
        if market.min_order_size < Decimal::ZERO {
            return Err(AppError::Config("market min_order_size must not be negative".to_string()));
        }
        if self.exchange.base_balance < Decimal::ZERO || self.exchange.quote_balance < Decimal::ZERO {
            return Err(AppError::Config("exchange balances must not be negative".to_string()));
        }
        if self.backtest.tick_interval_ms == 0 || self.runtime.tick_interval_ms == 0 {
            return Err(AppError::Config("tick_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmm_core::PriceSourceKind;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.runtime.mode, RunMode::Backtest);
        assert_eq!(config.strategy.trading_pair, StrategyConfig::default().trading_pair);
        assert_eq!(config.exchange.base_balance, dec!(10));
        assert_eq!(config.market.trading_rules().tick_size, Price::new(dec!(0.01)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml_str(
            r#"
            [strategy]
            trading_pair = "BTC-USDT"
            bid_spread = "0.002"
            order_levels = 3
            price_source = "custom_api"

            [market]
            tick_size = "0.5"

            [exchange]
            quote_balance = "50000"
            custom_price = "30000"

            [runtime]
            mode = "realtime"
            "#,
        )
        .unwrap();

        assert_eq!(config.strategy.trading_pair, "BTC-USDT");
        assert_eq!(config.strategy.bid_spread, dec!(0.002));
        assert_eq!(config.strategy.order_levels, 3);
        assert_eq!(config.strategy.price_source, PriceSourceKind::CustomApi);
        assert_eq!(config.market.tick_size, dec!(0.5));
        assert_eq!(config.market.lot_size, dec!(0.001));
        assert_eq!(config.exchange.custom_price, Some(dec!(30000)));
        assert_eq!(config.exchange.base_balance, dec!(10));
        assert_eq!(config.runtime.mode, RunMode::Realtime);
        assert_eq!(config.backtest.tick_interval_ms, 1_000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            AppConfig::from_toml_str("[strategy]\norder_levels = 0\n"),
            Err(AppError::Strategy(_))
        ));
        assert!(matches!(
            AppConfig::from_toml_str("[market]\ntick_size = \"0\"\n"),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml_str("[runtime]\ntick_interval_ms = 0\n"),
            Err(AppError::Config(_))
        ));
        assert!(AppConfig::from_toml_str("[runtime]\nmode = \"live\"\n").is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AppConfig::from_file("does/not/exist.toml"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_book_config_builds_levels() {
        let book = BookConfig {
            mid: dec!(100),
            step: dec!(1),
            levels: 5,
            volume_step: dec!(2),
        }
        .build();
        assert_eq!(book.best_bid(), Some(Price::new(dec!(99))));
        assert_eq!(book.best_ask(), Some(Price::new(dec!(101))));
        assert_eq!(book.depth(pmm_core::OrderSide::Buy), 5);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[strategy]"));
        assert!(toml_str.contains("tick_interval_ms"));
        let back = AppConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(back.exchange.quote_balance, config.exchange.quote_balance);
    }
}
