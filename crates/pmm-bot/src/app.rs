//! Application wiring and run loops.
//!
//! [`Application`] owns the paper exchange and the strategy. The backtest
//! runner steps a [`BacktestClock`] and applies replay events before each
//! tick; the realtime runner ticks on a tokio interval until shutdown.

use std::future::Future;
use std::time::{Duration, Instant};

use pmm_core::{Clock, OrderSide, Price, PriceSource, PriceSourceKind, SystemClock};
use pmm_sim::{
    BacktestClock, CustomPriceDelegate, OrderBookPriceDelegate, PaperExchange, ReplayEvent,
    ReplayFeed, SharedOrderBook,
};
use pmm_strategy::{PureMarketMaking, StrategyStatus, TickReport};
use pmm_telemetry::{Metrics, SessionStatsReporter};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{AppConfig, RunMode};
use crate::error::{AppError, AppResult};

/// Totals for one run, printed when it ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub market: String,
    pub mode: RunMode,
    pub start_ms: u64,
    pub end_ms: u64,
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub orders_created: u64,
    pub orders_cancelled: u64,
    pub buy_fills: u64,
    pub sell_fills: u64,
    pub connector_failures: u64,
    pub base_balance: Decimal,
    pub quote_balance: Decimal,
    pub reference_price: Option<Price>,
    pub realized_pnl: Decimal,
    /// Orders cancelled by the shutdown sweep.
    pub shutdown_cancels: usize,
}

impl RunSummary {
    fn new(market: &str, mode: RunMode, start_ms: u64) -> Self {
        Self {
            market: market.to_string(),
            mode,
            start_ms,
            end_ms: start_ms,
            ticks: 0,
            skipped_ticks: 0,
            orders_created: 0,
            orders_cancelled: 0,
            buy_fills: 0,
            sell_fills: 0,
            connector_failures: 0,
            base_balance: Decimal::ZERO,
            quote_balance: Decimal::ZERO,
            reference_price: None,
            realized_pnl: Decimal::ZERO,
            shutdown_cancels: 0,
        }
    }

    fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        if report.was_skipped() {
            self.skipped_ticks += 1;
        }
        self.end_ms = report.timestamp_ms;
        self.orders_created += report.created.len() as u64;
        self.orders_cancelled += report.cancelled.len() as u64;
        self.connector_failures += report.failures.len() as u64;
        for fill in &report.fills {
            match fill.side {
                OrderSide::Buy => self.buy_fills += 1,
                OrderSide::Sell => self.sell_fills += 1,
            }
        }
        if report.reference_price.is_some() {
            self.reference_price = report.reference_price;
        }
    }
}

pub struct Application {
    config: AppConfig,
    market: String,
    strategy: PureMarketMaking,
    exchange: PaperExchange,
    custom_feed: Option<CustomPriceDelegate>,
    external_book: Option<SharedOrderBook>,
    session: SessionStatsReporter,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let trading_pair = config.strategy.parsed_trading_pair()?;
        let market = trading_pair.to_string();

        let book = config.exchange.initial_book.build().into_shared();
        let exchange = PaperExchange::new(trading_pair.clone(), config.market.trading_rules(), book)
            .with_balance(&trading_pair.base, config.exchange.base_balance)
            .with_balance(&trading_pair.quote, config.exchange.quote_balance);

        let mut custom_feed = None;
        let mut external_book = None;
        let delegate: Option<Box<dyn PriceSource>> = match config.strategy.price_source {
            PriceSourceKind::CurrentMarket => None,
            PriceSourceKind::ExternalMarket => {
                let book = config
                    .exchange
                    .external_book
                    .as_ref()
                    .ok_or_else(|| {
                        AppError::Config(
                            "price_source external_market needs [exchange.external_book]".to_string(),
                        )
                    })?
                    .build()
                    .into_shared();
                external_book = Some(book.clone());
                Some(Box::new(OrderBookPriceDelegate::new(book)) as Box<dyn PriceSource>)
            }
            PriceSourceKind::CustomApi => {
                let feed = CustomPriceDelegate::new();
                if let Some(price) = config.exchange.custom_price {
                    feed.set_price(Price::new(price));
                }
                custom_feed = Some(feed.clone());
                Some(Box::new(feed) as Box<dyn PriceSource>)
            }
        };

        let strategy = PureMarketMaking::new(config.strategy.clone(), delegate)?;
        let session = SessionStatsReporter::new(market.clone());
        info!(
            market = %market,
            mode = ?config.runtime.mode,
            base_balance = %config.exchange.base_balance,
            quote_balance = %config.exchange.quote_balance,
            "Application initialized"
        );

        Ok(Self {
            config,
            market,
            strategy,
            exchange,
            custom_feed,
            external_book,
            session,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn strategy(&self) -> &PureMarketMaking {
        &self.strategy
    }

    pub fn exchange(&self) -> &PaperExchange {
        &self.exchange
    }

    /// Handle for pushing prices into the `custom_api` price source.
    pub fn custom_price_feed(&self) -> Option<&CustomPriceDelegate> {
        self.custom_feed.as_ref()
    }

    /// Book behind the `external_market` price source.
    pub fn external_book(&self) -> Option<&SharedOrderBook> {
        self.external_book.as_ref()
    }

    pub fn status(&mut self, now_ms: u64) -> StrategyStatus {
        self.strategy.status(now_ms, &self.exchange)
    }

    pub fn status_json(&mut self, now_ms: u64) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(&self.status(now_ms))?)
    }

    /// Step the backtest clock over `events`, ticking once per step.
    ///
    /// Events stamped at or before a step are applied before that step's
    /// tick. Open orders are cancelled at the final step.
    pub fn run_backtest(&mut self, events: Vec<ReplayEvent>) -> AppResult<RunSummary> {
        let mut feed = ReplayFeed::new(events);
        let backtest = &self.config.backtest;
        let start_ms = backtest
            .start_ms
            .or(feed.first_timestamp_ms())
            .unwrap_or(0);
        let end_ms = backtest
            .end_ms
            .or(feed.last_timestamp_ms())
            .unwrap_or(start_ms + backtest.duration_ms);
        let clock = BacktestClock::new(start_ms, end_ms, backtest.tick_interval_ms)?;

        info!(
            market = %self.market,
            start_ms,
            end_ms,
            step_ms = clock.step_ms(),
            events = feed.remaining(),
            "Starting backtest"
        );

        let mut summary = RunSummary::new(&self.market, RunMode::Backtest, start_ms);
        loop {
            let now_ms = clock.now_ms();
            feed.apply_due(now_ms, &mut self.exchange);
            let report = self.tick(now_ms)?;
            summary.record(&report);
            if clock.advance().is_none() {
                break;
            }
        }

        if !feed.is_exhausted() {
            warn!(unplayed = feed.remaining(), "Backtest ended before the replay did");
        }
        self.shutdown(clock.now_ms(), &mut summary)?;
        Ok(summary)
    }

    /// Tick on the wall clock until ctrl-c.
    pub async fn run_realtime(&mut self) -> AppResult<RunSummary> {
        self.run_realtime_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(?e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
    }

    /// Tick on the wall clock until `shutdown` completes, then cancel
    /// every open order.
    pub async fn run_realtime_until<F>(&mut self, shutdown: F) -> AppResult<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let clock = SystemClock;
        let mut summary = RunSummary::new(&self.market, RunMode::Realtime, clock.now_ms());
        let mut tick_interval =
            tokio::time::interval(Duration::from_millis(self.config.runtime.tick_interval_ms));
        let mut status_interval =
            tokio::time::interval(Duration::from_millis(self.config.runtime.status_interval_ms.max(1)));
        status_interval.tick().await;
        tokio::pin!(shutdown);

        info!(
            market = %self.market,
            tick_interval_ms = self.config.runtime.tick_interval_ms,
            "Entering realtime loop"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                _ = tick_interval.tick() => {
                    let report = self.tick(clock.now_ms())?;
                    summary.record(&report);
                }

                _ = status_interval.tick() => {
                    let status = self.strategy.format_status(clock.now_ms(), &self.exchange);
                    info!("\n{status}");
                }
            }
        }

        self.shutdown(clock.now_ms(), &mut summary)?;
        Ok(summary)
    }

    /// One strategy cycle at `now_ms`, with metrics recorded.
    pub fn tick(&mut self, now_ms: u64) -> AppResult<TickReport> {
        self.exchange.set_time(now_ms);
        let started = Instant::now();
        let report = match self.strategy.tick(now_ms, &mut self.exchange) {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Fatal tick error, cancelling open orders");
                if let Err(cancel_err) = self.strategy.cancel_all(now_ms, &mut self.exchange) {
                    warn!(error = %cancel_err, "Cancel all after fatal error failed");
                }
                return Err(e.into());
            }
        };
        let elapsed_us = started.elapsed().as_secs_f64() * 1_000_000.0;
        self.record_metrics(&report, elapsed_us);
        Ok(report)
    }

    fn shutdown(&mut self, now_ms: u64, summary: &mut RunSummary) -> AppResult<()> {
        let cancelled = self.strategy.cancel_all(now_ms, &mut self.exchange)?;
        for _ in &cancelled {
            Metrics::order_cancelled(&self.market, "shutdown");
        }

        let pair = self.strategy.trading_pair();
        summary.end_ms = summary.end_ms.max(now_ms);
        summary.shutdown_cancels = cancelled.len();
        summary.base_balance = self.exchange.balance(&pair.base);
        summary.quote_balance = self.exchange.balance(&pair.quote);
        summary.realized_pnl = self.strategy.inventory_cost().realized_pnl;

        info!(
            market = %self.market,
            ticks = summary.ticks,
            fills = summary.buy_fills + summary.sell_fills,
            base_balance = %summary.base_balance,
            quote_balance = %summary.quote_balance,
            cancelled = cancelled.len(),
            "Run finished"
        );
        self.session.output_summary();
        Ok(())
    }

    fn record_metrics(&self, report: &TickReport, elapsed_us: f64) {
        let market = self.market.as_str();
        Metrics::tick(market, !report.was_skipped(), elapsed_us);
        for order in &report.created {
            Metrics::order_created(market, order.side, order.is_hanging);
        }
        for order in &report.cancelled {
            Metrics::order_cancelled(market, order.reason.as_str());
        }
        for fill in &report.fills {
            Metrics::fill(market, fill.side, fill.amount.inner().to_f64().unwrap_or(0.0));
        }
        for failure in &report.failures {
            Metrics::connector_failure(market, failure.operation, failure.kind);
        }
        Metrics::order_state(
            market,
            report.active_buys,
            report.active_sells,
            report.hanging,
            report.in_flight_cancels,
        );

        if let Some(reference) = report.reference_price {
            Metrics::reference_price(market, reference.inner().to_f64().unwrap_or(0.0));
            let pair = self.strategy.trading_pair();
            let base_value = self.exchange.balance(&pair.base) * reference.inner();
            let total = base_value + self.exchange.balance(&pair.quote);
            if total > Decimal::ZERO {
                Metrics::base_ratio(market, (base_value / total).to_f64().unwrap_or(0.0));
            }
        }
    }
}
