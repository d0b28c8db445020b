//! Runner tests: config file plus replay file through the backtest loop,
//! and the async realtime loop with an injected shutdown.

use std::path::PathBuf;
use std::time::Duration;

use pmm_bot::{AppConfig, Application, RunMode};
use rust_decimal_macros::dec;

const CONFIG: &str = r#"
[strategy]
trading_pair = "ETH-USDT"
bid_spread = "0.01"
ask_spread = "0.01"
order_amount = "1"
order_refresh_time_ms = 5000
filled_order_delay_ms = 5000

[market]
tick_size = "0.01"
lot_size = "0.001"

[exchange]
base_balance = "10"
quote_balance = "1000"

[exchange.initial_book]
mid = "100"
step = "1"
levels = 10
volume_step = "10"

[backtest]
start_ms = 0
end_ms = 12000
tick_interval_ms = 1000

[runtime]
tick_interval_ms = 10
status_interval_ms = 60000
"#;

const REPLAY: &str = r#"
{"timestamp_ms": 0, "type": "balanced", "mid": "100", "step": "1", "levels": 10, "volume_step": "10"}
{"timestamp_ms": 3000, "type": "trade", "side": "sell", "price": "98.5", "amount": "1"}
{"timestamp_ms": 8000, "type": "balanced", "mid": "102", "step": "1", "levels": 10, "volume_step": "10"}
"#;

fn temp_file(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("pmm-bot-{}-{name}", std::process::id()));
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_backtest_from_files() {
    let config_path = temp_file("backtest.toml", CONFIG);
    let replay_path = temp_file("replay.jsonl", REPLAY);

    let config = AppConfig::from_file(&config_path).unwrap();
    assert_eq!(config.runtime.mode, RunMode::Backtest);
    let events = pmm_sim::load_replay(&replay_path).unwrap();
    assert_eq!(events.len(), 3);

    let mut app = Application::new(config).unwrap();
    let summary = app.run_backtest(events).unwrap();

    assert_eq!(summary.ticks, 13);
    assert_eq!(summary.buy_fills, 1);
    assert_eq!(summary.sell_fills, 0);
    assert_eq!(summary.base_balance, dec!(11));
    assert_eq!(summary.quote_balance, dec!(901));
    assert!(summary.shutdown_cancels > 0);
    assert!(app.exchange().open_orders().is_empty());

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["mode"], "backtest");
    assert_eq!(json["market"], "ETH-USDT");

    let _ = std::fs::remove_file(config_path);
    let _ = std::fs::remove_file(replay_path);
}

#[test]
fn test_environment_overrides_file() {
    let config_path = temp_file("env.toml", CONFIG);
    std::env::set_var("PMM__RUNTIME__STATUS_INTERVAL_MS", "1234");
    let config = AppConfig::from_file(&config_path).unwrap();
    std::env::remove_var("PMM__RUNTIME__STATUS_INTERVAL_MS");

    assert_eq!(config.runtime.status_interval_ms, 1234);
    assert_eq!(config.strategy.bid_spread, dec!(0.01));
    let _ = std::fs::remove_file(config_path);
}

#[test]
fn test_realtime_runs_until_shutdown() {
    let mut config = AppConfig::from_toml_str(CONFIG).unwrap();
    config.runtime.mode = RunMode::Realtime;
    config.strategy.trading_pair = "RT-USDT".to_string();
    let mut app = Application::new(config).unwrap();

    let shutdown = async { tokio::time::sleep(Duration::from_millis(60)).await };
    let summary = tokio_test::block_on(app.run_realtime_until(shutdown)).unwrap();

    assert_eq!(summary.mode, RunMode::Realtime);
    assert!(summary.ticks >= 1);
    assert_eq!(summary.orders_created, 2);
    assert_eq!(summary.shutdown_cancels, 2);
    assert!(summary.end_ms >= summary.start_ms);
    assert!(app.exchange().open_orders().is_empty());
}
