//! Pure market making bot - entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pmm_bot::{AppConfig, Application, RunMode};
use pmm_telemetry::Metrics;
use tracing::info;

/// Pure market making bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PMM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Overrides runtime.mode from the config file
    #[arg(short, long, value_enum)]
    mode: Option<RunMode>,

    /// Replay file for backtests (overrides backtest.replay_path)
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Print the final strategy status as JSON
    #[arg(long)]
    status_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config path: CLI arg > PMM_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("PMM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let mut config = AppConfig::from_file(&config_path)
        .with_context(|| format!("loading {config_path}"))?;
    if let Some(mode) = args.mode {
        config.runtime.mode = mode;
    }
    if let Some(replay) = args.replay {
        config.backtest.replay_path = Some(replay.display().to_string());
    }

    pmm_telemetry::init_logging(config.runtime.log_filter.as_deref())?;
    info!("Starting pmm-bot v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        mode = ?config.runtime.mode,
        trading_pair = %config.strategy.trading_pair,
        "Configuration loaded"
    );

    let print_metrics = config.runtime.print_metrics;
    let mode = config.runtime.mode;
    let replay_path = config.backtest.replay_path.clone();
    let mut app = Application::new(config)?;

    let summary = match mode {
        RunMode::Backtest => {
            let events = match replay_path {
                Some(path) => {
                    pmm_sim::load_replay(&path).with_context(|| format!("loading replay {path}"))?
                }
                None => Vec::new(),
            };
            app.run_backtest(events)?
        }
        RunMode::Realtime => app.run_realtime().await?,
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if args.status_json {
        println!("{}", app.status_json(summary.end_ms)?);
    }
    if print_metrics || mode == RunMode::Backtest {
        print!("{}", Metrics::gather_text()?);
    }

    Ok(())
}
