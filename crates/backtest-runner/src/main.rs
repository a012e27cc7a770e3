//! backtest-runner: drive the rotation engine over historical CSVs.
//!
//! Usage:
//!   backtest-runner --data-dir data/ [--config config.json]
//!                   [--symbols TQQQ,SQQQ,...] [--strategy sigor]
//!                   [--warmup-days N]
//!                   [--start-date YYYY-MM-DD] [--end-date YYYY-MM-DD]
//!
//! Per-symbol CSVs live in the data directory as `<SYMBOL>.csv` with
//! `timestamp_ms,open,high,low,close,volume` rows.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use rotation_engine::{RotationTrader, TradingConfig};
use tracing::{info, warn};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backtest_runner=info,rotation_engine=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let flag = |name: &str| -> Option<String> {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };

    let data_dir = PathBuf::from(
        flag("--data-dir").context("--data-dir is required (directory of <SYMBOL>.csv files)")?,
    );

    let mut config: TradingConfig = match flag("--config") {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read config file: {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("invalid config JSON: {path}"))?
        }
        None => TradingConfig::default(),
    };

    if let Some(strategy) = flag("--strategy") {
        config.strategy = strategy.parse()?;
    }
    if let Some(days) = flag("--warmup-days") {
        let days: usize = days.parse().context("--warmup-days expects an integer")?;
        config.warmup.observation_days = days.saturating_sub(1);
        config.warmup.simulation_days = days.min(1);
    }
    config.validate()?;

    let mut by_symbol = market_data::load_dir(&data_dir)?;

    // Optional date window (UTC midnights; the end date is inclusive).
    let parse_date = |value: &str| -> Result<i64> {
        let date = value
            .parse::<chrono::NaiveDate>()
            .with_context(|| format!("invalid date: {value} (expected YYYY-MM-DD)"))?;
        Ok(date
            .and_hms_opt(0, 0, 0)
            .context("invalid midnight")?
            .and_utc()
            .timestamp_millis())
    };
    let start_ms = flag("--start-date").map(|d| parse_date(&d)).transpose()?;
    let end_ms = flag("--end-date")
        .map(|d| parse_date(&d).map(|ms| ms + 86_400_000))
        .transpose()?;
    if start_ms.is_some() || end_ms.is_some() {
        market_data::clip_window(&mut by_symbol, start_ms, end_ms);
        if by_symbol.is_empty() {
            bail!("no data inside the requested date window");
        }
    }

    // An explicit symbol list restricts (and orders) the universe;
    // otherwise every loaded file trades, alphabetically.
    let symbols: Vec<String> = match flag("--symbols") {
        Some(list) => {
            let requested: Vec<String> =
                list.split(',').map(|s| s.trim().to_ascii_uppercase()).collect();
            for symbol in &requested {
                if !by_symbol.contains_key(symbol) {
                    bail!("no data file for requested symbol {symbol}");
                }
            }
            by_symbol.retain(|k, _| requested.contains(k));
            requested
        }
        None => {
            let mut all: Vec<String> = by_symbol.keys().cloned().collect();
            all.sort();
            all
        }
    };

    let snapshots = market_data::build_snapshots(&by_symbol);
    if snapshots.is_empty() {
        bail!("no bars to replay");
    }
    info!(
        symbols = symbols.len(),
        ticks = snapshots.len(),
        strategy = %config.strategy,
        "starting backtest"
    );

    let mut trader = RotationTrader::new(symbols, config)?;
    for (_, snapshot) in &snapshots {
        if let Err(e) = trader.on_bar(snapshot) {
            warn!(error = %e, bar = trader.bars_seen(), "tick aborted");
            return Err(e.into());
        }
    }

    let results = trader.results();
    info!("================ RESULTS ================");
    info!(
        total_return_pct = results.total_return * 100.0,
        mrd_pct = results.mrd * 100.0,
        final_equity = results.final_equity,
        "performance"
    );
    info!(
        total_trades = results.total_trades,
        winning = results.winning_trades,
        losing = results.losing_trades,
        win_rate_pct = results.win_rate * 100.0,
        "trades"
    );
    info!(
        avg_win = results.avg_win,
        avg_loss = results.avg_loss,
        profit_factor = results.profit_factor,
        "quality"
    );
    info!(
        total_costs = results.total_transaction_costs,
        avg_cost_per_trade = results.avg_cost_per_trade,
        cost_pct_of_volume = results.cost_as_pct_of_volume,
        "costs"
    );
    for day in &results.daily_breakdown {
        info!(
            day = day.day_number,
            return_pct = day.daily_return * 100.0,
            end_equity = day.end_equity,
            trades = day.trades,
            "daily"
        );
    }

    Ok(())
}
