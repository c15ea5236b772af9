use chrono::{DateTime, FixedOffset, Utc};
use env_logger::Builder;
use log::LevelFilter;
use pairarb::backtest::{backtest_signals, write_backtest_report};
use pairarb::config::BacktestConfig;
use pairarb::model::LogisticRegression;
use pairarb::portfolio::{run_portfolio, write_trade_log};
use pairarb::ports::price_feed::{JsonlPriceFeed, PriceFeed};
use pairarb::screening::{filter_tradeable_pairs, find_cointegrated_pairs, series_by_ticker};
use pairarb::series::{align, PriceSeries};
use pairarb::signal::{rule_signals, spread_series, zscore_series, AdaptiveSignalGenerator};
use pairarb::stats::hedge_ratio;
use std::env;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with local timezone
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .unwrap_or_else(|_| "3600".to_string())
        .parse::<i32>()
        .expect("Invalid TIMEZONE_OFFSET");
    let offset = FixedOffset::east_opt(offset_seconds).expect("Invalid offset");
    Builder::from_default_env()
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .filter(
            None,
            LevelFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
                .unwrap_or(LevelFilter::Info),
        )
        .init();

    log::info!("Starting pair screening and backtest run...");
    let cfg = BacktestConfig::from_env_or_yaml()?;
    let feed = JsonlPriceFeed::new(&cfg.data_file)?;

    let mut series: Vec<PriceSeries> = Vec::with_capacity(cfg.tickers.len());
    for ticker in &cfg.tickers {
        match feed.get_prices(ticker, cfg.start_date, cfg.end_date).await {
            Ok(s) => {
                log::debug!("loaded {} rows for {}", s.len(), ticker);
                series.push(s);
            }
            Err(err) => {
                log::warn!("skipping {}: {}", ticker, err);
            }
        }
    }

    let candidates = find_cointegrated_pairs(&series, cfg.p_value_threshold);
    let tradeable = filter_tradeable_pairs(
        &series,
        &candidates,
        cfg.min_correlation,
        cfg.min_spread_std,
        cfg.min_stability,
    );

    let generator = AdaptiveSignalGenerator::new(
        cfg.signal_params(),
        Arc::new(LogisticRegression::default()),
    );
    let series = Arc::new(series);
    let report = run_portfolio(
        Arc::clone(&series),
        &tradeable,
        &generator,
        cfg.signal_window,
        cfg.max_holding_days,
    )
    .await?;
    write_trade_log(&cfg.trade_log_file, &report)?;
    log::info!(
        "[PORTFOLIO] wrote {} closed and {} open trades to {} (realized pnl {:.4})",
        report.trades.len(),
        report.open_trades.len(),
        cfg.trade_log_file,
        report.realized_pnl
    );

    if let Some((tx, ty)) = &cfg.report_pair {
        write_rule_based_report(series.as_slice(), tx, ty, &cfg)?;
    }
    Ok(())
}

// Rule-based daily report for a single pair: static hedge ratio, z-score
// thresholds, and a per-day position/pnl table.
fn write_rule_based_report(
    series: &[PriceSeries],
    tx: &str,
    ty: &str,
    cfg: &BacktestConfig,
) -> anyhow::Result<()> {
    let a = series_by_ticker(series, tx)
        .ok_or_else(|| anyhow::anyhow!("no price data for report pair leg {}", tx))?;
    let b = series_by_ticker(series, ty)
        .ok_or_else(|| anyhow::anyhow!("no price data for report pair leg {}", ty))?;
    let aligned = align(a, b);
    let beta = hedge_ratio(&aligned.x, &aligned.y)?;
    let spread = spread_series(&aligned.x, &aligned.y, beta);
    let z = zscore_series(&spread, cfg.zscore_window);
    let signals = rule_signals(&z, cfg.entry_z_score, cfg.exit_z_score);
    let result = backtest_signals(&aligned.dates, &spread, &signals)?;
    write_backtest_report(&cfg.report_file, &result)?;
    log::info!(
        "[TRADE] {}/{} rule-based report: {} rows, total pnl {:.4}, written to {}",
        tx,
        ty,
        result.rows.len(),
        result.total_pnl(),
        cfg.report_file
    );
    Ok(())
}
