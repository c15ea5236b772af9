use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::backtest::{run_pair, OpenTrade, Trade};
use crate::screening::{series_by_ticker, TradeablePair};
use crate::series::{align, PriceSeries};
use crate::signal::AdaptiveSignalGenerator;

/// Merged results across every tradeable pair. Trades appear grouped by
/// pair, in the order the pairs were accepted, so two runs over the same
/// inputs produce identical reports.
#[derive(Debug, Clone, Default)]
pub struct PortfolioReport {
    pub trades: Vec<Trade>,
    pub open_trades: Vec<OpenTrade>,
    pub realized_pnl: f64,
}

/// Backtest every tradeable pair, one blocking task per pair, and merge
/// the results in submission order.
pub async fn run_portfolio(
    series: Arc<Vec<PriceSeries>>,
    pairs: &[TradeablePair],
    generator: &AdaptiveSignalGenerator,
    signal_window: usize,
    max_holding_days: i64,
) -> Result<PortfolioReport> {
    let mut handles = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let series = Arc::clone(&series);
        let generator = generator.clone();
        let (tx, ty) = (pair.x.clone(), pair.y.clone());
        handles.push(tokio::task::spawn_blocking(move || {
            let a = series_by_ticker(&series, &tx)
                .with_context(|| format!("price series for {} disappeared", tx))?;
            let b = series_by_ticker(&series, &ty)
                .with_context(|| format!("price series for {} disappeared", ty))?;
            let aligned = align(a, b);
            run_pair(
                (tx, ty),
                &aligned.dates,
                &aligned.x,
                &aligned.y,
                &generator,
                signal_window,
                max_holding_days,
            )
        }));
    }

    let mut report = PortfolioReport::default();
    for handle in handles {
        let result = handle.await.context("pair backtest task panicked")??;
        report.realized_pnl += result.trades.iter().map(|t| t.pnl).sum::<f64>();
        report.trades.extend(result.trades);
        report.open_trades.extend(result.open);
    }
    log::info!(
        "[PORTFOLIO] {} pairs, {} closed trades, {} open, realized pnl {:.4}",
        pairs.len(),
        report.trades.len(),
        report.open_trades.len(),
        report.realized_pnl
    );
    Ok(report)
}

/// Write the portfolio trade log as delimited text. Open trades share the
/// closed-trade columns with the exit fields left empty.
pub fn write_trade_log<P: AsRef<Path>>(path: P, report: &PortfolioReport) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to create trade log {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(
        writer,
        "pair_x,pair_y,entry_date,entry_spread,direction,hedge_ratio,confidence,\
         exit_date,exit_spread,holding_days,pnl"
    )?;
    for t in &report.trades {
        writeln!(
            writer,
            "{},{},{},{:.6},{},{:.6},{:.4},{},{:.6},{},{:.6}",
            t.pair.0,
            t.pair.1,
            t.entry_date,
            t.entry_spread,
            t.direction,
            t.hedge_ratio,
            t.confidence,
            t.exit_date,
            t.exit_spread,
            t.holding_days,
            t.pnl
        )?;
    }
    for t in &report.open_trades {
        writeln!(
            writer,
            "{},{},{},{:.6},{},{:.6},{:.4},,,,",
            t.pair.0, t.pair.1, t.entry_date, t.entry_spread, t.direction, t.hedge_ratio,
            t.confidence
        )?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogisticRegression;
    use crate::signal::SignalParams;
    use chrono::NaiveDate;

    fn series_from(ticker: &str, values: &[f64]) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        let rows = values
            .iter()
            .enumerate()
            .map(|(i, v)| (start + chrono::Duration::days(i as i64), *v))
            .collect();
        PriceSeries::new(ticker, rows).unwrap()
    }

    fn oscillating_universe(n: usize) -> Vec<PriceSeries> {
        let y: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 0.1).collect();
        let x: Vec<f64> = y
            .iter()
            .enumerate()
            .map(|(i, v)| v + 2.0 * ((i as f64) * 0.35).sin())
            .collect();
        vec![series_from("XX", &x), series_from("YY", &y)]
    }

    fn tradeable(x: &str, y: &str) -> TradeablePair {
        TradeablePair {
            x: x.to_string(),
            y: y.to_string(),
            p_value: 0.01,
            hedge_ratio: 1.0,
            correlation: 0.99,
            spread_std: 1.0,
            stability: 0.9,
        }
    }

    fn generator() -> AdaptiveSignalGenerator {
        AdaptiveSignalGenerator::new(
            SignalParams::default(),
            Arc::new(LogisticRegression::default()),
        )
    }

    #[tokio::test]
    async fn empty_pair_list_yields_empty_report() {
        let series = Arc::new(oscillating_universe(320));
        let report = run_portfolio(series, &[], &generator(), 200, 20)
            .await
            .unwrap();
        assert!(report.trades.is_empty());
        assert!(report.open_trades.is_empty());
        assert_eq!(report.realized_pnl, 0.0);
    }

    #[tokio::test]
    async fn realized_pnl_is_sum_of_closed_trades() {
        let series = Arc::new(oscillating_universe(320));
        let pairs = vec![tradeable("XX", "YY")];
        let report = run_portfolio(series, &pairs, &generator(), 200, 20)
            .await
            .unwrap();
        assert!(!report.trades.is_empty());
        let sum: f64 = report.trades.iter().map(|t| t.pnl).sum();
        assert!((report.realized_pnl - sum).abs() < 1e-12);
    }

    #[tokio::test]
    async fn duplicate_pairs_double_the_trades_in_order() {
        let series = Arc::new(oscillating_universe(320));
        let pairs = vec![tradeable("XX", "YY"), tradeable("XX", "YY")];
        let report = run_portfolio(series, &pairs, &generator(), 200, 20)
            .await
            .unwrap();
        assert_eq!(report.trades.len() % 2, 0);
        let half = report.trades.len() / 2;
        for i in 0..half {
            assert_eq!(report.trades[i].entry_date, report.trades[half + i].entry_date);
            assert_eq!(report.trades[i].pnl, report.trades[half + i].pnl);
        }
    }

    #[tokio::test]
    async fn missing_ticker_is_an_error() {
        let series = Arc::new(oscillating_universe(320));
        let pairs = vec![tradeable("XX", "ZZ")];
        let result = run_portfolio(series, &pairs, &generator(), 200, 20).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn trade_log_round_trips_row_count() {
        let series = Arc::new(oscillating_universe(320));
        let pairs = vec![tradeable("XX", "YY")];
        let report = run_portfolio(series, &pairs, &generator(), 200, 20)
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");
        write_trade_log(&path, &report).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines.len(),
            1 + report.trades.len() + report.open_trades.len()
        );
        assert!(lines[0].starts_with("pair_x,pair_y,entry_date"));
    }
}
