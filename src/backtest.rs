use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use chrono::NaiveDate;

use crate::signal::{AdaptiveSignalGenerator, Signal};

/// Absolute spread band that closes an open trade. Flagged as
/// scale-sensitive (it ignores each pair's spread sigma); kept as-is.
pub const EXIT_SPREAD_BAND: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// A closed trade. `pnl` is always (exit - entry spread) with the sign
/// flipped for shorts, recomputable from the logged spreads.
#[derive(Debug, Clone)]
pub struct Trade {
    pub pair: (String, String),
    pub entry_date: NaiveDate,
    pub entry_spread: f64,
    pub direction: Direction,
    pub hedge_ratio: f64,
    pub confidence: f64,
    pub exit_date: NaiveDate,
    pub exit_spread: f64,
    pub holding_days: i64,
    pub pnl: f64,
}

/// A trade still open when the evaluated range ended. Reported to the
/// caller rather than force-closed or dropped.
#[derive(Debug, Clone)]
pub struct OpenTrade {
    pub pair: (String, String),
    pub entry_date: NaiveDate,
    pub entry_spread: f64,
    pub direction: Direction,
    pub hedge_ratio: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PairBacktest {
    pub trades: Vec<Trade>,
    pub open: Option<OpenTrade>,
}

/// Simulate one pair with the adaptive generator re-evaluated on a trailing
/// window at each bar, starting once the window is filled and stopping one
/// bar before series end. At most one trade is open at a time; a bar that
/// closes a trade never re-enters. The entry hedge ratio is frozen for the
/// life of each trade.
pub fn run_pair(
    pair: (String, String),
    dates: &[NaiveDate],
    x: &[f64],
    y: &[f64],
    generator: &AdaptiveSignalGenerator,
    signal_window: usize,
    max_holding_days: i64,
) -> Result<PairBacktest> {
    ensure!(
        dates.len() == x.len() && x.len() == y.len(),
        "date/price column lengths differ"
    );
    let label = format!("{}/{}", pair.0, pair.1);
    let mut result = PairBacktest::default();
    let mut open: Option<OpenTrade> = None;

    if dates.len() <= signal_window {
        log::debug!(
            "[TRADE] {} skipped: {} rows, signal window {}",
            label,
            dates.len(),
            signal_window
        );
        return Ok(result);
    }

    for i in signal_window..dates.len() - 1 {
        let date = dates[i];

        if let Some(trade) = open.take() {
            let holding_days = (date - trade.entry_date).num_days();
            let spread = x[i] - trade.hedge_ratio * y[i];
            if spread.abs() < EXIT_SPREAD_BAND || holding_days >= max_holding_days {
                let pnl = (spread - trade.entry_spread) * trade.direction.sign();
                log::info!(
                    "[TRADE] {} exit {} dir={} spread={:.4} pnl={:.4} held={}d",
                    label,
                    date,
                    trade.direction,
                    spread,
                    pnl,
                    holding_days
                );
                result.trades.push(Trade {
                    pair: trade.pair,
                    entry_date: trade.entry_date,
                    entry_spread: trade.entry_spread,
                    direction: trade.direction,
                    hedge_ratio: trade.hedge_ratio,
                    confidence: trade.confidence,
                    exit_date: date,
                    exit_spread: spread,
                    holding_days,
                    pnl,
                });
            } else {
                open = Some(trade);
            }
            continue;
        }

        let sig = generator.evaluate(&x[i - signal_window..i], &y[i - signal_window..i])?;
        let direction = match sig.signal {
            Signal::Long => Direction::Long,
            Signal::Short => Direction::Short,
            _ => continue,
        };
        let entry_spread = x[i] - sig.hedge_ratio * y[i];
        log::info!(
            "[TRADE] {} entry {} dir={} spread={:.4} conf={:.2} path={:?}",
            label,
            date,
            direction,
            entry_spread,
            sig.confidence,
            sig.path
        );
        open = Some(OpenTrade {
            pair: pair.clone(),
            entry_date: date,
            entry_spread,
            direction,
            hedge_ratio: sig.hedge_ratio,
            confidence: sig.confidence,
        });
    }

    if let Some(trade) = &open {
        log::warn!(
            "[TRADE] {} still open at series end (entered {}); reported unrealized",
            label,
            trade.entry_date
        );
    }
    result.open = open;
    Ok(result)
}

/// One row of the daily-PnL backtest table.
#[derive(Debug, Clone)]
pub struct BacktestRow {
    pub date: NaiveDate,
    pub spread: f64,
    pub signal: Signal,
    pub position: i8,
    pub pnl: f64,
    pub cumulative_pnl: f64,
}

/// End-of-run notice for a position left open on the final day.
#[derive(Debug, Clone, Copy)]
pub struct OpenPositionNotice {
    pub position: i8,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BacktestResult {
    pub rows: Vec<BacktestRow>,
    pub open_position: Option<OpenPositionNotice>,
}

impl BacktestResult {
    pub fn total_pnl(&self) -> f64 {
        self.rows.last().map(|r| r.cumulative_pnl).unwrap_or(0.0)
    }
}

/// Daily-PnL simulation for a raw signal stream over a precomputed spread.
/// The day's signal moves the position first, then the day's PnL is
/// position x spread change; day 0 has no PnL (no prior reference point).
pub fn backtest_signals(
    dates: &[NaiveDate],
    spread: &[f64],
    signals: &[Signal],
) -> Result<BacktestResult> {
    ensure!(
        dates.len() == spread.len() && spread.len() == signals.len(),
        "spread and signal columns must share the input timestamps"
    );
    let mut rows: Vec<BacktestRow> = Vec::with_capacity(spread.len());
    let mut position: i8 = 0;
    let mut cumulative = 0.0;
    for i in 0..spread.len() {
        position = match signals[i] {
            Signal::Long => 1,
            Signal::Short => -1,
            Signal::Close => 0,
            Signal::Hold => position,
        };
        let pnl = if i == 0 {
            0.0
        } else {
            f64::from(position) * (spread[i] - spread[i - 1])
        };
        cumulative += pnl;
        rows.push(BacktestRow {
            date: dates[i],
            spread: spread[i],
            signal: signals[i],
            position,
            pnl,
            cumulative_pnl: cumulative,
        });
    }

    let open_position = if position != 0 {
        // a single-row series has no prior spread to mark against
        let unrealized = if spread.len() >= 2 {
            f64::from(position) * (spread[spread.len() - 1] - spread[spread.len() - 2])
        } else {
            0.0
        };
        log::warn!(
            "[TRADE] backtest ended with open position {}; unrealized pnl {:.4}",
            position,
            unrealized
        );
        Some(OpenPositionNotice {
            position,
            unrealized_pnl: unrealized,
        })
    } else {
        None
    };

    Ok(BacktestResult {
        rows,
        open_position,
    })
}

/// Write the per-timestamp table as delimited text, one row per input bar.
pub fn write_backtest_report<P: AsRef<Path>>(path: P, result: &BacktestResult) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to create report file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "date,spread,signal,position,pnl,cumulative_pnl")?;
    for row in &result.rows {
        writeln!(
            writer,
            "{},{:.6},{},{},{:.6},{:.6}",
            row.date, row.spread, row.signal, row.position, row.pnl, row.cumulative_pnl
        )?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogisticRegression;
    use crate::signal::{SignalParams, SignalPath};
    use std::sync::Arc;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        (0..n)
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect()
    }

    #[test]
    fn daily_pnl_matches_reference_sequence() {
        let spread = vec![10.0, 12.0, 11.0, 13.0];
        let signals = vec![Signal::Hold, Signal::Long, Signal::Hold, Signal::Close];
        let result = backtest_signals(&dates(4), &spread, &signals).unwrap();
        let positions: Vec<i8> = result.rows.iter().map(|r| r.position).collect();
        let pnl: Vec<f64> = result.rows.iter().map(|r| r.pnl).collect();
        let cumulative: Vec<f64> = result.rows.iter().map(|r| r.cumulative_pnl).collect();
        assert_eq!(positions, vec![0, 1, 1, 0]);
        assert_eq!(pnl, vec![0.0, 2.0, -1.0, 0.0]);
        assert_eq!(cumulative, vec![0.0, 2.0, 1.0, 1.0]);
        assert!(result.open_position.is_none());
    }

    #[test]
    fn first_row_has_zero_pnl() {
        let spread = vec![5.0, 6.0];
        let signals = vec![Signal::Long, Signal::Hold];
        let result = backtest_signals(&dates(2), &spread, &signals).unwrap();
        assert_eq!(result.rows[0].pnl, 0.0);
        assert_eq!(result.rows[0].position, 1);
        assert_eq!(result.rows[1].pnl, 1.0);
    }

    #[test]
    fn open_position_at_end_is_reported_not_altered() {
        let spread = vec![1.0, 2.0, 4.0];
        let signals = vec![Signal::Hold, Signal::Long, Signal::Hold];
        let result = backtest_signals(&dates(3), &spread, &signals).unwrap();
        let notice = result.open_position.expect("position is still open");
        assert_eq!(notice.position, 1);
        assert_eq!(notice.unrealized_pnl, 2.0);
        // prior rows keep their computed values
        assert_eq!(result.rows[1].pnl, 1.0);
        assert_eq!(result.rows[2].pnl, 2.0);
        assert_eq!(result.total_pnl(), 3.0);
    }

    #[test]
    fn day_zero_entry_on_one_row_series_is_still_reported() {
        let result = backtest_signals(&dates(1), &[7.0], &[Signal::Long]).unwrap();
        assert_eq!(result.rows[0].position, 1);
        assert_eq!(result.rows[0].pnl, 0.0);
        let notice = result.open_position.expect("position is still open");
        assert_eq!(notice.position, 1);
        assert_eq!(notice.unrealized_pnl, 0.0);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let spread = vec![1.0, 2.0];
        let signals = vec![Signal::Hold];
        assert!(backtest_signals(&dates(2), &spread, &signals).is_err());
    }

    fn default_generator(params: SignalParams) -> AdaptiveSignalGenerator {
        AdaptiveSignalGenerator::new(params, Arc::new(LogisticRegression::default()))
    }

    // Trending pair whose spread oscillates: the fallback threshold rule
    // fires whenever the rolling z stretches past the entry threshold.
    fn oscillating_pair(n: usize) -> (Vec<f64>, Vec<f64>) {
        let y: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 0.1).collect();
        let x: Vec<f64> = y
            .iter()
            .enumerate()
            .map(|(i, v)| v + 2.0 * ((i as f64) * 0.35).sin())
            .collect();
        (x, y)
    }

    #[test]
    fn short_series_produces_no_trades() {
        let (x, y) = oscillating_pair(50);
        let gen = default_generator(SignalParams::default());
        let result = run_pair(
            ("AAA".into(), "BBB".into()),
            &dates(50),
            &x,
            &y,
            &gen,
            200,
            20,
        )
        .unwrap();
        assert!(result.trades.is_empty());
        assert!(result.open.is_none());
    }

    #[test]
    fn realized_pnl_recomputes_from_logged_spreads() {
        let (x, y) = oscillating_pair(320);
        let gen = default_generator(SignalParams::default());
        let result = run_pair(
            ("AAA".into(), "BBB".into()),
            &dates(320),
            &x,
            &y,
            &gen,
            200,
            20,
        )
        .unwrap();
        assert!(
            !result.trades.is_empty(),
            "oscillating spread should trigger at least one trade"
        );
        for trade in &result.trades {
            let expected = (trade.exit_spread - trade.entry_spread) * trade.direction.sign();
            assert!((trade.pnl - expected).abs() < 1e-12);
            assert!(trade.holding_days <= 20 || trade.exit_spread.abs() < EXIT_SPREAD_BAND);
            assert!(trade.exit_date > trade.entry_date);
        }
    }

    #[test]
    fn at_most_one_open_trade_at_a_time() {
        let (x, y) = oscillating_pair(320);
        let gen = default_generator(SignalParams::default());
        let result = run_pair(
            ("AAA".into(), "BBB".into()),
            &dates(320),
            &x,
            &y,
            &gen,
            200,
            20,
        )
        .unwrap();
        // closed trades never overlap in time
        for pair in result.trades.windows(2) {
            assert!(pair[1].entry_date >= pair[0].exit_date);
        }
        if let Some(open) = &result.open {
            if let Some(last) = result.trades.last() {
                assert!(open.entry_date >= last.exit_date);
            }
        }
    }

    #[test]
    fn fallback_trades_carry_half_confidence() {
        let (x, y) = oscillating_pair(320);
        // default 10-bar lookback cannot label anything, so every signal
        // takes the fallback branch
        let gen = default_generator(SignalParams::default());
        let sig = gen.evaluate(&x[..200], &y[..200]).unwrap();
        assert_eq!(sig.path, SignalPath::Fallback);
        assert_eq!(sig.confidence, 0.5);
    }
}
