use crate::series::{align, mean_std, PriceSeries};
use crate::signal::{spread_series, zscore_series};
use crate::stats::{engle_granger, hedge_ratio, pearson};

/// Pairs with fewer aligned observations than this are skipped, not failed.
pub const MIN_ALIGNED_ROWS: usize = 100;

/// A pair that passed the cointegration screen.
#[derive(Debug, Clone)]
pub struct CointegratedPair {
    pub x: String,
    pub y: String,
    pub p_value: f64,
}

/// A pair that passed every tradeability gate. Immutable once accepted
/// for a run; the hedge ratio here is the static screening-time ratio.
#[derive(Debug, Clone)]
pub struct TradeablePair {
    pub x: String,
    pub y: String,
    pub p_value: f64,
    pub hedge_ratio: f64,
    pub correlation: f64,
    pub spread_std: f64,
    pub stability: f64,
}

impl TradeablePair {
    pub fn label(&self) -> String {
        format!("{}/{}", self.x, self.y)
    }
}

/// Test every unordered ticker pair for cointegration, in discovery order.
/// The input is an ordered slice so two runs over the same data always
/// produce the same pair list.
pub fn find_cointegrated_pairs(
    series: &[PriceSeries],
    p_value_threshold: f64,
) -> Vec<CointegratedPair> {
    let mut selected = Vec::new();
    for i in 0..series.len() {
        for j in i + 1..series.len() {
            let (a, b) = (&series[i], &series[j]);
            let aligned = align(a, b);
            if aligned.len() < MIN_ALIGNED_ROWS {
                log::debug!(
                    "[SCREEN] {}/{} skipped: {} aligned rows (need {})",
                    a.ticker(),
                    b.ticker(),
                    aligned.len(),
                    MIN_ALIGNED_ROWS
                );
                continue;
            }
            let result = match engle_granger(&aligned.x, &aligned.y) {
                Ok(r) => r,
                Err(err) => {
                    log::warn!(
                        "[SCREEN] {}/{} excluded: {}",
                        a.ticker(),
                        b.ticker(),
                        err
                    );
                    continue;
                }
            };
            log::debug!(
                "[SCREEN] {}/{} p={:.3} t={:.2}",
                a.ticker(),
                b.ticker(),
                result.p_value,
                result.t_stat
            );
            if result.p_value < p_value_threshold {
                selected.push(CointegratedPair {
                    x: a.ticker().to_string(),
                    y: b.ticker().to_string(),
                    p_value: result.p_value,
                });
            }
        }
    }
    log::info!(
        "[SCREEN] {} of {} candidate pairs cointegrated at p<{}",
        selected.len(),
        series.len() * series.len().saturating_sub(1) / 2,
        p_value_threshold
    );
    selected
}

/// Gate cointegrated pairs on correlation, spread volatility, and z-score
/// stability, preserving input order.
pub fn filter_tradeable_pairs(
    series: &[PriceSeries],
    candidates: &[CointegratedPair],
    min_correlation: f64,
    min_spread_std: f64,
    min_stability: f64,
) -> Vec<TradeablePair> {
    let mut selected = Vec::new();
    for cand in candidates {
        let (a, b) = match (
            series_by_ticker(series, &cand.x),
            series_by_ticker(series, &cand.y),
        ) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                log::warn!("[FILTER] {}/{} missing price data", cand.x, cand.y);
                continue;
            }
        };
        let aligned = align(a, b);
        if aligned.len() < MIN_ALIGNED_ROWS {
            continue;
        }

        let correlation = match pearson(&aligned.x, &aligned.y) {
            Some(r) => r,
            None => continue,
        };
        if correlation < min_correlation {
            log::debug!(
                "[FILTER] {}/{} rejected: correlation {:.3} < {:.2}",
                cand.x,
                cand.y,
                correlation,
                min_correlation
            );
            continue;
        }

        let beta = match hedge_ratio(&aligned.x, &aligned.y) {
            Ok(beta) => beta,
            Err(err) => {
                log::warn!("[FILTER] {}/{} excluded: {}", cand.x, cand.y, err);
                continue;
            }
        };
        let spread = spread_series(&aligned.x, &aligned.y, beta);
        let spread_std = match mean_std(&spread) {
            Some((_, std)) => std,
            None => continue,
        };
        if spread_std < min_spread_std {
            log::debug!(
                "[FILTER] {}/{} rejected: spread std {:.3} too flat to trade",
                cand.x,
                cand.y,
                spread_std
            );
            continue;
        }

        // fraction of history the spread stays within one sigma of its mean
        let z = zscore_series(&spread, None);
        let defined: Vec<f64> = z.into_iter().flatten().collect();
        if defined.is_empty() {
            continue;
        }
        let stable = defined.iter().filter(|v| v.abs() < 1.0).count();
        let stability = stable as f64 / defined.len() as f64;
        if stability < min_stability {
            log::debug!(
                "[FILTER] {}/{} rejected: stability {:.3} < {:.2}",
                cand.x,
                cand.y,
                stability,
                min_stability
            );
            continue;
        }

        log::info!(
            "[FILTER] {}/{} tradeable: p={:.3} beta={:.3} corr={:.3} std={:.3} stability={:.3}",
            cand.x,
            cand.y,
            cand.p_value,
            beta,
            correlation,
            spread_std,
            stability
        );
        selected.push(TradeablePair {
            x: cand.x.clone(),
            y: cand.y.clone(),
            p_value: cand.p_value,
            hedge_ratio: beta,
            correlation,
            spread_std,
            stability,
        });
    }
    selected
}

pub fn series_by_ticker<'a>(series: &'a [PriceSeries], ticker: &str) -> Option<&'a PriceSeries> {
    series.iter().find(|s| s.ticker() == ticker)
}
