use std::fmt;
use std::sync::Arc;

use crate::model::Classifier;
use crate::series::mean_std;
use crate::stats::{hedge_ratio, StatError};

/// Unified signal vocabulary. The portfolio engine's "none" maps to `Hold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Long,
    Short,
    Close,
    Hold,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            Signal::Long => "LONG",
            Signal::Short => "SHORT",
            Signal::Close => "CLOSE",
            Signal::Hold => "HOLD",
        };
        write!(f, "{}", label)
    }
}

/// Position state carried between rule evaluations. Passed in and returned
/// explicitly so concurrent per-pair simulations never share state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalState {
    #[default]
    Flat,
    Long,
    Short,
}

/// One step of the rule-based state machine. Both thresholds are strict:
/// z exactly at the entry threshold does not enter, |z| exactly at the
/// exit threshold does not exit. Undefined z holds the current state.
pub fn step_signal(
    state: SignalState,
    z: Option<f64>,
    entry_z: f64,
    exit_z: f64,
) -> (Signal, SignalState) {
    let z = match z {
        Some(z) => z,
        None => return (Signal::Hold, state),
    };
    match state {
        SignalState::Flat => {
            if z > entry_z {
                (Signal::Short, SignalState::Short)
            } else if z < -entry_z {
                (Signal::Long, SignalState::Long)
            } else {
                (Signal::Hold, SignalState::Flat)
            }
        }
        SignalState::Long | SignalState::Short => {
            if z.abs() < exit_z {
                (Signal::Close, SignalState::Flat)
            } else {
                (Signal::Hold, state)
            }
        }
    }
}

/// Run the rule-based state machine over a z-score stream.
pub fn rule_signals(zscores: &[Option<f64>], entry_z: f64, exit_z: f64) -> Vec<Signal> {
    let mut state = SignalState::Flat;
    let mut out = Vec::with_capacity(zscores.len());
    for &z in zscores {
        let (signal, next) = step_signal(state, z, entry_z, exit_z);
        out.push(signal);
        state = next;
    }
    out
}

pub fn spread_series(x: &[f64], y: &[f64], beta: f64) -> Vec<f64> {
    x.iter().zip(y.iter()).map(|(a, b)| a - beta * b).collect()
}

/// Trailing mean/std per index; None until the window is filled.
pub fn rolling_mean_std(values: &[f64], window: usize) -> Vec<Option<(f64, f64)>> {
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }
    for i in 0..values.len() {
        if i + 1 >= window {
            out[i] = mean_std(&values[i + 1 - window..=i]);
        }
    }
    out
}

/// Z-score of the spread. `window: Some(w)` uses trailing statistics (the
/// first w-1 values are undefined); `None` uses full-sample mean/std, which
/// looks ahead and is only suitable for offline historical analysis.
/// Undefined wherever std is zero or the window is unfilled.
pub fn zscore_series(spread: &[f64], window: Option<usize>) -> Vec<Option<f64>> {
    match window {
        Some(w) => rolling_mean_std(spread, w)
            .into_iter()
            .zip(spread.iter())
            .map(|(stats, &s)| match stats {
                Some((mean, std)) if std >= 1e-12 => Some((s - mean) / std),
                _ => None,
            })
            .collect(),
        None => match mean_std(spread) {
            Some((mean, std)) if std >= 1e-12 => {
                spread.iter().map(|&s| Some((s - mean) / std)).collect()
            }
            _ => vec![None; spread.len()],
        },
    }
}

// Full feature layout; `spread` and `spread_mean` are dropped before
// fitting so the absolute price level never reaches the model.
const COL_SPREAD: usize = 3;
const COL_SPREAD_MEAN: usize = 5;
const FEATURE_COLS: usize = 8;

#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub indices: Vec<usize>,
    pub rows: Vec<Vec<f64>>,
}

/// One row per timestamp with every feature defined: z-score, two z-score
/// lags, spread, rolling spread std/mean, window-step spread velocity, and
/// the ratio of x's rolling std to y's rolling std.
pub fn build_features(x: &[f64], y: &[f64], beta: f64, window: usize) -> FeatureSet {
    let spread = spread_series(x, y, beta);
    let z = zscore_series(&spread, Some(window));
    let spread_stats = rolling_mean_std(&spread, window);
    let x_stats = rolling_mean_std(x, window);
    let y_stats = rolling_mean_std(y, window);

    let mut indices = Vec::new();
    let mut rows = Vec::new();
    for i in 0..spread.len() {
        let (z0, z1, z2) = match (
            z[i],
            i.checked_sub(1).and_then(|j| z[j]),
            i.checked_sub(2).and_then(|j| z[j]),
        ) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => continue,
        };
        let (spread_mean, spread_std) = match spread_stats[i] {
            Some(v) => v,
            None => continue,
        };
        let velocity = match i.checked_sub(window) {
            Some(j) => spread[i] - spread[j],
            None => continue,
        };
        let vol_ratio = match (x_stats[i], y_stats[i]) {
            (Some((_, sx)), Some((_, sy))) if sy >= 1e-12 => sx / sy,
            _ => continue,
        };
        indices.push(i);
        rows.push(vec![
            z0,
            z1,
            z2,
            spread[i],
            spread_std,
            spread_mean,
            velocity,
            vol_ratio,
        ]);
    }
    FeatureSet { indices, rows }
}

/// Forward-looking mean-reversion labels. Only timestamps whose |z| meets
/// the entry threshold are labeled: 1 if |z| re-enters the exit band within
/// `max_holding` steps, else 0. Rows below the entry threshold carry no
/// training information and are excluded.
pub fn build_labels(
    x: &[f64],
    y: &[f64],
    beta: f64,
    window: usize,
    entry_z: f64,
    exit_z: f64,
    max_holding: usize,
) -> Vec<(usize, u8)> {
    let spread = spread_series(x, y, beta);
    let z = zscore_series(&spread, Some(window));
    let mut labels = Vec::new();
    for i in 0..z.len().saturating_sub(max_holding) {
        if !matches!(z[i], Some(v) if v.abs() >= entry_z) {
            continue;
        }
        let reverted = z[i + 1..=i + max_holding]
            .iter()
            .any(|f| matches!(f, Some(v) if v.abs() < exit_z));
        labels.push((i, u8::from(reverted)));
    }
    labels
}

/// Features joined with labels on timestamp, with the price-level columns
/// removed. Returns None when the join is empty.
pub fn build_training_data(
    x: &[f64],
    y: &[f64],
    beta: f64,
    window: usize,
    entry_z: f64,
    exit_z: f64,
    max_holding: usize,
) -> Option<(Vec<Vec<f64>>, Vec<u8>)> {
    let features = build_features(x, y, beta, window);
    let labels = build_labels(x, y, beta, window, entry_z, exit_z, max_holding);
    let mut rows = Vec::new();
    let mut out_labels = Vec::new();
    for (idx, row) in features.indices.iter().zip(features.rows.iter()) {
        if let Some(&(_, label)) = labels.iter().find(|(i, _)| i == idx) {
            let trimmed: Vec<f64> = row
                .iter()
                .enumerate()
                .filter(|(c, _)| *c != COL_SPREAD && *c != COL_SPREAD_MEAN)
                .map(|(_, v)| *v)
                .collect();
            debug_assert_eq!(trimmed.len(), FEATURE_COLS - 2);
            rows.push(trimmed);
            out_labels.push(label);
        }
    }
    if rows.is_empty() {
        None
    } else {
        Some((rows, out_labels))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SignalParams {
    pub entry_z: f64,
    pub exit_z: f64,
    pub confidence_threshold: f64,
    pub feature_window: usize,
    pub train_lookback: usize,
    pub max_holding: usize,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            entry_z: 1.0,
            exit_z: 0.1,
            confidence_threshold: 0.6,
            feature_window: 10,
            train_lookback: 10,
            max_holding: 20,
        }
    }
}

/// Which branch produced the signal: a freshly fitted model, or the
/// threshold fallback when the window could not support training.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPath {
    Model,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct AdaptiveSignal {
    pub signal: Signal,
    pub confidence: f64,
    pub hedge_ratio: f64,
    pub path: SignalPath,
}

const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Model-assisted signal generator. A fresh classifier is fitted on every
/// evaluation because the training data shifts with the trailing window;
/// model state is deliberately never carried across calls.
#[derive(Clone)]
pub struct AdaptiveSignalGenerator {
    params: SignalParams,
    classifier: Arc<dyn Classifier>,
}

impl AdaptiveSignalGenerator {
    pub fn new(params: SignalParams, classifier: Arc<dyn Classifier>) -> Self {
        Self { params, classifier }
    }

    pub fn params(&self) -> &SignalParams {
        &self.params
    }

    /// Evaluate the trailing window and emit a position-change signal with
    /// the window's own hedge ratio and the model's confidence.
    pub fn evaluate(&self, x: &[f64], y: &[f64]) -> Result<AdaptiveSignal, StatError> {
        let p = &self.params;
        let beta = hedge_ratio(x, y)?;
        let spread = spread_series(x, y, beta);
        let current_z = zscore_series(&spread, Some(p.feature_window))
            .last()
            .copied()
            .flatten();

        // Retry with a doubled lookback when the labels lack contrast.
        let mut training = None;
        for mult in [1usize, 2] {
            let lookback = (p.train_lookback * mult).min(x.len());
            let tail = x.len() - lookback;
            if let Some((rows, labels)) = build_training_data(
                &x[tail..],
                &y[tail..],
                beta,
                p.feature_window,
                p.entry_z,
                p.exit_z,
                p.max_holding,
            ) {
                let has_both =
                    labels.iter().any(|&l| l == 0) && labels.iter().any(|&l| l == 1);
                if has_both {
                    training = Some((rows, labels));
                    break;
                }
            }
        }

        let (rows, labels) = match training {
            Some(t) => t,
            None => {
                log::debug!("[SIGNAL] training window lacks label contrast; using threshold fallback");
                return Ok(self.fallback(current_z, beta));
            }
        };

        let fit = match self.classifier.fit(&rows, &labels) {
            Ok(fit) => fit,
            Err(err) => {
                log::warn!("[SIGNAL] classifier fit failed ({}); using threshold fallback", err);
                return Ok(self.fallback(current_z, beta));
            }
        };
        let latest = rows.last().expect("training rows are non-empty");
        let (label, confidence) = fit.predict(latest);

        let signal = match current_z {
            Some(z)
                if z.abs() >= p.entry_z
                    && confidence >= p.confidence_threshold
                    && label == 1 =>
            {
                if z < 0.0 {
                    Signal::Long
                } else {
                    Signal::Short
                }
            }
            _ => Signal::Hold,
        };
        Ok(AdaptiveSignal {
            signal,
            confidence,
            hedge_ratio: beta,
            path: SignalPath::Model,
        })
    }

    fn fallback(&self, current_z: Option<f64>, beta: f64) -> AdaptiveSignal {
        let signal = match current_z {
            Some(z) if z.abs() > self.params.entry_z => {
                if z < 0.0 {
                    Signal::Long
                } else {
                    Signal::Short
                }
            }
            _ => Signal::Hold,
        };
        AdaptiveSignal {
            signal,
            confidence: FALLBACK_CONFIDENCE,
            hedge_ratio: beta,
            path: SignalPath::Fallback,
        }
    }
}
