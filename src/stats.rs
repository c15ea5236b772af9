use std::error::Error;
use std::fmt;

use crate::series::mean_std;

#[derive(Debug)]
pub enum StatError {
    InvalidRegression(String),
}

impl fmt::Display for StatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StatError::InvalidRegression(msg) => write!(f, "invalid regression: {}", msg),
        }
    }
}

impl Error for StatError {}

#[derive(Debug, Clone, Copy)]
pub struct OlsFit {
    pub alpha: f64,
    pub beta: f64,
}

/// Fit x = alpha + beta * y by ordinary least squares.
pub fn ols(x: &[f64], y: &[f64]) -> Result<OlsFit, StatError> {
    let n = x.len().min(y.len());
    if n < 2 {
        return Err(StatError::InvalidRegression(format!(
            "need at least 2 observations, got {}",
            n
        )));
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        cov += dx * dy;
        var_y += dy * dy;
    }
    if var_y.abs() < 1e-12 {
        return Err(StatError::InvalidRegression(
            "regressor has zero variance".to_string(),
        ));
    }
    let beta = cov / var_y;
    let alpha = mean_x - beta * mean_y;
    Ok(OlsFit { alpha, beta })
}

/// OLS slope of x on y; the screening-time hedge ratio.
pub fn hedge_ratio(x: &[f64], y: &[f64]) -> Result<f64, StatError> {
    ols(x, y).map(|fit| fit.beta)
}

/// Pearson correlation. None when either side is degenerate.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    let (mean_x, std_x) = mean_std(&x[..n])?;
    let (mean_y, std_y) = mean_std(&y[..n])?;
    if std_x < 1e-12 || std_y < 1e-12 {
        return None;
    }
    let mut cov = 0.0;
    for i in 0..n {
        cov += (x[i] - mean_x) * (y[i] - mean_y);
    }
    cov /= (n - 1) as f64;
    let r = cov / (std_x * std_y);
    if r.is_nan() {
        None
    } else {
        Some(r)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CointResult {
    pub t_stat: f64,
    pub p_value: f64,
}

/// Engle-Granger two-step cointegration test: OLS residuals of x on y,
/// then an AR(1) unit-root regression on the residuals with the
/// Dickey-Fuller critical-value table below.
pub fn engle_granger(x: &[f64], y: &[f64]) -> Result<CointResult, StatError> {
    let fit = ols(x, y)?;
    let n = x.len().min(y.len());
    let resid: Vec<f64> = (0..n).map(|i| x[i] - fit.alpha - fit.beta * y[i]).collect();
    adf(&resid)
}

/// Unit-root regression on levels: dY_t = phi * Y_{t-1} + eps.
fn adf(levels: &[f64]) -> Result<CointResult, StatError> {
    if levels.len() < 5 {
        return Err(StatError::InvalidRegression(format!(
            "need at least 5 observations for the unit-root test, got {}",
            levels.len()
        )));
    }
    let mut lag: Vec<f64> = Vec::with_capacity(levels.len() - 1);
    let mut diff: Vec<f64> = Vec::with_capacity(levels.len() - 1);
    for win in levels.windows(2) {
        lag.push(win[0]);
        diff.push(win[1] - win[0]);
    }
    let n = lag.len();
    let mean_lag = lag.iter().sum::<f64>() / n as f64;
    let mean_diff = diff.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for i in 0..n {
        num += (lag[i] - mean_lag) * (diff[i] - mean_diff);
        den += (lag[i] - mean_lag) * (lag[i] - mean_lag);
    }
    if den.abs() < 1e-12 {
        return Err(StatError::InvalidRegression(
            "residuals have zero variance".to_string(),
        ));
    }
    let phi = (num / den).clamp(-0.999, 0.999);

    // residual variance and standard error of phi
    let mut rss = 0.0;
    for i in 0..n {
        let fitted = phi * (lag[i] - mean_lag) + mean_diff;
        let err = diff[i] - fitted;
        rss += err * err;
    }
    let sigma2 = rss / (n.saturating_sub(2)).max(1) as f64;
    let se_phi = (sigma2 / den).sqrt();
    let t_stat = if se_phi < 1e-12 { 0.0 } else { phi / se_phi };
    let p_value = df_p_value(t_stat, n).clamp(0.0, 1.0);
    Ok(CointResult { t_stat, p_value })
}

fn df_p_value(t_stat: f64, n: usize) -> f64 {
    // Interpolated Dickey-Fuller critical values (with constant), approximate
    const CRITS: &[(usize, f64, f64, f64)] = &[
        (25, -3.75, -3.00, -2.63),
        (50, -3.58, -2.93, -2.60),
        (100, -3.51, -2.89, -2.58),
        (250, -3.46, -2.88, -2.57),
        (500, -3.44, -2.87, -2.57),
    ];
    let (c1, c5, c10) = interpolate_crits(n, CRITS);
    if t_stat < c1 {
        0.005
    } else if t_stat < c5 {
        0.025
    } else if t_stat < c10 {
        0.075
    } else {
        0.5
    }
}

fn interpolate_crits(n: usize, table: &[(usize, f64, f64, f64)]) -> (f64, f64, f64) {
    if n <= table[0].0 {
        return (table[0].1, table[0].2, table[0].3);
    }
    for w in table.windows(2) {
        let (n1, c1_1, c5_1, c10_1) = w[0];
        let (n2, c1_2, c5_2, c10_2) = w[1];
        if n >= n1 && n <= n2 {
            let t = (n - n1) as f64 / (n2 - n1) as f64;
            let lerp = |a: f64, b: f64| a + t * (b - a);
            return (lerp(c1_1, c1_2), lerp(c5_1, c5_2), lerp(c10_1, c10_2));
        }
    }
    let last = table.last().unwrap();
    (last.1, last.2, last.3)
}
