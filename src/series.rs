use anyhow::{bail, Result};
use chrono::NaiveDate;

/// A ticker's daily close prices, strictly ordered by date.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    ticker: String,
    rows: Vec<(NaiveDate, f64)>,
}

impl PriceSeries {
    pub fn new(ticker: impl Into<String>, rows: Vec<(NaiveDate, f64)>) -> Result<Self> {
        let ticker = ticker.into();
        for win in rows.windows(2) {
            if win[1].0 <= win[0].0 {
                bail!(
                    "price series for {} is not strictly date-ordered at {}",
                    ticker,
                    win[1].0
                );
            }
        }
        Ok(Self { ticker, rows })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[(NaiveDate, f64)] {
        &self.rows
    }
}

/// Two price series restricted to their common dates.
#[derive(Debug, Clone)]
pub struct AlignedPair {
    pub dates: Vec<NaiveDate>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl AlignedPair {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Inner-join two series on date. Gaps on either side drop the row.
pub fn align(a: &PriceSeries, b: &PriceSeries) -> AlignedPair {
    let (ra, rb) = (a.rows(), b.rows());
    let mut dates = Vec::new();
    let mut x = Vec::new();
    let mut y = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < ra.len() && j < rb.len() {
        match ra[i].0.cmp(&rb[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dates.push(ra[i].0);
                x.push(ra[i].1);
                y.push(rb[j].1);
                i += 1;
                j += 1;
            }
        }
    }
    AlignedPair { dates, x, y }
}

/// Mean and sample (n-1) standard deviation. None below two observations.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss = values
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>();
    Some((mean, (ss / (n - 1.0)).sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, n).unwrap()
    }

    fn series(ticker: &str, rows: &[(u32, f64)]) -> PriceSeries {
        PriceSeries::new(
            ticker,
            rows.iter().map(|&(d, p)| (day(d), p)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_dates() {
        let rows = vec![(day(1), 1.0), (day(1), 2.0)];
        assert!(PriceSeries::new("AAA", rows).is_err());
    }

    #[test]
    fn rejects_unordered_dates() {
        let rows = vec![(day(2), 1.0), (day(1), 2.0)];
        assert!(PriceSeries::new("AAA", rows).is_err());
    }

    #[test]
    fn align_inner_joins_on_common_dates() {
        let a = series("AAA", &[(1, 10.0), (2, 11.0), (4, 12.0)]);
        let b = series("BBB", &[(2, 20.0), (3, 21.0), (4, 22.0)]);
        let aligned = align(&a, &b);
        assert_eq!(aligned.dates, vec![day(2), day(4)]);
        assert_eq!(aligned.x, vec![11.0, 12.0]);
        assert_eq!(aligned.y, vec![20.0, 22.0]);
    }

    #[test]
    fn align_with_no_overlap_is_empty() {
        let a = series("AAA", &[(1, 10.0), (2, 11.0)]);
        let b = series("BBB", &[(3, 20.0), (4, 21.0)]);
        assert!(align(&a, &b).is_empty());
    }

    #[test]
    fn mean_std_uses_sample_denominator() {
        let (mean, std) = mean_std(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!((mean - 2.5).abs() < 1e-12);
        // sample variance of 1..4 is 5/3
        assert!((std - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn mean_std_undefined_below_two_points() {
        assert!(mean_std(&[1.0]).is_none());
        assert!(mean_std(&[]).is_none());
    }
}
