use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::series::PriceSeries;

#[derive(Debug)]
pub enum FeedError {
    DataUnavailable(String),
    Io(String),
    Parse(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FeedError::DataUnavailable(msg) => write!(f, "data unavailable: {}", msg),
            FeedError::Io(msg) => write!(f, "feed io error: {}", msg),
            FeedError::Parse(msg) => write!(f, "feed parse error: {}", msg),
        }
    }
}

impl Error for FeedError {}

/// Source of daily closing prices. The returned series covers the inclusive
/// date range, restricted to the days the source actually has.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn get_prices(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, FeedError>;
}

// One line of the dump file: a date and a ticker->close map.
#[derive(Debug, Clone, Deserialize)]
struct DumpedDay {
    date: String,
    prices: HashMap<String, f64>,
}

/// Replays daily closes from a JSONL dump, one day per line.
#[derive(Debug)]
pub struct JsonlPriceFeed {
    days: Vec<(NaiveDate, HashMap<String, f64>)>,
    path: PathBuf,
}

impl JsonlPriceFeed {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, FeedError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| FeedError::Io(format!("failed to open {}: {}", path.display(), e)))?;
        let reader = BufReader::new(file);
        let mut days = Vec::new();

        for line in reader.lines() {
            let line =
                line.map_err(|e| FeedError::Io(format!("failed to read price line: {}", e)))?;
            if line.trim().is_empty() {
                continue;
            }
            let day: DumpedDay = serde_json::from_str(&line)
                .map_err(|e| FeedError::Parse(format!("bad price entry '{}': {}", line, e)))?;
            let date = NaiveDate::parse_from_str(&day.date, "%Y-%m-%d")
                .map_err(|e| FeedError::Parse(format!("bad date '{}': {}", day.date, e)))?;
            days.push((date, day.prices));
        }

        if days.is_empty() {
            return Err(FeedError::DataUnavailable(format!(
                "price dump {} is empty or invalid",
                path.display()
            )));
        }
        days.sort_by_key(|(date, _)| *date);
        log::debug!(
            "[FEED] loaded {} days from {}",
            days.len(),
            path.display()
        );
        Ok(Self { days, path })
    }
}

#[async_trait]
impl PriceFeed for JsonlPriceFeed {
    async fn get_prices(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PriceSeries, FeedError> {
        let rows: Vec<(NaiveDate, f64)> = self
            .days
            .iter()
            .filter(|(date, _)| *date >= start && *date <= end)
            .filter_map(|(date, prices)| prices.get(ticker).map(|p| (*date, *p)))
            .collect();
        if rows.is_empty() {
            return Err(FeedError::DataUnavailable(format!(
                "no prices for {} between {} and {} in {}",
                ticker,
                start,
                end,
                self.path.display()
            )));
        }
        PriceSeries::new(ticker, rows).map_err(|e| FeedError::Parse(e.to_string()))
    }
}
