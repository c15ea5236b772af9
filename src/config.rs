use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::env;
use std::fs::File;
use std::path::Path;

use crate::signal::SignalParams;

const DEFAULT_P_VALUE_THRESHOLD: f64 = 0.05;
const DEFAULT_MIN_CORRELATION: f64 = 0.85;
const DEFAULT_MIN_SPREAD_STD: f64 = 0.5;
const DEFAULT_MIN_STABILITY: f64 = 0.5;
const DEFAULT_ENTRY_Z_SCORE: f64 = 1.0;
const DEFAULT_EXIT_Z_SCORE: f64 = 0.1;
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;
const DEFAULT_MAX_HOLDING_DAYS: i64 = 20;
const DEFAULT_FEATURE_WINDOW: usize = 10;
const DEFAULT_SIGNAL_WINDOW: usize = 200;
const DEFAULT_TRADE_LOG_FILE: &str = "trades.csv";
const DEFAULT_REPORT_FILE: &str = "backtest.csv";

#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum StringOrVec {
    String(String),
    Vec(Vec<String>),
}

impl StringOrVec {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrVec::String(value) => value
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
            StringOrVec::Vec(values) => values
                .into_iter()
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct BacktestYaml {
    tickers: Option<StringOrVec>,
    start_date: Option<String>,
    end_date: Option<String>,
    data_file: Option<String>,
    p_value_threshold: Option<f64>,
    min_correlation: Option<f64>,
    min_spread_std: Option<f64>,
    min_stability: Option<f64>,
    entry_z_score: Option<f64>,
    exit_z_score: Option<f64>,
    confidence_threshold: Option<f64>,
    max_holding_days: Option<i64>,
    feature_window: Option<usize>,
    train_lookback: Option<usize>,
    signal_window: Option<usize>,
    zscore_window: Option<usize>,
    trade_log_file: Option<String>,
    report_pair: Option<String>,
    report_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub tickers: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub data_file: String,
    pub p_value_threshold: f64,
    pub min_correlation: f64,
    pub min_spread_std: f64,
    pub min_stability: f64,
    pub entry_z_score: f64,
    pub exit_z_score: f64,
    pub confidence_threshold: f64,
    pub max_holding_days: i64,
    pub feature_window: usize,
    pub train_lookback: usize,
    pub signal_window: usize,
    // None means a full-sample z-score in the rule-based report
    pub zscore_window: Option<usize>,
    pub trade_log_file: String,
    pub report_pair: Option<(String, String)>,
    pub report_file: String,
}

impl BacktestConfig {
    pub fn from_env_or_yaml() -> Result<Self> {
        let config_path = env::var("PAIRARB_CONFIG_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("PAIRARB_CONFIG_PATH must point to a config file"))?;
        Self::from_yaml_path(config_path)
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)
            .with_context(|| format!("failed to open backtest config {}", path_ref.display()))?;
        let yaml: BacktestYaml = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse backtest config {}", path_ref.display()))?;

        let tickers = yaml
            .tickers
            .map(StringOrVec::into_vec)
            .unwrap_or_default();
        if tickers.len() < 2 {
            return Err(anyhow!("config must list at least two tickers"));
        }
        let start_date = parse_date(
            yaml.start_date
                .as_deref()
                .ok_or_else(|| anyhow!("start_date is required"))?,
        )?;
        let end_date = parse_date(
            yaml.end_date
                .as_deref()
                .ok_or_else(|| anyhow!("end_date is required"))?,
        )?;
        if end_date < start_date {
            return Err(anyhow!(
                "end_date {} precedes start_date {}",
                end_date,
                start_date
            ));
        }
        let data_file = yaml
            .data_file
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("data_file is required"))?;

        let feature_window = yaml.feature_window.unwrap_or(DEFAULT_FEATURE_WINDOW);
        let report_pair = yaml
            .report_pair
            .as_deref()
            .map(parse_pair_label)
            .transpose()?;

        let mut cfg = BacktestConfig {
            tickers,
            start_date,
            end_date,
            data_file,
            p_value_threshold: yaml.p_value_threshold.unwrap_or(DEFAULT_P_VALUE_THRESHOLD),
            min_correlation: yaml.min_correlation.unwrap_or(DEFAULT_MIN_CORRELATION),
            min_spread_std: yaml.min_spread_std.unwrap_or(DEFAULT_MIN_SPREAD_STD),
            min_stability: yaml.min_stability.unwrap_or(DEFAULT_MIN_STABILITY),
            entry_z_score: yaml.entry_z_score.unwrap_or(DEFAULT_ENTRY_Z_SCORE),
            exit_z_score: yaml.exit_z_score.unwrap_or(DEFAULT_EXIT_Z_SCORE),
            confidence_threshold: yaml
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            max_holding_days: yaml.max_holding_days.unwrap_or(DEFAULT_MAX_HOLDING_DAYS),
            feature_window,
            train_lookback: yaml.train_lookback.unwrap_or(feature_window),
            signal_window: yaml.signal_window.unwrap_or(DEFAULT_SIGNAL_WINDOW),
            zscore_window: yaml.zscore_window,
            trade_log_file: yaml
                .trade_log_file
                .unwrap_or_else(|| DEFAULT_TRADE_LOG_FILE.to_string()),
            report_pair,
            report_file: yaml
                .report_file
                .unwrap_or_else(|| DEFAULT_REPORT_FILE.to_string()),
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = env::var("P_VALUE_THRESHOLD") {
            if let Ok(parsed) = value.parse() {
                self.p_value_threshold = parsed;
            }
        }
        if let Ok(value) = env::var("MIN_CORRELATION") {
            if let Ok(parsed) = value.parse() {
                self.min_correlation = parsed;
            }
        }
        if let Ok(value) = env::var("ENTRY_Z_SCORE") {
            if let Ok(parsed) = value.parse() {
                self.entry_z_score = parsed;
            }
        }
        if let Ok(value) = env::var("EXIT_Z_SCORE") {
            if let Ok(parsed) = value.parse() {
                self.exit_z_score = parsed;
            }
        }
        if let Ok(value) = env::var("CONFIDENCE_THRESHOLD") {
            if let Ok(parsed) = value.parse() {
                self.confidence_threshold = parsed;
            }
        }
        if let Ok(value) = env::var("MAX_HOLDING_DAYS") {
            if let Ok(parsed) = value.parse() {
                self.max_holding_days = parsed;
            }
        }
        if let Ok(value) = env::var("SIGNAL_WINDOW") {
            if let Ok(parsed) = value.parse() {
                self.signal_window = parsed;
            }
        }
        if let Ok(value) = env::var("TRADE_LOG_FILE") {
            if !value.trim().is_empty() {
                self.trade_log_file = value;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.p_value_threshold) {
            return Err(anyhow!(
                "p_value_threshold {} out of range",
                self.p_value_threshold
            ));
        }
        if self.entry_z_score <= self.exit_z_score {
            return Err(anyhow!(
                "entry_z_score {} must exceed exit_z_score {}",
                self.entry_z_score,
                self.exit_z_score
            ));
        }
        if self.max_holding_days < 1 {
            return Err(anyhow!("max_holding_days must be at least 1"));
        }
        if self.feature_window < 2 || self.signal_window < 2 {
            return Err(anyhow!("windows must be at least 2 bars"));
        }
        Ok(())
    }

    pub fn signal_params(&self) -> SignalParams {
        SignalParams {
            entry_z: self.entry_z_score,
            exit_z: self.exit_z_score,
            confidence_threshold: self.confidence_threshold,
            feature_window: self.feature_window,
            train_lookback: self.train_lookback,
            max_holding: self.max_holding_days as usize,
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{}' (expected YYYY-MM-DD)", value))
}

fn parse_pair_label(value: &str) -> Result<(String, String)> {
    let mut parts = value.split('/').map(str::trim);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(x), Some(y), None) if !x.is_empty() && !y.is_empty() => {
            Ok((x.to_string(), y.to_string()))
        }
        _ => Err(anyhow!("invalid report_pair '{}' (expected X/Y)", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config(
            "tickers: AAA, BBB\n\
             start_date: 2020-01-01\n\
             end_date: 2021-01-01\n\
             data_file: prices.jsonl\n",
        );
        let cfg = BacktestConfig::from_yaml_path(file.path()).unwrap();
        assert_eq!(cfg.tickers, vec!["AAA", "BBB"]);
        assert_eq!(cfg.p_value_threshold, 0.05);
        assert_eq!(cfg.entry_z_score, 1.0);
        assert_eq!(cfg.exit_z_score, 0.1);
        assert_eq!(cfg.max_holding_days, 20);
        assert_eq!(cfg.signal_window, 200);
        assert_eq!(cfg.train_lookback, cfg.feature_window);
        assert_eq!(cfg.trade_log_file, "trades.csv");
        assert!(cfg.zscore_window.is_none());
        assert!(cfg.report_pair.is_none());
    }

    #[test]
    fn ticker_list_form_is_accepted() {
        let file = write_config(
            "tickers:\n  - AAA\n  - BBB\n  - CCC\n\
             start_date: 2020-01-01\n\
             end_date: 2021-01-01\n\
             data_file: prices.jsonl\n",
        );
        let cfg = BacktestConfig::from_yaml_path(file.path()).unwrap();
        assert_eq!(cfg.tickers, vec!["AAA", "BBB", "CCC"]);
    }

    #[test]
    fn report_pair_is_parsed() {
        let file = write_config(
            "tickers: AAA, BBB\n\
             start_date: 2020-01-01\n\
             end_date: 2021-01-01\n\
             data_file: prices.jsonl\n\
             report_pair: AAA/BBB\n\
             zscore_window: 30\n",
        );
        let cfg = BacktestConfig::from_yaml_path(file.path()).unwrap();
        assert_eq!(
            cfg.report_pair,
            Some(("AAA".to_string(), "BBB".to_string()))
        );
        assert_eq!(cfg.zscore_window, Some(30));
    }

    #[test]
    fn env_var_overrides_yaml_value() {
        let file = write_config(
            "tickers: AAA, BBB\n\
             start_date: 2020-01-01\n\
             end_date: 2021-01-01\n\
             data_file: prices.jsonl\n\
             min_correlation: 0.9\n",
        );
        env::set_var("MIN_CORRELATION", "0.7");
        let cfg = BacktestConfig::from_yaml_path(file.path());
        env::remove_var("MIN_CORRELATION");
        assert_eq!(cfg.unwrap().min_correlation, 0.7);
    }

    #[test]
    fn single_ticker_is_rejected() {
        let file = write_config(
            "tickers: AAA\n\
             start_date: 2020-01-01\n\
             end_date: 2021-01-01\n\
             data_file: prices.jsonl\n",
        );
        assert!(BacktestConfig::from_yaml_path(file.path()).is_err());
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let file = write_config(
            "tickers: AAA, BBB\n\
             start_date: 2021-01-01\n\
             end_date: 2020-01-01\n\
             data_file: prices.jsonl\n",
        );
        assert!(BacktestConfig::from_yaml_path(file.path()).is_err());
    }

    #[test]
    fn entry_below_exit_is_rejected() {
        let file = write_config(
            "tickers: AAA, BBB\n\
             start_date: 2020-01-01\n\
             end_date: 2021-01-01\n\
             data_file: prices.jsonl\n\
             entry_z_score: 0.05\n",
        );
        assert!(BacktestConfig::from_yaml_path(file.path()).is_err());
    }
}
