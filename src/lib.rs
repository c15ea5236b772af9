// src/lib.rs
pub mod ports {
    pub mod price_feed;
}
pub mod backtest;
pub mod config;
pub mod model;
pub mod portfolio;
pub mod screening;
pub mod series;
pub mod signal;
pub mod stats;
