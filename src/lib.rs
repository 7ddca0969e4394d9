//! housecast: regional real-estate market analytics
//!
//! This library cleans and splits a metro market tracker, geocodes regions,
//! clusters them (K-Means over PCA and DTW k-means), fits per-region ARIMA
//! forecasts and renders dashboard charts from the persisted results.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod error;
pub mod forecast;
pub mod locations;
pub mod region;

// Re-export public items for easier access
pub use cli::Args;
pub use config::PipelineConfig;
pub use data::{clean_market_data, load_market_table, split_by_column};
pub use error::ForecastError;
pub use forecast::{Arima, AutoArima, ModelBuilder, Order};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
