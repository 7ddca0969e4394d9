//! ARIMA forecasting: model fitting, order search, batch building and the
//! on-disk catalog of results

pub mod arima;
pub mod auto;
pub mod builder;
pub mod catalog;

pub use arima::{Arima, FittedArima, Forecast, Order};
pub use auto::{AutoArima, AutoArimaFit, ModelScore};
pub use builder::{BuildFailure, BuildReport, ModelBuilder, ModelMode};
pub use catalog::{available_features, scan_feature_dir, Catalog, OrderOption};
