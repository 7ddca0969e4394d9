//! Per-region forecast generation
//!
//! Walks the regional files, fits one ARIMA model per order (or one
//! automatically selected model) for a feature, and writes each forecast to
//! its own CSV under `<model_dir>/<feature>/`.

use super::arima::{Arima, Forecast, Order};
use super::auto::AutoArima;
use crate::config::{ForecastSettings, ALL_RESIDENTIAL};
use crate::data::{csv_files, load_region_series, RegionSeries};
use chrono::{Datelike, Months, NaiveDate};
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Marker appended to the file of an automatically selected order
pub const RECOMMENDED_SUFFIX: &str = "_recommended";

/// Which orders to fit for every region
#[derive(Debug, Clone, PartialEq)]
pub enum ModelMode {
    /// Fit each listed order
    Grid(Vec<Order>),
    /// Let the stepwise search pick one order per region
    Auto,
}

/// One failed region or (region, order) pair
#[derive(Debug, Clone)]
pub struct BuildFailure {
    pub region: String,
    pub order: Option<Order>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<BuildFailure>,
}

/// Fits and persists forecasts for every regional file
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    mode: ModelMode,
    horizon: usize,
    level: f64,
}

impl ModelBuilder {
    pub fn new(mode: ModelMode) -> Self {
        Self {
            mode,
            horizon: 24,
            level: 0.95,
        }
    }

    /// Builder using the configured grid, or the automatic search when `auto`
    pub fn from_settings(settings: &ForecastSettings, auto: bool) -> Self {
        let mode = if auto {
            ModelMode::Auto
        } else {
            ModelMode::Grid(Order::grid(settings.grid_bound))
        };
        Self::new(mode)
            .with_horizon(settings.horizon)
            .with_level(settings.level)
    }

    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_level(mut self, level: f64) -> Self {
        self.level = level;
        self
    }

    pub fn mode(&self) -> &ModelMode {
        &self.mode
    }

    /// Build forecasts of `feature` for every CSV in `data_dir`
    ///
    /// # Arguments
    /// * `data_dir` - Directory of per-region files
    /// * `model_dir` - Root of the forecast tree; a `feature` subdirectory is created
    /// * `feature` - Column to forecast
    ///
    /// # Returns
    /// Written files and the failures that were skipped over
    pub fn build_models(
        &self,
        data_dir: &Path,
        model_dir: &Path,
        feature: &str,
    ) -> crate::Result<BuildReport> {
        let feature_dir = model_dir.join(feature);
        if !feature_dir.is_dir() {
            info!(dir = %feature_dir.display(), "Creating models directory");
            std::fs::create_dir_all(&feature_dir)?;
        }

        let mut report = BuildReport::default();
        for path in csv_files(data_dir)? {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();

            let series = match load_region_series(&path, ALL_RESIDENTIAL, feature) {
                Ok(series) => series,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping region");
                    report.failures.push(BuildFailure {
                        region: stem,
                        order: None,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            self.build_region(&stem, &series, feature, &feature_dir, &mut report);
        }

        info!(
            feature,
            written = report.written.len(),
            failed = report.failures.len(),
            "Built forecast models"
        );
        Ok(report)
    }

    fn build_region(
        &self,
        stem: &str,
        series: &RegionSeries,
        feature: &str,
        feature_dir: &Path,
        report: &mut BuildReport,
    ) {
        let last_date = match series.dates.last() {
            Some(date) => *date,
            None => {
                report.failures.push(BuildFailure {
                    region: stem.to_string(),
                    order: None,
                    reason: format!("no '{}' values", feature),
                });
                return;
            }
        };
        let dates = forecast_dates(last_date, self.horizon);

        match &self.mode {
            ModelMode::Grid(orders) => {
                for order in orders {
                    let outcome = Arima::from_order(*order)
                        .fit(series)
                        .and_then(|model| model.predict(self.horizon, self.level))
                        .map_err(anyhow::Error::from)
                        .and_then(|forecast| {
                            let path =
                                feature_dir.join(forecast_file_name(stem, feature, *order, false));
                            write_forecast(&path, &dates, &forecast)?;
                            Ok(path)
                        });
                    self.record(stem, Some(*order), outcome, report);
                }
            }
            ModelMode::Auto => {
                let outcome = AutoArima::new()
                    .fit(series)
                    .map_err(anyhow::Error::from)
                    .and_then(|fit| {
                        let order = fit.selected_order();
                        debug!(region = stem, %order, "Writing recommended forecast");
                        let forecast = fit.predict(self.horizon, self.level)?;
                        let path = feature_dir.join(forecast_file_name(stem, feature, order, true));
                        write_forecast(&path, &dates, &forecast)?;
                        Ok(path)
                    });
                self.record(stem, None, outcome, report);
            }
        }
    }

    fn record(
        &self,
        stem: &str,
        order: Option<Order>,
        outcome: crate::Result<PathBuf>,
        report: &mut BuildReport,
    ) {
        match outcome {
            Ok(path) => report.written.push(path),
            Err(e) => {
                let order_text = order.map(|o| o.to_string()).unwrap_or_else(|| "auto".into());
                warn!(region = stem, order = %order_text, error = %e, "Issue with processing region");
                report.failures.push(BuildFailure {
                    region: stem.to_string(),
                    order,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// `<stem>_<feature>_(p, d, q).csv`, with `_recommended` before the extension
pub fn forecast_file_name(stem: &str, feature: &str, order: Order, recommended: bool) -> String {
    let suffix = if recommended { RECOMMENDED_SUFFIX } else { "" };
    format!("{}_{}_{}{}.csv", stem, feature, order, suffix)
}

/// Month-start dates following `last`
///
/// The first date is one month after `last`, rolled forward to the first of
/// a month when `last` is mid-month.
pub fn forecast_dates(last: NaiveDate, horizon: usize) -> Vec<NaiveDate> {
    let next = last + Months::new(1);
    let mut start = next.with_day(1).unwrap_or(next);
    if next.day() != 1 {
        start = start + Months::new(1);
    }
    (0..horizon as u32)
        .map(|i| start + Months::new(i))
        .collect()
}

/// Write `date,prediction,lower,upper` rows
pub fn write_forecast(path: &Path, dates: &[NaiveDate], forecast: &Forecast) -> crate::Result<()> {
    if dates.len() != forecast.len() {
        anyhow::bail!(
            "{} dates for {} forecast values",
            dates.len(),
            forecast.len()
        );
    }
    let dates: Vec<String> = dates.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect();
    let mut df = df!(
        "date" => dates,
        "prediction" => forecast.mean.clone(),
        "lower" => forecast.lower.clone(),
        "upper" => forecast.upper.clone()
    )?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_region(dir: &Path, stem: &str, region: &str, values: &[f64]) {
        let mut file = File::create(dir.join(format!("{}.csv", stem))).unwrap();
        writeln!(file, "period_begin,period_end,region,property_type,median_sale_price").unwrap();
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        for (i, value) in values.iter().enumerate() {
            let begin = start + Months::new(i as u32);
            let end = begin + Months::new(1);
            writeln!(file, "{},{},\"{}\",All Residential,{}", begin, end, region, value).unwrap();
            writeln!(file, "{},{},\"{}\",Townhouse,1", begin, end, region).unwrap();
        }
    }

    fn trend(n: usize) -> Vec<f64> {
        (0..n)
            .map(|t| 300_000.0 + 1_500.0 * t as f64 + 4_000.0 * (t as f64 * 0.9).sin())
            .collect()
    }

    #[test]
    fn test_forecast_dates() {
        let last = NaiveDate::from_ymd_opt(2024, 11, 1).unwrap();
        let dates = forecast_dates(last, 3);
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            ]
        );

        let mid_month = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(
            forecast_dates(mid_month, 1),
            vec![NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()]
        );
        assert!(forecast_dates(last, 0).is_empty());
    }

    #[test]
    fn test_forecast_file_name() {
        let order = Order::new(1, 1, 1);
        assert_eq!(
            forecast_file_name("Austin_TXmetroarea", "median_ppsf", order, false),
            "Austin_TXmetroarea_median_ppsf_(1, 1, 1).csv"
        );
        assert_eq!(
            forecast_file_name("Austin_TXmetroarea", "median_ppsf", order, true),
            "Austin_TXmetroarea_median_ppsf_(1, 1, 1)_recommended.csv"
        );
    }

    #[test]
    fn test_grid_build_isolates_failures() {
        let data = tempdir().unwrap();
        let models = tempdir().unwrap();
        write_region(data.path(), "Austin_TXmetroarea", "Austin, TX metro area", &trend(36));
        write_region(data.path(), "Reno_NVmetroarea", "Reno, NV metro area", &trend(4));

        let builder = ModelBuilder::new(ModelMode::Grid(vec![
            Order::new(0, 1, 0),
            Order::new(1, 1, 1),
        ]))
        .with_horizon(6);
        let report = builder
            .build_models(data.path(), models.path(), "median_sale_price")
            .unwrap();

        assert_eq!(report.written.len(), 3);
        // (1, 1, 1) needs more than four points
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].region, "Reno_NVmetroarea");
        assert_eq!(report.failures[0].order, Some(Order::new(1, 1, 1)));

        let path = models
            .path()
            .join("median_sale_price")
            .join("Austin_TXmetroarea_median_sale_price_(1, 1, 1).csv");
        let contents = std::fs::read_to_string(path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("date,prediction,lower,upper"));
        let first: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(first[0], "2023-01-01");
        let lower: f64 = first[2].parse().unwrap();
        let upper: f64 = first[3].parse().unwrap();
        assert!(lower < upper);
        assert_eq!(contents.lines().count(), 7);
    }

    #[test]
    fn test_missing_feature_is_a_region_failure() {
        let data = tempdir().unwrap();
        let models = tempdir().unwrap();
        write_region(data.path(), "Austin_TXmetroarea", "Austin, TX metro area", &trend(24));

        let report = ModelBuilder::new(ModelMode::Grid(vec![Order::new(0, 1, 0)]))
            .build_models(data.path(), models.path(), "median_list_price")
            .unwrap();
        assert!(report.written.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].order, None);
    }

    #[test]
    fn test_auto_build_writes_recommended() {
        let data = tempdir().unwrap();
        let models = tempdir().unwrap();
        write_region(data.path(), "Austin_TXmetroarea", "Austin, TX metro area", &trend(48));

        let report = ModelBuilder::new(ModelMode::Auto)
            .with_horizon(12)
            .build_models(data.path(), models.path(), "median_sale_price")
            .unwrap();

        assert!(report.failures.is_empty());
        assert_eq!(report.written.len(), 1);
        let name = report.written[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("Austin_TXmetroarea_median_sale_price_("));
        assert!(name.ends_with("_recommended.csv"));
    }

    #[test]
    fn test_from_settings() {
        let settings = ForecastSettings::default();
        let grid = ModelBuilder::from_settings(&settings, false);
        match grid.mode() {
            ModelMode::Grid(orders) => assert_eq!(orders.len(), 64),
            ModelMode::Auto => panic!("expected grid mode"),
        }
        assert_eq!(ModelBuilder::from_settings(&settings, true).mode(), &ModelMode::Auto);
    }
}
