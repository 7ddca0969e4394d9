//! Index of persisted forecast files
//!
//! Forecasts live at `<model_dir>/<feature>/<stem>_<feature>_(p, d, q).csv`,
//! with `_recommended` appended for orders chosen by the automatic search.

use super::arima::{Forecast, Order};
use super::builder::RECOMMENDED_SUFFIX;
use crate::data::{float_column, parse_period, string_column};
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Common name of a well-known order, if it has one
pub fn order_label(order: Order) -> Option<&'static str> {
    match (order.p, order.d, order.q) {
        (0, 0, 0) => Some("White Noise"),
        (0, 1, 0) => Some("Random Walk"),
        (0, 1, 1) => Some("Simple Exp. Smoothing"),
        (1, 1, 1) => Some("Common ARIMA"),
        _ => None,
    }
}

/// `(0, 1, 0) Random Walk`, or just the order when it has no name
pub fn display_order(order: Order) -> String {
    match order_label(order) {
        Some(label) => format!("{} {}", order, label),
        None => order.to_string(),
    }
}

/// Pieces of a forecast file name
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastFileName {
    /// Everything before the order, `<stem>_<feature>`
    pub prefix: String,
    pub order: Order,
    pub recommended: bool,
}

/// Split a forecast file name into prefix, order and recommendation flag
///
/// The order is taken from the last `(`, so stems containing underscores
/// parse correctly.
pub fn parse_forecast_file_name(file_name: &str) -> Option<ForecastFileName> {
    let base = file_name.strip_suffix(".csv")?;
    let (base, recommended) = match base.strip_suffix(RECOMMENDED_SUFFIX) {
        Some(rest) => (rest, true),
        None => (base, false),
    };
    let open = base.rfind('(')?;
    let order = base[open..].parse::<Order>().ok()?;
    let prefix = base[..open].trim_end_matches('_').to_string();
    Some(ForecastFileName {
        prefix,
        order,
        recommended,
    })
}

/// One selectable order for a location
#[derive(Debug, Clone, PartialEq)]
pub struct OrderOption {
    pub order: Order,
    pub label: String,
}

/// Orders and recommendations found for one feature
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub feature: String,
    pub dir: PathBuf,
    /// Orders present as grid files
    pub orders: BTreeSet<Order>,
    /// Location stem to recommended order
    pub recommendations: BTreeMap<String, Order>,
    /// Location stems with at least one forecast
    pub locations: BTreeSet<String>,
}

impl Catalog {
    pub fn recommended(&self, stem: &str) -> Option<Order> {
        self.recommendations.get(stem).copied()
    }

    /// Grid orders in ascending order, the recommended one marked
    pub fn order_options(&self, stem: &str) -> Vec<OrderOption> {
        let recommended = self.recommended(stem);
        let mut orders = self.orders.clone();
        if let Some(order) = recommended {
            orders.insert(order);
        }
        orders
            .into_iter()
            .map(|order| {
                let mut label = display_order(order);
                if Some(order) == recommended {
                    label.push_str(" (Recommended)");
                }
                OrderOption { order, label }
            })
            .collect()
    }

    /// Path of the forecast file for a location and order, if one exists
    ///
    /// Grid files win; the recommended file is used when the grid was never
    /// built for that order.
    pub fn forecast_path(&self, stem: &str, order: Order) -> Option<PathBuf> {
        let grid = self
            .dir
            .join(format!("{}_{}_{}.csv", stem, self.feature, order));
        if grid.is_file() {
            return Some(grid);
        }
        let recommended = self.dir.join(format!(
            "{}_{}_{}{}.csv",
            stem, self.feature, order, RECOMMENDED_SUFFIX
        ));
        recommended.is_file().then_some(recommended)
    }
}

/// Index the forecast files of one feature directory
pub fn scan_feature_dir(dir: &Path) -> crate::Result<Catalog> {
    let feature = dir
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid feature directory {}", dir.display()))?
        .to_string();
    let feature_suffix = format!("_{}", feature);

    let mut catalog = Catalog {
        feature,
        dir: dir.to_path_buf(),
        ..Default::default()
    };
    if !dir.is_dir() {
        return Ok(catalog);
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(parsed) = parse_forecast_file_name(name) else {
            tracing::debug!(file = name, "Ignoring unrecognised forecast file");
            continue;
        };
        let stem = parsed
            .prefix
            .strip_suffix(&feature_suffix)
            .unwrap_or(&parsed.prefix)
            .to_string();

        if parsed.recommended {
            catalog.recommendations.insert(stem.clone(), parsed.order);
        } else {
            catalog.orders.insert(parsed.order);
        }
        catalog.locations.insert(stem);
    }
    Ok(catalog)
}

/// Feature subdirectories of the model directory, sorted
pub fn available_features(model_dir: &Path) -> crate::Result<Vec<String>> {
    if !model_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut features: Vec<String> = std::fs::read_dir(model_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .filter_map(|p| p.file_name().and_then(|s| s.to_str()).map(str::to_string))
        .collect();
    features.sort();
    Ok(features)
}

/// A persisted forecast read back with its dates
#[derive(Debug, Clone)]
pub struct StoredForecast {
    pub dates: Vec<NaiveDate>,
    pub forecast: Forecast,
}

/// Read a `date,prediction,lower,upper` file
///
/// Rows with an unparseable date or missing value are dropped.
pub fn read_forecast(path: &Path, level: f64) -> crate::Result<StoredForecast> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let dates = string_column(&df, "date")?;
    let mean = float_column(&df, "prediction")?;
    let lower = float_column(&df, "lower")?;
    let upper = float_column(&df, "upper")?;

    let mut stored = StoredForecast {
        dates: Vec::with_capacity(df.height()),
        forecast: Forecast {
            mean: Vec::with_capacity(df.height()),
            lower: Vec::with_capacity(df.height()),
            upper: Vec::with_capacity(df.height()),
            level,
        },
    };
    for i in 0..df.height() {
        let date = dates[i].as_deref().and_then(parse_period);
        if let (Some(date), Some(m), Some(l), Some(u)) = (date, mean[i], lower[i], upper[i]) {
            stored.dates.push(date);
            stored.forecast.mean.push(m);
            stored.forecast.lower.push(l);
            stored.forecast.upper.push(u);
        }
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "date,prediction,lower,upper\n").unwrap();
    }

    #[test]
    fn test_order_labels() {
        assert_eq!(display_order(Order::new(0, 1, 0)), "(0, 1, 0) Random Walk");
        assert_eq!(display_order(Order::new(1, 1, 1)), "(1, 1, 1) Common ARIMA");
        assert_eq!(display_order(Order::new(2, 1, 1)), "(2, 1, 1)");
        assert_eq!(order_label(Order::new(0, 0, 0)), Some("White Noise"));
        assert_eq!(order_label(Order::new(0, 1, 1)), Some("Simple Exp. Smoothing"));
    }

    #[test]
    fn test_parse_forecast_file_name() {
        let parsed =
            parse_forecast_file_name("Salt_Lake_City_UTmetroarea_median_sale_price_(1, 1, 1).csv")
                .unwrap();
        assert_eq!(parsed.prefix, "Salt_Lake_City_UTmetroarea_median_sale_price");
        assert_eq!(parsed.order, Order::new(1, 1, 1));
        assert!(!parsed.recommended);

        let parsed =
            parse_forecast_file_name("Austin_TXmetroarea_median_ppsf_(2, 1, 0)_recommended.csv")
                .unwrap();
        assert_eq!(parsed.order, Order::new(2, 1, 0));
        assert!(parsed.recommended);

        assert!(parse_forecast_file_name("notes.txt").is_none());
        assert!(parse_forecast_file_name("Austin_TX.csv").is_none());
    }

    #[test]
    fn test_scan_and_options() {
        let root = tempdir().unwrap();
        let dir = root.path().join("median_sale_price");
        fs::create_dir_all(&dir).unwrap();
        touch(&dir, "Austin_TXmetroarea_median_sale_price_(0, 1, 0).csv");
        touch(&dir, "Austin_TXmetroarea_median_sale_price_(1, 1, 1).csv");
        touch(&dir, "Reno_NVmetroarea_median_sale_price_(0, 1, 0).csv");
        touch(&dir, "Austin_TXmetroarea_median_sale_price_(1, 1, 1)_recommended.csv");
        touch(&dir, "Reno_NVmetroarea_median_sale_price_(2, 1, 2)_recommended.csv");
        fs::write(dir.join("README"), "").unwrap();

        let catalog = scan_feature_dir(&dir).unwrap();
        assert_eq!(catalog.feature, "median_sale_price");
        assert_eq!(catalog.orders.len(), 2);
        assert_eq!(catalog.locations.len(), 2);
        assert_eq!(catalog.recommended("Austin_TXmetroarea"), Some(Order::new(1, 1, 1)));

        let options = catalog.order_options("Austin_TXmetroarea");
        let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["(0, 1, 0) Random Walk", "(1, 1, 1) Common ARIMA (Recommended)"]
        );

        // A recommendation outside the grid is still offered
        let options = catalog.order_options("Reno_NVmetroarea");
        assert_eq!(options.len(), 3);
        assert_eq!(options[2].label, "(2, 1, 2) (Recommended)");

        assert!(catalog
            .forecast_path("Austin_TXmetroarea", Order::new(1, 1, 1))
            .unwrap()
            .ends_with("Austin_TXmetroarea_median_sale_price_(1, 1, 1).csv"));
        assert!(catalog
            .forecast_path("Reno_NVmetroarea", Order::new(2, 1, 2))
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with("_recommended.csv"));
        assert!(catalog.forecast_path("Reno_NVmetroarea", Order::new(3, 0, 0)).is_none());
    }

    #[test]
    fn test_available_features() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("median_ppsf")).unwrap();
        fs::create_dir_all(root.path().join("median_list_price")).unwrap();
        fs::write(root.path().join("stray.csv"), "").unwrap();
        assert_eq!(
            available_features(root.path()).unwrap(),
            vec!["median_list_price".to_string(), "median_ppsf".to_string()]
        );
        assert!(available_features(&root.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_read_forecast() {
        let root = tempdir().unwrap();
        let path = root.path().join("f.csv");
        fs::write(
            &path,
            "date,prediction,lower,upper\n2025-01-01,10.0,8.0,12.0\n2025-02-01,11.0,8.5,13.5\n",
        )
        .unwrap();
        let stored = read_forecast(&path, 0.95).unwrap();
        assert_eq!(stored.dates.len(), 2);
        assert_eq!(stored.dates[1], NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        assert_eq!(stored.forecast.upper, vec![12.0, 13.5]);
    }
}
