//! Dashboard views rendered to PNG with Plotters
//!
//! Two views are produced from the persisted pipeline outputs: a map of
//! regions coloured by cluster, and a forecast chart comparing up to two
//! locations.

use crate::cluster::{read_label_file, ClusterAssignment, ClusterMethod};
use crate::config::ALL_RESIDENTIAL;
use crate::data::load_region_series;
use crate::forecast::catalog::{display_order, read_forecast, Catalog, StoredForecast};
use crate::forecast::Order;
use crate::region;
use chrono::{Datelike, NaiveDate};
use plotters::prelude::*;
use std::ops::Range;
use std::path::Path;
use tracing::{info, warn};

/// Colour-blind-safe palette for clusters
const CLUSTER_COLORS: [RGBColor; 6] = [
    RGBColor(0xE6, 0x9F, 0x00),
    RGBColor(0x56, 0xB4, 0xE9),
    RGBColor(0x00, 0x9E, 0x73),
    RGBColor(0xF0, 0xE4, 0x42),
    RGBColor(0x00, 0x72, 0xB2),
    RGBColor(0xD5, 0x5E, 0x00),
];

/// Continental United States
pub const US_LONGITUDE: Range<f64> = -125.0..-66.0;
pub const US_LATITUDE: Range<f64> = 24.0..50.0;

/// Line and band colours for one location on the forecast chart
#[derive(Debug, Clone, Copy)]
pub struct LocationStyle {
    pub historical: RGBColor,
    pub forecast: RGBColor,
    pub band: RGBColor,
}

/// Blue for the first location, red for the comparison
pub const LOCATION_STYLES: [LocationStyle; 2] = [
    LocationStyle {
        historical: RGBColor(0x1f, 0x77, 0xb4),
        forecast: RGBColor(0x7a, 0xae, 0xd6),
        band: RGBColor(31, 119, 180),
    },
    LocationStyle {
        historical: RGBColor(0xd6, 0x27, 0x28),
        forecast: RGBColor(0xff, 0x98, 0x96),
        band: RGBColor(214, 39, 40),
    },
];

const BAND_OPACITY: f64 = 0.2;

/// One region placed on the cluster map
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPoint {
    pub city: String,
    pub cluster: usize,
    pub longitude: f64,
    pub latitude: f64,
}

/// Regions that can be drawn: labelled, located and inside the map bounds
pub fn cluster_points(assignments: &[ClusterAssignment]) -> Vec<ClusterPoint> {
    assignments
        .iter()
        .filter_map(|a| {
            let cluster = a.cluster?;
            let coordinates = a.coordinates?;
            let inside = US_LONGITUDE.contains(&coordinates.longitude)
                && US_LATITUDE.contains(&coordinates.latitude);
            inside.then(|| ClusterPoint {
                city: a.city.clone(),
                cluster,
                longitude: coordinates.longitude,
                latitude: coordinates.latitude,
            })
        })
        .collect()
}

fn cluster_color(cluster: usize) -> RGBColor {
    CLUSTER_COLORS[cluster % CLUSTER_COLORS.len()]
}

/// Draw the cluster map for one label file
///
/// # Returns
/// Number of regions drawn
pub fn render_cluster_map(
    label_file: &Path,
    method: ClusterMethod,
    output_path: &Path,
) -> crate::Result<usize> {
    let assignments = read_label_file(label_file)?;
    let points = cluster_points(&assignments);
    let skipped = assignments.len() - points.len();
    if skipped > 0 {
        warn!(skipped, "Regions without cluster or coordinates left off the map");
    }

    let root = BitMapBackend::new(output_path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{} Clusters", method), ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(US_LONGITUDE, US_LATITUDE)?;

    chart
        .configure_mesh()
        .x_desc("Longitude")
        .y_desc("Latitude")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    let mut clusters: Vec<usize> = points.iter().map(|p| p.cluster).collect();
    clusters.sort_unstable();
    clusters.dedup();

    for cluster in clusters {
        let color = cluster_color(cluster);
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.cluster == cluster)
                    .map(|p| Circle::new((p.longitude, p.latitude), 5, color.filled())),
            )?
            .label(format!("Cluster {}", cluster))
            .legend(move |(x, y)| Circle::new((x + 5, y), 5, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    info!(path = %output_path.display(), regions = points.len(), "Cluster map saved");
    Ok(points.len())
}

/// What the forecast chart shows
#[derive(Debug, Clone)]
pub struct ForecastQuery {
    pub feature: String,
    pub order: Order,
    /// Location stem
    pub primary: String,
    pub comparison: Option<String>,
}

/// History and stored forecast of one location
#[derive(Debug, Clone)]
pub struct LocationForecast {
    pub stem: String,
    pub label: String,
    /// Position in the query: 0 for the primary, 1 for the comparison
    pub slot: usize,
    pub history: Vec<(NaiveDate, f64)>,
    pub forecast: StoredForecast,
}

impl LocationForecast {
    pub fn style(&self) -> LocationStyle {
        LOCATION_STYLES[self.slot.min(LOCATION_STYLES.len() - 1)]
    }
}

/// Human-readable feature name
pub fn feature_display_name(feature: &str) -> String {
    match feature {
        "median_list_price" => "Median list price".to_string(),
        "median_sale_price" => "Median sale price".to_string(),
        other => other.to_string(),
    }
}

/// Load history and forecast for each requested location
///
/// A location missing either its regional file or its forecast file is
/// skipped.
pub fn load_location_forecasts(
    query: &ForecastQuery,
    regional_dir: &Path,
    catalog: &Catalog,
    level: f64,
) -> Vec<LocationForecast> {
    std::iter::once(&query.primary)
        .chain(query.comparison.iter())
        .enumerate()
        .filter_map(|(slot, stem)| {
            let history_path = regional_dir.join(format!("{}.csv", stem));
            let series = match load_region_series(&history_path, ALL_RESIDENTIAL, &query.feature) {
                Ok(series) => series,
                Err(e) => {
                    warn!(location = %stem, error = %e, "No history for location");
                    return None;
                }
            };
            let Some(path) = catalog.forecast_path(stem, query.order) else {
                warn!(location = %stem, order = %query.order, "No forecast for location");
                return None;
            };
            let forecast = match read_forecast(&path, level) {
                Ok(forecast) => forecast,
                Err(e) => {
                    warn!(location = %stem, error = %e, "Unreadable forecast");
                    return None;
                }
            };
            Some(LocationForecast {
                stem: stem.clone(),
                label: region::label_from_stem(stem),
                slot,
                history: series.dates.into_iter().zip(series.values).collect(),
                forecast,
            })
        })
        .collect()
}

/// Fractional year used as the chart x coordinate
pub fn decimal_year(date: NaiveDate) -> f64 {
    date.year() as f64 + (date.month0() as f64 + (date.day0() as f64 / 31.0)) / 12.0
}

/// Axis ranges covering every history point and forecast bound, padded
pub fn chart_bounds(series: &[LocationForecast]) -> Option<(Range<f64>, Range<f64>)> {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for s in series {
        for (date, value) in &s.history {
            xs.push(decimal_year(*date));
            ys.push(*value);
        }
        for (i, date) in s.forecast.dates.iter().enumerate() {
            xs.push(decimal_year(*date));
            ys.push(s.forecast.forecast.lower[i]);
            ys.push(s.forecast.forecast.upper[i]);
        }
    }
    let bounds = |values: &[f64]| {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !min.is_finite() || !max.is_finite() {
            return None;
        }
        let pad = ((max - min) * 0.05).max(1e-6);
        Some(min - pad..max + pad)
    };
    Some((bounds(&xs)?, bounds(&ys)?))
}

/// Draw history, forecast and confidence band for up to two locations
///
/// # Returns
/// Number of locations drawn
pub fn render_forecast(
    query: &ForecastQuery,
    regional_dir: &Path,
    catalog: &Catalog,
    level: f64,
    output_path: &Path,
) -> crate::Result<usize> {
    let series = load_location_forecasts(query, regional_dir, catalog, level);
    let Some((x_range, y_range)) = chart_bounds(&series) else {
        anyhow::bail!(
            "No data to plot for {} with order {}",
            query.primary,
            query.order
        );
    };

    let root = BitMapBackend::new(output_path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("ARIMA Forecast {}", display_order(query.order)),
            ("sans-serif", 30),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d(x_range, y_range)?;

    chart
        .configure_mesh()
        .x_desc("Date")
        .y_desc(feature_display_name(&query.feature))
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for location in &series {
        let style = location.style();
        let stored = &location.forecast;
        let upper = stored
            .dates
            .iter()
            .zip(stored.forecast.upper.iter())
            .map(|(d, v)| (decimal_year(*d), *v));
        let lower = stored
            .dates
            .iter()
            .zip(stored.forecast.lower.iter())
            .rev()
            .map(|(d, v)| (decimal_year(*d), *v));
        let band: Vec<(f64, f64)> = upper.chain(lower).collect();
        let band_color = style.band.mix(BAND_OPACITY);
        chart
            .draw_series(std::iter::once(Polygon::new(band, band_color.filled())))?
            .label(format!("{} Confidence Interval", location.label))
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 20, y + 5)], band_color.filled()));

        let historical = style.historical;
        chart
            .draw_series(LineSeries::new(
                location.history.iter().map(|(d, v)| (decimal_year(*d), *v)),
                historical.stroke_width(2),
            ))?
            .label(format!("{} Actual", location.label))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], historical));

        let predicted = style.forecast;
        chart
            .draw_series(LineSeries::new(
                stored
                    .dates
                    .iter()
                    .zip(stored.forecast.mean.iter())
                    .map(|(d, v)| (decimal_year(*d), *v)),
                predicted.stroke_width(2),
            ))?
            .label(format!("{} Forecast", location.label))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], predicted));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    info!(path = %output_path.display(), locations = series.len(), "Forecast chart saved");
    Ok(series.len())
}
