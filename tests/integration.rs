//! Integration tests for housecast

use chrono::{Months, NaiveDate};
use housecast::cluster::{self, ClusterMethod};
use housecast::config::{DtwSettings, KMeansSettings};
use housecast::dashboard::{self, ForecastQuery};
use housecast::data;
use housecast::forecast::{self, ModelBuilder, ModelMode, Order};
use housecast::locations::Coordinates;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

const MONTHS: usize = 30;

const REGIONS: [(&str, f64, f64); 4] = [
    ("Austin, TX metro area", 350_000.0, 2_000.0),
    ("Boise, ID metro area", 300_000.0, 1_500.0),
    ("Reno, NV metro area", 420_000.0, -800.0),
    ("Salt Lake City, UT metro area", 380_000.0, 300.0),
];

/// Raw tab-separated tracker with a constant column and scattered gaps
fn write_raw_tracker(dir: &Path) -> PathBuf {
    let path = dir.join("tracker.tsv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        "period_begin\tperiod_end\tregion_type\tregion\tproperty_type\tmedian_sale_price\tmedian_list_price\tmedian_sale_price_yoy"
    )
    .unwrap();

    let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
    for t in 0..MONTHS {
        let begin = start + Months::new(t as u32);
        let end = begin + Months::new(1) - chrono::Duration::days(1);
        for (r, (region, base, slope)) in REGIONS.iter().enumerate() {
            let wiggle = 5_000.0 * ((t + r) as f64 * 0.8).sin();
            for (property_type, scale) in [("All Residential", 1.0), ("Single Family Residential", 1.2)] {
                let sale = (base + slope * t as f64 + wiggle) * scale + 0.5;
                // Every fifth month of one region misses its list price
                let list = if r == 1 && t % 5 == 2 {
                    String::new()
                } else {
                    format!("{:.1}", sale * 1.03)
                };
                let yoy = (slope / base) * 12.0 + 0.01 * ((t * (r + 1)) as f64).cos();
                writeln!(
                    file,
                    "{}\t{}\tmetro\t{}\t{}\t{:.1}\t{}\t{:.4}",
                    begin, end, region, property_type, sale, list, yoy
                )
                .unwrap();
            }
        }
    }
    path
}

struct Pipeline {
    _dir: TempDir,
    root: PathBuf,
    regional: PathBuf,
    cleaned: PathBuf,
}

fn clean_and_split() -> Pipeline {
    let dir = tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let raw_path = write_raw_tracker(&root);

    let raw = data::load_market_table(&raw_path).unwrap();
    let mut cleaned = data::clean_market_data(&raw).unwrap();
    let cleaned_path = data::save_table(&mut cleaned, &root.join("cleaned"), "tracker_cleaned").unwrap();

    let regional = root.join("regional");
    let report = data::split_by_column(&cleaned, "region", &regional, false).unwrap();
    assert_eq!(report.written.len(), REGIONS.len());

    Pipeline {
        _dir: dir,
        root,
        regional,
        cleaned: cleaned_path,
    }
}

#[test]
fn test_clean_and_split() {
    let pipeline = clean_and_split();
    let cleaned = data::load_market_table(&pipeline.cleaned).unwrap();

    assert!(cleaned.column("region_type").is_err());
    assert_eq!(cleaned.height(), MONTHS * REGIONS.len() * 2);
    assert_eq!(cleaned.column("median_list_price").unwrap().null_count(), 0);

    let files = data::csv_files(&pipeline.regional).unwrap();
    let names: Vec<String> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "Austin_TXmetroarea.csv",
            "Boise_IDmetroarea.csv",
            "Reno_NVmetroarea.csv",
            "SaltLakeCity_UTmetroarea.csv",
        ]
    );

    // Splitting again keeps the existing files
    let report = data::split_by_column(&cleaned, "region", &pipeline.regional, false).unwrap();
    assert!(report.written.is_empty());
    assert_eq!(report.skipped.len(), REGIONS.len());
}

#[test]
fn test_clustering_end_to_end() {
    let pipeline = clean_and_split();
    let clusters_dir = pipeline.root.join("clusters");

    let mut locations = HashMap::new();
    locations.insert(
        "Austin, TX".to_string(),
        Coordinates {
            latitude: 30.27,
            longitude: -97.74,
        },
    );
    locations.insert(
        "Reno, NV".to_string(),
        Coordinates {
            latitude: 39.53,
            longitude: -119.81,
        },
    );

    let cleaned = data::load_market_table(&pipeline.cleaned).unwrap();
    let snapshot = cluster::kmeans::market_snapshot(&cleaned).unwrap();
    assert_eq!(snapshot.cities.len(), REGIONS.len());

    let settings = KMeansSettings {
        min_k: 2,
        max_k: 3,
        ..Default::default()
    };
    let runs = cluster::kmeans::run_kmeans(&snapshot, &locations, &settings, &clusters_dir).unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.inertia.is_finite() && r.path.is_file()));

    let assignments = cluster::read_label_file(&ClusterMethod::KMeans.label_file(&clusters_dir, 3)).unwrap();
    assert_eq!(assignments.len(), REGIONS.len());
    assert!(assignments.iter().all(|a| a.cluster.map_or(false, |c| c < 3)));
    let located = assignments.iter().filter(|a| a.coordinates.is_some()).count();
    assert_eq!(located, 2);

    let dtw_settings = DtwSettings {
        min_k: 2,
        max_k: 2,
        ..Default::default()
    };
    let (cities, series) = cluster::dtw::load_dtw_dataset(&pipeline.regional, &dtw_settings).unwrap();
    assert_eq!(cities.len(), REGIONS.len());
    assert!(cities.contains(&"Salt Lake City, UT".to_string()));
    let runs = cluster::dtw::run_dtw(&cities, &series, &locations, &dtw_settings, &clusters_dir).unwrap();
    assert_eq!(runs.len(), 1);
    assert!(ClusterMethod::Dtw.label_file(&clusters_dir, 2).is_file());

    let points = dashboard::cluster_points(
        &cluster::read_label_file(&ClusterMethod::Dtw.label_file(&clusters_dir, 2)).unwrap(),
    );
    assert_eq!(points.len(), 2);
}

#[test]
fn test_forecast_catalog_end_to_end() {
    let pipeline = clean_and_split();
    let model_dir = pipeline.root.join("arima");
    let feature = "median_sale_price";

    let grid = ModelBuilder::new(ModelMode::Grid(vec![Order::new(0, 1, 0), Order::new(1, 1, 1)]))
        .with_horizon(6);
    let report = grid.build_models(&pipeline.regional, &model_dir, feature).unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.written.len(), REGIONS.len() * 2);

    let auto = ModelBuilder::new(ModelMode::Auto).with_horizon(6);
    let report = auto.build_models(&pipeline.regional, &model_dir, feature).unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.written.len(), REGIONS.len());

    assert_eq!(forecast::available_features(&model_dir).unwrap(), vec![feature.to_string()]);
    let catalog = forecast::scan_feature_dir(&model_dir.join(feature)).unwrap();
    assert_eq!(catalog.locations.len(), REGIONS.len());
    assert!(catalog.orders.contains(&Order::new(1, 1, 1)));

    let stem = "SaltLakeCity_UTmetroarea";
    let recommended = catalog.recommended(stem).unwrap();
    let options = catalog.order_options(stem);
    let marked: Vec<_> = options
        .iter()
        .filter(|o| o.label.ends_with(" (Recommended)"))
        .collect();
    assert_eq!(marked.len(), 1);
    assert_eq!(marked[0].order, recommended);

    let query = ForecastQuery {
        feature: feature.to_string(),
        order: recommended,
        primary: stem.to_string(),
        comparison: Some("Austin_TXmetroarea".to_string()),
    };
    let series = dashboard::load_location_forecasts(&query, &pipeline.regional, &catalog, 0.95);
    // Austin may lack this order when its recommendation differs and it is
    // outside the grid
    assert!(!series.is_empty());
    assert_eq!(series[0].label, "SaltLakeCity, UT");
    assert_eq!(series[0].history.len(), MONTHS);
    assert_eq!(series[0].forecast.dates.len(), 6);
    assert_eq!(
        series[0].forecast.dates[0],
        NaiveDate::from_ymd_opt(2023, 7, 1).unwrap()
    );
    for i in 0..6 {
        let f = &series[0].forecast.forecast;
        assert!(f.lower[i] <= f.mean[i] && f.mean[i] <= f.upper[i]);
    }
}
