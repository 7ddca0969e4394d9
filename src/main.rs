//! housecast: real-estate market pipeline
//!
//! This is the main entrypoint that wires configuration, logging and the
//! pipeline stages behind one subcommand each.

use anyhow::Result;
use clap::Parser;
use housecast::cli::{Args, Command, MethodArg};
use housecast::cluster::{self, ClusterMethod, ClusterRun};
use housecast::config::PipelineConfig;
use housecast::dashboard::{self, ForecastQuery};
use housecast::data;
use housecast::forecast::{self, ModelBuilder, Order};
use housecast::locations::{self, Coordinates, NominatimGeocoder};
use housecast::region;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mut config = PipelineConfig::load(args.config.as_deref())?;
    args.command.apply_overrides(&mut config);
    config.validate()?;

    let start_time = Instant::now();
    match &args.command {
        Command::Clean { timestamp, .. } => run_clean(&config, *timestamp)?,
        Command::Split {
            input,
            column,
            overwrite,
            ..
        } => run_split(&config, input.as_deref(), column, *overwrite)?,
        Command::Locate { input, .. } => run_locate(&config, input.as_deref())?,
        Command::ClusterKmeans { input, .. } => run_cluster_kmeans(&config, input.as_deref())?,
        Command::ClusterDtw { .. } => run_cluster_dtw(&config)?,
        Command::Forecast { auto, .. } => run_forecast(&config, *auto)?,
        Command::Dashboard {
            method,
            k,
            feature,
            location,
            compare,
            order,
            ..
        } => run_dashboard(
            &config,
            *method,
            *k,
            feature,
            location.clone(),
            compare.clone(),
            *order,
        )?,
    }

    info!(elapsed_secs = start_time.elapsed().as_secs_f64(), "Done");
    Ok(())
}

/// Log to stderr, `RUST_LOG` overriding the verbosity flag
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn run_clean(config: &PipelineConfig, timestamp: bool) -> Result<()> {
    info!(input = %config.raw_data.display(), "Loading raw market data");
    let raw = data::load_market_table(&config.raw_data)?;
    let mut cleaned = data::clean_market_data(&raw)?;

    let name = if timestamp {
        data::timestamped_name()
    } else {
        config.cleaned_name.clone()
    };
    let path = data::save_table(&mut cleaned, &config.cleaned_dir, &name)?;

    println!(
        "✓ Cleaned {} rows into {} rows x {} columns",
        raw.height(),
        cleaned.height(),
        cleaned.width()
    );
    println!("  Saved to: {}", path.display());
    Ok(())
}

fn run_split(
    config: &PipelineConfig,
    input: Option<&Path>,
    column: &str,
    overwrite: bool,
) -> Result<()> {
    let input = input
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.cleaned_file());
    let df = data::load_market_table(&input)?;
    let report = data::split_by_column(&df, column, &config.regional_dir, overwrite)?;

    println!(
        "✓ Split by '{}': {} written, {} kept, {} failed",
        column,
        report.written.len(),
        report.skipped.len(),
        report.failures.len()
    );
    if !report.failures.is_empty() {
        let log = config.log_dir.join("split_failures.txt");
        data::write_failure_log(&report.failures, &log)?;
        println!("  Failures logged to: {}", log.display());
    }
    Ok(())
}

fn run_locate(config: &PipelineConfig, input: Option<&Path>) -> Result<()> {
    let input = input
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.cleaned_file());
    let df = data::load_market_table(&input)?;
    let labels = locations::region_labels(&df)?;
    info!(regions = labels.len(), "Geocoding regions");

    let geocoder = NominatimGeocoder::new(&config.geocoder)?;
    let pause = Duration::from_secs(config.geocoder.jitter_secs);
    let report = locations::resolve_locations(&geocoder, &labels, pause, &mut rand::thread_rng());
    locations::write_locations(&report.locations, &config.locations_file)?;

    println!(
        "✓ Located {} of {} regions",
        report.locations.len(),
        labels.len()
    );
    println!("  Saved to: {}", config.locations_file.display());
    if !report.failures.is_empty() {
        let log = config.log_dir.join("location_failures.txt");
        data::write_failure_log(&report.failures, &log)?;
        println!("  Failures logged to: {}", log.display());
    }
    Ok(())
}

/// Coordinates by display label; clustering still runs without them
fn load_locations_or_empty(config: &PipelineConfig) -> HashMap<String, Coordinates> {
    match locations::read_locations(&config.locations_file) {
        Ok(found) => found,
        Err(e) => {
            warn!(
                path = %config.locations_file.display(),
                error = %e,
                "No locations available, label files will lack coordinates"
            );
            HashMap::new()
        }
    }
}

fn print_runs(method: ClusterMethod, runs: &[ClusterRun]) {
    println!("\n=== {} Inertia by k ===", method);
    for run in runs {
        println!("k = {:2}: {:.4}  ({})", run.k, run.inertia, run.path.display());
    }
}

fn run_cluster_kmeans(config: &PipelineConfig, input: Option<&Path>) -> Result<()> {
    let input = input
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.cleaned_file());
    let df = data::load_market_table(&input)?;
    let snapshot = cluster::kmeans::market_snapshot(&df)?;
    println!(
        "✓ Snapshot: {} regions x {} features",
        snapshot.cities.len(),
        snapshot.feature_names.len()
    );

    let locations = load_locations_or_empty(config);
    let runs = cluster::kmeans::run_kmeans(&snapshot, &locations, &config.kmeans, &config.clusters_dir)?;
    print_runs(ClusterMethod::KMeans, &runs);
    Ok(())
}

fn run_cluster_dtw(config: &PipelineConfig) -> Result<()> {
    let (cities, series) = cluster::dtw::load_dtw_dataset(&config.regional_dir, &config.dtw)?;
    println!("✓ Loaded {} regional series", series.len());

    let locations = load_locations_or_empty(config);
    let runs = cluster::dtw::run_dtw(&cities, &series, &locations, &config.dtw, &config.clusters_dir)?;
    print_runs(ClusterMethod::Dtw, &runs);
    Ok(())
}

fn run_forecast(config: &PipelineConfig, auto: bool) -> Result<()> {
    let builder = ModelBuilder::from_settings(&config.forecast, auto);
    let mut failures = Vec::new();

    for feature in &config.forecast.features {
        let feature_start = Instant::now();
        info!(feature = %feature, auto, "Building models");
        let report = builder.build_models(&config.regional_dir, &config.arima_dir, feature)?;
        println!(
            "✓ {}: {} forecasts written, {} failed ({:.2}s)",
            feature,
            report.written.len(),
            report.failures.len(),
            feature_start.elapsed().as_secs_f64()
        );
        failures.extend(report.failures.into_iter().map(|f| {
            let order = f.order.map(|o| o.to_string()).unwrap_or_else(|| "auto".into());
            format!("{} {} {}: {}", feature, f.region, order, f.reason)
        }));
    }

    if !failures.is_empty() {
        let log = config.log_dir.join("forecast_failures.txt");
        data::write_failure_log(&failures, &log)?;
        println!("  Failures logged to: {}", log.display());
    }
    Ok(())
}

fn run_dashboard(
    config: &PipelineConfig,
    method: MethodArg,
    k: usize,
    feature: &str,
    location: Option<String>,
    compare: Option<String>,
    order: Option<Order>,
) -> Result<()> {
    std::fs::create_dir_all(&config.dashboard_dir)?;

    let method = ClusterMethod::from(method);
    let label_file = method.label_file(&config.clusters_dir, k);
    if label_file.is_file() {
        let map_path = config
            .dashboard_dir
            .join(format!("clusters_{}_{}.png", method.file_prefix(), k));
        let drawn = dashboard::render_cluster_map(&label_file, method, &map_path)?;
        println!("✓ {} cluster map ({} regions): {}", method, drawn, map_path.display());
    } else {
        warn!(path = %label_file.display(), "Label file not found, skipping cluster map");
    }

    let features = forecast::available_features(&config.arima_dir)?;
    if !features.iter().any(|f| f == feature) {
        anyhow::bail!(
            "No forecasts for '{}' in {} (available: {})",
            feature,
            config.arima_dir.display(),
            features.join(", ")
        );
    }
    let catalog = forecast::scan_feature_dir(&config.arima_dir.join(feature))?;

    let primary = match location.or_else(|| catalog.locations.iter().next().cloned()) {
        Some(stem) => stem,
        None => anyhow::bail!("No forecast locations found for '{}'", feature),
    };

    let options = catalog.order_options(&primary);
    println!("\nARIMA models for {}:", region::label_from_stem(&primary));
    for option in &options {
        println!("  {}", option.label);
    }

    let order = order
        .or_else(|| catalog.recommended(&primary))
        .or_else(|| options.first().map(|o| o.order))
        .ok_or_else(|| anyhow::anyhow!("No forecast orders found for {}", primary))?;

    let query = ForecastQuery {
        feature: feature.to_string(),
        order,
        primary,
        comparison: compare,
    };
    let chart_path = config
        .dashboard_dir
        .join(format!("forecast_{}_{}.png", feature, query.primary));
    let drawn = dashboard::render_forecast(
        &query,
        &config.regional_dir,
        &catalog,
        config.forecast.level,
        &chart_path,
    )?;
    println!("✓ Forecast chart ({} locations): {}", drawn, chart_path.display());
    Ok(())
}
