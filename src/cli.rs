//! Command-line interface definitions and argument parsing

use crate::cluster::ClusterMethod;
use crate::config::PipelineConfig;
use crate::forecast::Order;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Real-estate market pipeline: clean, split, locate, cluster, forecast and chart
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML configuration file; flags given on the command line win
    #[arg(short, long, global = true, env = "HOUSECAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clean the raw market tracker and save it as CSV
    Clean {
        /// Raw market tracker (TSV or CSV)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory for the cleaned table
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output name without extension
        #[arg(short, long)]
        name: Option<String>,

        /// Name the output `data_<timestamp>` instead
        #[arg(long, conflicts_with = "name")]
        timestamp: bool,
    },

    /// Write one CSV per distinct value of a column
    Split {
        /// Cleaned table to split
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Column to split on
        #[arg(long, default_value = "region")]
        column: String,

        /// Directory for the per-value files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,
    },

    /// Geocode every region and save its coordinates
    Locate {
        /// Cleaned table holding the regions
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output CSV of city,latitude,longitude
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pause between lookups in seconds (0 disables)
        #[arg(long)]
        jitter_secs: Option<u64>,
    },

    /// K-Means over PCA-reduced market snapshots
    ClusterKmeans {
        /// Cleaned table
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(long)]
        min_k: Option<usize>,

        #[arg(long)]
        max_k: Option<usize>,

        /// PCA components kept before clustering
        #[arg(long)]
        components: Option<usize>,

        /// Directory for label files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// K-Means under dynamic time warping over year-over-year price series
    ClusterDtw {
        /// Directory of per-region files
        #[arg(short, long)]
        regional_dir: Option<PathBuf>,

        #[arg(long)]
        min_k: Option<usize>,

        #[arg(long)]
        max_k: Option<usize>,

        /// Maximum iterations per k
        #[arg(long)]
        max_iters: Option<usize>,

        /// Directory for label files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Fit ARIMA models per region and write forecasts
    Forecast {
        /// Pick one order per region automatically instead of the full grid
        #[arg(short, long)]
        auto: bool,

        /// Features to forecast (repeatable); defaults to the configured list
        #[arg(short, long = "feature")]
        features: Vec<String>,

        /// Months to forecast
        #[arg(long)]
        horizon: Option<usize>,

        /// Directory of per-region files
        #[arg(short, long)]
        regional_dir: Option<PathBuf>,

        /// Root directory for forecast files
        #[arg(short, long)]
        model_dir: Option<PathBuf>,
    },

    /// Render the cluster map and forecast comparison charts
    Dashboard {
        /// Clustering method of the map
        #[arg(long, value_enum, default_value_t = MethodArg::KMeans)]
        method: MethodArg,

        /// Cluster count of the label file to map
        #[arg(short, long, default_value = "6")]
        k: usize,

        /// Forecast feature
        #[arg(short, long, default_value = "median_sale_price")]
        feature: String,

        /// Location stem, e.g. Austin_TXmetroarea; defaults to the first available
        #[arg(short, long)]
        location: Option<String>,

        /// Second location to compare against
        #[arg(long)]
        compare: Option<String>,

        /// ARIMA order "(p, d, q)"; defaults to the recommended order
        #[arg(long, value_parser = parse_order)]
        order: Option<Order>,

        /// Directory for the rendered images
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

/// Clustering method as accepted on the command line
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodArg {
    #[value(name = "kmeans")]
    KMeans,
    #[value(name = "dtw")]
    Dtw,
}

impl From<MethodArg> for ClusterMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::KMeans => ClusterMethod::KMeans,
            MethodArg::Dtw => ClusterMethod::Dtw,
        }
    }
}

/// Parse an order written as `(p, d, q)` or `p,d,q`
pub fn parse_order(value: &str) -> Result<Order, String> {
    value.parse::<Order>().map_err(|e| e.to_string())
}

impl Command {
    /// Apply flag overrides on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        match self {
            Command::Clean {
                input,
                output_dir,
                name,
                ..
            } => {
                set(&mut config.raw_data, input);
                set(&mut config.cleaned_dir, output_dir);
                set(&mut config.cleaned_name, name);
            }
            Command::Split { output_dir, .. } => {
                set(&mut config.regional_dir, output_dir);
            }
            Command::Locate {
                output,
                jitter_secs,
                ..
            } => {
                set(&mut config.locations_file, output);
                set(&mut config.geocoder.jitter_secs, jitter_secs);
            }
            Command::ClusterKmeans {
                min_k,
                max_k,
                components,
                output_dir,
                ..
            } => {
                set(&mut config.kmeans.min_k, min_k);
                set(&mut config.kmeans.max_k, max_k);
                set(&mut config.kmeans.n_components, components);
                set(&mut config.clusters_dir, output_dir);
            }
            Command::ClusterDtw {
                regional_dir,
                min_k,
                max_k,
                max_iters,
                output_dir,
            } => {
                set(&mut config.regional_dir, regional_dir);
                set(&mut config.dtw.min_k, min_k);
                set(&mut config.dtw.max_k, max_k);
                set(&mut config.dtw.max_iters, max_iters);
                set(&mut config.clusters_dir, output_dir);
            }
            Command::Forecast {
                features,
                horizon,
                regional_dir,
                model_dir,
                ..
            } => {
                if !features.is_empty() {
                    config.forecast.features = features.clone();
                }
                set(&mut config.forecast.horizon, horizon);
                set(&mut config.regional_dir, regional_dir);
                set(&mut config.arima_dir, model_dir);
            }
            Command::Dashboard { output_dir, .. } => {
                set(&mut config.dashboard_dir, output_dir);
            }
        }
    }
}

fn set<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}
