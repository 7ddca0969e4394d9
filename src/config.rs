//! Pipeline configuration: directory layout and stage defaults

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Property type used by cleaning, K-Means, forecasting and the dashboard
pub const ALL_RESIDENTIAL: &str = "All Residential";

/// Property type used by DTW clustering
pub const SINGLE_FAMILY: &str = "Single Family Residential";

/// Directory layout and tunables shared by every subcommand
///
/// Every field has a default, so a TOML file only needs to list overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw market tracker (TSV or CSV)
    pub raw_data: PathBuf,
    /// Directory for cleaned tables
    pub cleaned_dir: PathBuf,
    /// Name of the cleaned table (without extension)
    pub cleaned_name: String,
    /// Directory holding one CSV per region
    pub regional_dir: PathBuf,
    /// Resolved coordinates
    pub locations_file: PathBuf,
    /// Directory for cluster label files
    pub clusters_dir: PathBuf,
    /// Root directory for forecast files, one subdirectory per feature
    pub arima_dir: PathBuf,
    /// Directory for failure logs
    pub log_dir: PathBuf,
    /// Directory for rendered dashboard images
    pub dashboard_dir: PathBuf,
    pub kmeans: KMeansSettings,
    pub dtw: DtwSettings,
    pub forecast: ForecastSettings,
    pub geocoder: GeocoderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KMeansSettings {
    pub min_k: usize,
    pub max_k: usize,
    pub n_components: usize,
    pub seed: u64,
    pub max_iters: u64,
    pub tolerance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DtwSettings {
    pub min_k: usize,
    pub max_k: usize,
    pub seed: u64,
    pub max_iters: usize,
    pub tolerance: f64,
    /// Column holding the year-over-year series
    pub series_column: String,
    /// Column that must have at least one value for a region to be used
    pub presence_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForecastSettings {
    /// Forecast horizon in months
    pub horizon: usize,
    /// Confidence level of the forecast interval
    pub level: f64,
    /// Exclusive upper bound for p, d and q in grid mode
    pub grid_bound: usize,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeocoderSettings {
    pub endpoint: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Pause inserted (with probability one half) between lookups
    pub jitter_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let processed = PathBuf::from("data/processed");
        Self {
            raw_data: PathBuf::from("data/raw/redfin_metro_market_tracker.tsv"),
            cleaned_dir: processed.join("cleaned"),
            cleaned_name: "metro_market_tracker_cleaned".to_string(),
            regional_dir: processed.join("regional"),
            locations_file: processed.join("locations").join("locations.csv"),
            clusters_dir: processed.join("clusters"),
            arima_dir: processed.join("arima"),
            log_dir: PathBuf::from("resources/logs"),
            dashboard_dir: PathBuf::from("dashboard"),
            kmeans: KMeansSettings::default(),
            dtw: DtwSettings::default(),
            forecast: ForecastSettings::default(),
            geocoder: GeocoderSettings::default(),
        }
    }
}

impl Default for KMeansSettings {
    fn default() -> Self {
        Self {
            min_k: 3,
            max_k: 10,
            n_components: 2,
            seed: 6242,
            max_iters: 300,
            tolerance: 1e-4,
        }
    }
}

impl Default for DtwSettings {
    fn default() -> Self {
        Self {
            min_k: 2,
            max_k: 9,
            seed: 0,
            max_iters: 50,
            tolerance: 1e-6,
            series_column: "median_sale_price_yoy".to_string(),
            presence_column: "median_sale_price".to_string(),
        }
    }
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            horizon: 24,
            level: 0.95,
            grid_bound: 4,
            features: vec![
                "median_sale_price".to_string(),
                "median_list_price".to_string(),
                "median_ppsf".to_string(),
                "median_list_ppsf".to_string(),
            ],
        }
    }
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://nominatim.openstreetmap.org/search".to_string(),
            user_agent: "marketLocations".to_string(),
            timeout_secs: 10,
            jitter_secs: 2,
        }
    }
}

impl KMeansSettings {
    pub fn k_range(&self) -> RangeInclusive<usize> {
        self.min_k..=self.max_k
    }
}

impl DtwSettings {
    pub fn k_range(&self) -> RangeInclusive<usize> {
        self.min_k..=self.max_k
    }
}

impl PipelineConfig {
    /// Load a configuration file, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Reject settings that no stage can run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.kmeans.min_k < 2 || self.kmeans.min_k > self.kmeans.max_k {
            anyhow::bail!(
                "K-Means cluster range {}..={} is invalid",
                self.kmeans.min_k,
                self.kmeans.max_k
            );
        }
        if self.dtw.min_k < 2 || self.dtw.min_k > self.dtw.max_k {
            anyhow::bail!(
                "DTW cluster range {}..={} is invalid",
                self.dtw.min_k,
                self.dtw.max_k
            );
        }
        if self.kmeans.n_components == 0 {
            anyhow::bail!("PCA needs at least one component");
        }
        if self.forecast.grid_bound == 0 {
            anyhow::bail!("Forecast grid bound must be positive");
        }
        if self.forecast.horizon == 0 {
            anyhow::bail!("Forecast horizon must be positive");
        }
        if !(0.0..1.0).contains(&self.forecast.level) || self.forecast.level == 0.0 {
            anyhow::bail!("Confidence level must be in (0, 1)");
        }
        Ok(())
    }

    /// Path of the cleaned market table
    pub fn cleaned_file(&self) -> PathBuf {
        self.cleaned_dir.join(format!("{}.csv", self.cleaned_name))
    }
}
