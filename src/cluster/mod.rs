//! Region clustering by market similarity
//!
//! Two methods share one output format: K-Means over PCA-reduced market
//! snapshots, and k-means under dynamic time warping over year-over-year
//! price series. Each run writes one label file per cluster count with the
//! header `city,cluster,latitude,longitude`.

pub mod dtw;
pub mod kmeans;

use crate::data;
use crate::locations::Coordinates;
use polars::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub use dtw::{dtw_distance, DtwClustering, TimeSeriesKMeans};
pub use kmeans::{fit_kmeans, KMeansModel};

/// Clustering method, which also names the label files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterMethod {
    KMeans,
    Dtw,
}

impl ClusterMethod {
    /// File name prefix, e.g. `kmeans_6.csv` or `DTW_6.csv`
    pub fn file_prefix(self) -> &'static str {
        match self {
            ClusterMethod::KMeans => "kmeans",
            ClusterMethod::Dtw => "DTW",
        }
    }

    pub fn label_file(self, dir: &Path, k: usize) -> PathBuf {
        dir.join(format!("{}_{}.csv", self.file_prefix(), k))
    }
}

impl fmt::Display for ClusterMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterMethod::KMeans => write!(f, "K-Means"),
            ClusterMethod::Dtw => write!(f, "DTW"),
        }
    }
}

/// One region's cluster label, with coordinates when they are known
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    pub city: String,
    pub cluster: Option<usize>,
    pub coordinates: Option<Coordinates>,
}

/// Result of clustering with one value of k
#[derive(Debug, Clone)]
pub struct ClusterRun {
    pub k: usize,
    pub inertia: f64,
    pub path: PathBuf,
}

/// Pair region labels with cluster ids and look up their coordinates
pub fn assign(
    cities: &[String],
    labels: &[usize],
    locations: &HashMap<String, Coordinates>,
) -> Vec<ClusterAssignment> {
    cities
        .iter()
        .zip(labels.iter())
        .map(|(city, &cluster)| ClusterAssignment {
            city: city.clone(),
            cluster: Some(cluster),
            coordinates: locations.get(city).copied(),
        })
        .collect()
}

/// Write a label file, leaving coordinates empty where unknown
pub fn write_label_file(assignments: &[ClusterAssignment], path: &Path) -> crate::Result<()> {
    let mut df = df!(
        "city" => assignments.iter().map(|a| a.city.as_str()).collect::<Vec<_>>(),
        "cluster" => assignments.iter().map(|a| a.cluster.map(|c| c as u32)).collect::<Vec<_>>(),
        "latitude" => assignments.iter().map(|a| a.coordinates.map(|c| c.latitude)).collect::<Vec<_>>(),
        "longitude" => assignments.iter().map(|a| a.coordinates.map(|c| c.longitude)).collect::<Vec<_>>()
    )?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid label file path {}", path.display()))?;
    data::save_table(&mut df, dir, name)?;
    Ok(())
}

/// Read a label file back into assignments
pub fn read_label_file(path: &Path) -> crate::Result<Vec<ClusterAssignment>> {
    let df = data::load_market_table(path)?;
    let cities = data::string_column(&df, "city")?;
    let clusters = data::float_column(&df, "cluster")?;
    let latitudes = data::float_column(&df, "latitude")?;
    let longitudes = data::float_column(&df, "longitude")?;

    Ok(cities
        .into_iter()
        .zip(clusters)
        .zip(latitudes.into_iter().zip(longitudes))
        .filter_map(|((city, cluster), (lat, lon))| {
            let coordinates = match (lat, lon) {
                (Some(latitude), Some(longitude)) => Some(Coordinates {
                    latitude,
                    longitude,
                }),
                _ => None,
            };
            Some(ClusterAssignment {
                city: city?,
                cluster: cluster.filter(|c| *c >= 0.0).map(|c| c as usize),
                coordinates,
            })
        })
        .collect())
}
