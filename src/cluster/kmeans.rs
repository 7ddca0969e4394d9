//! K-Means clustering of regions over PCA-reduced market snapshots

use super::{assign, write_label_file, ClusterMethod, ClusterRun};
use crate::config::{KMeansSettings, ALL_RESIDENTIAL};
use crate::data::{self, PERIOD_END_COLUMN, REGION_COLUMN};
use crate::locations::Coordinates;
use crate::region;
use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use linfa_preprocessing::linear_scaling::LinearScaler;
use linfa_reduction::Pca;
use ndarray::{Array1, Array2};
use polars::prelude::{col, lit, DataFrame, DataType, IntoLazy};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::Path;

/// Latest-period market snapshot, one row per region
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    /// Region display labels
    pub cities: Vec<String>,
    /// Float feature names, in column order
    pub feature_names: Vec<String>,
    /// Raw feature values (n_regions, n_features)
    pub features: Array2<f64>,
}

/// Fitted K-Means model with its assignments
#[derive(Debug)]
pub struct KMeansModel {
    /// Fitted K-Means model from linfa
    pub model: KMeans<f64, L2Dist>,
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignments for the training rows
    pub labels: Array1<usize>,
    /// Cluster centroids in embedding space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl KMeansModel {
    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Build the latest-period snapshot of all-residential regions
///
/// Every Float64 column becomes a feature. Rows holding a missing or
/// non-finite value are dropped.
pub fn market_snapshot(df: &DataFrame) -> crate::Result<MarketSnapshot> {
    let residential = data::filter_property_type(df, ALL_RESIDENTIAL)?;
    let periods = data::string_column(&residential, PERIOD_END_COLUMN)?;
    let latest = periods
        .iter()
        .flatten()
        .max()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("No periods found for '{}'", ALL_RESIDENTIAL))?;

    let snapshot = residential
        .lazy()
        .filter(col(PERIOD_END_COLUMN).cast(DataType::String).eq(lit(latest.as_str())))
        .collect()?;

    let feature_names: Vec<String> = snapshot
        .get_columns()
        .iter()
        .filter(|c| c.dtype() == &DataType::Float64)
        .map(|c| c.name().to_string())
        .collect();
    if feature_names.is_empty() {
        anyhow::bail!("Snapshot has no float features");
    }

    let columns: Vec<Vec<Option<f64>>> = feature_names
        .iter()
        .map(|name| data::float_column(&snapshot, name))
        .collect::<crate::Result<_>>()?;
    let regions = data::string_column(&snapshot, REGION_COLUMN)?;

    let mut cities = Vec::new();
    let mut values = Vec::new();
    for (row, region_name) in regions.iter().enumerate() {
        let Some(region_name) = region_name else {
            continue;
        };
        let row_values: Option<Vec<f64>> = columns
            .iter()
            .map(|column| column[row].filter(|v| v.is_finite()))
            .collect();
        match row_values {
            Some(row_values) => {
                cities.push(region::display_label(region_name));
                values.extend(row_values);
            }
            None => tracing::debug!(region = %region_name, "Dropping incomplete snapshot row"),
        }
    }

    let features = Array2::from_shape_vec((cities.len(), feature_names.len()), values)?;
    tracing::debug!(
        period = %latest,
        regions = cities.len(),
        features = feature_names.len(),
        "Built market snapshot"
    );

    Ok(MarketSnapshot {
        cities,
        feature_names,
        features,
    })
}

/// Fit a standard scaler on the snapshot and scale every column
///
/// Constant columns are centred but left unscaled.
pub fn standardize(features: &Array2<f64>) -> crate::Result<Array2<f64>> {
    let dataset = Dataset::new(features.clone(), Array1::<usize>::zeros(features.nrows()));
    let scaler = LinearScaler::standard().fit(&dataset)?;
    Ok(scaler.transform(features.clone()))
}

/// Embed each region in the principal axes of the transposed scaled matrix
///
/// Features are the PCA samples and regions its dimensions, so the
/// transposed components hold one row per region and every embedding
/// column has unit norm. The component count is capped by the rank of the
/// centred matrix.
pub fn reduce(scaled: &Array2<f64>, n_components: usize) -> crate::Result<Array2<f64>> {
    let by_feature = scaled.t().to_owned();
    let max_rank = by_feature.nrows().saturating_sub(1).min(by_feature.ncols());
    let n_components = n_components.min(max_rank);
    if n_components == 0 {
        anyhow::bail!(
            "Not enough data for PCA ({} regions x {} features)",
            scaled.nrows(),
            scaled.ncols()
        );
    }

    let n_samples = by_feature.nrows();
    let dataset = Dataset::new(by_feature, Array1::<usize>::zeros(n_samples));
    let pca = Pca::params(n_components).fit(&dataset)?;
    Ok(pca.components().t().to_owned())
}

/// Fit K-Means on an embedding
pub fn fit_kmeans(
    embedding: &Array2<f64>,
    n_clusters: usize,
    settings: &KMeansSettings,
) -> crate::Result<KMeansModel> {
    if n_clusters < 2 {
        anyhow::bail!("Number of clusters must be at least 2");
    }
    if embedding.nrows() < n_clusters {
        anyhow::bail!(
            "Number of data points ({}) must be at least equal to number of clusters ({})",
            embedding.nrows(),
            n_clusters
        );
    }

    let n_samples = embedding.nrows();
    let targets: Array1<usize> = Array1::zeros(n_samples);
    let dataset = Dataset::new(embedding.clone(), targets);

    let rng = StdRng::seed_from_u64(settings.seed);
    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .max_n_iterations(settings.max_iters)
        .tolerance(settings.tolerance)
        .fit(&dataset)?;

    let labels: Array1<usize> = model.predict(embedding);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(embedding, &labels, &centroids);

    Ok(KMeansModel {
        model,
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Cluster the snapshot for every k in the configured range and write one
/// label file per k
pub fn run_kmeans(
    snapshot: &MarketSnapshot,
    locations: &HashMap<String, Coordinates>,
    settings: &KMeansSettings,
    out_dir: &Path,
) -> crate::Result<Vec<ClusterRun>> {
    let scaled = standardize(&snapshot.features)?;
    let embedding = reduce(&scaled, settings.n_components)?;

    let mut runs = Vec::new();
    for k in settings.k_range() {
        if k > embedding.nrows() {
            tracing::warn!(k, regions = embedding.nrows(), "Too few regions, skipping k");
            continue;
        }

        let model = fit_kmeans(&embedding, k, settings)?;
        let labels: Vec<usize> = model.labels.to_vec();
        let assignments = assign(&snapshot.cities, &labels, locations);
        let path = ClusterMethod::KMeans.label_file(out_dir, k);
        write_label_file(&assignments, &path)?;

        tracing::info!(
            k,
            inertia = model.inertia,
            sizes = ?model.cluster_sizes(),
            "K-Means clustering written"
        );
        runs.push(ClusterRun {
            k,
            inertia: model.inertia,
            path,
        });
    }
    Ok(runs)
}

fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;
    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            inertia += features
                .row(i)
                .iter()
                .zip(centroids.row(cluster).iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>();
        }
    }
    inertia
}
