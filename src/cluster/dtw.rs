//! K-means under dynamic time warping for variable-length price series
//!
//! Centroids are updated with DTW barycenter averaging (DBA): every member
//! series is aligned to the current centroid and each centroid point becomes
//! the mean of the member points warped onto it.

use super::{assign, write_label_file, ClusterMethod, ClusterRun};
use crate::config::{DtwSettings, SINGLE_FAMILY};
use crate::data::{self, PERIOD_BEGIN_COLUMN, REGION_COLUMN};
use crate::locations::Coordinates;
use crate::region;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::Path;

/// DBA refinement passes per centroid update
const DBA_ITERATIONS: usize = 5;

/// Accumulated-cost matrix for `a` against `b` with squared local cost
fn cost_matrix(a: &[f64], b: &[f64]) -> Vec<Vec<f64>> {
    let (n, m) = (a.len(), b.len());
    let mut cost = vec![vec![f64::INFINITY; m + 1]; n + 1];
    cost[0][0] = 0.0;
    for i in 1..=n {
        for j in 1..=m {
            let local = (a[i - 1] - b[j - 1]).powi(2);
            cost[i][j] = local + cost[i - 1][j].min(cost[i][j - 1]).min(cost[i - 1][j - 1]);
        }
    }
    cost
}

/// DTW distance: square root of the minimal accumulated squared cost
///
/// Empty input on either side yields infinity.
pub fn dtw_distance(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return f64::INFINITY;
    }
    cost_matrix(a, b)[a.len()][b.len()].sqrt()
}

/// Optimal warping path as `(index in a, index in b)` pairs, start to end
pub fn dtw_path(a: &[f64], b: &[f64]) -> Vec<(usize, usize)> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let cost = cost_matrix(a, b);

    let (mut i, mut j) = (a.len(), b.len());
    let mut path = vec![(i - 1, j - 1)];
    while i > 1 || j > 1 {
        if i == 1 {
            j -= 1;
        } else if j == 1 {
            i -= 1;
        } else {
            let diagonal = cost[i - 1][j - 1];
            let up = cost[i - 1][j];
            let left = cost[i][j - 1];
            if diagonal <= up && diagonal <= left {
                i -= 1;
                j -= 1;
            } else if up <= left {
                i -= 1;
            } else {
                j -= 1;
            }
        }
        path.push((i - 1, j - 1));
    }
    path.reverse();
    path
}

/// Scale a series to [0, 1]; a constant series maps to zeros
pub fn min_max_scale(series: &[f64]) -> Vec<f64> {
    let min = series.iter().copied().fold(f64::INFINITY, f64::min);
    let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if !range.is_finite() || range <= f64::EPSILON {
        return vec![0.0; series.len()];
    }
    series.iter().map(|v| (v - min) / range).collect()
}

/// Refine a centroid against its members with DTW barycenter averaging
fn dba_update(centroid: &[f64], members: &[&Vec<f64>]) -> Vec<f64> {
    let mut current = centroid.to_vec();
    for _ in 0..DBA_ITERATIONS {
        let mut sums = vec![0.0; current.len()];
        let mut counts = vec![0usize; current.len()];
        for member in members {
            for (ci, si) in dtw_path(&current, member) {
                sums[ci] += member[si];
                counts[ci] += 1;
            }
        }
        let next: Vec<f64> = sums
            .iter()
            .zip(counts.iter())
            .zip(current.iter())
            .map(|((sum, &count), &old)| if count > 0 { sum / count as f64 } else { old })
            .collect();
        let shift: f64 = next.iter().zip(current.iter()).map(|(a, b)| (a - b).abs()).sum();
        current = next;
        if shift < 1e-9 {
            break;
        }
    }
    current
}

/// K-means configuration under the DTW metric
#[derive(Debug, Clone)]
pub struct TimeSeriesKMeans {
    pub n_clusters: usize,
    pub max_iter: usize,
    pub tolerance: f64,
    pub seed: u64,
}

/// Fitted DTW clustering
#[derive(Debug, Clone)]
pub struct DtwClustering {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    /// Mean squared DTW distance of each series to its centroid
    pub inertia: f64,
    pub iterations: usize,
}

impl TimeSeriesKMeans {
    pub fn new(n_clusters: usize, settings: &DtwSettings) -> Self {
        Self {
            n_clusters,
            max_iter: settings.max_iters,
            tolerance: settings.tolerance,
            seed: settings.seed,
        }
    }

    /// Fit on a set of series, which may differ in length
    pub fn fit(&self, series: &[Vec<f64>]) -> crate::Result<DtwClustering> {
        if self.n_clusters < 1 {
            anyhow::bail!("Number of clusters must be positive");
        }
        if series.len() < self.n_clusters {
            anyhow::bail!(
                "Number of series ({}) must be at least equal to number of clusters ({})",
                series.len(),
                self.n_clusters
            );
        }
        if series.iter().any(|s| s.is_empty()) {
            anyhow::bail!("Cannot cluster an empty series");
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = self.init_centroids(series, &mut rng);
        let mut labels = vec![0; series.len()];
        let mut inertia = f64::INFINITY;
        let mut iterations = 0;

        while iterations < self.max_iter {
            iterations += 1;
            let (new_labels, distances) = assign_nearest(series, &centroids);
            let new_inertia = distances.iter().map(|d| d * d).sum::<f64>() / series.len() as f64;
            labels = new_labels;

            let converged = (inertia - new_inertia).abs() < self.tolerance;
            inertia = new_inertia;
            if converged {
                break;
            }

            for (k, centroid) in centroids.iter_mut().enumerate() {
                let members: Vec<&Vec<f64>> = series
                    .iter()
                    .zip(labels.iter())
                    .filter(|(_, &label)| label == k)
                    .map(|(s, _)| s)
                    .collect();

                if members.is_empty() {
                    // Re-seed an empty cluster with the worst-fitting series
                    let worst = distances
                        .iter()
                        .enumerate()
                        .max_by(|a, b| a.1.total_cmp(b.1))
                        .map(|(i, _)| i)
                        .unwrap_or(0);
                    *centroid = series[worst].clone();
                } else {
                    *centroid = dba_update(centroid, &members);
                }
            }
        }

        // Final labels and inertia against the final centroids
        let (labels_final, distances) = assign_nearest(series, &centroids);
        if labels_final != labels {
            tracing::debug!(iterations, "DTW assignments moved after last update");
        }
        let inertia = distances.iter().map(|d| d * d).sum::<f64>() / series.len() as f64;

        Ok(DtwClustering {
            labels: labels_final,
            centroids,
            inertia,
            iterations,
        })
    }

    /// k-means++ seeding under DTW distance
    fn init_centroids(&self, series: &[Vec<f64>], rng: &mut StdRng) -> Vec<Vec<f64>> {
        let first = rng.gen_range(0..series.len());
        let mut chosen = vec![first];

        while chosen.len() < self.n_clusters {
            let weights: Vec<f64> = series
                .iter()
                .map(|s| {
                    chosen
                        .iter()
                        .map(|&c| dtw_distance(s, &series[c]).powi(2))
                        .fold(f64::INFINITY, f64::min)
                })
                .collect();
            let total: f64 = weights.iter().sum();

            let next = if total > 0.0 && total.is_finite() {
                let mut target = rng.gen_range(0.0..total);
                let mut pick = series.len() - 1;
                for (i, w) in weights.iter().enumerate() {
                    if target < *w {
                        pick = i;
                        break;
                    }
                    target -= w;
                }
                pick
            } else {
                // All remaining series coincide with a centroid
                (0..series.len()).find(|i| !chosen.contains(i)).unwrap_or(0)
            };
            chosen.push(next);
        }

        chosen.into_iter().map(|i| series[i].clone()).collect()
    }
}

fn assign_nearest(series: &[Vec<f64>], centroids: &[Vec<f64>]) -> (Vec<usize>, Vec<f64>) {
    series
        .iter()
        .map(|s| {
            centroids
                .iter()
                .enumerate()
                .map(|(k, c)| (k, dtw_distance(s, c)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap_or((0, f64::INFINITY))
        })
        .unzip()
}

/// Scaled year-over-year series for every eligible regional file
///
/// Uses single-family rows. Regions whose presence column has no value, or
/// that lack the series column, are skipped.
pub fn load_dtw_dataset(
    regional_dir: &Path,
    settings: &DtwSettings,
) -> crate::Result<(Vec<String>, Vec<Vec<f64>>)> {
    let mut cities = Vec::new();
    let mut series = Vec::new();

    for path in data::csv_files(regional_dir)? {
        let df = data::load_market_table(&path)?;
        let df = data::filter_property_type(&df, SINGLE_FAMILY)?;
        if df.height() == 0 {
            continue;
        }

        let present = match data::float_column(&df, &settings.presence_column) {
            Ok(values) => values.iter().any(|v| v.is_some()),
            Err(_) => false,
        };
        if !present {
            tracing::debug!(path = %path.display(), "No sale prices, skipping region");
            continue;
        }

        let Ok(values) = data::float_column(&df, &settings.series_column) else {
            tracing::warn!(
                path = %path.display(),
                column = %settings.series_column,
                "Series column missing, skipping region"
            );
            continue;
        };
        let periods = data::string_column(&df, PERIOD_BEGIN_COLUMN)?;
        let mut rows: Vec<(String, f64)> = periods
            .into_iter()
            .zip(values)
            .filter_map(|(p, v)| Some((p?, v.filter(|v| v.is_finite())?)))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        if rows.is_empty() {
            continue;
        }

        let city = data::string_column(&df, REGION_COLUMN)?
            .into_iter()
            .flatten()
            .next()
            .map(|r| region::display_label(&r))
            .unwrap_or_else(|| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(region::label_from_stem)
                    .unwrap_or_default()
            });

        let raw: Vec<f64> = rows.into_iter().map(|(_, v)| v).collect();
        cities.push(city);
        series.push(min_max_scale(&raw));
    }

    tracing::info!(regions = cities.len(), "Loaded DTW dataset");
    Ok((cities, series))
}

/// Cluster the series for every k in the configured range and write one
/// label file per k
pub fn run_dtw(
    cities: &[String],
    series: &[Vec<f64>],
    locations: &HashMap<String, Coordinates>,
    settings: &DtwSettings,
    out_dir: &Path,
) -> crate::Result<Vec<ClusterRun>> {
    let mut runs = Vec::new();
    for k in settings.k_range() {
        if k > series.len() {
            tracing::warn!(k, regions = series.len(), "Too few regions, skipping k");
            continue;
        }

        let clustering = TimeSeriesKMeans::new(k, settings).fit(series)?;
        let assignments = assign(cities, &clustering.labels, locations);
        let path = ClusterMethod::Dtw.label_file(out_dir, k);
        write_label_file(&assignments, &path)?;

        tracing::info!(
            k,
            inertia = clustering.inertia,
            iterations = clustering.iterations,
            "DTW clustering written"
        );
        runs.push(ClusterRun {
            k,
            inertia: clustering.inertia,
            path,
        });
    }
    Ok(runs)
}
