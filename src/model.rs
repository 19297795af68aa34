//! Seeded K-Means clustering on standardized RFM features

use std::collections::BTreeSet;

use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use crate::config::SegmentationConfig;

/// Column-wise z-score scaling
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl StandardScaler {
    /// Population standard deviation; constant columns scale by 1
    pub fn fit(raw: &Array2<f64>) -> Self {
        let mean = raw
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(raw.ncols()));
        let std = raw
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        Self { mean, std }
    }

    pub fn transform(&self, raw: &Array2<f64>) -> Array2<f64> {
        (raw - &self.mean) / &self.std
    }
}

/// K-Means fit with its assignments and quality metrics
#[derive(Debug, Clone)]
pub struct KMeansModel {
    pub n_clusters: usize,
    /// Cluster of each training row
    pub labels: Array1<usize>,
    /// Centroids in standardized space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl KMeansModel {
    /// Rows per cluster, indexed by cluster id
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Mean silhouette coefficient over the rows in `sample`
    pub fn silhouette(&self, features: &Array2<f64>, sample: &[usize]) -> f64 {
        if sample.len() < 2 {
            return 0.0;
        }

        let mut silhouette_sum = 0.0;
        for &i in sample {
            let point = features.row(i);
            let cluster_label = self.labels[i];

            let mut same_sum = 0.0;
            let mut same_count = 0usize;
            let mut other_sums = vec![0.0; self.n_clusters];
            let mut other_counts = vec![0usize; self.n_clusters];

            for &j in sample {
                if i == j {
                    continue;
                }
                let distance = euclidean_distance(&point, &features.row(j));
                let other_label = self.labels[j];
                if other_label == cluster_label {
                    same_sum += distance;
                    same_count += 1;
                } else if other_label < self.n_clusters {
                    other_sums[other_label] += distance;
                    other_counts[other_label] += 1;
                }
            }

            // singleton clusters score 0
            if same_count == 0 {
                continue;
            }
            let a_i = same_sum / same_count as f64;
            let b_i = other_sums
                .iter()
                .zip(&other_counts)
                .filter(|(_, &count)| count > 0)
                .map(|(sum, &count)| sum / count as f64)
                .fold(f64::INFINITY, f64::min);

            if b_i.is_finite() && a_i.max(b_i) > 0.0 {
                silhouette_sum += (b_i - a_i) / a_i.max(b_i);
            }
        }

        silhouette_sum / sample.len() as f64
    }
}

/// Fit K-Means with `k` clusters on standardized features
pub fn fit_kmeans(
    features: &Array2<f64>,
    k: usize,
    config: &SegmentationConfig,
    seed: u64,
) -> crate::Result<KMeansModel> {
    if k < 2 {
        anyhow::bail!("K-Means needs at least 2 clusters, got {}", k);
    }
    let distinct = distinct_rows(features);
    if distinct < k {
        anyhow::bail!(
            "only {} distinct donor profiles for {} clusters",
            distinct,
            k
        );
    }

    let dataset = DatasetBase::from(features.clone());
    let model = KMeans::params_with(k, StdRng::seed_from_u64(seed), L2Dist)
        .n_runs(config.n_runs)
        .max_n_iterations(config.max_iterations)
        .tolerance(config.tolerance)
        .fit(&dataset)?;

    let labels: Array1<usize> = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    Ok(KMeansModel {
        n_clusters: k,
        labels,
        centroids,
        inertia,
    })
}

/// Seeded row sample used for silhouette scoring; every row when the cohort is small
pub fn silhouette_sample(n_rows: usize, sample_size: usize, seed: u64) -> Vec<usize> {
    if n_rows <= sample_size {
        return (0..n_rows).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = sample(&mut rng, n_rows, sample_size).into_vec();
    rows.sort_unstable();
    rows
}

fn distinct_rows(features: &Array2<f64>) -> usize {
    features
        .outer_iter()
        .map(|row| row.iter().map(|v| v.to_bits()).collect::<Vec<u64>>())
        .collect::<BTreeSet<_>>()
        .len()
}

/// Within-cluster sum of squares
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    let mut inertia = 0.0;
    for (i, &cluster) in labels.iter().enumerate() {
        if cluster < centroids.nrows() {
            let distance = euclidean_distance(&features.row(i), &centroids.row(cluster));
            inertia += distance * distance;
        }
    }
    inertia
}

fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn three_blobs() -> Array2<f64> {
        let mut rows = Vec::new();
        for (cx, cy, cz) in [(0.0, 0.0, 0.0), (10.0, 10.0, 10.0), (-10.0, 10.0, -10.0)] {
            for i in 0..10 {
                let jitter = i as f64 * 0.05;
                rows.extend_from_slice(&[cx + jitter, cy - jitter, cz + jitter / 2.0]);
            }
        }
        Array2::from_shape_vec((30, 3), rows).unwrap()
    }

    #[test]
    fn test_fit_kmeans_separates_blobs() {
        let features = three_blobs();
        let model = fit_kmeans(&features, 3, &SegmentationConfig::default(), 42).unwrap();

        assert_eq!(model.n_clusters, 3);
        assert_eq!(model.labels.len(), 30);
        assert_eq!(model.centroids.shape(), &[3, 3]);
        assert_eq!(model.cluster_sizes(), vec![10, 10, 10]);
        for blob in 0..3 {
            let first = model.labels[blob * 10];
            assert!((blob * 10..blob * 10 + 10).all(|i| model.labels[i] == first));
        }

        let all: Vec<usize> = (0..30).collect();
        assert!(model.silhouette(&features, &all) > 0.9);
    }

    #[test]
    fn test_same_seed_same_clusters() {
        let features = three_blobs();
        let config = SegmentationConfig::default();
        let a = fit_kmeans(&features, 4, &config, 7).unwrap();
        let b = fit_kmeans(&features, 4, &config, 7).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.inertia, b.inertia);
    }

    #[test]
    fn test_too_few_distinct_rows() {
        let features = Array2::from_shape_vec((4, 3), vec![1.0; 12]).unwrap();
        assert!(fit_kmeans(&features, 3, &SegmentationConfig::default(), 1).is_err());
    }

    #[test]
    fn test_scaler_handles_constant_columns() {
        let raw = array![[1.0, 5.0], [3.0, 5.0]];
        let scaler = StandardScaler::fit(&raw);
        let scaled = scaler.transform(&raw);
        assert_eq!(scaled, array![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_silhouette_sample_is_seeded() {
        assert_eq!(silhouette_sample(5, 10, 3), vec![0, 1, 2, 3, 4]);
        let a = silhouette_sample(1000, 50, 3);
        assert_eq!(a, silhouette_sample(1000, 50, 3));
        assert_eq!(a.len(), 50);
    }
}
