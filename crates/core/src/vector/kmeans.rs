//! Lloyd's k-means used to train the coarse quantizer of the clustered index.

use super::squared_l2;
use crate::error::IndexError;
use rayon::prelude::*;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeansConfig {
    pub clusters: usize,
    pub iterations: usize,
    pub min_points_per_centroid: usize,
}

/// Index of the closest centroid and the squared distance to it.
pub fn assign(point: &[f32], centroids: &[f32], dim: usize) -> (usize, f32) {
    centroids
        .chunks_exact(dim)
        .enumerate()
        .map(|(cluster, centroid)| (cluster, squared_l2(point, centroid)))
        .fold((0, f32::INFINITY), |best, current| {
            if current.1 < best.1 {
                current
            } else {
                best
            }
        })
}

/// Train `config.clusters` centroids over the row-major `data`.
///
/// Seeding is deterministic (evenly strided samples), so the same input
/// always gives the same centroids.
pub fn train(data: &[f32], dim: usize, config: KMeansConfig) -> Result<Vec<f32>, IndexError> {
    let samples = data.len() / dim.max(1);
    let clusters = config.clusters.max(1);
    let required = clusters * config.min_points_per_centroid.max(1);

    if samples < required {
        return Err(IndexError::InsufficientData {
            samples,
            required,
            clusters,
        });
    }

    let mut centroids = Vec::with_capacity(clusters * dim);
    for cluster in 0..clusters {
        let sample = cluster * samples / clusters;
        centroids.extend_from_slice(&data[sample * dim..(sample + 1) * dim]);
    }

    let mut previous: Vec<usize> = Vec::new();
    for iteration in 0..config.iterations {
        let assignments: Vec<(usize, f32)> = data
            .par_chunks_exact(dim)
            .map(|point| assign(point, &centroids, dim))
            .collect();

        let labels: Vec<usize> = assignments.iter().map(|(cluster, _)| *cluster).collect();
        if labels == previous {
            debug!(iteration, "k-means converged");
            break;
        }

        let mut sums = vec![0f32; clusters * dim];
        let mut counts = vec![0usize; clusters];
        for (point, cluster) in data.chunks_exact(dim).zip(&labels) {
            counts[*cluster] += 1;
            for (sum, value) in sums[cluster * dim..(cluster + 1) * dim].iter_mut().zip(point) {
                *sum += value;
            }
        }

        // Empty clusters take over the worst-served points, farthest first.
        let mut outliers: Vec<usize> = (0..samples).collect();
        outliers.sort_by(|a, b| {
            assignments[*b]
                .1
                .total_cmp(&assignments[*a].1)
                .then_with(|| a.cmp(b))
        });
        let mut outliers = outliers.into_iter();

        for cluster in 0..clusters {
            let centroid = &mut centroids[cluster * dim..(cluster + 1) * dim];
            if counts[cluster] > 0 {
                let count = counts[cluster] as f32;
                for (value, sum) in centroid.iter_mut().zip(&sums[cluster * dim..]) {
                    *value = sum / count;
                }
            } else if let Some(point) = outliers.next() {
                centroid.copy_from_slice(&data[point * dim..(point + 1) * dim]);
            }
        }

        previous = labels;
    }

    Ok(centroids)
}
