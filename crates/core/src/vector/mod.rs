//! In-memory k-nearest-neighbor indexes over chunk embeddings.
//!
//! Vectors are stored row-major in one contiguous `Vec<f32>`; the row number
//! is the chunk ordinal. Distances are squared Euclidean.

pub mod codec;
pub mod flat;
pub mod ivf;
pub mod kmeans;

pub use flat::FlatIndex;
pub use ivf::IvfIndex;

use crate::error::IndexError;
use crate::settings::IndexingSettings;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub ordinal: usize,
    pub distance: f32,
}

/// Ascending distance, then ascending ordinal.
pub(crate) fn by_distance(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.ordinal.cmp(&b.ordinal))
}

pub(crate) fn nearest(mut candidates: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    if candidates.len() > k && k > 0 {
        candidates.select_nth_unstable_by(k - 1, by_distance);
        candidates.truncate(k);
    }
    if k == 0 {
        candidates.clear();
    }
    candidates.sort_by(by_distance);
    candidates
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Flat,
    Clustered,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat => f.write_str("flat"),
            Self::Clustered => f.write_str("clustered"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VectorIndex {
    Flat(FlatIndex),
    Clustered(IvfIndex),
}

impl VectorIndex {
    /// Pick the structure by corpus size: above `ivf_threshold` vectors the
    /// clustered index is trained, otherwise a flat scan is used.
    pub fn build(
        data: Vec<f32>,
        dim: usize,
        settings: &IndexingSettings,
    ) -> Result<Self, IndexError> {
        let flat = FlatIndex::new(dim, data)?;
        let count = flat.len();

        if count > settings.ivf_threshold {
            info!(
                chunks = count,
                nlist = settings.nlist,
                "large corpus, training clustered index"
            );
            let ivf = IvfIndex::train(
                flat,
                kmeans::KMeansConfig {
                    clusters: settings.nlist,
                    iterations: settings.kmeans_iterations,
                    min_points_per_centroid: settings.min_points_per_centroid,
                },
                settings.nprobe,
            )?;
            Ok(Self::Clustered(ivf))
        } else {
            info!(chunks = count, "using flat index");
            Ok(Self::Flat(flat))
        }
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Flat(_) => IndexKind::Flat,
            Self::Clustered(_) => IndexKind::Clustered,
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Self::Flat(index) => index.dim(),
            Self::Clustered(index) => index.dim(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Flat(index) => index.len(),
            Self::Clustered(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `k` nearest neighbors of `query`, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dim() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim(),
                actual: query.len(),
            });
        }

        Ok(match self {
            Self::Flat(index) => index.search(query, k),
            Self::Clustered(index) => index.search(query, k),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        codec::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        codec::decode(bytes)
    }
}

/// Flatten provider output into one row-major buffer, checking every row.
pub fn flatten(vectors: Vec<Vec<f32>>, dim: usize) -> Result<Vec<f32>, IndexError> {
    let mut data = Vec::with_capacity(vectors.len() * dim);
    for vector in vectors {
        if vector.len() != dim {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
        data.extend(vector);
    }
    Ok(data)
}
