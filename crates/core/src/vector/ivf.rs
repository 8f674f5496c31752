use super::flat::FlatIndex;
use super::kmeans::{self, KMeansConfig};
use super::{nearest, squared_l2, Neighbor};
use crate::error::IndexError;

/// Inverted-file index: every vector belongs to the list of its closest
/// centroid, and a query scans only the `nprobe` closest lists.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfIndex {
    dim: usize,
    nprobe: usize,
    centroids: Vec<f32>,
    lists: Vec<Vec<u32>>,
    vectors: FlatIndex,
}

impl IvfIndex {
    pub fn train(vectors: FlatIndex, config: KMeansConfig, nprobe: usize) -> Result<Self, IndexError> {
        let dim = vectors.dim();
        let centroids = kmeans::train(vectors.data(), dim, config)?;
        let mut lists = vec![Vec::new(); centroids.len() / dim];

        for (ordinal, row) in vectors.data().chunks_exact(dim).enumerate() {
            let (cluster, _) = kmeans::assign(row, &centroids, dim);
            lists[cluster].push(ordinal as u32);
        }

        Ok(Self {
            dim,
            nprobe: nprobe.max(1),
            centroids,
            lists,
            vectors,
        })
    }

    /// Reassemble a trained index; the caller guarantees the lists partition
    /// the ordinals of `vectors`.
    pub(crate) fn from_parts(
        nprobe: usize,
        centroids: Vec<f32>,
        lists: Vec<Vec<u32>>,
        vectors: FlatIndex,
    ) -> Self {
        Self {
            dim: vectors.dim(),
            nprobe: nprobe.max(1),
            centroids,
            lists,
            vectors,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.nprobe = nprobe.max(1);
    }

    pub(crate) fn centroids(&self) -> &[f32] {
        &self.centroids
    }

    pub(crate) fn lists(&self) -> &[Vec<u32>] {
        &self.lists
    }

    pub(crate) fn vectors(&self) -> &FlatIndex {
        &self.vectors
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let probes = nearest(
            self.centroids
                .chunks_exact(self.dim)
                .enumerate()
                .map(|(cluster, centroid)| Neighbor {
                    ordinal: cluster,
                    distance: squared_l2(query, centroid),
                })
                .collect(),
            self.nprobe,
        );

        let candidates = probes
            .iter()
            .flat_map(|probe| &self.lists[probe.ordinal])
            .map(|&ordinal| {
                let ordinal = ordinal as usize;
                Neighbor {
                    ordinal,
                    distance: squared_l2(query, self.vectors.row(ordinal)),
                }
            })
            .collect();

        nearest(candidates, k)
    }
}
