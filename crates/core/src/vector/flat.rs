use super::{nearest, squared_l2, Neighbor};
use crate::error::IndexError;

/// Exact index: every query scans every vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dim == 0 || data.len() % dim != 0 {
            return Err(IndexError::Codec(format!(
                "{} values do not form rows of dimension {dim}",
                data.len()
            )));
        }
        Ok(Self { dim, data })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, ordinal: usize) -> &[f32] {
        &self.data[ordinal * self.dim..(ordinal + 1) * self.dim]
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<Neighbor> {
        let candidates = self
            .data
            .chunks_exact(self.dim)
            .enumerate()
            .map(|(ordinal, row)| Neighbor {
                ordinal,
                distance: squared_l2(query, row),
            })
            .collect();
        nearest(candidates, k)
    }
}
