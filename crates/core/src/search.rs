use crate::error::{IndexError, SearchError};
use crate::models::SearchHit;
use crate::pipeline::LoadedIndex;
use crate::sanitizer::sanitize_query;
use crate::settings::SearchSettings;
use crate::traits::EmbeddingProvider;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Distance to similarity: 1 at distance 0, approaching 0 at the threshold.
pub fn score(distance: f32, threshold: f32) -> f32 {
    (1.0 - distance / threshold).max(0.0)
}

/// Query side of the index. Holds the currently served generation; searches
/// clone the handle and never block each other. Hits are joined against the
/// chunk table carried by that same handle, so a swap mid-query cannot pair
/// old vectors with new metadata.
pub struct SearchEngine {
    settings: SearchSettings,
    embedder: Arc<dyn EmbeddingProvider>,
    current: RwLock<Option<Arc<LoadedIndex>>>,
}

impl SearchEngine {
    pub fn new(settings: SearchSettings, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            settings,
            embedder,
            current: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn is_ready(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn current(&self) -> Option<Arc<LoadedIndex>> {
        self.current.read().clone()
    }

    pub fn install(&self, loaded: LoadedIndex) {
        *self.current.write() = Some(Arc::new(loaded));
    }

    /// Run `replace` with the write lock held and install what it returns.
    /// Searches that start during the swap wait for the new generation.
    pub fn swap_with<F>(&self, replace: F) -> Result<Arc<LoadedIndex>, IndexError>
    where
        F: FnOnce() -> Result<LoadedIndex, IndexError>,
    {
        let mut current = self.current.write();
        let loaded = Arc::new(replace()?);
        *current = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    pub fn search(&self, raw_query: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.search_with(raw_query, self.settings.top_k)
    }

    /// Up to `top_k` hits with distance strictly below the threshold, closest
    /// first. Ordinals with no metadata are dropped.
    pub fn search_with(&self, raw_query: &str, top_k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let Some(loaded) = self.current() else {
            return Err(SearchError::NotReady);
        };

        let query = sanitize_query(raw_query, self.settings.max_query_length)
            .map_err(SearchError::InvalidQuery)?;
        let vector = self.embedder.embed(&query)?;
        let neighbors = loaded.index.search(&vector, top_k)?;

        let threshold = self.settings.threshold;
        let mut hits = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            if neighbor.distance >= threshold {
                continue;
            }

            let Some(chunk) = loaded.chunk(neighbor.ordinal) else {
                debug!(ordinal = neighbor.ordinal, "no metadata for ordinal, dropped");
                continue;
            };

            hits.push(SearchHit {
                ordinal: neighbor.ordinal,
                file: chunk.file.clone(),
                unit_id: chunk.unit_id,
                text: chunk.text.clone(),
                distance: neighbor.distance,
                score: score(neighbor.distance, threshold),
            });
        }

        Ok(hits)
    }
}
