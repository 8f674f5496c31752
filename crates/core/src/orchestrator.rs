use crate::error::{IndexError, SearchError};
use crate::integrity::{self, Manifest};
use crate::models::{IndexSummary, QueryPage, QueryRequest, SearchHit, SkippedDocument};
use crate::pipeline::{BuildPhase, IndexingPipeline, LoadedIndex};
use crate::search::SearchEngine;
use crate::settings::Settings;
use crate::store::MetadataStore;
use crate::traits::{DocumentExtractor, EmbeddingProvider, ProgressObserver};
use crate::vector::IndexKind;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Facade over the pipeline and the engine: keeps the served index in step
/// with a corpus folder and answers paged queries against it.
pub struct SearchCoordinator {
    pipeline: IndexingPipeline,
    engine: SearchEngine,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub ready: bool,
    pub phase: BuildPhase,
    pub chunks: usize,
    pub kind: Option<IndexKind>,
    pub artifact_present: bool,
    pub verified: bool,
    pub manifest: Option<Manifest>,
}

impl SearchCoordinator {
    pub fn new(
        settings: &Settings,
        store: Arc<MetadataStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn DocumentExtractor>,
    ) -> Self {
        let pipeline = IndexingPipeline::new(
            settings.indexing.clone(),
            settings.storage.clone(),
            settings.embedding.batch_size,
            store,
            Arc::clone(&embedder),
            extractor,
        );
        let engine = SearchEngine::new(settings.search.clone(), embedder);

        Self { pipeline, engine }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.pipeline = self.pipeline.with_progress(progress);
        self
    }

    pub fn pipeline(&self) -> &IndexingPipeline {
        &self.pipeline
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    pub fn ensure_index(&self, folder: &Path) -> Result<IndexSummary, IndexError> {
        self.ensure_index_with(folder, &CancellationToken::new())
    }

    /// Bring the served index in line with `folder`, rebuilding only when the
    /// corpus snapshot or the artifact's integrity requires it.
    pub fn ensure_index_with(
        &self,
        folder: &Path,
        cancel: &CancellationToken,
    ) -> Result<IndexSummary, IndexError> {
        let result = self.run(folder, cancel);
        match &result {
            Ok(summary) => {
                self.pipeline.enter(BuildPhase::Done);
                info!(
                    chunks = summary.chunks_indexed,
                    rebuilt = summary.rebuilt,
                    skipped = summary.skipped.len(),
                    "index ready"
                );
            }
            Err(error) => {
                self.pipeline.enter(BuildPhase::Error);
                warn!(%error, "indexing failed");
            }
        }
        result
    }

    fn run(&self, folder: &Path, cancel: &CancellationToken) -> Result<IndexSummary, IndexError> {
        let _guard = self.pipeline.lock()?;
        let scan = self.pipeline.scan(folder)?;
        let mut skipped: Vec<SkippedDocument> =
            scan.rejected.iter().map(SkippedDocument::from).collect();

        match self.pipeline.needs_reindex(&scan)? {
            None => match self.serve_persisted() {
                Ok(()) => {
                    return Ok(IndexSummary {
                        chunks_indexed: self.pipeline.store().count_chunks()?,
                        rebuilt: false,
                        skipped,
                    })
                }
                Err(
                    error @ (IndexError::Integrity(_)
                    | IndexError::Codec(_)
                    | IndexError::MetadataMismatch { .. }
                    | IndexError::DimensionMismatch { .. }),
                ) => {
                    warn!(%error, "stored index unusable, rebuilding");
                }
                Err(error) => return Err(error),
            },
            Some(reason) => info!(?reason, "rebuilding index"),
        }

        let staged = self.pipeline.build(&scan, cancel)?;
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let chunks_indexed = staged.chunks.len();
        skipped.extend(staged.report.skipped_files.iter().map(SkippedDocument::from));
        self.engine.swap_with(|| self.pipeline.persist(staged))?;

        Ok(IndexSummary {
            chunks_indexed,
            rebuilt: true,
            skipped,
        })
    }

    /// Load the artifact unless the engine already serves this generation.
    fn serve_persisted(&self) -> Result<(), IndexError> {
        if let Some(current) = self.engine.current() {
            let on_disk = Manifest::read(&self.pipeline.storage().manifest_path)?;
            if current.manifest.index_hash == on_disk.index_hash {
                return Ok(());
            }
        }
        self.engine.swap_with(|| self.pipeline.load())?;
        Ok(())
    }

    /// Serve the persisted index without scanning a corpus.
    pub fn load_persisted(&self) -> Result<Arc<LoadedIndex>, IndexError> {
        self.engine.swap_with(|| self.pipeline.load())
    }

    /// Retrieve `offset + top_k` candidates, prune by file name and score,
    /// then return the requested page.
    pub fn query(&self, request: &QueryRequest) -> Result<QueryPage, SearchError> {
        let limit = if request.top_k == 0 {
            self.engine.settings().top_k
        } else {
            request.top_k
        };

        let mut hits = self
            .engine
            .search_with(&request.text, request.offset.saturating_add(limit))?;

        if let Some(filter) = request
            .file_filter
            .as_deref()
            .map(str::trim)
            .filter(|filter| !filter.is_empty())
        {
            let needle = filter.to_lowercase();
            hits.retain(|hit| hit.file.to_lowercase().contains(&needle));
        }

        if let Some(min_score) = request.score_threshold {
            hits.retain(|hit| hit.score >= min_score);
        }

        let total = hits.len();
        let hits: Vec<SearchHit> = hits.into_iter().skip(request.offset).take(limit).collect();

        Ok(QueryPage {
            hits,
            total,
            offset: request.offset,
            limit,
        })
    }

    pub fn verify(&self) -> bool {
        let storage = self.pipeline.storage();
        integrity::verify(&storage.index_path, &storage.manifest_path)
    }

    pub fn status(&self) -> Result<IndexStatus, IndexError> {
        let storage = self.pipeline.storage();
        let current = self.engine.current();

        Ok(IndexStatus {
            ready: current.is_some(),
            phase: self.pipeline.phase(),
            chunks: self.pipeline.store().count_chunks()?,
            kind: current.as_ref().map(|loaded| loaded.index.kind()),
            artifact_present: storage.index_path.exists(),
            verified: self.verify(),
            manifest: Manifest::read(&storage.manifest_path).ok(),
        })
    }
}
