//! Indexing pipeline: scan, extract, embed, build, persist.
//!
//! Everything up to [`IndexingPipeline::build`] is free of side effects and
//! may be cancelled. [`IndexingPipeline::persist`] writes the artifact,
//! manifest and metadata and is not cancellable once started.

use crate::error::{EmbeddingError, IndexError};
use crate::ingest::{ingest_corpus, scan_corpus, CorpusScan, IngestionReport};
use crate::integrity::{self, Manifest};
use crate::models::{Chunk, CorpusSnapshot};
use crate::settings::{IndexingSettings, StorageSettings};
use crate::store::MetadataStore;
use crate::traits::{DocumentExtractor, EmbeddingProvider, ProgressObserver, SilentProgress};
use crate::vector::{self, VectorIndex};
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Idle,
    Scanning,
    Extracting,
    Embedding,
    IndexBuilding,
    Persisting,
    Done,
    Error,
}

/// A verified index ready to serve queries, together with the chunk
/// metadata of the same generation. `chunks[i]` describes vector `i`.
#[derive(Debug)]
pub struct LoadedIndex {
    pub index: VectorIndex,
    pub manifest: Manifest,
    pub chunks: Vec<Chunk>,
}

impl LoadedIndex {
    pub fn chunk(&self, ordinal: usize) -> Option<&Chunk> {
        self.chunks.get(ordinal)
    }
}

/// Result of a build that has not touched storage yet.
#[derive(Debug)]
pub struct StagedBuild {
    pub chunks: Vec<Chunk>,
    pub snapshot: CorpusSnapshot,
    pub index: VectorIndex,
    pub report: IngestionReport,
}

/// Why a rebuild is needed, or `None` when the stored generation is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    CorpusChanged,
    ArtifactMissing,
    ManifestMismatch,
}

/// Held for the duration of one build. The advisory lock on the file is
/// released when the handle closes, including when the process dies.
pub struct BuildGuard<'a> {
    _local: MutexGuard<'a, ()>,
    _file: File,
}

pub struct IndexingPipeline {
    indexing: IndexingSettings,
    storage: StorageSettings,
    batch_size: usize,
    store: Arc<MetadataStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: Arc<dyn DocumentExtractor>,
    progress: Arc<dyn ProgressObserver>,
    phase: RwLock<BuildPhase>,
    build_lock: Mutex<()>,
}

impl IndexingPipeline {
    pub fn new(
        indexing: IndexingSettings,
        storage: StorageSettings,
        batch_size: usize,
        store: Arc<MetadataStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: Arc<dyn DocumentExtractor>,
    ) -> Self {
        Self {
            indexing,
            storage,
            batch_size: batch_size.max(1),
            store,
            embedder,
            extractor,
            progress: Arc::new(SilentProgress),
            phase: RwLock::new(BuildPhase::Idle),
            build_lock: Mutex::new(()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    pub fn phase(&self) -> BuildPhase {
        *self.phase.read()
    }

    pub fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub(crate) fn enter(&self, phase: BuildPhase) {
        *self.phase.write() = phase;
        debug!(?phase, "pipeline phase");
    }

    /// Claim the build lock: in-process first, then an exclusive advisory
    /// lock on the file next to the artifact so another process on the same
    /// target is refused as well. A lock file left by a dead process is
    /// simply re-locked.
    pub fn lock(&self) -> Result<BuildGuard<'_>, IndexError> {
        let lock_path = lock_path(&self.storage.index_path);
        let local = self
            .build_lock
            .try_lock()
            .ok_or_else(|| IndexError::BuildInProgress(lock_path.clone()))?;

        self.storage.ensure_dirs()?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if let Err(error) = file.try_lock_exclusive() {
            if error.kind() == ErrorKind::WouldBlock
                || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
            {
                return Err(IndexError::BuildInProgress(lock_path));
            }
            return Err(error.into());
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %lock_path.display(), "build lock acquired");

        Ok(BuildGuard {
            _local: local,
            _file: file,
        })
    }

    pub fn scan(&self, folder: &Path) -> Result<CorpusScan, IndexError> {
        self.enter(BuildPhase::Scanning);
        let scan = scan_corpus(folder)?;
        info!(
            folder = %scan.root.display(),
            files = scan.files.len(),
            rejected = scan.rejected.len(),
            "corpus scanned"
        );
        Ok(scan)
    }

    /// Compare the scanned snapshot and the artifact against what is stored.
    pub fn needs_reindex(&self, scan: &CorpusScan) -> Result<Option<RebuildReason>, IndexError> {
        if self.store.load_snapshot()? != scan.snapshot {
            return Ok(Some(RebuildReason::CorpusChanged));
        }
        if !self.storage.index_path.exists() {
            return Ok(Some(RebuildReason::ArtifactMissing));
        }
        if !integrity::verify(&self.storage.index_path, &self.storage.manifest_path) {
            return Ok(Some(RebuildReason::ManifestMismatch));
        }
        Ok(None)
    }

    /// Load the persisted artifact, trusting it only if it matches its
    /// manifest and the embedder's dimension.
    pub fn load(&self) -> Result<LoadedIndex, IndexError> {
        let (manifest, bytes) =
            integrity::read_verified(&self.storage.index_path, &self.storage.manifest_path)?;
        let mut index = VectorIndex::from_bytes(&bytes)?;

        if index.dim() != self.embedder.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: self.embedder.dimensions(),
                actual: index.dim(),
            });
        }
        if let VectorIndex::Clustered(ivf) = &mut index {
            ivf.set_nprobe(self.indexing.nprobe);
        }

        let chunks = self.store.chunks()?;
        if chunks.len() != index.len() {
            return Err(IndexError::MetadataMismatch {
                vectors: index.len(),
                chunks: chunks.len(),
            });
        }

        info!(vectors = index.len(), kind = %index.kind(), "index loaded");
        Ok(LoadedIndex {
            index,
            manifest,
            chunks,
        })
    }

    /// Extract, embed and build in memory. Nothing is written.
    pub fn build(
        &self,
        scan: &CorpusScan,
        cancel: &CancellationToken,
    ) -> Result<StagedBuild, IndexError> {
        self.enter(BuildPhase::Extracting);
        let mut report = ingest_corpus(
            scan,
            self.extractor.as_ref(),
            self.indexing.chunk_size,
            cancel,
            self.progress.as_ref(),
        )?;

        if report.chunks.is_empty() {
            return Err(IndexError::NoContent(scan.root.clone()));
        }
        info!(
            chunks = report.chunks.len(),
            files = report.extracted_files,
            skipped = report.skipped_files.len(),
            "corpus extracted"
        );

        self.enter(BuildPhase::Embedding);
        let vectors = self.embed_chunks(&report.chunks, cancel)?;

        self.enter(BuildPhase::IndexBuilding);
        let index = VectorIndex::build(vectors, self.embedder.dimensions(), &self.indexing)?;

        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        Ok(StagedBuild {
            chunks: std::mem::take(&mut report.chunks),
            snapshot: scan.snapshot.clone(),
            index,
            report,
        })
    }

    fn embed_chunks(
        &self,
        chunks: &[Chunk],
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, IndexError> {
        let total = chunks.len();
        let dim = self.embedder.dimensions();
        let mut data = Vec::with_capacity(total * dim);

        for batch in chunks.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }

            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts)?;
            if vectors.len() != texts.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: texts.len(),
                    actual: vectors.len(),
                }
                .into());
            }
            data.extend(vector::flatten(vectors, dim)?);

            let done = data.len() / dim;
            self.progress.on_progress(BuildPhase::Embedding, done, total);
            debug!(done, total, "embedded batch");
        }

        Ok(data)
    }

    /// Write artifact and manifest, then replace the metadata in one
    /// transaction. On failure before the metadata commit the previous
    /// generation is left in place.
    pub fn persist(&self, staged: StagedBuild) -> Result<LoadedIndex, IndexError> {
        self.enter(BuildPhase::Persisting);
        self.storage.ensure_dirs()?;

        let manifest = integrity::persist_artifact(
            &staged.index.to_bytes(),
            &self.storage.index_path,
            &self.storage.manifest_path,
        )?;
        self.store.replace_corpus(&staged.chunks, &staged.snapshot)?;

        info!(
            chunks = staged.chunks.len(),
            kind = %staged.index.kind(),
            hash = %manifest.index_hash,
            "index persisted"
        );
        Ok(LoadedIndex {
            index: staged.index,
            manifest,
            chunks: staged.chunks,
        })
    }
}

fn lock_path(index_path: &Path) -> PathBuf {
    let mut name = index_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("index"));
    name.push(".lock");
    index_path.with_file_name(name)
}
