pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod hashing;
pub mod ingest;
pub mod integrity;
pub mod models;
pub mod ocr;
pub mod office;
pub mod orchestrator;
pub mod pipeline;
pub mod sanitizer;
pub mod search;
pub mod settings;
pub mod store;
pub mod traits;
pub mod vector;

#[cfg(test)]
mod fixtures;

pub use chunking::{chunk_words, normalize_whitespace, DEFAULT_WINDOW_WORDS};
pub use embeddings::{
    provider_from_settings, CharacterNgramEmbedder, HttpEmbeddingProvider,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    EmbeddingError, IndexError, IngestError, QueryRejection, SearchError, SettingsError,
    StoreError,
};
pub use extractor::{CompositeExtractor, PageText, PdfExtractor};
pub use ingest::{scan_corpus, CorpusScan, IngestionReport, ScannedFile, SkippedFile};
pub use integrity::Manifest;
pub use models::{
    Chunk, ChunkFragment, CorpusSnapshot, DocumentKind, IndexSummary, QueryPage, QueryRequest,
    SearchHit, SkippedDocument, TextUnit,
};
pub use ocr::{EndpointOcr, NoOcr};
pub use office::{FlowTextExtractor, SheetExtractor};
pub use orchestrator::{IndexStatus, SearchCoordinator};
pub use pipeline::{BuildPhase, IndexingPipeline, LoadedIndex, RebuildReason, StagedBuild};
pub use sanitizer::{sanitize_query, sanitize_query_bytes};
pub use search::SearchEngine;
pub use settings::Settings;
pub use store::MetadataStore;
pub use traits::{DocumentExtractor, EmbeddingProvider, OcrEngine, ProgressObserver, SilentProgress};
pub use vector::{IndexKind, Neighbor, VectorIndex};
