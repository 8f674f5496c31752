use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Text unit produced by an extractor: one PDF page, one sheet, or a whole
/// flow-text document. `unit_id` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnit {
    pub unit_id: u32,
    pub text: String,
}

/// Word window produced by the chunker before provenance is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFragment {
    pub unit_id: u32,
    pub offset: usize,
    pub text: String,
}

/// A chunk with its provenance. The position in the corpus chunk list is the
/// chunk's ordinal and the vector index key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub file: String,
    pub unit_id: u32,
    pub offset: usize,
    pub text: String,
    pub file_hash: String,
}

/// Filename to content digest for every eligible file in a corpus folder.
/// Compared only by whole-map equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSnapshot(BTreeMap<String, String>);

impl CorpusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: impl Into<String>, digest: impl Into<String>) {
        self.0.insert(file.into(), digest.into());
    }

    pub fn get(&self, file: &str) -> Option<&str> {
        self.0.get(file).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(file, digest)| (file.as_str(), digest.as_str()))
    }
}

impl FromIterator<(String, String)> for CorpusSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Paginated,
    FlowText,
    Tabular,
}

impl DocumentKind {
    pub const ALLOWED_EXTENSIONS: [&'static str; 5] = ["pdf", "doc", "docx", "xlsx", "xls"];

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Paginated),
            "doc" | "docx" => Some(Self::FlowText),
            "xlsx" | "xls" => Some(Self::Tabular),
            _ => None,
        }
    }

    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// One ranked search result with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub ordinal: usize,
    pub file: String,
    pub unit_id: u32,
    pub text: String,
    pub distance: f32,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    pub top_k: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub file_filter: Option<String>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            offset: 0,
            file_filter: None,
            score_threshold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPage {
    pub hits: Vec<SearchHit>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// A file left out of the index and the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one `ensure_index` run. `skipped` lists files rejected by the
/// scan and, when the index was rebuilt, files whose extraction failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub chunks_indexed: usize,
    pub rebuilt: bool,
    pub skipped: Vec<SkippedDocument>,
}
