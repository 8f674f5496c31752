//! Runtime settings for indexing, search and storage.
//!
//! Values are layered with figment: built-in defaults, then an optional TOML
//! file, then `CORPUS_SEARCH_*` environment variables (`__` separates nested
//! keys, e.g. `CORPUS_SEARCH_SEARCH__TOP_K=5`).

use crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::error::SettingsError;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;
use url::Url;

pub const ENV_PREFIX: &str = "CORPUS_SEARCH_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub indexing: IndexingSettings,
    pub search: SearchSettings,
    pub storage: StorageSettings,
    pub ocr: OcrSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Ngram,
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub base_url: Option<Url>,
    pub api_key: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Ngram,
            model: "all-MiniLM-L6-v2".to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            batch_size: 64,
            base_url: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingSettings {
    /// Words per chunk window.
    pub chunk_size: usize,
    /// Chunk counts above this switch to the clustered index.
    pub ivf_threshold: usize,
    pub nlist: usize,
    pub nprobe: usize,
    pub min_points_per_centroid: usize,
    pub kmeans_iterations: usize,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            ivf_threshold: 1_000,
            nlist: 100,
            nprobe: 1,
            min_points_per_centroid: 1,
            kmeans_iterations: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub top_k: usize,
    /// Squared L2 distance cut-off; also the denominator of the score.
    pub threshold: f32,
    pub max_query_length: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            top_k: 10,
            threshold: 1.5,
            max_query_length: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub db_path: PathBuf,
    pub index_path: PathBuf,
    pub manifest_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/index_store.db"),
            index_path: PathBuf::from("data/doc_index.bin"),
            manifest_path: PathBuf::from("data/index_manifest.json"),
        }
    }
}

impl StorageSettings {
    /// All storage paths rooted under `dir`, with the default file names.
    pub fn under(dir: &Path) -> Self {
        Self {
            db_path: dir.join("index_store.db"),
            index_path: dir.join("doc_index.bin"),
            manifest_path: dir.join("index_manifest.json"),
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for path in [&self.db_path, &self.index_path, &self.manifest_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub endpoint: Option<Url>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and the environment.
    /// A missing file falls back to defaults with a warning.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));

        if let Some(path) = path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            } else {
                warn!(path = %path.display(), "settings file not found, using defaults");
            }
        }

        let settings: Settings = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        fn positive(key: &'static str, value: usize) -> Result<(), SettingsError> {
            if value == 0 {
                return Err(SettingsError::Invalid {
                    key,
                    details: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        positive("embedding.dimensions", self.embedding.dimensions)?;
        positive("embedding.batch_size", self.embedding.batch_size)?;
        positive("indexing.chunk_size", self.indexing.chunk_size)?;
        positive("indexing.nlist", self.indexing.nlist)?;
        positive("indexing.nprobe", self.indexing.nprobe)?;
        positive("indexing.min_points_per_centroid", self.indexing.min_points_per_centroid)?;
        positive("search.top_k", self.search.top_k)?;
        positive("search.max_query_length", self.search.max_query_length)?;

        if !(self.search.threshold.is_finite() && self.search.threshold > 0.0) {
            return Err(SettingsError::Invalid {
                key: "search.threshold",
                details: format!("{} is not a positive finite distance", self.search.threshold),
            });
        }

        if self.embedding.backend == EmbeddingBackend::Http && self.embedding.base_url.is_none() {
            return Err(SettingsError::Invalid {
                key: "embedding.base_url",
                details: "required when embedding.backend = \"http\"".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_reference_constants() {
        let settings = Settings::default();
        assert_eq!(settings.indexing.chunk_size, 200);
        assert_eq!(settings.indexing.ivf_threshold, 1_000);
        assert_eq!(settings.indexing.nlist, 100);
        assert_eq!(settings.search.top_k, 10);
        assert_eq!(settings.search.threshold, 1.5);
        assert_eq!(settings.search.max_query_length, 500);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let settings = Settings::load(Some(&dir.path().join("absent.toml")))?;
        assert_eq!(settings.indexing.chunk_size, 200);
        Ok(())
    }

    #[test]
    fn toml_file_overrides_nested_values() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "[indexing]\nchunk_size = 50\n\n[search]\nthreshold = 0.75\n",
        )?;

        let settings = Settings::load(Some(&path))?;
        assert_eq!(settings.indexing.chunk_size, 50);
        assert_eq!(settings.search.threshold, 0.75);
        assert_eq!(settings.search.top_k, 10);
        Ok(())
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut settings = Settings::default();
        settings.indexing.chunk_size = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid { key: "indexing.chunk_size", .. })
        ));
    }

    #[test]
    fn http_backend_requires_base_url() {
        let mut settings = Settings::default();
        settings.embedding.backend = EmbeddingBackend::Http;
        assert!(settings.validate().is_err());
    }
}
