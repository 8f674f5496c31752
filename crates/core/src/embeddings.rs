use crate::error::EmbeddingError;
use crate::settings::{EmbeddingBackend, EmbeddingSettings};
use crate::traits::EmbeddingProvider;
use rayon::prelude::*;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT: usize = 256;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Offline embedder: hashed character trigrams, L2-normalized.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn trigram_hash(window: &[char]) -> u64 {
    let mut buf = [0u8; 4];
    window
        .iter()
        .flat_map(|ch| ch.encode_utf8(&mut buf).as_bytes().to_vec())
        .fold(FNV_OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.dimensions.max(1);
        let mut vector = vec![0f32; dims];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for window in chars.windows(3) {
            vector[(trigram_hash(window) % dims as u64) as usize] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl EmbeddingProvider for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.par_iter().map(|text| self.embed_text(text)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` endpoint. Blocking; run it off the async
/// executor.
pub struct HttpEmbeddingProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    client: Client,
}

impl HttpEmbeddingProvider {
    pub fn new(
        base_url: &Url,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            endpoint: format!("{}/embeddings", base_url.as_str().trim_end_matches('/')),
            model: model.into(),
            api_key,
            dimensions,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingsRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(EmbeddingError::BackendResponse {
                backend: self.endpoint.clone(),
                details: response.status().to_string(),
            });
        }

        let parsed: EmbeddingsResponse = response.json()?;
        order_rows(parsed.data, texts.len(), self.dimensions)
    }
}

fn order_rows(
    mut rows: Vec<EmbeddingRow>,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if rows.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: rows.len(),
        });
    }

    if rows.iter().all(|row| row.index.is_some()) {
        rows.sort_by_key(|row| row.index);
    }

    rows.into_iter()
        .map(|row| {
            if row.embedding.len() != dimensions {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimensions,
                    actual: row.embedding.len(),
                });
            }
            Ok(row.embedding)
        })
        .collect()
}

/// Construct the provider selected in the settings.
pub fn provider_from_settings(
    settings: &EmbeddingSettings,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match (settings.backend, &settings.base_url) {
        (EmbeddingBackend::Http, Some(base_url)) => Ok(Arc::new(HttpEmbeddingProvider::new(
            base_url,
            settings.model.clone(),
            settings.api_key.clone(),
            settings.dimensions,
        )?)),
        (EmbeddingBackend::Http, None) => Err(EmbeddingError::BackendResponse {
            backend: "http".to_string(),
            details: "embedding.base_url is not set".to_string(),
        }),
        (EmbeddingBackend::Ngram, _) => Ok(Arc::new(CharacterNgramEmbedder {
            dimensions: settings.dimensions,
        })),
    }
}
