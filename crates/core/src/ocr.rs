//! OCR fallback for pages without a native text layer.
//!
//! The endpoint variant sends the whole PDF to a multimodal OCR service and
//! maps its answer back to page texts. It uses the blocking HTTP client, so
//! call it from a blocking context (e.g. `spawn_blocking`), never from an
//! async task.

use crate::error::IngestError;
use crate::extractor::PageText;
use crate::settings::OcrSettings;
use crate::traits::OcrEngine;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Engine used when no OCR capability is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOcr;

impl OcrEngine for NoOcr {
    fn recognize_pages(&self, _path: &Path) -> Result<Option<Vec<PageText>>, IngestError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    pages: Option<Vec<OcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

pub struct EndpointOcr {
    endpoint: Url,
    api_key: Option<String>,
    client: Client,
}

impl EndpointOcr {
    pub fn new(endpoint: Url, api_key: Option<String>) -> Result<Self, IngestError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let api_key = api_key.and_then(|value| {
            let key = value.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some(key)
            }
        });

        Ok(Self {
            endpoint,
            api_key,
            client,
        })
    }

    /// Build the engine named by the settings, if any.
    pub fn from_settings(settings: &OcrSettings) -> Result<Option<Self>, IngestError> {
        settings
            .endpoint
            .clone()
            .map(|endpoint| Self::new(endpoint, settings.api_key.clone()))
            .transpose()
    }
}

impl OcrEngine for EndpointOcr {
    fn recognize_pages(&self, path: &Path) -> Result<Option<Vec<PageText>>, IngestError> {
        let pdf = std::fs::read(path)?;
        let payload = OcrRequest {
            pdf_base64: STANDARD.encode(pdf),
            source_path: path.to_string_lossy().to_string(),
        };

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "multimodal OCR request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: OcrResponse = response.json()?;
        payload_to_pages(&payload, path).map(Some)
    }
}

fn payload_to_pages(payload: &OcrResponse, path: &Path) -> Result<Vec<PageText>, IngestError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_deref().map(str::trim).unwrap_or_default();
                if text.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: page.page.unwrap_or(1),
                        text: text.to_string(),
                    })
                }
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let text = chunk.trim();
                if text.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: text.to_string(),
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(IngestError::OcrFailed(format!(
        "multimodal OCR response was empty for {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_with_pages_keeps_only_nonempty_text() {
        let response = OcrResponse {
            pages: Some(vec![
                OcrPage {
                    page: Some(2),
                    text: Some("  ".to_string()),
                },
                OcrPage {
                    page: Some(3),
                    text: Some("Page 3".to_string()),
                },
            ]),
            text: None,
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))
            .expect("multimodal response should be parsed");

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, 3);
        assert_eq!(pages[0].text, "Page 3");
    }

    #[test]
    fn payload_text_is_split_by_form_feed() {
        let response = OcrResponse {
            pages: None,
            text: Some("First\u{000C}\u{000C}Third\n".to_string()),
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))
            .expect("multimodal response should be parsed");

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[0].text, "First");
        assert_eq!(pages[1].number, 3);
        assert_eq!(pages[1].text, "Third");
    }

    #[test]
    fn empty_payload_is_an_ocr_failure() {
        let response = OcrResponse {
            pages: Some(Vec::new()),
            text: Some(" \u{000C} ".to_string()),
        };
        assert!(matches!(
            payload_to_pages(&response, Path::new("x.pdf")),
            Err(IngestError::OcrFailed(_))
        ));
    }

    #[test]
    fn no_ocr_recognizes_nothing() -> Result<(), IngestError> {
        assert!(NoOcr.recognize_pages(Path::new("x.pdf"))?.is_none());
        Ok(())
    }

    #[test]
    fn settings_without_endpoint_build_no_engine() -> Result<(), IngestError> {
        assert!(EndpointOcr::from_settings(&OcrSettings::default())?.is_none());
        Ok(())
    }
}
