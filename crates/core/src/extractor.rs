use crate::chunking::normalize_whitespace;
use crate::error::IngestError;
use crate::models::{DocumentKind, TextUnit};
use crate::ocr::NoOcr;
use crate::office::{FlowTextExtractor, SheetExtractor};
use crate::traits::{DocumentExtractor, OcrEngine, UnitStream};
use lopdf::Document;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// One unit per page, numbered from 1. Pages without a text layer go through
/// the OCR engine; if that fails the page is simply empty.
pub struct PdfExtractor {
    ocr: Arc<dyn OcrEngine>,
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new(Arc::new(NoOcr))
    }
}

impl PdfExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self { ocr }
    }
}

impl DocumentExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<UnitStream, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        let pages = document.get_pages().into_keys().collect::<Vec<_>>();

        Ok(Box::new(PdfPages {
            document,
            pages: pages.into_iter(),
            path: path.to_path_buf(),
            ocr: Arc::clone(&self.ocr),
            recognized: None,
        }))
    }
}

struct PdfPages {
    document: Document,
    pages: std::vec::IntoIter<u32>,
    path: PathBuf,
    ocr: Arc<dyn OcrEngine>,
    recognized: Option<HashMap<u32, String>>,
}

impl PdfPages {
    fn recognized_text(&mut self, number: u32) -> String {
        let path = &self.path;
        let ocr = &self.ocr;
        let recognized = self.recognized.get_or_insert_with(|| {
            debug!(path = %path.display(), "no text layer on a page, trying OCR");
            match ocr.recognize_pages(path) {
                Ok(Some(pages)) => pages
                    .into_iter()
                    .map(|page| (page.number, normalize_whitespace(&page.text)))
                    .collect(),
                Ok(None) => HashMap::new(),
                Err(error) => {
                    warn!(path = %path.display(), %error, "OCR unavailable, page left empty");
                    HashMap::new()
                }
            }
        });

        recognized.get(&number).cloned().unwrap_or_default()
    }
}

impl Iterator for PdfPages {
    type Item = Result<TextUnit, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        let number = self.pages.next()?;

        let native = match self.document.extract_text(&[number]) {
            Ok(text) => normalize_whitespace(&text),
            Err(error) => {
                warn!(path = %self.path.display(), page = number, %error, "page text extraction failed");
                String::new()
            }
        };

        let text = if native.is_empty() {
            self.recognized_text(number)
        } else {
            native
        };

        Some(Ok(TextUnit {
            unit_id: number,
            text,
        }))
    }
}

/// Dispatches on the file extension to the paginated, flow-text or tabular
/// extractor.
pub struct CompositeExtractor {
    pdf: PdfExtractor,
    flow: FlowTextExtractor,
    sheet: SheetExtractor,
}

impl Default for CompositeExtractor {
    fn default() -> Self {
        Self::new(Arc::new(NoOcr))
    }
}

impl CompositeExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            pdf: PdfExtractor::new(ocr),
            flow: FlowTextExtractor,
            sheet: SheetExtractor,
        }
    }
}

impl DocumentExtractor for CompositeExtractor {
    fn extract(&self, path: &Path) -> Result<UnitStream, IngestError> {
        match DocumentKind::from_path(path) {
            Some(DocumentKind::Paginated) => self.pdf.extract(path),
            Some(DocumentKind::FlowText) => self.flow.extract(path),
            Some(DocumentKind::Tabular) => self.sheet.extract(path),
            None => Err(IngestError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::write_pdf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct ScriptedOcr {
        calls: AtomicUsize,
        pages: Vec<PageText>,
    }

    impl OcrEngine for ScriptedOcr {
        fn recognize_pages(&self, _path: &Path) -> Result<Option<Vec<PageText>>, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(self.pages.clone()))
        }
    }

    struct BrokenOcr;

    impl OcrEngine for BrokenOcr {
        fn recognize_pages(&self, _path: &Path) -> Result<Option<Vec<PageText>>, IngestError> {
            Err(IngestError::OcrFailed("service down".to_string()))
        }
    }

    fn collect(stream: UnitStream) -> Result<Vec<TextUnit>, IngestError> {
        stream.collect()
    }

    #[test]
    fn pdf_pages_are_one_based_units() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.pdf");
        write_pdf(&path, &["Hello   pump world", "", "Third page text"])?;

        let units = collect(PdfExtractor::default().extract(&path)?)?;

        assert_eq!(units.len(), 3);
        assert_eq!(units[0].unit_id, 1);
        assert!(units[0].text.contains("pump"));
        assert!(!units[0].text.contains("  "));
        assert_eq!(units[1].unit_id, 2);
        assert!(units[1].text.is_empty());
        assert_eq!(units[2].unit_id, 3);
        Ok(())
    }

    #[test]
    fn empty_pages_fall_back_to_ocr_once() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("scan.pdf");
        write_pdf(&path, &["", "", "native text"])?;

        let ocr = Arc::new(ScriptedOcr {
            calls: AtomicUsize::new(0),
            pages: vec![PageText {
                number: 2,
                text: "recognized\n  words".to_string(),
            }],
        });
        let units = collect(PdfExtractor::new(ocr.clone()).extract(&path)?)?;

        assert_eq!(units[0].text, "");
        assert_eq!(units[1].text, "recognized words");
        assert!(units[2].text.contains("native"));
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn ocr_failure_degrades_to_empty_text() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("scan.pdf");
        write_pdf(&path, &[""])?;

        let units = collect(PdfExtractor::new(Arc::new(BrokenOcr)).extract(&path)?)?;
        assert_eq!(units.len(), 1);
        assert!(units[0].text.is_empty());
        Ok(())
    }

    #[test]
    fn broken_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        assert!(matches!(
            PdfExtractor::default().extract(&path),
            Err(IngestError::PdfParse(_))
        ));
        Ok(())
    }

    #[test]
    fn composite_rejects_unknown_extensions() {
        assert!(matches!(
            CompositeExtractor::default().extract(Path::new("notes.txt")),
            Err(IngestError::UnsupportedFormat(_))
        ));
    }
}
