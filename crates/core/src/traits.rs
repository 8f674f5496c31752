use crate::error::{EmbeddingError, IngestError};
use crate::extractor::PageText;
use crate::models::TextUnit;
use crate::pipeline::BuildPhase;
use std::path::Path;

/// Lazy, finite, single-pass sequence of text units for one document.
pub type UnitStream = Box<dyn Iterator<Item = Result<TextUnit, IngestError>>>;

pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<UnitStream, IngestError>;
}

/// Maps text to fixed-dimension vectors. Calls are blocking and share no
/// mutable state, so implementations need no internal locking.
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()])?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            });
        }
        Ok(vectors.swap_remove(0))
    }
}

/// Image-based text recognition for paginated documents.
pub trait OcrEngine: Send + Sync {
    /// Page texts for the whole document, or `None` when this engine cannot
    /// recognize anything.
    fn recognize_pages(&self, path: &Path) -> Result<Option<Vec<PageText>>, IngestError>;
}

/// Advisory progress sink for long builds.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, phase: BuildPhase, completed: usize, total: usize);
}

impl<F> ProgressObserver for F
where
    F: Fn(BuildPhase, usize, usize) + Send + Sync,
{
    fn on_progress(&self, phase: BuildPhase, completed: usize, total: usize) {
        self(phase, completed, total)
    }
}

/// Observer that ignores every report.
pub struct SilentProgress;

impl ProgressObserver for SilentProgress {
    fn on_progress(&self, _phase: BuildPhase, _completed: usize, _total: usize) {}
}
