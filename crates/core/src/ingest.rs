use crate::chunking::chunk_words;
use crate::error::{IndexError, IngestError};
use crate::hashing::content_digest;
use crate::models::{Chunk, CorpusSnapshot, DocumentKind, SkippedDocument};
use crate::pipeline::BuildPhase;
use crate::sanitizer::{is_safe_file, validate_folder};
use crate::traits::{DocumentExtractor, ProgressObserver};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub name: String,
    pub digest: String,
}

#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub error: IngestError,
}

impl From<&SkippedFile> for SkippedDocument {
    fn from(skipped: &SkippedFile) -> Self {
        Self {
            path: skipped.path.clone(),
            reason: skipped.error.to_string(),
        }
    }
}

/// Eligible files of one corpus folder, in name order, with their digests.
#[derive(Debug)]
pub struct CorpusScan {
    pub root: PathBuf,
    pub files: Vec<ScannedFile>,
    pub snapshot: CorpusSnapshot,
    pub rejected: Vec<SkippedFile>,
}

/// Enumerate the top level of `folder`. Files with other extensions are
/// ignored; files that resolve outside the folder are rejected with a warning
/// and never hashed.
pub fn scan_corpus(folder: &Path) -> Result<CorpusScan, IndexError> {
    let root = validate_folder(folder)?;
    let mut files = Vec::new();
    let mut rejected = Vec::new();

    for entry in WalkDir::new(&root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(%error, "unreadable directory entry skipped");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if DocumentKind::from_path(path).is_none() {
            debug!(path = %path.display(), "extension not indexed");
            continue;
        }

        if !is_safe_file(path, &root) {
            warn!(path = %path.display(), "file resolves outside the corpus folder, skipped");
            rejected.push(SkippedFile {
                path: path.to_path_buf(),
                error: IngestError::UnsafePath(path.display().to_string()),
            });
            continue;
        }

        let name = match file_name(path) {
            Ok(name) => name,
            Err(error) => {
                warn!(path = %path.display(), "file name is not valid UTF-8, skipped");
                rejected.push(SkippedFile {
                    path: path.to_path_buf(),
                    error,
                });
                continue;
            }
        };
        match content_digest(path) {
            Ok(digest) => files.push(ScannedFile {
                path: path.to_path_buf(),
                name,
                digest,
            }),
            Err(error) => {
                warn!(path = %path.display(), %error, "file unreadable, skipped");
                rejected.push(SkippedFile {
                    path: path.to_path_buf(),
                    error: error.into(),
                });
            }
        }
    }

    let snapshot = files
        .iter()
        .map(|file| (file.name.clone(), file.digest.clone()))
        .collect();

    Ok(CorpusScan {
        root,
        files,
        snapshot,
        rejected,
    })
}

fn file_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

/// Outcome of extracting a whole corpus: the chunks in ordinal order, plus
/// every file that contributed nothing because it failed.
#[derive(Debug, Default)]
pub struct IngestionReport {
    pub chunks: Vec<Chunk>,
    pub extracted_files: usize,
    pub skipped_files: Vec<SkippedFile>,
}

/// Extract and chunk one file. Any unit error fails the whole file so a
/// document never contributes a partial chunk list.
pub fn ingest_file(
    file: &ScannedFile,
    extractor: &dyn DocumentExtractor,
    window: usize,
) -> Result<Vec<Chunk>, IngestError> {
    let mut chunks = Vec::new();

    for unit in extractor.extract(&file.path)? {
        let unit = unit?;
        chunks.extend(
            chunk_words(&unit.text, unit.unit_id, window).map(|fragment| Chunk {
                file: file.name.clone(),
                unit_id: fragment.unit_id,
                offset: fragment.offset,
                text: fragment.text,
                file_hash: file.digest.clone(),
            }),
        );
    }

    Ok(chunks)
}

/// Run [`ingest_file`] over every scanned file. Per-file failures are logged
/// and collected; the batch continues.
pub fn ingest_corpus(
    scan: &CorpusScan,
    extractor: &dyn DocumentExtractor,
    window: usize,
    cancel: &CancellationToken,
    progress: &dyn ProgressObserver,
) -> Result<IngestionReport, IndexError> {
    let total = scan.files.len();
    let mut report = IngestionReport::default();

    for (done, file) in scan.files.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        match ingest_file(file, extractor, window) {
            Ok(chunks) => {
                debug!(file = %file.name, chunks = chunks.len(), "file extracted");
                report.extracted_files += 1;
                report.chunks.extend(chunks);
            }
            Err(error) => {
                warn!(file = %file.name, %error, "extraction failed, file skipped");
                report.skipped_files.push(SkippedFile {
                    path: file.path.clone(),
                    error,
                });
            }
        }

        progress.on_progress(BuildPhase::Extracting, done + 1, total);
    }

    Ok(report)
}
