//! Tamper evidence for the persisted index artifact.
//!
//! The manifest records the SHA-256 of the artifact as it sits on disk. A load
//! is trusted only when the bytes it reads hash to the recorded value.

use crate::error::IndexError;
use crate::hashing::{integrity_digest, integrity_digest_bytes};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub index_hash: String,
    pub created_at: String,
    pub index_path: String,
}

impl Manifest {
    /// Hash `artifact` from disk and describe it as living at `index_path`.
    fn describe(artifact: &Path, index_path: &Path) -> Result<Self, IndexError> {
        Ok(Self {
            index_hash: integrity_digest(artifact)?,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            index_path: index_path.display().to_string(),
        })
    }

    pub fn read(path: &Path) -> Result<Self, IndexError> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn write(&self, path: &Path) -> Result<(), IndexError> {
        let mut file = File::create(path)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.sync_all()?;
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Record a manifest for an artifact already on disk. The checksum is always
/// recomputed from the stored file.
pub fn save(index_path: &Path, manifest_path: &Path) -> Result<Manifest, IndexError> {
    let manifest = Manifest::describe(index_path, index_path)?;
    let staged = staging_path(manifest_path);
    manifest.write(&staged)?;
    fs::rename(&staged, manifest_path)?;
    debug!(path = %manifest_path.display(), "manifest saved");
    Ok(manifest)
}

/// Write `bytes` as the new artifact together with its manifest.
///
/// Both files are staged next to their targets first; the old pair stays in
/// place until both staged files are complete, then the artifact and the
/// manifest are renamed over it in that order.
pub fn persist_artifact(
    bytes: &[u8],
    index_path: &Path,
    manifest_path: &Path,
) -> Result<Manifest, IndexError> {
    let staged_index = staging_path(index_path);
    let staged_manifest = staging_path(manifest_path);

    let staged = (|| {
        let mut file = File::create(&staged_index)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        let manifest = Manifest::describe(&staged_index, index_path)?;
        manifest.write(&staged_manifest)?;
        Ok::<_, IndexError>(manifest)
    })();

    let manifest = match staged {
        Ok(manifest) => manifest,
        Err(error) => {
            let _ = fs::remove_file(&staged_index);
            let _ = fs::remove_file(&staged_manifest);
            return Err(error);
        }
    };

    fs::rename(&staged_index, index_path)?;
    fs::rename(&staged_manifest, manifest_path)?;
    Ok(manifest)
}

/// True only when both files exist, the manifest parses and the artifact on
/// disk hashes to the recorded value. Never fails.
pub fn verify(index_path: &Path, manifest_path: &Path) -> bool {
    let manifest = match Manifest::read(manifest_path) {
        Ok(manifest) => manifest,
        Err(error) => {
            debug!(path = %manifest_path.display(), %error, "manifest unreadable");
            return false;
        }
    };

    match integrity_digest(index_path) {
        Ok(actual) if actual == manifest.index_hash => true,
        Ok(_) => {
            warn!(path = %index_path.display(), "index artifact does not match its manifest");
            false
        }
        Err(error) => {
            debug!(path = %index_path.display(), %error, "index artifact unreadable");
            false
        }
    }
}

/// Read the artifact once and return its bytes only if they match the
/// manifest, so the verified bytes are the ones decoded.
pub fn read_verified(
    index_path: &Path,
    manifest_path: &Path,
) -> Result<(Manifest, Vec<u8>), IndexError> {
    let manifest =
        Manifest::read(manifest_path).map_err(|_| IndexError::Integrity(index_path.to_path_buf()))?;
    let bytes = fs::read(index_path).map_err(|_| IndexError::Integrity(index_path.to_path_buf()))?;

    if integrity_digest_bytes(&bytes) != manifest.index_hash {
        warn!(path = %index_path.display(), "index artifact does not match its manifest");
        return Err(IndexError::Integrity(index_path.to_path_buf()));
    }

    Ok((manifest, bytes))
}
