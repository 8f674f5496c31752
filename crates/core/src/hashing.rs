//! File fingerprints.
//!
//! Two digests with two jobs: MD5 for cheap change detection of source files,
//! SHA-256 for tamper evidence on the persisted index artifact. Keep them apart.

use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const BLOCK_SIZE: usize = 64 * 1024;

fn stream_digest<D: Digest>(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BLOCK_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Change-detection digest of a source document.
pub fn content_digest(path: &Path) -> io::Result<String> {
    stream_digest::<Md5>(path)
}

/// Integrity digest of a file on disk.
pub fn integrity_digest(path: &Path) -> io::Result<String> {
    stream_digest::<Sha256>(path)
}

/// Integrity digest of bytes already read from disk.
pub fn integrity_digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn known_vectors() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("abc.txt");
        fs::write(&path, b"abc")?;

        assert_eq!(content_digest(&path)?, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            integrity_digest(&path)?,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(integrity_digest_bytes(b"abc"), integrity_digest(&path)?);
        Ok(())
    }

    #[test]
    fn one_byte_change_changes_content_digest() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("doc.pdf");
        fs::write(&path, b"%PDF-1.4 body")?;
        let before = content_digest(&path)?;

        fs::write(&path, b"%PDF-1.4 bodY")?;
        assert_ne!(before, content_digest(&path)?);
        Ok(())
    }

    #[test]
    fn streaming_covers_files_larger_than_one_block() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("big.bin");
        let bytes: Vec<u8> = (0..(BLOCK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &bytes)?;

        assert_eq!(integrity_digest(&path)?, integrity_digest_bytes(&bytes));
        Ok(())
    }

    #[test]
    fn unreadable_path_is_an_io_error() {
        assert!(content_digest(Path::new("/definitely/not/here.pdf")).is_err());
    }
}
