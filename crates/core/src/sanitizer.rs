use crate::chunking::normalize_whitespace;
use crate::error::{IndexError, QueryRejection};
use crate::models::DocumentKind;
use std::path::{Path, PathBuf};

/// Strip control characters, collapse whitespace and bound the length.
/// Length is counted in characters.
pub fn sanitize_query(raw: &str, max_len: usize) -> Result<String, QueryRejection> {
    // Whitespace controls become spaces so "a\tb" stays two words; the rest
    // of \x00-\x1f and \x7f is dropped.
    let stripped: String = raw
        .chars()
        .filter_map(|c| match c {
            '\t' | '\n' | '\r' => Some(' '),
            c if c.is_ascii_control() => None,
            c => Some(c),
        })
        .collect();
    let query = normalize_whitespace(&stripped);

    if query.is_empty() {
        return Err(QueryRejection::Empty);
    }

    let length = query.chars().count();
    if length > max_len {
        return Err(QueryRejection::TooLong {
            max: max_len,
            actual: length,
        });
    }

    Ok(query)
}

/// Same as [`sanitize_query`] for raw request bytes.
pub fn sanitize_query_bytes(raw: &[u8], max_len: usize) -> Result<String, QueryRejection> {
    let text = std::str::from_utf8(raw).map_err(|_| QueryRejection::NotText)?;
    sanitize_query(text, max_len)
}

/// Resolve a corpus folder, failing if it is missing or not a directory.
pub fn validate_folder(path: &Path) -> Result<PathBuf, IndexError> {
    let resolved = path
        .canonicalize()
        .map_err(|_| IndexError::InvalidFolder(format!("folder not found: {}", path.display())))?;

    if !resolved.is_dir() {
        return Err(IndexError::InvalidFolder(format!(
            "not a directory: {}",
            resolved.display()
        )));
    }

    Ok(resolved)
}

/// A file is safe when it resolves inside `base` and has an allowed extension.
pub fn is_safe_file(path: &Path, base: &Path) -> bool {
    let (Ok(resolved), Ok(base)) = (path.canonicalize(), base.canonicalize()) else {
        return false;
    };

    resolved.starts_with(&base) && DocumentKind::from_path(&resolved).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn query_whitespace_and_control_chars_are_cleaned() {
        assert_eq!(
            sanitize_query("  what\tis\u{0007}  torque? \n", 500),
            Ok("what is torque?".to_string())
        );
    }

    #[test]
    fn empty_and_blank_queries_are_rejected() {
        assert_eq!(sanitize_query("", 500), Err(QueryRejection::Empty));
        assert_eq!(sanitize_query("   ", 500), Err(QueryRejection::Empty));
        assert_eq!(sanitize_query("\u{0001}\u{007f}", 500), Err(QueryRejection::Empty));
    }

    #[test]
    fn long_queries_are_rejected_by_char_count() {
        let at_limit = "é".repeat(10);
        assert!(sanitize_query(&at_limit, 10).is_ok());

        let over = "é".repeat(11);
        assert_eq!(
            sanitize_query(&over, 10),
            Err(QueryRejection::TooLong { max: 10, actual: 11 })
        );
    }

    #[test]
    fn invalid_utf8_is_not_text() {
        assert_eq!(
            sanitize_query_bytes(&[0x66, 0xff, 0xfe], 500),
            Err(QueryRejection::NotText)
        );
        assert_eq!(sanitize_query_bytes(b"beam load", 500), Ok("beam load".to_string()));
    }

    #[test]
    fn folder_validation() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file = dir.path().join("a.pdf");
        fs::write(&file, b"x")?;

        assert!(validate_folder(dir.path()).is_ok());
        assert!(validate_folder(&file).is_err());
        assert!(validate_folder(&dir.path().join("missing")).is_err());
        Ok(())
    }

    #[test]
    fn unsafe_files_are_detected() -> Result<(), Box<dyn std::error::Error>> {
        let root = tempdir()?;
        let corpus = root.path().join("corpus");
        fs::create_dir(&corpus)?;
        fs::write(corpus.join("notes.pdf"), b"x")?;
        fs::write(corpus.join("script.sh"), b"x")?;
        fs::write(root.path().join("outside.pdf"), b"x")?;

        assert!(is_safe_file(&corpus.join("notes.pdf"), &corpus));
        assert!(!is_safe_file(&corpus.join("script.sh"), &corpus));
        assert!(!is_safe_file(&corpus.join("../outside.pdf"), &corpus));
        assert!(!is_safe_file(&corpus.join("missing.pdf"), &corpus));
        Ok(())
    }
}
