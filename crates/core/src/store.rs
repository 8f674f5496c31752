//! SQLite metadata: chunk provenance keyed by ordinal, and the corpus
//! snapshot used for change detection.

use crate::error::StoreError;
use crate::models::{Chunk, CorpusSnapshot};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY,
    file TEXT NOT NULL,
    page INTEGER NOT NULL,
    chunk_start INTEGER NOT NULL,
    chunk_text TEXT NOT NULL,
    file_hash TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS file_hashes (
    filename TEXT PRIMARY KEY,
    md5 TEXT NOT NULL
);
";

/// Row id of the chunk at `ordinal`. Ids are written explicitly so they stay
/// dense across rebuilds.
fn row_id(ordinal: usize) -> i64 {
    ordinal as i64 + 1
}

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Replace every chunk and the whole snapshot in one transaction.
    /// `chunks[i]` becomes ordinal `i`.
    pub fn replace_corpus(
        &self,
        chunks: &[Chunk],
        snapshot: &CorpusSnapshot,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM chunks", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO chunks (id, file, page, chunk_start, chunk_text, file_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (ordinal, chunk) in chunks.iter().enumerate() {
                insert.execute(params![
                    row_id(ordinal),
                    chunk.file,
                    chunk.unit_id,
                    chunk.offset as i64,
                    chunk.text,
                    chunk.file_hash,
                ])?;
            }
        }

        tx.execute("DELETE FROM file_hashes", [])?;
        {
            let mut insert = tx.prepare("INSERT INTO file_hashes (filename, md5) VALUES (?1, ?2)")?;
            for (file, digest) in snapshot.iter() {
                insert.execute(params![file, digest])?;
            }
        }

        tx.commit()?;
        debug!(chunks = chunks.len(), files = snapshot.len(), "metadata replaced");
        Ok(())
    }

    pub fn fetch_chunk(&self, ordinal: usize) -> Result<Option<Chunk>, StoreError> {
        let conn = self.conn.lock();
        let mut select = conn.prepare_cached(
            "SELECT id, file, page, chunk_start, chunk_text, file_hash FROM chunks WHERE id = ?1",
        )?;
        let row = select
            .query_row([row_id(ordinal)], RawChunk::from_row)
            .optional()?;
        row.map(RawChunk::into_chunk).transpose()
    }

    /// Chunks in ordinal order.
    pub fn chunks(&self) -> Result<Vec<Chunk>, StoreError> {
        let conn = self.conn.lock();
        let mut select = conn.prepare(
            "SELECT id, file, page, chunk_start, chunk_text, file_hash FROM chunks ORDER BY id",
        )?;
        let rows = select
            .query_map([], RawChunk::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawChunk::into_chunk).collect()
    }

    pub fn count_chunks(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn load_snapshot(&self) -> Result<CorpusSnapshot, StoreError> {
        let conn = self.conn.lock();
        let mut select = conn.prepare("SELECT filename, md5 FROM file_hashes")?;
        let snapshot = select
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<CorpusSnapshot, _>>()?;
        Ok(snapshot)
    }
}

struct RawChunk {
    id: i64,
    file: String,
    page: i64,
    start: i64,
    text: String,
    file_hash: String,
}

impl RawChunk {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            file: row.get(1)?,
            page: row.get(2)?,
            start: row.get(3)?,
            text: row.get(4)?,
            file_hash: row.get(5)?,
        })
    }

    fn into_chunk(self) -> Result<Chunk, StoreError> {
        let corrupt = |details: &str| StoreError::Corrupt {
            row: self.id,
            details: details.to_string(),
        };
        let unit_id = u32::try_from(self.page).map_err(|_| corrupt("page out of range"))?;
        let offset = usize::try_from(self.start).map_err(|_| corrupt("negative chunk_start"))?;

        Ok(Chunk {
            file: self.file,
            unit_id,
            offset,
            text: self.text,
            file_hash: self.file_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chunk(file: &str, unit_id: u32, offset: usize) -> Chunk {
        Chunk {
            file: file.to_string(),
            unit_id,
            offset,
            text: format!("{file} {unit_id} {offset}"),
            file_hash: format!("hash-{file}"),
        }
    }

    fn snapshot(entries: &[(&str, &str)]) -> CorpusSnapshot {
        entries
            .iter()
            .map(|(file, digest)| (file.to_string(), digest.to_string()))
            .collect()
    }

    #[test]
    fn ordinals_map_to_chunks() -> Result<(), StoreError> {
        let store = MetadataStore::open_in_memory()?;
        let chunks = vec![chunk("a.pdf", 1, 0), chunk("a.pdf", 1, 200), chunk("b.xlsx", 2, 0)];
        store.replace_corpus(&chunks, &snapshot(&[("a.pdf", "1"), ("b.xlsx", "2")]))?;

        assert_eq!(store.fetch_chunk(0)?, Some(chunks[0].clone()));
        assert_eq!(store.fetch_chunk(2)?, Some(chunks[2].clone()));
        assert_eq!(store.fetch_chunk(3)?, None);
        assert_eq!(store.count_chunks()?, 3);
        assert_eq!(store.chunks()?, chunks);
        Ok(())
    }

    #[test]
    fn rebuild_reuses_ordinals_from_zero() -> Result<(), StoreError> {
        let store = MetadataStore::open_in_memory()?;
        store.replace_corpus(
            &[chunk("old.pdf", 1, 0), chunk("old.pdf", 2, 0)],
            &snapshot(&[("old.pdf", "1")]),
        )?;

        let fresh = vec![chunk("new.pdf", 1, 0)];
        store.replace_corpus(&fresh, &snapshot(&[("new.pdf", "9")]))?;

        assert_eq!(store.fetch_chunk(0)?, Some(fresh[0].clone()));
        assert_eq!(store.fetch_chunk(1)?, None);
        assert_eq!(store.load_snapshot()?, snapshot(&[("new.pdf", "9")]));
        Ok(())
    }

    #[test]
    fn failed_replacement_keeps_previous_generation() -> Result<(), StoreError> {
        let store = MetadataStore::open_in_memory()?;
        let original = vec![chunk("a.pdf", 1, 0)];
        store.replace_corpus(&original, &snapshot(&[("a.pdf", "1")]))?;

        // Chunks go in first, then the snapshot insert aborts.
        store.conn.lock().execute_batch(
            "CREATE TRIGGER reject BEFORE INSERT ON file_hashes
             WHEN NEW.filename = 'bad.pdf'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )?;
        let result = store.replace_corpus(
            &[chunk("bad.pdf", 1, 0), chunk("bad.pdf", 2, 0)],
            &snapshot(&[("bad.pdf", "2")]),
        );

        assert!(result.is_err());
        assert_eq!(store.chunks()?, original);
        assert_eq!(store.load_snapshot()?, snapshot(&[("a.pdf", "1")]));
        Ok(())
    }

    #[test]
    fn store_persists_across_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("index_store.db");

        {
            let store = MetadataStore::open(&path)?;
            store.replace_corpus(&[chunk("a.pdf", 3, 400)], &snapshot(&[("a.pdf", "x")]))?;
        }

        let reopened = MetadataStore::open(&path)?;
        assert_eq!(reopened.fetch_chunk(0)?, Some(chunk("a.pdf", 3, 400)));
        assert_eq!(reopened.load_snapshot()?.get("a.pdf"), Some("x"));
        Ok(())
    }

    #[test]
    fn negative_page_is_reported_as_corrupt() -> Result<(), StoreError> {
        let store = MetadataStore::open_in_memory()?;
        store.conn.lock().execute(
            "INSERT INTO chunks (id, file, page, chunk_start, chunk_text, file_hash)
             VALUES (1, 'a.pdf', -1, 0, 'x', 'h')",
            [],
        )?;

        assert!(matches!(
            store.fetch_chunk(0),
            Err(StoreError::Corrupt { row: 1, .. })
        ));
        Ok(())
    }
}
