//! Category Store
//!
//! SQLite persistence for category records. The store is the durable copy;
//! queries never touch it. Embeddings are stored as little-endian f32
//! blobs, keywords as JSON.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, params};

use super::{CategoryRecord, IndexError, Result};
use crate::embedding::Embedding;

/// Durable SQLite store for category records
pub struct CategoryStore {
    conn: Mutex<Connection>,
}

impl CategoryStore {
    /// Open (or create) the store. `data_dir = None` resolves to the
    /// platform data directory.
    pub fn open(data_dir: Option<PathBuf>) -> Result<Self> {
        let dir = match data_dir {
            Some(dir) => dir,
            None => directories::ProjectDirs::from("io", "contextmatch", "core")
                .map(|d| d.data_dir().to_path_buf())
                .ok_or_else(|| {
                    IndexError::Snapshot("could not resolve platform data directory".into())
                })?,
        };
        std::fs::create_dir_all(&dir)?;

        let conn = Connection::open(dir.join("categories.db"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS categories (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                source      TEXT NOT NULL DEFAULT '',
                parent_id   TEXT,
                level       INTEGER NOT NULL DEFAULT 0,
                keywords    TEXT NOT NULL DEFAULT '[]',
                embedding   BLOB NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| IndexError::LockPoisoned)
    }

    /// Load all persisted records, skipping rows whose embedding does not
    /// match the expected dimensionality (a seed/config change makes stale
    /// rows incomparable, not recoverable).
    pub fn load_all(&self, dimensions: usize) -> Result<Vec<CategoryRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, source, parent_id, level, keywords, embedding
             FROM categories ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Vec<u8>>(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, name, description, source, parent_id, level, keywords_json, blob) = row?;

            let embedding = match Embedding::from_bytes(&blob) {
                Some(e) if e.dimensions == dimensions => e,
                _ => {
                    tracing::warn!(id = %id, "skipping persisted category with stale embedding");
                    continue;
                }
            };
            let keywords: Vec<String> =
                serde_json::from_str(&keywords_json).unwrap_or_default();

            records.push(CategoryRecord {
                id,
                name,
                description,
                source,
                embedding,
                keywords,
                parent_id,
                level: level.max(0) as u32,
            });
        }
        Ok(records)
    }

    /// Insert or replace one record
    pub fn upsert(&self, record: &CategoryRecord) -> Result<()> {
        let conn = self.lock()?;
        Self::upsert_on(&conn, record)
    }

    fn upsert_on(conn: &Connection, record: &CategoryRecord) -> Result<()> {
        let keywords = serde_json::to_string(&record.keywords)
            .map_err(|e| IndexError::Snapshot(format!("keyword serialization failed: {e}")))?;

        conn.execute(
            "INSERT INTO categories (id, name, description, source, parent_id, level, keywords, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                source = excluded.source,
                parent_id = excluded.parent_id,
                level = excluded.level,
                keywords = excluded.keywords,
                embedding = excluded.embedding",
            params![
                record.id,
                record.name,
                record.description,
                record.source,
                record.parent_id,
                record.level as i64,
                keywords,
                record.embedding.to_bytes(),
            ],
        )?;
        Ok(())
    }

    /// Atomically replace the whole table with a new snapshot
    pub fn replace_all(&self, records: &[Arc<CategoryRecord>]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM categories", [])?;
        for record in records {
            Self::upsert_on(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of persisted records
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}
