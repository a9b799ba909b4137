//! Content-addressed embedding cache.
//!
//! Persists vectors keyed by `(content_hash, model_id, model_version,
//! dimensions)` in `cache/embeddings.db`. Purely derived state: clearing it
//! costs recomputation, never correctness. SQLite transactions guarantee a
//! partial write can never surface as a corrupt vector; a stored vector
//! whose length disagrees with its dimension key is dropped on read.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::adapters::store::{bytes_to_f32_vec, f32_vec_to_bytes};
use crate::domain::error::{Error, Result};

/// Cache counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    /// Lookups that returned a vector
    pub hits: u64,
    /// Lookups that missed
    pub misses: u64,
    /// Rows currently stored
    pub entries: u64,
}

/// Persistent vector cache.
pub struct EmbeddingCache {
    conn: Mutex<Connection>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Open or create the cache database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::transient_io(format!("create cache dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory cache for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             CREATE TABLE IF NOT EXISTS vectors (
                content_hash TEXT NOT NULL,
                model_id TEXT NOT NULL,
                model_version TEXT NOT NULL,
                dimensions INTEGER NOT NULL,
                vector BLOB NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                PRIMARY KEY (content_hash, model_id, model_version, dimensions)
             );
             CREATE INDEX IF NOT EXISTS idx_vectors_dimensions ON vectors(dimensions);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("embedding cache mutex poisoned"))
    }

    /// Look up a vector. A hit always returns exactly `dimensions` floats;
    /// a row that disagrees is deleted and reported as a miss.
    pub fn get(
        &self,
        content_hash: &str,
        model_id: &str,
        model_version: &str,
        dimensions: usize,
    ) -> Result<Option<Vec<f32>>> {
        let conn = self.lock()?;
        let row: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM vectors
                 WHERE content_hash = ? AND model_id = ? AND model_version = ? AND dimensions = ?",
                params![content_hash, model_id, model_version, dimensions as i64],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(Error::from(other)),
            })?;

        match row {
            Some(bytes) => {
                let vector = bytes_to_f32_vec(&bytes);
                if vector.len() != dimensions {
                    conn.execute(
                        "DELETE FROM vectors
                         WHERE content_hash = ? AND model_id = ? AND model_version = ? AND dimensions = ?",
                        params![content_hash, model_id, model_version, dimensions as i64],
                    )?;
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(vector))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    /// Store a vector. Idempotent; later writes win.
    pub fn set(
        &self,
        content_hash: &str,
        model_id: &str,
        model_version: &str,
        vector: &[f32],
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO vectors
                 (content_hash, model_id, model_version, dimensions, vector)
             VALUES (?, ?, ?, ?, ?)",
            params![
                content_hash,
                model_id,
                model_version,
                vector.len() as i64,
                f32_vec_to_bytes(vector)
            ],
        )?;
        Ok(())
    }

    /// Store many vectors in one transaction.
    pub fn set_batch(
        &self,
        model_id: &str,
        model_version: &str,
        entries: &[(String, Vec<f32>)],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (content_hash, vector) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO vectors
                     (content_hash, model_id, model_version, dimensions, vector)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    content_hash,
                    model_id,
                    model_version,
                    vector.len() as i64,
                    f32_vec_to_bytes(vector)
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop every row with the given dimensionality (profile switch).
    pub fn invalidate_by_dimensions(&self, dimensions: usize) -> Result<u64> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM vectors WHERE dimensions = ?",
            params![dimensions as i64],
        )?;
        Ok(removed as u64)
    }

    /// Drop everything.
    pub fn clear(&self) -> Result<u64> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM vectors", [])?;
        Ok(removed as u64)
    }

    /// Current counters.
    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.lock()?;
        let entries: i64 = conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries as u64,
        })
    }

    /// Hit rate in `[0, 1]` since open; 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}
