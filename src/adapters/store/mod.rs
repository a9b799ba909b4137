//! SQLite-backed durable store.
//!
//! One `index.db` per project holds files, chunks, FTS5 postings over
//! chunk text, per-model embedding vectors, and the symbol/call tables.
//! Reads and writes run through `spawn_blocking` over a single connection;
//! every per-file write is one transaction, so a file either commits fully
//! or keeps its previous state.

mod queries;
mod types;

pub use types::{LexicalCandidate, StoreStats, StoredCall, StoredChunk, StoredFile, StoredSymbol};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};
use tokio::task::spawn_blocking;

use crate::domain::error::{Error, Result};
use crate::domain::types::{AstDocument, CodeChunk, Language, StoreHealth, Symbol};

/// Current on-disk schema version, recorded in `project_config`.
pub const SCHEMA_VERSION: u32 = 1;

/// Handle to the project's durable index store.
pub struct IndexStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl IndexStore {
    /// Open or create the store at the given database path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::transient_io(format!("create store dir: {e}")))?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -4000;",
        )?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: db_path.to_path_buf(),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                content_hash TEXT NOT NULL,
                language TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                last_indexed_at INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY,
                chunk_hash TEXT NOT NULL UNIQUE,
                file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                signature TEXT,
                documentation TEXT,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                start_byte INTEGER NOT NULL,
                end_byte INTEGER NOT NULL,
                language TEXT NOT NULL,
                context_json TEXT NOT NULL,
                content TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_id);

            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                name, signature, documentation, content,
                chunk_hash UNINDEXED
            );

            CREATE TABLE IF NOT EXISTS embeddings (
                chunk_hash TEXT NOT NULL,
                model_id TEXT NOT NULL,
                model_version TEXT NOT NULL,
                dimensions INTEGER NOT NULL,
                vector BLOB NOT NULL,
                PRIMARY KEY (chunk_hash, model_id, model_version, dimensions)
            );

            CREATE TABLE IF NOT EXISTS symbols (
                file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                signature TEXT,
                parents_json TEXT NOT NULL,
                metadata_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
            CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);

            CREATE TABLE IF NOT EXISTS calls (
                file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                callee_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                receiver TEXT,
                argument_count INTEGER NOT NULL,
                caller_start_line INTEGER NOT NULL,
                caller_end_line INTEGER NOT NULL,
                chain_json TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_calls_callee ON calls(callee_name);
            CREATE INDEX IF NOT EXISTS idx_calls_file ON calls(file_id);

            CREATE TABLE IF NOT EXISTS project_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO project_config (key, value) VALUES ('schema_version', ?)",
            params![SCHEMA_VERSION.to_string()],
        )?;

        Ok(())
    }

    /// Run a closure against the connection on the blocking pool.
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::internal("store mutex poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::internal(format!("store task join failed: {e}")))?
    }

    /// Database file path.
    pub fn db_path(&self) -> &Path {
        &self.path
    }

    // ── Per-file writes ─────────────────────────────────────────────────

    /// Replace a file's rows in one transaction: the file row, its chunks,
    /// FTS postings, symbols and calls. Embedding rows survive (they are
    /// keyed by content and swept when orphaned).
    pub async fn upsert_file(
        &self,
        relative_path: &str,
        content_hash: &str,
        language: Language,
        size: u64,
        chunks: Vec<CodeChunk>,
        facts: AstDocument,
    ) -> Result<i64> {
        let path = relative_path.to_string();
        let hash = content_hash.to_string();
        let now = chrono::Utc::now().timestamp();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO files (path, content_hash, language, size, last_indexed_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(path) DO UPDATE SET
                     content_hash = excluded.content_hash,
                     language = excluded.language,
                     size = excluded.size,
                     last_indexed_at = excluded.last_indexed_at",
                params![path, hash, language.as_str(), size as i64, now],
            )?;
            let file_id: i64 =
                tx.query_row("SELECT id FROM files WHERE path = ?", params![path], |r| {
                    r.get(0)
                })?;

            // Drop previous rows for this file
            tx.execute(
                "DELETE FROM chunks_fts WHERE chunk_hash IN
                     (SELECT chunk_hash FROM chunks WHERE file_id = ?)",
                params![file_id],
            )?;
            tx.execute("DELETE FROM chunks WHERE file_id = ?", params![file_id])?;
            tx.execute("DELETE FROM symbols WHERE file_id = ?", params![file_id])?;
            tx.execute("DELETE FROM calls WHERE file_id = ?", params![file_id])?;

            for chunk in &chunks {
                let context_json = serde_json::to_string(&chunk.context)?;
                let inserted = tx.execute(
                    "INSERT INTO chunks
                         (chunk_hash, file_id, kind, name, signature, documentation,
                          start_line, end_line, start_byte, end_byte, language,
                          context_json, content)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(chunk_hash) DO NOTHING",
                    params![
                        chunk.chunk_hash,
                        file_id,
                        chunk.kind.as_str(),
                        chunk.name,
                        chunk.signature,
                        chunk.documentation,
                        chunk.start_line,
                        chunk.end_line,
                        chunk.start_byte,
                        chunk.end_byte,
                        chunk.language.as_str(),
                        context_json,
                        chunk.content,
                    ],
                )?;
                // Identical chunks in other files already carry the postings
                if inserted > 0 {
                    tx.execute(
                        "INSERT INTO chunks_fts (name, signature, documentation, content, chunk_hash)
                         VALUES (?, ?, ?, ?, ?)",
                        params![
                            chunk.name,
                            chunk.signature.as_deref().unwrap_or(""),
                            chunk.documentation.as_deref().unwrap_or(""),
                            chunk.content,
                            chunk.chunk_hash,
                        ],
                    )?;
                }
            }

            for symbol in facts.all_symbols() {
                insert_symbol(&tx, file_id, symbol)?;
            }

            for call in &facts.calls {
                tx.execute(
                    "INSERT INTO calls
                         (file_id, callee_name, kind, receiver, argument_count,
                          caller_start_line, caller_end_line, chain_json)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        file_id,
                        call.callee,
                        call.kind.as_str(),
                        call.receiver,
                        call.argument_count,
                        call.start_line,
                        call.end_line,
                        call.chain
                            .as_ref()
                            .map(serde_json::to_string)
                            .transpose()?,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(file_id)
        })
        .await
    }

    /// Delete a file and everything derived from it, embeddings included,
    /// in one transaction.
    pub async fn delete_file(&self, relative_path: &str) -> Result<bool> {
        let path = relative_path.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let file_id: Option<i64> = tx
                .query_row("SELECT id FROM files WHERE path = ?", params![path], |r| {
                    r.get(0)
                })
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            let Some(file_id) = file_id else {
                return Ok(false);
            };

            tx.execute(
                "DELETE FROM embeddings WHERE chunk_hash IN
                     (SELECT chunk_hash FROM chunks WHERE file_id = ?)",
                params![file_id],
            )?;
            tx.execute(
                "DELETE FROM chunks_fts WHERE chunk_hash IN
                     (SELECT chunk_hash FROM chunks WHERE file_id = ?)",
                params![file_id],
            )?;
            tx.execute("DELETE FROM chunks WHERE file_id = ?", params![file_id])?;
            tx.execute("DELETE FROM symbols WHERE file_id = ?", params![file_id])?;
            tx.execute("DELETE FROM calls WHERE file_id = ?", params![file_id])?;
            tx.execute("DELETE FROM files WHERE id = ?", params![file_id])?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    // ── Embeddings ──────────────────────────────────────────────────────

    /// Store a vector for a chunk under the given model key. Idempotent.
    pub async fn upsert_embedding(
        &self,
        chunk_hash: &str,
        model_id: &str,
        model_version: &str,
        vector: Vec<f32>,
    ) -> Result<()> {
        let hash = chunk_hash.to_string();
        let model = model_id.to_string();
        let version = model_version.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO embeddings
                     (chunk_hash, model_id, model_version, dimensions, vector)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    hash,
                    model,
                    version,
                    vector.len() as i64,
                    f32_vec_to_bytes(&vector)
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// All `(chunk_hash, vector)` pairs for the given model key.
    pub async fn vectors_for_model(
        &self,
        model_id: &str,
        model_version: &str,
        dimensions: usize,
    ) -> Result<Vec<(String, Vec<f32>)>> {
        let model = model_id.to_string();
        let version = model_version.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_hash, vector FROM embeddings
                 WHERE model_id = ? AND model_version = ? AND dimensions = ?",
            )?;
            let rows = stmt.query_map(params![model, version, dimensions as i64], |row| {
                let hash: String = row.get(0)?;
                let bytes: Vec<u8> = row.get(1)?;
                Ok((hash, bytes_to_f32_vec(&bytes)))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Chunks with no embedding row for the given model key.
    pub async fn chunks_missing_embedding(
        &self,
        model_id: &str,
        model_version: &str,
        dimensions: usize,
    ) -> Result<Vec<StoredChunk>> {
        let model = model_id.to_string();
        let version = model_version.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {columns} FROM chunks c JOIN files f ON f.id = c.file_id
                 WHERE NOT EXISTS (
                     SELECT 1 FROM embeddings e
                     WHERE e.chunk_hash = c.chunk_hash
                       AND e.model_id = ? AND e.model_version = ? AND e.dimensions = ?
                 )
                 ORDER BY f.path, c.start_byte",
                columns = queries::CHUNK_COLUMNS,
            ))?;
            let rows = stmt.query_map(params![model, version, dimensions as i64], queries::chunk_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    /// Delete derived rows whose owner no longer exists. Runs on startup
    /// and after every index pass.
    pub async fn orphan_sweep(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0usize;
            removed += tx.execute(
                "DELETE FROM embeddings WHERE chunk_hash NOT IN (SELECT chunk_hash FROM chunks)",
                [],
            )?;
            removed += tx.execute(
                "DELETE FROM chunks_fts WHERE chunk_hash NOT IN (SELECT chunk_hash FROM chunks)",
                [],
            )?;
            removed += tx.execute(
                "DELETE FROM symbols WHERE file_id NOT IN (SELECT id FROM files)",
                [],
            )?;
            removed += tx.execute(
                "DELETE FROM calls WHERE file_id NOT IN (SELECT id FROM files)",
                [],
            )?;
            removed += tx.execute(
                "DELETE FROM chunks WHERE file_id NOT IN (SELECT id FROM files)",
                [],
            )?;
            tx.commit()?;
            Ok(removed as u64)
        })
        .await
    }

    /// Integrity facts, row counts, and WAL size.
    pub async fn health_check(&self) -> Result<StoreHealth> {
        let wal_path = self.path.with_extension("db-wal");
        let wal_bytes = std::fs::metadata(&wal_path).map(|m| m.len()).unwrap_or(0);

        self.with_conn(move |conn| {
            let integrity: String =
                conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            let count = |table: &str| -> Result<u64> {
                Ok(conn.query_row(
                    &format!("SELECT COUNT(*) FROM {table}"),
                    [],
                    |row| row.get::<_, i64>(0),
                )? as u64)
            };
            Ok(StoreHealth {
                ok: integrity == "ok",
                integrity,
                files: count("files")?,
                chunks: count("chunks")?,
                symbols: count("symbols")?,
                calls: count("calls")?,
                embeddings: count("embeddings")?,
                wal_bytes,
            })
        })
        .await
    }

    /// Read a `project_config` value.
    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM project_config WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other.into()),
            })
        })
        .await
    }

    /// Write a `project_config` value.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO project_config (key, value) VALUES (?, ?)",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }
}

fn insert_symbol(tx: &rusqlite::Transaction<'_>, file_id: i64, symbol: &Symbol) -> Result<()> {
    tx.execute(
        "INSERT INTO symbols
             (file_id, name, kind, start_line, end_line, signature, parents_json, metadata_json)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            file_id,
            symbol.name,
            symbol.kind.as_str(),
            symbol.start_line,
            symbol.end_line,
            symbol.signature,
            serde_json::to_string(&symbol.parents)?,
            serde_json::to_string(&symbol.metadata)?,
        ],
    )?;
    Ok(())
}

pub(crate) fn f32_vec_to_bytes(floats: &[f32]) -> Vec<u8> {
    floats.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chunking::{chunk_file, ChunkerConfig};
    use crate::domain::extract::extract;
    use crate::domain::parsing::parse_source;

    async fn store_with_file(source: &str, path: &str) -> IndexStore {
        let store = IndexStore::open_in_memory().unwrap();
        index_source(&store, source, path).await;
        store
    }

    async fn index_source(store: &IndexStore, source: &str, path: &str) {
        let parsed = parse_source(source, Language::from_path(std::path::Path::new(path))).unwrap();
        let chunks = chunk_file(&parsed, path, &ChunkerConfig::default());
        let facts = extract(&parsed, path);
        store
            .upsert_file(path, "hash0", parsed.language, source.len() as u64, chunks, facts)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upsert_and_health() {
        let store = store_with_file("function f() { return g(); }", "f.js").await;
        let health = store.health_check().await.unwrap();
        assert!(health.ok);
        assert_eq!(health.files, 1);
        assert_eq!(health.chunks, 1);
        assert!(health.symbols >= 1);
        assert!(health.calls >= 1);
    }

    #[tokio::test]
    async fn delete_file_removes_dependents() {
        let store = store_with_file("function f() { return 1; }", "f.js").await;
        let chunk = store.lexical_search("f", 10, None, None).await.unwrap();
        assert!(!chunk.is_empty());
        store
            .upsert_embedding(&chunk[0].chunk_hash, "m", "1", vec![0.0, 1.0])
            .await
            .unwrap();

        assert!(store.delete_file("f.js").await.unwrap());
        let health = store.health_check().await.unwrap();
        assert_eq!(health.files, 0);
        assert_eq!(health.chunks, 0);
        assert_eq!(health.symbols, 0);
        assert_eq!(health.calls, 0);
        assert_eq!(health.embeddings, 0);
    }

    #[tokio::test]
    async fn identical_chunks_across_files_share_one_row() {
        let store = IndexStore::open_in_memory().unwrap();
        index_source(&store, "function add(a,b){ return a+b; }", "a.js").await;
        index_source(&store, "function add(a,b){ return a+b; }", "b.js").await;

        let health = store.health_check().await.unwrap();
        assert_eq!(health.files, 2);
        // Content-addressed identity dedupes the chunk row
        assert_eq!(health.chunks, 1);
    }

    #[tokio::test]
    async fn orphan_sweep_clears_stray_embeddings() {
        let store = store_with_file("function f() { return 1; }", "f.js").await;
        store
            .upsert_embedding("deadbeef", "m", "1", vec![0.5; 4])
            .await
            .unwrap();
        let removed = store.orphan_sweep().await.unwrap();
        assert!(removed >= 1);
        let health = store.health_check().await.unwrap();
        assert_eq!(health.embeddings, 0);
    }

    #[tokio::test]
    async fn missing_embeddings_listed_until_upserted() {
        let store = store_with_file("function f() { return 1; }", "f.js").await;
        let missing = store.chunks_missing_embedding("m", "1", 4).await.unwrap();
        assert_eq!(missing.len(), 1);

        store
            .upsert_embedding(&missing[0].chunk_hash, "m", "1", vec![0.0; 4])
            .await
            .unwrap();
        let missing = store.chunks_missing_embedding("m", "1", 4).await.unwrap();
        assert!(missing.is_empty());
        // A different dimension is a different key
        let missing = store.chunks_missing_embedding("m", "1", 8).await.unwrap();
        assert_eq!(missing.len(), 1);
    }

    #[test]
    fn vector_byte_round_trip() {
        let original = vec![0.1f32, -2.5, 3.25];
        let bytes = f32_vec_to_bytes(&original);
        assert_eq!(bytes_to_f32_vec(&bytes), original);
    }
}
