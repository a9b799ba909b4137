//! Read-side queries: lexical search, chunk lookups, file catalog reads,
//! and the symbol/call navigation queries behind the tool server.

use rusqlite::{params, Row};

use super::types::{LexicalCandidate, StoreStats, StoredCall, StoredChunk, StoredFile, StoredSymbol};
use super::IndexStore;
use crate::domain::error::Result;
use crate::domain::types::{CallKind, ChunkKind, Language, SymbolKind};

/// Chunk columns selected for [`StoredChunk`] rows (aliased file path last).
pub(super) const CHUNK_COLUMNS: &str = "c.id, c.chunk_hash, c.file_id, c.kind, c.name, \
     c.signature, c.documentation, c.start_line, c.end_line, c.start_byte, c.end_byte, \
     c.language, c.context_json, c.content, f.path";

pub(super) fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<StoredChunk> {
    let kind: String = row.get(3)?;
    let language: String = row.get(11)?;
    let context_json: String = row.get(12)?;
    Ok(StoredChunk {
        id: row.get(0)?,
        chunk_hash: row.get(1)?,
        file_id: row.get(2)?,
        kind: parse_chunk_kind(&kind),
        name: row.get(4)?,
        signature: row.get(5)?,
        documentation: row.get(6)?,
        start_line: row.get::<_, i64>(7)? as u32,
        end_line: row.get::<_, i64>(8)? as u32,
        start_byte: row.get::<_, i64>(9)? as u32,
        end_byte: row.get::<_, i64>(10)? as u32,
        language: language.parse().unwrap_or(Language::Unknown),
        context: serde_json::from_str(&context_json).unwrap_or_default(),
        content: row.get(13)?,
        file_path: row.get(14)?,
    })
}

fn parse_chunk_kind(kind: &str) -> ChunkKind {
    match kind {
        "async_function" => ChunkKind::AsyncFunction,
        "generator" => ChunkKind::Generator,
        "method" => ChunkKind::Method,
        "constructor" => ChunkKind::Constructor,
        "property" => ChunkKind::Property,
        "class" => ChunkKind::Class,
        "module" => ChunkKind::Module,
        _ => ChunkKind::Function,
    }
}

fn parse_symbol_kind(kind: &str) -> SymbolKind {
    match kind {
        "method" => SymbolKind::Method,
        "constructor" => SymbolKind::Constructor,
        "property" => SymbolKind::Property,
        "class" => SymbolKind::Class,
        "interface" => SymbolKind::Interface,
        "type" => SymbolKind::Type,
        "enum" => SymbolKind::Enum,
        "variable" => SymbolKind::Variable,
        "constant" => SymbolKind::Constant,
        "namespace" => SymbolKind::Namespace,
        _ => SymbolKind::Function,
    }
}

fn parse_call_kind(kind: &str) -> CallKind {
    match kind {
        "method" => CallKind::Method,
        "constructor" => CallKind::Constructor,
        "dynamic" => CallKind::Dynamic,
        _ => CallKind::Function,
    }
}

fn symbol_from_row(row: &Row<'_>) -> rusqlite::Result<StoredSymbol> {
    let kind: String = row.get(2)?;
    let parents_json: String = row.get(6)?;
    let metadata_json: String = row.get(7)?;
    Ok(StoredSymbol {
        file_id: row.get(0)?,
        name: row.get(1)?,
        kind: parse_symbol_kind(&kind),
        start_line: row.get::<_, i64>(3)? as u32,
        end_line: row.get::<_, i64>(4)? as u32,
        signature: row.get(5)?,
        parents: serde_json::from_str(&parents_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        file_path: row.get(8)?,
    })
}

fn call_from_row(row: &Row<'_>) -> rusqlite::Result<StoredCall> {
    let kind: String = row.get(2)?;
    let chain_json: Option<String> = row.get(7)?;
    Ok(StoredCall {
        file_id: row.get(0)?,
        callee: row.get(1)?,
        kind: parse_call_kind(&kind),
        receiver: row.get(3)?,
        argument_count: row.get::<_, i64>(4)? as u32,
        start_line: row.get::<_, i64>(5)? as u32,
        end_line: row.get::<_, i64>(6)? as u32,
        chain: chain_json.and_then(|j| serde_json::from_str(&j).ok()),
        file_path: row.get(8)?,
    })
}

/// Escape user text into an FTS5 query: each token becomes a quoted
/// prefix phrase, OR-joined. Quoting keeps arbitrary input from ever
/// producing a syntax error; the prefix form makes `calculate` match
/// `calculateTax`.
fn fts_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\"*"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

impl IndexStore {
    /// Lexical full-text candidates for a query, best first.
    ///
    /// `bm25()` ranks better matches with smaller (more negative) values;
    /// the returned score is negated so larger is better.
    pub async fn lexical_search(
        &self,
        query: &str,
        limit: usize,
        directory: Option<&str>,
        language: Option<Language>,
    ) -> Result<Vec<LexicalCandidate>> {
        let match_expr = fts_query(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        let directory = directory.map(|d| d.trim_end_matches('/').to_string());

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chunks_fts.chunk_hash, bm25(chunks_fts) AS rank, f.path, c.language
                 FROM chunks_fts
                 JOIN chunks c ON c.chunk_hash = chunks_fts.chunk_hash
                 JOIN files f ON f.id = c.file_id
                 WHERE chunks_fts MATCH ?
                 ORDER BY rank
                 LIMIT ?",
            )?;
            let rows = stmt.query_map(params![match_expr, limit as i64 * 4], |row| {
                let hash: String = row.get(0)?;
                let rank: f64 = row.get(1)?;
                let path: String = row.get(2)?;
                let lang: String = row.get(3)?;
                Ok((hash, rank, path, lang))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (hash, rank, path, lang) = row?;
                if let Some(dir) = &directory {
                    if !path.starts_with(dir.as_str()) {
                        continue;
                    }
                }
                if let Some(wanted) = language {
                    if lang.parse::<Language>().unwrap_or(Language::Unknown) != wanted {
                        continue;
                    }
                }
                out.push(LexicalCandidate {
                    chunk_hash: hash,
                    score: (-rank) as f32,
                });
                if out.len() >= limit {
                    break;
                }
            }
            Ok(out)
        })
        .await
    }

    /// Load one chunk by identity.
    pub async fn chunk_by_hash(&self, chunk_hash: &str) -> Result<Option<StoredChunk>> {
        let hash = chunk_hash.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks c JOIN files f ON f.id = c.file_id
                 WHERE c.chunk_hash = ?"
            ))?;
            let mut rows = stmt.query_map(params![hash], chunk_from_row)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Load chunks for a set of identities; missing hashes are skipped.
    pub async fn chunks_by_hashes(&self, hashes: &[String]) -> Result<Vec<StoredChunk>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let hashes: Vec<String> = hashes.to_vec();
        self.with_conn(move |conn| {
            let placeholders = vec!["?"; hashes.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks c JOIN files f ON f.id = c.file_id
                 WHERE c.chunk_hash IN ({placeholders})"
            ))?;
            let params_vec: Vec<&dyn rusqlite::ToSql> =
                hashes.iter().map(|h| h as &dyn rusqlite::ToSql).collect();
            let rows = stmt.query_map(params_vec.as_slice(), chunk_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// All chunks of one file, in span order.
    pub async fn chunks_for_file(&self, relative_path: &str) -> Result<Vec<StoredChunk>> {
        let path = relative_path.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks c JOIN files f ON f.id = c.file_id
                 WHERE f.path = ? ORDER BY c.start_byte"
            ))?;
            let rows = stmt.query_map(params![path], chunk_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Stored content hash for a file, when indexed.
    pub async fn file_hash(&self, relative_path: &str) -> Result<Option<String>> {
        let path = relative_path.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT content_hash FROM files WHERE path = ?",
                params![path],
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

    /// The full file catalog.
    pub async fn list_files(&self) -> Result<Vec<StoredFile>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, path, content_hash, language, size, last_indexed_at
                 FROM files ORDER BY path",
            )?;
            let rows = stmt.query_map([], |row| {
                let language: String = row.get(3)?;
                Ok(StoredFile {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    content_hash: row.get(2)?,
                    language: language.parse().unwrap_or(Language::Unknown),
                    size: row.get::<_, i64>(4)? as u64,
                    last_indexed_at: row.get(5)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Symbols matching a name exactly, across the project.
    pub async fn symbols_by_name(&self, name: &str, limit: usize) -> Result<Vec<StoredSymbol>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.file_id, s.name, s.kind, s.start_line, s.end_line,
                        s.signature, s.parents_json, s.metadata_json, f.path
                 FROM symbols s JOIN files f ON f.id = s.file_id
                 WHERE s.name = ?
                 ORDER BY f.path, s.start_line
                 LIMIT ?",
            )?;
            let rows = stmt.query_map(params![name, limit as i64], symbol_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Symbols whose name contains the query (case-insensitive), optionally
    /// restricted to one file.
    pub async fn symbols_matching(
        &self,
        query: &str,
        file: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredSymbol>> {
        let pattern = format!("%{}%", query.replace('%', "").replace('_', "\\_"));
        let file = file.map(str::to_string);
        self.with_conn(move |conn| {
            let mut out = Vec::new();
            let sql = "SELECT s.file_id, s.name, s.kind, s.start_line, s.end_line,
                              s.signature, s.parents_json, s.metadata_json, f.path
                       FROM symbols s JOIN files f ON f.id = s.file_id
                       WHERE s.name LIKE ? ESCAPE '\\'";
            match file {
                Some(path) => {
                    let mut stmt =
                        conn.prepare(&format!("{sql} AND f.path = ? ORDER BY s.start_line LIMIT ?"))?;
                    let rows =
                        stmt.query_map(params![pattern, path, limit as i64], symbol_from_row)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
                None => {
                    let mut stmt =
                        conn.prepare(&format!("{sql} ORDER BY f.path, s.start_line LIMIT ?"))?;
                    let rows = stmt.query_map(params![pattern, limit as i64], symbol_from_row)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
            }
            Ok(out)
        })
        .await
    }

    /// Symbols of one file, in definition order.
    pub async fn symbols_for_file(&self, relative_path: &str) -> Result<Vec<StoredSymbol>> {
        let path = relative_path.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.file_id, s.name, s.kind, s.start_line, s.end_line,
                        s.signature, s.parents_json, s.metadata_json, f.path
                 FROM symbols s JOIN files f ON f.id = s.file_id
                 WHERE f.path = ? ORDER BY s.start_line",
            )?;
            let rows = stmt.query_map(params![path], symbol_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Call sites whose callee matches a name, across the project.
    pub async fn calls_to(&self, callee: &str, limit: usize) -> Result<Vec<StoredCall>> {
        let callee = callee.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT c.file_id, c.callee_name, c.kind, c.receiver, c.argument_count,
                        c.caller_start_line, c.caller_end_line, c.chain_json, f.path
                 FROM calls c JOIN files f ON f.id = c.file_id
                 WHERE c.callee_name = ?
                 ORDER BY f.path, c.caller_start_line
                 LIMIT ?",
            )?;
            let rows = stmt.query_map(params![callee, limit as i64], call_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Call sites inside a file span (used for callees of a definition).
    pub async fn calls_within(
        &self,
        relative_path: &str,
        start_line: u32,
        end_line: u32,
    ) -> Result<Vec<StoredCall>> {
        let path = relative_path.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT c.file_id, c.callee_name, c.kind, c.receiver, c.argument_count,
                        c.caller_start_line, c.caller_end_line, c.chain_json, f.path
                 FROM calls c JOIN files f ON f.id = c.file_id
                 WHERE f.path = ? AND c.caller_start_line >= ? AND c.caller_end_line <= ?
                 ORDER BY c.caller_start_line",
            )?;
            let rows = stmt.query_map(params![path, start_line, end_line], call_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// The innermost symbol in a file whose span contains the given line.
    pub async fn enclosing_symbol(
        &self,
        relative_path: &str,
        line: u32,
    ) -> Result<Option<StoredSymbol>> {
        let path = relative_path.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.file_id, s.name, s.kind, s.start_line, s.end_line,
                        s.signature, s.parents_json, s.metadata_json, f.path
                 FROM symbols s JOIN files f ON f.id = s.file_id
                 WHERE f.path = ? AND s.start_line <= ? AND s.end_line >= ?
                 ORDER BY (s.end_line - s.start_line) ASC
                 LIMIT 1",
            )?;
            let mut rows = stmt.query_map(params![path, line, line], symbol_from_row)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Aggregate row counts.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64> {
                Ok(conn.query_row(
                    &format!("SELECT COUNT(*) FROM {table}"),
                    [],
                    |row| row.get::<_, i64>(0),
                )? as u64)
            };
            Ok(StoreStats {
                files: count("files")?,
                chunks: count("chunks")?,
                symbols: count("symbols")?,
                calls: count("calls")?,
                embeddings: count("embeddings")?,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chunking::{chunk_file, ChunkerConfig};
    use crate::domain::extract::extract;
    use crate::domain::parsing::parse_source;

    async fn seeded_store() -> IndexStore {
        let store = IndexStore::open_in_memory().unwrap();
        let sources = [
            (
                "src/math.js",
                "/** Adds. */\nfunction calculateSum(a, b) { return a + b; }\nfunction main() { return calculateSum(1, 2); }",
            ),
            (
                "src/format.py",
                "def format_total(total):\n    \"\"\"Render a total.\"\"\"\n    return str(total)\n",
            ),
        ];
        for (path, source) in sources {
            let parsed =
                parse_source(source, Language::from_path(std::path::Path::new(path))).unwrap();
            let chunks = chunk_file(&parsed, path, &ChunkerConfig::default());
            let facts = extract(&parsed, path);
            store
                .upsert_file(path, "h", parsed.language, source.len() as u64, chunks, facts)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn lexical_search_ranks_matches() {
        let store = seeded_store().await;
        let hits = store.lexical_search("calculateSum", 10, None, None).await.unwrap();
        assert!(!hits.is_empty());
        let chunk = store.chunk_by_hash(&hits[0].chunk_hash).await.unwrap().unwrap();
        assert_eq!(chunk.name, "calculateSum");
    }

    #[tokio::test]
    async fn lexical_search_honors_filters() {
        let store = seeded_store().await;
        let hits = store
            .lexical_search("total", 10, Some("src/"), Some(Language::Python))
            .await
            .unwrap();
        assert!(!hits.is_empty());
        let hits = store
            .lexical_search("total", 10, None, Some(Language::TypeScript))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn hostile_query_does_not_error() {
        let store = seeded_store().await;
        let hits = store
            .lexical_search("\"unbalanced ( OR NEAR/", 10, None, None)
            .await
            .unwrap();
        // No syntax error; may or may not match
        let _ = hits;
    }

    #[tokio::test]
    async fn symbol_navigation_queries() {
        let store = seeded_store().await;

        let defs = store.symbols_by_name("calculateSum", 10).await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].file_path, "src/math.js");

        let callers = store.calls_to("calculateSum", 10).await.unwrap();
        assert_eq!(callers.len(), 1);
        let enclosing = store
            .enclosing_symbol("src/math.js", callers[0].start_line)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(enclosing.name, "main");

        let main_def = &store.symbols_by_name("main", 1).await.unwrap()[0];
        let callees = store
            .calls_within("src/math.js", main_def.start_line, main_def.end_line)
            .await
            .unwrap();
        assert!(callees.iter().any(|c| c.callee == "calculateSum"));
    }

    #[tokio::test]
    async fn symbols_matching_is_case_insensitive_substring() {
        let store = seeded_store().await;
        let hits = store.symbols_matching("sum", None, 10).await.unwrap();
        assert!(hits.iter().any(|s| s.name == "calculateSum"));
    }
}
