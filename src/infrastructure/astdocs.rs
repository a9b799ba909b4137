//! AST document persistence.
//!
//! One JSON document per source file under `.codeindex/ast/`, keyed by a
//! mangled relative path plus a short hash suffix so distinct paths can
//! never collide. Reads and writes are whole-document; writers to the same
//! key serialize through a per-key async mutex, and every write is a temp
//! file plus rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::domain::error::{Error, Result};
use crate::domain::types::AstDocument;

/// Store of per-file structured fact documents.
pub struct AstDocStore {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AstDocStore {
    /// Store rooted at the given directory (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: DashMap::new(),
        }
    }

    /// Filename for a relative source path: mangled path + hash suffix.
    fn key_for(relative_path: &str) -> String {
        let mangled: String = relative_path
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .take(120)
            .collect();
        let mut hasher = Sha256::new();
        hasher.update(relative_path.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{mangled}.{}.json", &digest[..12])
    }

    fn doc_path(&self, relative_path: &str) -> PathBuf {
        self.dir.join(Self::key_for(relative_path))
    }

    fn lock_for(&self, relative_path: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(relative_path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Write the whole document atomically.
    pub async fn write(&self, relative_path: &str, doc: &AstDocument) -> Result<()> {
        let lock = self.lock_for(relative_path);
        let _guard = lock.lock().await;

        let path = self.doc_path(relative_path);
        let dir = self.dir.clone();
        let text = serde_json::to_string(doc)?;

        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&dir)
                .map_err(|e| Error::transient_io(format!("create {}: {e}", dir.display())))?;
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, text)
                .map_err(|e| Error::transient_io(format!("write {}: {e}", tmp.display())))?;
            std::fs::rename(&tmp, &path)
                .map_err(|e| Error::transient_io(format!("rename {}: {e}", path.display())))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::internal(format!("ast write join failed: {e}")))?
    }

    /// Read the document for a source path, when present.
    pub async fn read(&self, relative_path: &str) -> Result<Option<AstDocument>> {
        let path = self.doc_path(relative_path);
        tokio::task::spawn_blocking(move || -> Result<Option<AstDocument>> {
            let text = match std::fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    return Err(Error::transient_io(format!("read {}: {e}", path.display())))
                }
            };
            Ok(Some(serde_json::from_str(&text)?))
        })
        .await
        .map_err(|e| Error::internal(format!("ast read join failed: {e}")))?
    }

    /// Delete the document for a source path; missing is not an error.
    pub async fn remove(&self, relative_path: &str) -> Result<()> {
        let lock = self.lock_for(relative_path);
        let _guard = lock.lock().await;
        let path = self.doc_path(relative_path);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::transient_io(format!("remove {}: {e}", path.display()))),
        }
    }

    /// Load every stored document (startup rehydration). Malformed files
    /// are skipped with a warning.
    pub async fn load_all(&self) -> Result<Vec<AstDocument>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<AstDocument>> {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(Error::transient_io(format!("read {}: {e}", dir.display())))
                }
            };

            let mut docs = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|t| serde_json::from_str::<AstDocument>(&t).ok())
                {
                    Some(doc) => docs.push(doc),
                    None => {
                        tracing::warn!(path = %path.display(), "skipping malformed ast document")
                    }
                }
            }
            docs.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(docs)
        })
        .await
        .map_err(|e| Error::internal(format!("ast scan join failed: {e}")))?
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::extract::extract;
    use crate::domain::parsing::parse_source;
    use crate::domain::types::Language;

    fn sample_doc(path: &str) -> AstDocument {
        let parsed = parse_source("function f() { return 1; }", Language::JavaScript).unwrap();
        extract(&parsed, path)
    }

    #[tokio::test]
    async fn write_read_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = AstDocStore::new(dir.path().join("ast"));

        let doc = sample_doc("src/a.js");
        store.write("src/a.js", &doc).await.unwrap();

        let loaded = store.read("src/a.js").await.unwrap().unwrap();
        assert_eq!(loaded, doc);

        store.remove("src/a.js").await.unwrap();
        assert!(store.read("src/a.js").await.unwrap().is_none());
        // Removing again is fine
        store.remove("src/a.js").await.unwrap();
    }

    #[tokio::test]
    async fn distinct_paths_never_collide() {
        let a = AstDocStore::key_for("src/a/mod.ts");
        let b = AstDocStore::key_for("src/a_mod.ts");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn load_all_rehydrates() {
        let dir = tempfile::tempdir().unwrap();
        let store = AstDocStore::new(dir.path().join("ast"));

        store.write("b.js", &sample_doc("b.js")).await.unwrap();
        store.write("a.js", &sample_doc("a.js")).await.unwrap();

        let docs = store.load_all().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].path, "a.js");
        assert_eq!(docs[1].path, "b.js");
    }

    #[tokio::test]
    async fn concurrent_writers_to_one_key_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(AstDocStore::new(dir.path().join("ast")));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.write("same.js", &sample_doc("same.js")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(store.read("same.js").await.unwrap().is_some());
    }
}
