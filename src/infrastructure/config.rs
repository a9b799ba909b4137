//! Project layout and persisted configuration.
//!
//! Everything the index owns lives under `.codeindex/` in the project
//! root: the durable store, the embedding cache, model artifacts, AST
//! documents, telemetry logs, and the JSON configuration document.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::{Error, Result};
use crate::domain::types::{EmbeddingProfile, FallbackEvent, HardwareCapabilities};

/// Name of the per-project state directory.
pub const STATE_DIR: &str = ".codeindex";

/// Resolved paths under a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    /// Paths for a project rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `.codeindex/` state directory.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Durable store database.
    pub fn index_db(&self) -> PathBuf {
        self.state_dir().join("index.db")
    }

    /// Persisted configuration document.
    pub fn config_file(&self) -> PathBuf {
        self.state_dir().join("config.json")
    }

    /// Cached model artifacts.
    pub fn models_dir(&self) -> PathBuf {
        self.state_dir().join("models")
    }

    /// Embedding cache database.
    pub fn embedding_cache_db(&self) -> PathBuf {
        self.state_dir().join("cache").join("embeddings.db")
    }

    /// Per-file AST documents.
    pub fn ast_dir(&self) -> PathBuf {
        self.state_dir().join("ast")
    }

    /// Telemetry log directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    /// Embedding fallback telemetry sink.
    pub fn embedding_log(&self) -> PathBuf {
        self.logs_dir().join("embedding.jsonl")
    }

    /// Search performance telemetry sink.
    pub fn search_log(&self) -> PathBuf {
        self.logs_dir().join("search-performance.jsonl")
    }

    /// Whether the project has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.state_dir().is_dir() && self.index_db().is_file()
    }

    /// Create the full directory layout.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.state_dir(),
            self.models_dir(),
            self.embedding_cache_db()
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.state_dir()),
            self.ast_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(|e| Error::transient_io(format!("create {}: {e}", dir.display())))?;
        }
        Ok(())
    }

    /// Fail with `NotInitialized` unless the layout exists.
    pub fn require_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::not_initialized(format!(
                "no {} directory under {}",
                STATE_DIR,
                self.root.display()
            )))
        }
    }
}

/// The persisted `config.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    /// Document schema version
    pub version: u32,
    /// Active embedding profile
    pub profile: EmbeddingProfile,
    /// User-defined profiles
    #[serde(default)]
    pub custom_profiles: Vec<EmbeddingProfile>,
    /// Hardware snapshot captured at profile selection
    pub hardware_capabilities: Option<HardwareCapabilities>,
    /// Appended fallback events from past runs
    #[serde(default)]
    pub fallback_history: Vec<FallbackEvent>,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

impl ConfigDocument {
    /// Current document version.
    pub const VERSION: u32 = 1;

    /// Fresh document with the given active profile.
    pub fn new(profile: EmbeddingProfile) -> Self {
        Self {
            version: Self::VERSION,
            profile,
            custom_profiles: Vec::new(),
            hardware_capabilities: None,
            fallback_history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Load the document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_initialized(format!("missing {}", path.display()))
            } else {
                Error::transient_io(format!("read {}: {e}", path.display()))
            }
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write the document atomically (temp file + rename).
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Utc::now();
        let text = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)
            .map_err(|e| Error::transient_io(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| Error::transient_io(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    /// Resolve a profile by name: presets first, then custom profiles.
    pub fn resolve_profile(&self, name: &str) -> Option<EmbeddingProfile> {
        EmbeddingProfile::preset(name).or_else(|| {
            self.custom_profiles
                .iter()
                .find(|p| p.name == name)
                .cloned()
        })
    }

    /// Remove a custom profile by name; returns whether it existed.
    pub fn delete_profile(&mut self, name: &str) -> bool {
        let before = self.custom_profiles.len();
        self.custom_profiles.retain(|p| p.name != name);
        self.custom_profiles.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let paths = ProjectPaths::new("/tmp/project");
        assert_eq!(paths.index_db(), PathBuf::from("/tmp/project/.codeindex/index.db"));
        assert_eq!(
            paths.embedding_cache_db(),
            PathBuf::from("/tmp/project/.codeindex/cache/embeddings.db")
        );
        assert!(paths.search_log().ends_with("logs/search-performance.jsonl"));
    }

    #[test]
    fn config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut doc = ConfigDocument::new(EmbeddingProfile::balanced());
        doc.custom_profiles.push(EmbeddingProfile {
            name: "mine".to_string(),
            ..EmbeddingProfile::light()
        });
        doc.save(&path).unwrap();

        let loaded = ConfigDocument::load(&path).unwrap();
        assert_eq!(loaded.profile.name, "balanced");
        assert!(loaded.resolve_profile("mine").is_some());
        assert!(loaded.resolve_profile("light").is_some());
        assert!(loaded.resolve_profile("nope").is_none());
    }

    #[test]
    fn missing_config_is_not_initialized() {
        let err = ConfigDocument::load(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, Error::NotInitialized { .. }));
    }

    #[test]
    fn camel_case_field_names() {
        let doc = ConfigDocument::new(EmbeddingProfile::light());
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("customProfiles").is_some());
        assert!(json.get("fallbackHistory").is_some());
        assert!(json.get("updatedAt").is_some());
    }
}
