//! Ignore pattern store.
//!
//! Holds glob/regex/exact ignore rules with priority precedence
//! (defaults 1000 > gitignore 800 > config <= 500). Match results are
//! LRU-cached; any pattern update rebuilds the sorted list and clears the
//! cache. Glob matching follows minimatch-style match-base semantics: a
//! pattern without a slash is tested against every path component, a
//! pattern with a slash against the full relative path.

use std::path::Path;
use std::sync::RwLock;

use globset::{Glob, GlobMatcher};
use regex::Regex;

use crate::domain::error::{Error, Result};
use crate::domain::types::{IgnorePattern, PatternSource, PatternType};

/// Built-in default ignore globs, always present at priority 1000.
pub const DEFAULT_IGNORES: &[&str] = &[
    ".git",
    ".codeindex",
    "node_modules",
    "dist",
    "build",
    "out",
    "coverage",
    "__pycache__",
    ".venv",
    "venv",
    "*.min.js",
    "*.map",
];

enum Matcher {
    Glob(GlobMatcher),
    Regex(Regex),
    Exact(String),
}

struct CompiledPattern {
    meta: IgnorePattern,
    matcher: Matcher,
    /// Glob patterns without a separator match any path component
    match_base: bool,
}

impl CompiledPattern {
    fn compile(meta: IgnorePattern) -> Result<Self> {
        let matcher = match meta.pattern_type {
            PatternType::Glob => Matcher::Glob(
                Glob::new(&meta.pattern)
                    .map_err(|e| Error::invalid_input(format!("glob `{}`: {e}", meta.pattern)))?
                    .compile_matcher(),
            ),
            PatternType::Regex => Matcher::Regex(
                Regex::new(&meta.pattern)
                    .map_err(|e| Error::invalid_input(format!("regex `{}`: {e}", meta.pattern)))?,
            ),
            PatternType::Exact => Matcher::Exact(meta.pattern.clone()),
        };
        let match_base =
            meta.pattern_type == PatternType::Glob && !meta.pattern.contains('/');
        Ok(Self {
            meta,
            matcher,
            match_base,
        })
    }

    fn matches(&self, relative_path: &str) -> bool {
        match &self.matcher {
            Matcher::Glob(glob) => {
                if self.match_base {
                    relative_path
                        .split('/')
                        .any(|component| glob.is_match(component))
                } else {
                    glob.is_match(relative_path)
                }
            }
            Matcher::Regex(regex) => regex.is_match(relative_path),
            Matcher::Exact(exact) => relative_path == exact,
        }
    }
}

/// Read-heavy store of ignore rules with a cached matcher.
pub struct PatternStore {
    /// Sorted by priority descending, insertion order as tie-break
    patterns: RwLock<Vec<CompiledPattern>>,
    cache: moka::sync::Cache<String, Option<IgnorePattern>>,
}

impl Default for PatternStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternStore {
    /// Store pre-loaded with [`DEFAULT_IGNORES`].
    pub fn new() -> Self {
        let store = Self {
            patterns: RwLock::new(Vec::new()),
            cache: moka::sync::Cache::new(16_384),
        };
        for pattern in DEFAULT_IGNORES {
            // Defaults are static and known-good
            let _ = store.add(IgnorePattern::new(
                *pattern,
                PatternType::Glob,
                PatternSource::Default,
            ));
        }
        store
    }

    /// Add one pattern; rebuilds ordering and clears the match cache.
    pub fn add(&self, pattern: IgnorePattern) -> Result<()> {
        let compiled = CompiledPattern::compile(pattern)?;
        let mut patterns = self
            .patterns
            .write()
            .map_err(|_| Error::internal("pattern store lock poisoned"))?;
        patterns.push(compiled);
        patterns.sort_by(|a, b| b.meta.priority.cmp(&a.meta.priority));
        drop(patterns);
        self.cache.invalidate_all();
        Ok(())
    }

    /// Load `.gitignore` entries from the project root at gitignore
    /// priority. Negations and comments are skipped.
    pub fn load_gitignore(&self, root: &Path) -> Result<usize> {
        let path = root.join(".gitignore");
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::transient_io(format!("read {}: {e}", path.display()))),
        };

        let mut added = 0;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let pattern = line.trim_start_matches('/').trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }
            if self
                .add(IgnorePattern::new(
                    pattern,
                    PatternType::Glob,
                    PatternSource::Gitignore,
                ))
                .is_ok()
            {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Whether the path is ignored.
    pub fn is_ignored(&self, relative_path: &str) -> bool {
        self.matched_by(relative_path).is_some()
    }

    /// The highest-priority enabled pattern matching the path, if any.
    pub fn matched_by(&self, relative_path: &str) -> Option<IgnorePattern> {
        let key = relative_path.to_string();
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let result = {
            let patterns = self.patterns.read().ok()?;
            patterns
                .iter()
                .filter(|p| p.meta.enabled)
                .find(|p| p.matches(relative_path))
                .map(|p| p.meta.clone())
        };

        self.cache.insert(key, result.clone());
        result
    }

    /// Number of stored patterns.
    pub fn len(&self) -> usize {
        self.patterns.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Whether the store holds no patterns.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_common_noise() {
        let store = PatternStore::new();
        assert!(store.is_ignored("node_modules/react/index.js"));
        assert!(store.is_ignored(".git/HEAD"));
        assert!(store.is_ignored(".codeindex/index.db"));
        assert!(store.is_ignored("dist/app.min.js"));
        assert!(!store.is_ignored("src/app.ts"));
    }

    #[test]
    fn match_base_globs_hit_any_component() {
        let store = PatternStore::new();
        store
            .add(IgnorePattern::new("*.generated.ts", PatternType::Glob, PatternSource::Config))
            .unwrap();
        assert!(store.is_ignored("src/deep/api.generated.ts"));
        assert!(!store.is_ignored("src/deep/api.ts"));
    }

    #[test]
    fn slash_globs_match_full_path() {
        let store = PatternStore::new();
        store
            .add(IgnorePattern::new("src/legacy/**", PatternType::Glob, PatternSource::Config))
            .unwrap();
        assert!(store.is_ignored("src/legacy/old.ts"));
        assert!(!store.is_ignored("src/current/new.ts"));
    }

    #[test]
    fn highest_priority_pattern_wins() {
        let store = PatternStore::new();
        store
            .add(IgnorePattern {
                pattern: "vendor".to_string(),
                pattern_type: PatternType::Glob,
                source: PatternSource::Config,
                priority: 100,
                enabled: true,
            })
            .unwrap();
        store
            .add(IgnorePattern {
                pattern: "vendor/*.js".to_string(),
                pattern_type: PatternType::Glob,
                source: PatternSource::Gitignore,
                priority: 800,
                enabled: true,
            })
            .unwrap();

        let matched = store.matched_by("vendor/lib.js").unwrap();
        assert_eq!(matched.priority, 800);
        assert_eq!(matched.source, PatternSource::Gitignore);
    }

    #[test]
    fn disabled_patterns_never_match() {
        let store = PatternStore::new();
        store
            .add(IgnorePattern {
                pattern: "sandbox".to_string(),
                pattern_type: PatternType::Glob,
                source: PatternSource::Config,
                priority: 500,
                enabled: false,
            })
            .unwrap();
        assert!(!store.is_ignored("sandbox/test.ts"));
    }

    #[test]
    fn regex_and_exact_patterns() {
        let store = PatternStore::new();
        store
            .add(IgnorePattern::new(r"^tmp_\d+/", PatternType::Regex, PatternSource::Config))
            .unwrap();
        store
            .add(IgnorePattern::new("exact/file.ts", PatternType::Exact, PatternSource::Config))
            .unwrap();

        assert!(store.is_ignored("tmp_123/scratch.ts"));
        assert!(store.is_ignored("exact/file.ts"));
        assert!(!store.is_ignored("exact/file.tsx"));
    }

    #[test]
    fn gitignore_loading_skips_comments_and_negations() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".gitignore"),
            "# build output\ntarget/\n!keep.me\n\n*.log\n",
        )
        .unwrap();

        let store = PatternStore::new();
        let added = store.load_gitignore(dir.path()).unwrap();
        assert_eq!(added, 2);
        assert!(store.is_ignored("target/debug/app"));
        assert!(store.is_ignored("logs/server.log"));
        assert!(!store.is_ignored("keep.me"));
    }
}
