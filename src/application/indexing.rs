//! Indexer.
//!
//! Orchestrates full and incremental passes: discover files under the
//! ignore patterns, parse, extract, chunk, write the store and the AST
//! document per file (atomically), short-circuit on matching content
//! hashes, delete vanished files, and sweep orphans afterwards. The embed
//! pass drives the embedding engine over chunks missing a vector for the
//! active model.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::embedding::{sha256_hex, EmbedOpts, EmbeddingEngine};
use crate::domain::chunking::{chunk_file, ChunkerConfig};
use crate::domain::error::{Error, Result};
use crate::domain::extract::extract;
use crate::domain::parsing::parse_source;
use crate::domain::types::{FileChangeEvent, FileChangeType, IndexingStats, Language};
use crate::infrastructure::astdocs::AstDocStore;
use crate::infrastructure::patterns::PatternStore;
use crate::adapters::store::IndexStore;

/// Indexer settings.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Files above this many bytes are skipped
    pub max_file_size: u64,
    /// Chunker settings
    pub chunker: ChunkerConfig,
    /// Concurrent file tasks when processing watcher batches
    pub worker_count: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_file_size: 2_000_000,
            chunker: ChunkerConfig::default(),
            worker_count: 4,
        }
    }
}

/// Progress snapshot passed to the opaque callback.
#[derive(Debug, Clone)]
pub struct IndexProgress {
    /// Files processed so far
    pub processed: u32,
    /// Files discovered for this pass
    pub total: u32,
    /// File currently being processed
    pub current: Option<String>,
}

/// Opaque progress callback.
pub type ProgressFn = Arc<dyn Fn(IndexProgress) + Send + Sync>;

/// Options for the embed pass.
#[derive(Debug, Clone, Default)]
pub struct EmbedPassOptions {
    /// Re-embed every chunk, not just missing ones
    pub force: bool,
    /// Report counts without writing
    pub dry_run: bool,
    /// Engine options
    pub opts: EmbedOpts,
}

/// Report from the embed pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbedPassReport {
    /// Chunks considered
    pub total_chunks: usize,
    /// Chunks that needed a vector
    pub pending: usize,
    /// Vectors written
    pub embedded: usize,
    /// Chunks that failed after fallback
    pub failed: usize,
    /// Orphan rows removed at the end
    pub swept: u64,
}

/// The indexer.
pub struct Indexer {
    root: PathBuf,
    store: Arc<IndexStore>,
    astdocs: Arc<AstDocStore>,
    patterns: Arc<PatternStore>,
    engine: Option<Arc<EmbeddingEngine>>,
    config: IndexerConfig,
    progress: Option<ProgressFn>,
}

impl Indexer {
    /// Indexer over a project root.
    pub fn new(
        root: PathBuf,
        store: Arc<IndexStore>,
        astdocs: Arc<AstDocStore>,
        patterns: Arc<PatternStore>,
        engine: Option<Arc<EmbeddingEngine>>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            root,
            store,
            astdocs,
            patterns,
            engine,
            config,
            progress: None,
        }
    }

    /// Attach a progress callback.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn report(&self, processed: u32, total: u32, current: Option<&str>) {
        if let Some(progress) = &self.progress {
            progress(IndexProgress {
                processed,
                total,
                current: current.map(str::to_string),
            });
        }
    }

    /// Enumerate indexable files: supported language, within the size
    /// limit, not ignored. Returns root-relative forward-slash paths.
    pub fn discover_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let walker = ignore::WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(false)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "walk entry error");
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            if !Language::from_path(path).is_supported() {
                continue;
            }
            if entry.metadata().map(|m| m.len()).unwrap_or(0) > self.config.max_file_size {
                tracing::debug!(path = %path.display(), "skipping oversize file");
                continue;
            }
            let relative = match path.strip_prefix(&self.root) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if self.patterns.is_ignored(&relative) {
                continue;
            }
            files.push(relative);
        }

        files.sort();
        Ok(files)
    }

    /// Index every discovered file unconditionally.
    pub async fn full_index(&self) -> Result<IndexingStats> {
        let started = Instant::now();
        let files = self.discover_files()?;
        let total = files.len() as u32;
        let mut stats = IndexingStats {
            total_files: total,
            ..IndexingStats::default()
        };

        for (i, relative) in files.iter().enumerate() {
            self.report(i as u32, total, Some(relative));
            match self.index_file(relative).await {
                Ok(chunks) => {
                    stats.indexed_files += 1;
                    stats.total_chunks += chunks;
                }
                Err(e) => {
                    tracing::warn!(path = %relative, error = %e, "indexing failed, continuing");
                }
            }
        }
        self.report(total, total, None);

        let swept = self.store.orphan_sweep().await?;
        if swept > 0 {
            tracing::debug!(swept, "orphan rows removed");
        }
        self.store
            .config_set("last_indexed_at", &chrono::Utc::now().timestamp().to_string())
            .await?;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            files = stats.indexed_files,
            chunks = stats.total_chunks,
            ms = stats.duration_ms,
            "full index complete"
        );
        Ok(stats)
    }

    /// Re-index only files whose content hash changed; delete vanished
    /// files.
    pub async fn refresh_index(&self) -> Result<IndexingStats> {
        let files = self.discover_files()?;
        self.refresh_set(files, true).await
    }

    /// Refresh a specific set of paths (root-relative).
    pub async fn refresh_files(&self, paths: &[String]) -> Result<IndexingStats> {
        let mut keep: Vec<String> = Vec::new();
        for path in paths {
            let normalized = path.replace('\\', "/");
            if !self.patterns.is_ignored(&normalized) {
                keep.push(normalized);
            }
        }
        self.refresh_set(keep, false).await
    }

    async fn refresh_set(&self, files: Vec<String>, sweep_missing: bool) -> Result<IndexingStats> {
        let started = Instant::now();
        let total = files.len() as u32;
        let mut stats = IndexingStats {
            total_files: total,
            ..IndexingStats::default()
        };

        for (i, relative) in files.iter().enumerate() {
            self.report(i as u32, total, Some(relative));
            let absolute = self.root.join(relative);

            if !absolute.is_file() {
                if self.remove_file(relative).await? {
                    stats.deleted_files += 1;
                }
                continue;
            }

            let content = match self.read_source(&absolute).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = %relative, error = %e, "read failed, skipping");
                    continue;
                }
            };
            let hash = sha256_hex(&content);
            if self.store.file_hash(relative).await?.as_deref() == Some(hash.as_str()) {
                stats.skipped_files += 1;
                continue;
            }

            match self.index_content(relative, &content, &hash).await {
                Ok(chunks) => {
                    stats.indexed_files += 1;
                    stats.total_chunks += chunks;
                }
                Err(e) => {
                    tracing::warn!(path = %relative, error = %e, "re-indexing failed, continuing");
                }
            }
        }
        self.report(total, total, None);

        if sweep_missing {
            let discovered: HashSet<&String> = files.iter().collect();
            for stored in self.store.list_files().await? {
                if !discovered.contains(&stored.path) && !self.root.join(&stored.path).is_file() {
                    if self.remove_file(&stored.path).await? {
                        stats.deleted_files += 1;
                    }
                }
            }
        }

        let _ = self.store.orphan_sweep().await?;
        self.store
            .config_set("last_indexed_at", &chrono::Utc::now().timestamp().to_string())
            .await?;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            indexed = stats.indexed_files,
            skipped = stats.skipped_files,
            deleted = stats.deleted_files,
            ms = stats.duration_ms,
            "refresh complete"
        );
        Ok(stats)
    }

    /// Read a source file, retrying transient failures (editor renames,
    /// short-lived locks) with bounded backoff.
    async fn read_source(&self, absolute: &Path) -> Result<String> {
        crate::infrastructure::resilience::with_backoff(
            3,
            std::time::Duration::from_millis(20),
            || async {
                tokio::fs::read_to_string(absolute)
                    .await
                    .map_err(|e| Error::transient_io(format!("read {}: {e}", absolute.display())))
            },
        )
        .await
    }

    /// Index one file from disk.
    pub async fn index_file(&self, relative: &str) -> Result<u32> {
        let absolute = self.root.join(relative);
        let content = self.read_source(&absolute).await?;
        let hash = sha256_hex(&content);
        self.index_content(relative, &content, &hash).await
    }

    async fn index_content(&self, relative: &str, content: &str, hash: &str) -> Result<u32> {
        let language = Language::from_path(Path::new(relative));
        if !language.is_supported() {
            return Err(Error::invalid_input(format!(
                "unsupported language for {relative}"
            )));
        }

        let parsed = parse_source(content, language)?;
        let chunks = chunk_file(&parsed, relative, &self.config.chunker);
        let facts = extract(&parsed, relative);
        let chunk_count = chunks.len() as u32;

        self.store
            .upsert_file(relative, hash, language, content.len() as u64, chunks, facts.clone())
            .await?;
        self.astdocs.write(relative, &facts).await?;

        Ok(chunk_count)
    }

    /// Remove one file's rows and AST document.
    pub async fn remove_file(&self, relative: &str) -> Result<bool> {
        let existed = self.store.delete_file(relative).await?;
        self.astdocs.remove(relative).await?;
        if existed {
            tracing::debug!(path = %relative, "removed from index");
        }
        Ok(existed)
    }

    /// Process one coalesced watcher batch. Deletes and renames run
    /// first and sequentially; creates and modifies run with bounded
    /// concurrency.
    pub async fn process_batch(&self, batch: Vec<FileChangeEvent>) -> Result<IndexingStats> {
        let started = Instant::now();
        let mut stats = IndexingStats {
            total_files: batch.len() as u32,
            ..IndexingStats::default()
        };

        let mut upserts: Vec<String> = Vec::new();
        for event in &batch {
            if event.is_directory {
                continue;
            }
            let relative = event.relative_path.to_string_lossy().replace('\\', "/");
            if !Language::from_path(Path::new(&relative)).is_supported() {
                continue;
            }
            match event.change {
                FileChangeType::Delete => {
                    if self.remove_file(&relative).await? {
                        stats.deleted_files += 1;
                    }
                }
                FileChangeType::Rename => {
                    // A rename may surface as the old or the new path;
                    // refresh decides by existence.
                    if self.root.join(&relative).is_file() {
                        upserts.push(relative);
                    } else if self.remove_file(&relative).await? {
                        stats.deleted_files += 1;
                    }
                }
                FileChangeType::Create | FileChangeType::Modify => upserts.push(relative),
            }
        }

        let results: Vec<(String, Result<u32>)> = futures::stream::iter(upserts)
            .map(|relative| async move {
                let outcome = self.refresh_one(&relative).await;
                (relative, outcome)
            })
            .buffer_unordered(self.config.worker_count.max(1))
            .collect()
            .await;

        for (relative, outcome) in results {
            match outcome {
                Ok(0) => stats.skipped_files += 1,
                Ok(chunks) => {
                    stats.indexed_files += 1;
                    stats.total_chunks += chunks;
                }
                Err(e) => {
                    tracing::warn!(path = %relative, error = %e, "batch item failed");
                }
            }
        }

        let _ = self.store.orphan_sweep().await?;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Refresh one path; 0 chunks means the hash matched and nothing was
    /// written.
    async fn refresh_one(&self, relative: &str) -> Result<u32> {
        let absolute = self.root.join(relative);
        if !absolute.is_file() {
            self.remove_file(relative).await?;
            return Ok(0);
        }
        let content = self.read_source(&absolute).await?;
        let hash = sha256_hex(&content);
        if self.store.file_hash(relative).await?.as_deref() == Some(hash.as_str()) {
            return Ok(0);
        }
        self.index_content(relative, &content, &hash).await
    }

    /// Drive the embedding engine over chunks missing (or, with `force`,
    /// all) vectors for the active model. Orphan sweep at the end.
    pub async fn embed(&self, options: &EmbedPassOptions) -> Result<EmbedPassReport> {
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| Error::not_initialized("no embedding engine configured"))?;
        let profile = engine.active_profile().await;

        let pending = if options.force {
            let mut all = Vec::new();
            for file in self.store.list_files().await? {
                all.extend(self.store.chunks_for_file(&file.path).await?);
            }
            all
        } else {
            self.store
                .chunks_missing_embedding(&profile.model, &profile.model_version, profile.dimensions)
                .await?
        };

        let stats = self.store.stats().await?;
        let mut report = EmbedPassReport {
            total_chunks: stats.chunks as usize,
            pending: pending.len(),
            ..EmbedPassReport::default()
        };

        if options.dry_run || pending.is_empty() {
            return Ok(report);
        }

        let texts: Vec<String> = pending.iter().map(|c| c.content.clone()).collect();
        let output = engine.embed_texts(&texts, &options.opts).await?;

        for (chunk, result) in pending.iter().zip(output.results.iter()) {
            match &result.vector {
                Some(vector) => {
                    self.store
                        .upsert_embedding(
                            &chunk.chunk_hash,
                            &profile.model,
                            &profile.model_version,
                            vector.clone(),
                        )
                        .await?;
                    report.embedded += 1;
                }
                None => report.failed += 1,
            }
        }

        report.swept = self.store.orphan_sweep().await?;
        Ok(report)
    }
}

/// Consume coalesced watcher batches until cancellation.
pub async fn run_watch_loop(
    indexer: Arc<Indexer>,
    mut batches: mpsc::Receiver<Vec<FileChangeEvent>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            batch = batches.recv() => {
                let Some(batch) = batch else { break };
                let size = batch.len();
                match indexer.process_batch(batch).await {
                    Ok(stats) => tracing::debug!(
                        size,
                        indexed = stats.indexed_files,
                        deleted = stats.deleted_files,
                        "watch batch processed"
                    ),
                    Err(e) => tracing::error!(error = %e, "watch batch failed"),
                }
            }
        }
    }
    tracing::debug!("watch loop stopped");
}
