//! File watcher pipeline.
//!
//! Raw notify events are normalized to [`FileChangeEvent`]s, filtered
//! through the ignore pattern store, fanned out on a broadcast channel for
//! observers, and coalesced per path in the debounce buffer. Flushed
//! batches reach the indexer over an mpsc channel, already sorted for
//! processing (DELETE, RENAME, CREATE, MODIFY; parents before children).

pub mod debounce;

pub use debounce::{AddOutcome, DebounceBuffer, DebounceConfig, MAX_BUFFER_SIZE};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::domain::error::{Error, Result};
use crate::domain::types::{FileChangeEvent, FileChangeType, WatcherStats};
use crate::infrastructure::patterns::PatternStore;

/// Watcher settings.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce buffer settings
    pub debounce: DebounceConfig,
    /// Capacity of the per-event broadcast channel
    pub broadcast_capacity: usize,
    /// Capacity of the batch channel to the indexer
    pub batch_capacity: usize,
    /// Poll interval for the age-based flush timer
    pub tick: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: DebounceConfig::default(),
            broadcast_capacity: 1024,
            batch_capacity: 16,
            tick: Duration::from_millis(100),
        }
    }
}

#[derive(Default)]
struct WatchCounters {
    received: AtomicU64,
    processed: AtomicU64,
    batches: AtomicU64,
}

/// A running watcher over a project root.
pub struct FileWatcher {
    change_tx: broadcast::Sender<FileChangeEvent>,
    batch_rx: Option<mpsc::Receiver<Vec<FileChangeEvent>>>,
    counters: Arc<WatchCounters>,
    started: Instant,
    pending: Arc<std::sync::Mutex<usize>>,
    cancel: CancellationToken,
    _watcher: notify::RecommendedWatcher,
}

impl FileWatcher {
    /// Start watching `root` recursively.
    pub fn start(
        root: &Path,
        patterns: Arc<PatternStore>,
        config: WatcherConfig,
    ) -> Result<Self> {
        let canonical_root = root
            .canonicalize()
            .map_err(|e| Error::transient_io(format!("canonicalize {}: {e}", root.display())))?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Event>();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            match event {
                Ok(event) => {
                    let _ = raw_tx.send(event);
                }
                Err(e) => tracing::warn!(error = %e, "watch backend error"),
            }
        })
        .map_err(|e| Error::transient_io(format!("start watcher: {e}")))?;
        watcher
            .watch(&canonical_root, RecursiveMode::Recursive)
            .map_err(|e| Error::transient_io(format!("watch {}: {e}", canonical_root.display())))?;

        let (change_tx, _) = broadcast::channel(config.broadcast_capacity);
        let (batch_tx, batch_rx) = mpsc::channel(config.batch_capacity);
        let counters = Arc::new(WatchCounters::default());
        let pending = Arc::new(std::sync::Mutex::new(0usize));
        let cancel = CancellationToken::new();

        tokio::spawn(pump(
            canonical_root,
            patterns,
            config,
            raw_rx,
            change_tx.clone(),
            batch_tx,
            counters.clone(),
            pending.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            change_tx,
            batch_rx: Some(batch_rx),
            counters,
            started: Instant::now(),
            pending,
            cancel,
            _watcher: watcher,
        })
    }

    /// Subscribe to individual normalized change events.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.change_tx.subscribe()
    }

    /// Take the coalesced batch stream; the first caller owns it.
    pub fn take_batches(&mut self) -> Option<mpsc::Receiver<Vec<FileChangeEvent>>> {
        self.batch_rx.take()
    }

    /// Current counters.
    pub fn stats(&self) -> WatcherStats {
        let received = self.counters.received.load(Ordering::Relaxed);
        let processed = self.counters.processed.load(Ordering::Relaxed);
        let batches = self.counters.batches.load(Ordering::Relaxed);
        WatcherStats {
            uptime_ms: self.started.elapsed().as_millis() as u64,
            events_received: received,
            events_processed: processed,
            batches_emitted: batches,
            average_batch_size: if batches == 0 {
                0.0
            } else {
                processed as f64 / batches as f64
            },
            compression_ratio: if received == 0 {
                0.0
            } else {
                1.0 - (processed as f64 / received as f64)
            },
            pending: *self.pending.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Stop the pipeline.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn pump(
    root: PathBuf,
    patterns: Arc<PatternStore>,
    config: WatcherConfig,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Event>,
    change_tx: broadcast::Sender<FileChangeEvent>,
    batch_tx: mpsc::Sender<Vec<FileChangeEvent>>,
    counters: Arc<WatchCounters>,
    pending: Arc<std::sync::Mutex<usize>>,
    cancel: CancellationToken,
) {
    let mut buffer = DebounceBuffer::new(config.debounce.clone());
    let mut tick = tokio::time::interval(config.tick);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let mut flush_now = false;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                flush_now = buffer.is_flush_due(Instant::now());
            }
            raw = raw_rx.recv() => {
                let Some(raw) = raw else { break };
                for event in normalize(&root, raw) {
                    counters.received.fetch_add(1, Ordering::Relaxed);
                    let rel = event.relative_path.to_string_lossy().replace('\\', "/");
                    if patterns.is_ignored(&rel) {
                        continue;
                    }
                    let _ = change_tx.send(event.clone());
                    if buffer.add(event) == AddOutcome::FlushDue {
                        flush_now = true;
                    }
                }
            }
        }

        if flush_now && !buffer.is_empty() {
            let batch = buffer.flush();
            counters
                .processed
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            counters.batches.fetch_add(1, Ordering::Relaxed);
            if batch_tx.send(batch).await.is_err() {
                break;
            }
        }

        if let Ok(mut guard) = pending.lock() {
            *guard = buffer.len();
        }
    }

    tracing::debug!("watch pump stopped");
}

/// Map one raw notify event to normalized per-path change events.
fn normalize(root: &Path, raw: notify::Event) -> Vec<FileChangeEvent> {
    let change = match raw.kind {
        EventKind::Create(_) => FileChangeType::Create,
        EventKind::Remove(_) => FileChangeType::Delete,
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => FileChangeType::Rename,
        EventKind::Modify(_) => FileChangeType::Modify,
        EventKind::Access(_) => return Vec::new(),
        _ => FileChangeType::Modify,
    };

    raw.paths
        .into_iter()
        .filter_map(|path| {
            let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
            let relative = canonical
                .strip_prefix(root)
                .unwrap_or(canonical.as_path())
                .to_path_buf();
            if relative.as_os_str().is_empty() {
                return None;
            }
            let metadata = std::fs::symlink_metadata(&canonical).ok();
            Some(FileChangeEvent {
                relative_path: relative,
                change,
                size: metadata.as_ref().map(|m| m.len()),
                is_directory: metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false),
                is_symlink: metadata.as_ref().map(|m| m.is_symlink()).unwrap_or(false),
                timestamp: chrono::Utc::now(),
                canonical_path: canonical,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watcher_reports_create_through_batches() {
        let dir = tempfile::tempdir().unwrap();
        let patterns = Arc::new(PatternStore::new());
        let config = WatcherConfig {
            debounce: DebounceConfig {
                max_age: Duration::from_millis(50),
                min_batch_size: 100,
            },
            tick: Duration::from_millis(10),
            ..WatcherConfig::default()
        };

        let mut watcher = FileWatcher::start(dir.path(), patterns, config).unwrap();
        let mut batches = watcher.take_batches().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(dir.path().join("new.ts"), "export const x = 1;").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), batches.recv())
            .await
            .expect("batch within deadline")
            .expect("channel open");
        assert!(batch
            .iter()
            .any(|e| e.relative_path == Path::new("new.ts")));

        let stats = watcher.stats();
        assert!(stats.events_received >= 1);
        assert_eq!(stats.batches_emitted, 1);
        watcher.shutdown();
    }

    #[tokio::test]
    async fn ignored_paths_never_reach_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        let patterns = Arc::new(PatternStore::new());
        let config = WatcherConfig {
            debounce: DebounceConfig {
                max_age: Duration::from_millis(30),
                min_batch_size: 100,
            },
            tick: Duration::from_millis(10),
            ..WatcherConfig::default()
        };

        let mut watcher = FileWatcher::start(dir.path(), patterns, config).unwrap();
        let mut batches = watcher.take_batches().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(dir.path().join("node_modules/dep.js"), "x").unwrap();
        std::fs::write(dir.path().join("kept.ts"), "export {};").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), batches.recv())
            .await
            .expect("batch within deadline")
            .expect("channel open");
        assert!(batch.iter().all(|e| {
            !e.relative_path.starts_with("node_modules")
        }));
        assert!(batch.iter().any(|e| e.relative_path == Path::new("kept.ts")));
        watcher.shutdown();
    }
}
