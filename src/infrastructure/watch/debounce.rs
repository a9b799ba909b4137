//! Per-path coalescing debounce buffer.
//!
//! Events for the same canonical path merge under fixed rules:
//! CREATE then DELETE drops both, CREATE then MODIFY stays CREATE,
//! MODIFY then DELETE becomes DELETE, DELETE then CREATE becomes MODIFY,
//! and repeated MODIFYs collapse. The buffer flushes when the oldest
//! buffered event exceeds the max age, when the coalesced size reaches the
//! minimum batch size, or immediately at the hard capacity.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::domain::types::{FileChangeEvent, FileChangeType};

/// Hard buffer capacity; reaching it forces an immediate flush.
pub const MAX_BUFFER_SIZE: usize = 10_000;

/// Buffer settings.
#[derive(Debug, Clone)]
pub struct DebounceConfig {
    /// Flush when the first buffered event is older than this
    pub max_age: Duration,
    /// Flush when the coalesced buffer reaches this size
    pub min_batch_size: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_millis(500),
            min_batch_size: 64,
        }
    }
}

/// Outcome of offering an event to the buffer.
#[derive(Debug, PartialEq)]
pub enum AddOutcome {
    /// Event buffered (or coalesced away); no flush due yet
    Buffered,
    /// Buffer hit a flush condition; drain with [`DebounceBuffer::flush`]
    FlushDue,
}

struct Entry {
    event: FileChangeEvent,
    first_seen: Instant,
}

/// The coalescing buffer. Callers drive time explicitly: `add` reports
/// size-based flush conditions, `is_flush_due` reports the age-based one.
pub struct DebounceBuffer {
    config: DebounceConfig,
    entries: HashMap<PathBuf, Entry>,
    oldest: Option<Instant>,
}

impl DebounceBuffer {
    /// Empty buffer with the given settings.
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            oldest: None,
        }
    }

    /// Coalesce two change types for one path. `None` means the pair
    /// annihilates (CREATE then DELETE).
    pub fn coalesce(existing: FileChangeType, incoming: FileChangeType) -> Option<FileChangeType> {
        use FileChangeType::*;
        match (existing, incoming) {
            (Create, Delete) => None,
            (Create, Modify) => Some(Create),
            (Modify, Delete) => Some(Delete),
            (Delete, Create) => Some(Modify),
            (Modify, Modify) => Some(Modify),
            (_, incoming) => Some(incoming),
        }
    }

    /// Offer one event.
    pub fn add(&mut self, event: FileChangeEvent) -> AddOutcome {
        let now = Instant::now();
        let path = event.canonical_path.clone();

        match self.entries.remove(&path) {
            Some(existing) => match Self::coalesce(existing.event.change, event.change) {
                Some(change) => {
                    let mut merged = event;
                    merged.change = change;
                    self.entries.insert(
                        path,
                        Entry {
                            event: merged,
                            first_seen: existing.first_seen,
                        },
                    );
                }
                None => {
                    // CREATE then DELETE: both vanish
                    if self.entries.is_empty() {
                        self.oldest = None;
                    }
                }
            },
            None => {
                self.entries.insert(
                    path,
                    Entry {
                        event,
                        first_seen: now,
                    },
                );
                if self.oldest.is_none() {
                    self.oldest = Some(now);
                }
            }
        }

        if self.entries.len() >= MAX_BUFFER_SIZE || self.entries.len() >= self.config.min_batch_size
        {
            AddOutcome::FlushDue
        } else {
            AddOutcome::Buffered
        }
    }

    /// Whether the max-age timer has fired for the oldest buffered event.
    pub fn is_flush_due(&self, now: Instant) -> bool {
        match self.oldest {
            Some(oldest) => !self.entries.is_empty() && now.duration_since(oldest) >= self.config.max_age,
            None => false,
        }
    }

    /// Whether the buffer sits at its hard capacity.
    pub fn is_at_max_size(&self) -> bool {
        self.entries.len() >= MAX_BUFFER_SIZE
    }

    /// Drain the buffer as one batch in processing order:
    /// DELETE, RENAME, CREATE, MODIFY; within a type parents before
    /// children, then lexicographic.
    pub fn flush(&mut self) -> Vec<FileChangeEvent> {
        let mut batch: Vec<FileChangeEvent> =
            self.entries.drain().map(|(_, entry)| entry.event).collect();
        self.oldest = None;

        batch.sort_by(|a, b| {
            a.change
                .processing_rank()
                .cmp(&b.change.processing_rank())
                .then_with(|| {
                    path_depth(&a.relative_path).cmp(&path_depth(&b.relative_path))
                })
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
        batch
    }

    /// Coalesced events currently buffered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn path_depth(path: &std::path::Path) -> usize {
    path.components().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(path: &str, change: FileChangeType) -> FileChangeEvent {
        FileChangeEvent {
            canonical_path: PathBuf::from("/project").join(path),
            relative_path: PathBuf::from(path),
            change,
            size: Some(1),
            is_directory: false,
            is_symlink: false,
            timestamp: Utc::now(),
        }
    }

    fn buffer() -> DebounceBuffer {
        DebounceBuffer::new(DebounceConfig {
            max_age: Duration::from_millis(500),
            min_batch_size: 64,
        })
    }

    #[test]
    fn create_then_delete_drops_both() {
        let mut buf = buffer();
        buf.add(event("p", FileChangeType::Create));
        buf.add(event("p", FileChangeType::Modify));
        buf.add(event("p", FileChangeType::Modify));
        buf.add(event("p", FileChangeType::Delete));
        assert!(buf.flush().is_empty());
    }

    #[test]
    fn create_then_modifies_stays_create() {
        let mut buf = buffer();
        buf.add(event("p", FileChangeType::Create));
        buf.add(event("p", FileChangeType::Modify));
        buf.add(event("p", FileChangeType::Modify));
        let batch = buf.flush();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].change, FileChangeType::Create);
    }

    #[test]
    fn modify_then_delete_is_delete() {
        let mut buf = buffer();
        buf.add(event("p", FileChangeType::Modify));
        buf.add(event("p", FileChangeType::Delete));
        let batch = buf.flush();
        assert_eq!(batch[0].change, FileChangeType::Delete);
    }

    #[test]
    fn delete_then_create_is_modify() {
        let mut buf = buffer();
        buf.add(event("p", FileChangeType::Delete));
        buf.add(event("p", FileChangeType::Create));
        let batch = buf.flush();
        assert_eq!(batch[0].change, FileChangeType::Modify);
    }

    #[test]
    fn modifies_collapse() {
        let mut buf = buffer();
        for _ in 0..5 {
            buf.add(event("p", FileChangeType::Modify));
        }
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn batch_ordering() {
        let mut buf = buffer();
        buf.add(event("src/deep/nested/file.ts", FileChangeType::Modify));
        buf.add(event("src/b.ts", FileChangeType::Modify));
        buf.add(event("src/a.ts", FileChangeType::Create));
        buf.add(event("gone.ts", FileChangeType::Delete));
        buf.add(event("renamed.ts", FileChangeType::Rename));

        let batch = buf.flush();
        let order: Vec<_> = batch
            .iter()
            .map(|e| (e.change, e.relative_path.to_string_lossy().to_string()))
            .collect();
        assert_eq!(
            order,
            vec![
                (FileChangeType::Delete, "gone.ts".to_string()),
                (FileChangeType::Rename, "renamed.ts".to_string()),
                (FileChangeType::Create, "src/a.ts".to_string()),
                (FileChangeType::Modify, "src/b.ts".to_string()),
                (FileChangeType::Modify, "src/deep/nested/file.ts".to_string()),
            ]
        );
    }

    #[test]
    fn min_batch_size_triggers_flush() {
        let mut buf = DebounceBuffer::new(DebounceConfig {
            max_age: Duration::from_secs(60),
            min_batch_size: 3,
        });
        assert_eq!(buf.add(event("a", FileChangeType::Modify)), AddOutcome::Buffered);
        assert_eq!(buf.add(event("b", FileChangeType::Modify)), AddOutcome::Buffered);
        assert_eq!(buf.add(event("c", FileChangeType::Modify)), AddOutcome::FlushDue);
    }

    #[test]
    fn age_based_flush() {
        let mut buf = DebounceBuffer::new(DebounceConfig {
            max_age: Duration::from_millis(10),
            min_batch_size: 100,
        });
        buf.add(event("a", FileChangeType::Modify));
        assert!(!buf.is_flush_due(Instant::now()));
        std::thread::sleep(Duration::from_millis(15));
        assert!(buf.is_flush_due(Instant::now()));
    }

    #[test]
    fn coalesced_count_matches_rules() {
        // One path: CREATE, MODIFY, MODIFY -> [CREATE] (count 1)
        let mut buf = buffer();
        buf.add(event("p", FileChangeType::Create));
        buf.add(event("p", FileChangeType::Modify));
        buf.add(event("p", FileChangeType::Modify));
        assert_eq!(buf.len(), 1);
    }
}
