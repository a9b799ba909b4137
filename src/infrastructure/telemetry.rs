//! Append-only JSONL telemetry.
//!
//! Two sinks: embedding fallback events and per-query search performance
//! records. The aggregator reads both back for the `metrics` command.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::domain::error::{Error, Result};
use crate::domain::types::{FallbackEvent, SearchFallbackMode, SearchPerformanceRecord};

/// One append-only JSONL file.
pub struct JsonlSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSink {
    /// Sink writing to the given file; the parent directory must exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Append one record as a single JSON line.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::internal("telemetry lock poisoned"))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::transient_io(format!("open {}: {e}", self.path.display())))?;
        writeln!(file, "{line}")
            .map_err(|e| Error::transient_io(format!("append {}: {e}", self.path.display())))?;
        Ok(())
    }

    /// Sink path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Both project telemetry sinks.
pub struct Telemetry {
    embedding: JsonlSink,
    search: JsonlSink,
}

impl Telemetry {
    /// Sinks under the given log directory.
    pub fn new(embedding_log: PathBuf, search_log: PathBuf) -> Self {
        Self {
            embedding: JsonlSink::new(embedding_log),
            search: JsonlSink::new(search_log),
        }
    }

    /// Append an embedding fallback event.
    pub fn record_fallback(&self, event: &FallbackEvent) {
        if let Err(e) = self.embedding.append(event) {
            tracing::warn!(error = %e, "fallback telemetry append failed");
        }
    }

    /// Append a search performance record.
    pub fn record_search(&self, record: &SearchPerformanceRecord) {
        if let Err(e) = self.search.append(record) {
            tracing::warn!(error = %e, "search telemetry append failed");
        }
    }
}

/// Latency percentiles over a set of search records.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchAggregate {
    /// Records aggregated
    pub total_queries: u64,
    /// Median end-to-end latency
    pub p50_ms: u64,
    /// 95th percentile end-to-end latency
    pub p95_ms: u64,
    /// 99th percentile end-to-end latency
    pub p99_ms: u64,
    /// Share of queries that blew the latency budget
    pub sla_violation_rate: f64,
    /// Share of full hybrid responses
    pub hybrid_rate: f64,
    /// Share of lexical-only responses (vector leg absent)
    pub lexical_only_rate: f64,
    /// Share of vector-only responses (lexical leg absent)
    pub vector_only_rate: f64,
}

/// Fallback event counts by action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FallbackAggregate {
    /// Events aggregated
    pub total_events: u64,
    /// Events per action name
    pub by_action: std::collections::BTreeMap<String, u64>,
    /// Share of attempts whose retry succeeded
    pub success_rate: f64,
}

/// Full metrics report for the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsReport {
    /// Search latency aggregate
    pub search: SearchAggregate,
    /// Embedding fallback aggregate
    pub fallbacks: FallbackAggregate,
}

/// Aggregate both sinks under a log directory. Missing files aggregate to
/// zeros; malformed lines are skipped.
pub fn aggregate(embedding_log: &Path, search_log: &Path) -> Result<MetricsReport> {
    let searches: Vec<SearchPerformanceRecord> = read_jsonl(search_log)?;
    let fallbacks: Vec<FallbackEvent> = read_jsonl(embedding_log)?;

    Ok(MetricsReport {
        search: aggregate_search(&searches),
        fallbacks: aggregate_fallbacks(&fallbacks),
    })
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::transient_io(format!("read {}: {e}", path.display()))),
    };
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

fn aggregate_search(records: &[SearchPerformanceRecord]) -> SearchAggregate {
    if records.is_empty() {
        return SearchAggregate::default();
    }

    let mut latencies: Vec<u64> = records.iter().map(|r| r.total_time_ms).collect();
    latencies.sort_unstable();
    let total = records.len() as u64;
    let violations = records.iter().filter(|r| r.sla_violation).count() as f64;
    let lexical_only = records
        .iter()
        .filter(|r| r.fallback_mode == Some(SearchFallbackMode::Vector))
        .count() as f64;
    let vector_only = records
        .iter()
        .filter(|r| r.fallback_mode == Some(SearchFallbackMode::Lexical))
        .count() as f64;
    let n = records.len() as f64;

    SearchAggregate {
        total_queries: total,
        p50_ms: percentile(&latencies, 0.50),
        p95_ms: percentile(&latencies, 0.95),
        p99_ms: percentile(&latencies, 0.99),
        sla_violation_rate: violations / n,
        hybrid_rate: (n - lexical_only - vector_only) / n,
        lexical_only_rate: lexical_only / n,
        vector_only_rate: vector_only / n,
    }
}

fn aggregate_fallbacks(events: &[FallbackEvent]) -> FallbackAggregate {
    if events.is_empty() {
        return FallbackAggregate::default();
    }
    let mut by_action = std::collections::BTreeMap::new();
    let mut successes = 0u64;
    for event in events {
        let key = serde_json::to_value(event.action)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        *by_action.entry(key).or_insert(0) += 1;
        if event.success {
            successes += 1;
        }
    }
    FallbackAggregate {
        total_events: events.len() as u64,
        by_action,
        success_rate: successes as f64 / events.len() as f64,
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[u64], q: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64) * q).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::FallbackAction;
    use chrono::Utc;

    fn search_record(total_ms: u64, fallback: Option<SearchFallbackMode>) -> SearchPerformanceRecord {
        SearchPerformanceRecord {
            timestamp: Utc::now(),
            lexical_time_ms: 1,
            vector_time_ms: 2,
            ranking_time_ms: 0,
            total_time_ms: total_ms,
            lexical_candidates: 3,
            vector_candidates: 3,
            unique_candidates: 5,
            sla_violation: total_ms > 300,
            fallback_mode: fallback,
        }
    }

    #[test]
    fn sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.jsonl");
        let sink = JsonlSink::new(path.clone());

        sink.append(&search_record(10, None)).unwrap();
        sink.append(&search_record(20, Some(SearchFallbackMode::Vector))).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn aggregate_computes_percentiles_and_rates() {
        let dir = tempfile::tempdir().unwrap();
        let search_log = dir.path().join("search-performance.jsonl");
        let embedding_log = dir.path().join("embedding.jsonl");
        let sink = JsonlSink::new(search_log.clone());

        for ms in [10, 20, 30, 40, 400] {
            sink.append(&search_record(ms, None)).unwrap();
        }
        sink.append(&search_record(15, Some(SearchFallbackMode::Vector))).unwrap();

        let fallback_sink = JsonlSink::new(embedding_log.clone());
        fallback_sink
            .append(&FallbackEvent {
                timestamp: Utc::now(),
                action: FallbackAction::ReduceBatch,
                from: "32".to_string(),
                to: "16".to_string(),
                reason: "oom".to_string(),
                success: true,
            })
            .unwrap();

        let report = aggregate(&embedding_log, &search_log).unwrap();
        assert_eq!(report.search.total_queries, 6);
        assert!(report.search.p99_ms >= report.search.p50_ms);
        assert!(report.search.sla_violation_rate > 0.0);
        assert!(report.search.lexical_only_rate > 0.0);
        assert_eq!(report.fallbacks.total_events, 1);
        assert_eq!(report.fallbacks.by_action.get("reduce_batch"), Some(&1));
        assert_eq!(report.fallbacks.success_rate, 1.0);
    }

    #[test]
    fn missing_logs_aggregate_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let report = aggregate(
            &dir.path().join("embedding.jsonl"),
            &dir.path().join("search-performance.jsonl"),
        )
        .unwrap();
        assert_eq!(report.search.total_queries, 0);
        assert_eq!(report.fallbacks.total_events, 0);
    }
}
