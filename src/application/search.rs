//! Hybrid search.
//!
//! Runs the lexical (FTS5) and dense (query embedding + cosine) legs
//! concurrently under one latency budget, min-max normalizes both score
//! sets, fuses them with configurable weights, and degrades to a
//! single-leg response when the other leg fails or overruns. Every query
//! appends a performance record to the search telemetry sink.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapters::store::{IndexStore, LexicalCandidate};
use crate::application::embedding::EmbeddingEngine;
use crate::domain::error::{Error, Result};
use crate::domain::types::{
    Language, SearchFallbackMode, SearchPerformanceRecord, SearchResult,
};
use crate::infrastructure::telemetry::Telemetry;

/// Hybrid search settings.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Candidates requested from the lexical leg
    pub lexical_candidates: usize,
    /// Candidates requested from the vector leg
    pub vector_candidates: usize,
    /// Weight of the dense score in fusion
    pub dense_weight: f32,
    /// Weight of the lexical score in fusion
    pub lexical_weight: f32,
    /// Global per-query budget
    pub timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lexical_candidates: 50,
            vector_candidates: 50,
            dense_weight: 0.6,
            lexical_weight: 0.4,
            timeout: Duration::from_millis(300),
        }
    }
}

impl SearchConfig {
    /// Validate the weight configuration (must sum to 1.0).
    pub fn validated(self) -> Result<Self> {
        if (self.dense_weight + self.lexical_weight - 1.0).abs() > 1e-6 {
            return Err(Error::invalid_input(format!(
                "search weights must sum to 1.0 (dense {} + lexical {})",
                self.dense_weight, self.lexical_weight
            )));
        }
        Ok(self)
    }
}

/// One search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Free-text query
    pub query: String,
    /// Restrict results to paths under this directory
    pub directory: Option<String>,
    /// Restrict results to one language
    pub language: Option<Language>,
    /// Maximum results, in `[1, 100]`
    pub limit: usize,
}

impl SearchRequest {
    /// Request with defaults for the optional filters.
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            directory: None,
            language: None,
            limit,
        }
    }
}

/// One search response.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// Ranked results
    pub results: Vec<SearchResult>,
    /// Absent leg when degraded, `None` for a full hybrid response
    pub fallback_mode: Option<SearchFallbackMode>,
    /// End-to-end latency
    pub total_time_ms: u64,
}

/// The hybrid search service.
pub struct HybridSearch {
    store: Arc<IndexStore>,
    engine: Arc<EmbeddingEngine>,
    telemetry: Option<Arc<Telemetry>>,
    config: SearchConfig,
}

impl HybridSearch {
    /// Service over the given store and engine.
    pub fn new(
        store: Arc<IndexStore>,
        engine: Arc<EmbeddingEngine>,
        telemetry: Option<Arc<Telemetry>>,
        config: SearchConfig,
    ) -> Result<Self> {
        Ok(Self {
            store,
            engine,
            telemetry,
            config: config.validated()?,
        })
    }

    /// Run one query.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        if request.query.trim().is_empty() {
            return Err(Error::invalid_input("empty query"));
        }
        if request.limit == 0 || request.limit > 100 {
            return Err(Error::invalid_input(format!(
                "limit must be in [1, 100], got {}",
                request.limit
            )));
        }

        let started = Instant::now();
        let budget = self.config.timeout;

        let lexical_leg = async {
            let leg_started = Instant::now();
            let result = tokio::time::timeout(
                budget,
                self.store.lexical_search(
                    &request.query,
                    self.config.lexical_candidates,
                    request.directory.as_deref(),
                    request.language,
                ),
            )
            .await;
            (flatten_leg(result, "lexical"), leg_started.elapsed())
        };

        let vector_leg = async {
            let leg_started = Instant::now();
            let result = tokio::time::timeout(budget, self.dense_candidates(request)).await;
            (flatten_leg(result, "vector"), leg_started.elapsed())
        };

        let ((lexical, lexical_time), (vector, vector_time)) =
            tokio::join!(lexical_leg, vector_leg);

        let ranking_started = Instant::now();
        let fallback_mode = match (&lexical, &vector) {
            (Ok(_), Ok(_)) => None,
            (Ok(_), Err(e)) => {
                tracing::warn!(error = %e, "vector leg absent, lexical-only response");
                Some(SearchFallbackMode::Vector)
            }
            (Err(e), Ok(_)) => {
                tracing::warn!(error = %e, "lexical leg absent, vector-only response");
                Some(SearchFallbackMode::Lexical)
            }
            (Err(lex_err), Err(vec_err)) => {
                return Err(Error::sla_violation(format!(
                    "both search legs failed: lexical: {lex_err}; vector: {vec_err}"
                )));
            }
        };

        let lexical_candidates = lexical.as_ref().map(|c| c.len()).unwrap_or(0);
        let vector_candidates = vector.as_ref().map(|c| c.len()).unwrap_or(0);

        let results = self
            .fuse(
                lexical.unwrap_or_default(),
                vector.unwrap_or_default(),
                request.limit,
            )
            .await?;
        let unique_candidates = results.1;
        let ranking_time = ranking_started.elapsed();
        let total_time = started.elapsed();
        let sla_violation = total_time > budget;

        let record = SearchPerformanceRecord {
            timestamp: chrono::Utc::now(),
            lexical_time_ms: lexical_time.as_millis() as u64,
            vector_time_ms: vector_time.as_millis() as u64,
            ranking_time_ms: ranking_time.as_millis() as u64,
            total_time_ms: total_time.as_millis() as u64,
            lexical_candidates,
            vector_candidates,
            unique_candidates,
            sla_violation,
            fallback_mode,
        };
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_search(&record);
        }

        Ok(SearchResponse {
            results: results.0,
            fallback_mode,
            total_time_ms: record.total_time_ms,
        })
    }

    /// Dense leg: embed the query, rank stored vectors by cosine.
    async fn dense_candidates(&self, request: &SearchRequest) -> Result<Vec<(String, f32)>> {
        let profile = self.engine.active_profile().await;
        let query_vector = self.engine.embed_query(&request.query).await?;
        let stored = self
            .store
            .vectors_for_model(&profile.model, &profile.model_version, profile.dimensions)
            .await?;

        let mut scored: Vec<(String, f32)> = stored
            .into_iter()
            .map(|(hash, vector)| {
                let score = cosine_similarity(&query_vector, &vector);
                (hash, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.vector_candidates);
        Ok(scored)
    }

    /// Min-max normalize both legs, fuse, order, truncate. Returns the
    /// ranked results plus the unioned candidate count.
    async fn fuse(
        &self,
        lexical: Vec<LexicalCandidate>,
        vector: Vec<(String, f32)>,
        limit: usize,
    ) -> Result<(Vec<SearchResult>, usize)> {
        let lexical_norm = min_max_normalize(
            lexical
                .iter()
                .map(|c| (c.chunk_hash.clone(), c.score))
                .collect(),
        );
        let dense_norm = min_max_normalize(vector);

        let mut union: HashMap<String, (f32, Option<f32>, Option<f32>)> = HashMap::new();
        for (hash, score) in &lexical_norm {
            let entry = union.entry(hash.clone()).or_insert((0.0, None, None));
            entry.1 = Some(*score);
        }
        for (hash, score) in &dense_norm {
            let entry = union.entry(hash.clone()).or_insert((0.0, None, None));
            entry.2 = Some(*score);
        }
        for value in union.values_mut() {
            // Missing-side score contributes zero
            value.0 = self.config.dense_weight * value.2.unwrap_or(0.0)
                + self.config.lexical_weight * value.1.unwrap_or(0.0);
        }
        let unique_candidates = union.len();

        let hashes: Vec<String> = union.keys().cloned().collect();
        let chunks = self.store.chunks_by_hashes(&hashes).await?;

        let mut ranked: Vec<(u32, SearchResult)> = chunks
            .into_iter()
            .filter_map(|chunk| {
                let (combined, lexical_score, dense_score) = *union.get(&chunk.chunk_hash)?;
                let start_byte = chunk.start_byte;
                Some((
                    start_byte,
                    SearchResult {
                        chunk_hash: chunk.chunk_hash,
                        file_path: chunk.file_path,
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        kind: chunk.kind,
                        name: chunk.name,
                        content: chunk.content,
                        score: combined,
                        lexical_score,
                        dense_score,
                    },
                ))
            })
            .collect();

        // Order by fused score; ties break on lower start byte then stable
        // hash so equal-score results never reshuffle between runs.
        ranked.sort_by(|(a_byte, a), (b_byte, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a_byte.cmp(b_byte))
                .then_with(|| a.chunk_hash.cmp(&b.chunk_hash))
        });

        let results: Vec<SearchResult> = ranked
            .into_iter()
            .take(limit)
            .map(|(_, result)| result)
            .collect();
        Ok((results, unique_candidates))
    }
}

fn flatten_leg<T>(
    result: std::result::Result<Result<T>, tokio::time::error::Elapsed>,
    leg: &str,
) -> Result<T> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(Error::sla_violation(format!("{leg} leg exceeded budget"))),
    }
}

/// Min-max normalize scores into `[0, 1]`; a single candidate maps to 1.0.
fn min_max_normalize(scored: Vec<(String, f32)>) -> Vec<(String, f32)> {
    if scored.is_empty() {
        return scored;
    }
    let min = scored.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    let max = scored
        .iter()
        .map(|(_, s)| *s)
        .fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    scored
        .into_iter()
        .map(|(hash, score)| {
            let normalized = if range <= f32::EPSILON {
                1.0
            } else {
                (score - min) / range
            };
            (hash, normalized)
        })
        .collect()
}

/// Cosine similarity; 0.0 for mismatched or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
