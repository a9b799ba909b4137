//! Embedding engine.
//!
//! Owns the model handle and everything around it: hardware-adaptive
//! profile selection, length-sorted batched inference, cache-first
//! lookups, the ordered fallback chain (reduce batch, switch quantization,
//! switch device, switch model), memory-pressure throttling, and the
//! circuit breaker whose open state degrades to a cache-only path.
//!
//! ONNX sessions are not re-entrant, so the engine state sits behind an
//! async mutex and at most one inference runs at a time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::adapters::embedding::ProviderFactory;
use crate::domain::error::{Error, Result};
use crate::domain::ports::SharedEmbeddingProvider;
use crate::domain::types::{
    Device, EmbeddingProfile, FallbackAction, FallbackEvent, HardwareCapabilities, Quantization,
};
use crate::infrastructure::embedding_cache::EmbeddingCache;
use crate::infrastructure::hardware;
use crate::infrastructure::resilience::{CircuitBreaker, CircuitBreakerConfig};
use crate::infrastructure::telemetry::Telemetry;

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fallback chain steps allowed within one request
    pub max_fallback_attempts: u32,
    /// Process memory fraction above which batches are halved
    pub memory_pressure_threshold: f64,
    /// Per-batch inference timeout
    pub batch_timeout: Duration,
    /// Circuit breaker settings
    pub breaker: CircuitBreakerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_fallback_attempts: 3,
            memory_pressure_threshold: 0.8,
            batch_timeout: Duration::from_secs(30),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Options for one embed request; a fixed record with defaults.
#[derive(Debug, Clone)]
pub struct EmbedOpts {
    /// Override the profile's batch size
    pub batch_size: Option<u16>,
    /// Consult and fill the persistent cache
    pub use_cache: bool,
    /// Log per-batch progress
    pub show_progress: bool,
    /// Use a named preset instead of the active profile
    pub profile: Option<String>,
}

impl Default for EmbedOpts {
    fn default() -> Self {
        Self {
            batch_size: None,
            use_cache: true,
            show_progress: false,
            profile: None,
        }
    }
}

/// Per-text outcome, in input order.
#[derive(Debug, Clone)]
pub struct EmbedResult {
    /// Index into the request's text list
    pub index: usize,
    /// SHA-256 of the text (the cache key)
    pub content_hash: String,
    /// The vector, when embedding succeeded
    pub vector: Option<Vec<f32>>,
    /// Whether the vector came from the cache
    pub cached: bool,
    /// Failure reason, when embedding failed
    pub error: Option<String>,
}

/// Request summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbedSummary {
    /// Texts requested
    pub requested: usize,
    /// Served from cache
    pub cache_hits: usize,
    /// Freshly generated
    pub generated: usize,
    /// Failed after the fallback chain
    pub failed: usize,
    /// Fallback steps taken
    pub fallback_attempts: u32,
}

/// Result of an embed request.
#[derive(Debug, Clone)]
pub struct EmbedOutput {
    /// Per-text outcomes in input order
    pub results: Vec<EmbedResult>,
    /// Aggregate summary
    pub summary: EmbedSummary,
}

struct EngineState {
    profile: EmbeddingProfile,
    provider: Option<SharedEmbeddingProvider>,
    /// Next fallback chain step; resets to 0 on a clean batch
    chain_step: u32,
}

/// The embedding engine.
pub struct EmbeddingEngine {
    models_dir: PathBuf,
    config: EngineConfig,
    cache: Arc<EmbeddingCache>,
    telemetry: Option<Arc<Telemetry>>,
    breaker: CircuitBreaker,
    factory: ProviderFactory,
    state: Mutex<EngineState>,
    history: std::sync::Mutex<Vec<FallbackEvent>>,
    hardware: HardwareCapabilities,
}

impl EmbeddingEngine {
    /// Initialize the engine: detect hardware, resolve the profile (saved
    /// profile if any, otherwise the best preset for the hardware), and
    /// prepare lazy model loading.
    pub fn initialize(
        models_dir: PathBuf,
        cache: Arc<EmbeddingCache>,
        telemetry: Option<Arc<Telemetry>>,
        factory: ProviderFactory,
        config: EngineConfig,
        saved_profile: Option<EmbeddingProfile>,
    ) -> Self {
        let hw = hardware::detect();
        let mut profile = saved_profile.unwrap_or_else(|| select_preset(&hw));
        resolve_auto(&mut profile, &hw);
        downscale_batch(&mut profile, &hw);

        tracing::info!(
            profile = %profile.name,
            model = %profile.model,
            device = ?profile.device,
            quantization = ?profile.quantization,
            batch_size = profile.batch_size,
            "embedding engine initialized"
        );

        Self {
            models_dir,
            breaker: CircuitBreaker::new(config.breaker.clone()),
            config,
            cache,
            telemetry,
            factory,
            state: Mutex::new(EngineState {
                profile,
                provider: None,
                chain_step: 0,
            }),
            history: std::sync::Mutex::new(Vec::new()),
            hardware: hw,
        }
    }

    /// Hardware snapshot taken at initialization.
    pub fn hardware(&self) -> &HardwareCapabilities {
        &self.hardware
    }

    /// The currently effective profile.
    pub async fn active_profile(&self) -> EmbeddingProfile {
        self.state.lock().await.profile.clone()
    }

    /// Switch to a resolved profile. A dimension change invalidates cache
    /// rows of the old dimension; the model reloads lazily.
    pub async fn switch_profile(&self, mut profile: EmbeddingProfile) -> Result<()> {
        resolve_auto(&mut profile, &self.hardware);
        downscale_batch(&mut profile, &self.hardware);

        let mut state = self.state.lock().await;
        if state.profile.dimensions != profile.dimensions {
            let removed = self.cache.invalidate_by_dimensions(state.profile.dimensions)?;
            tracing::info!(
                removed,
                old = state.profile.dimensions,
                new = profile.dimensions,
                "invalidated cache rows for old dimension"
            );
        }
        tracing::info!(from = %state.profile.name, to = %profile.name, "profile switch");
        state.profile = profile;
        state.provider = None;
        state.chain_step = 0;
        Ok(())
    }

    /// Drop every cached vector.
    pub fn clear_cache(&self) -> Result<u64> {
        self.cache.clear()
    }

    /// Fallback events recorded by this engine instance.
    pub fn fallback_history(&self) -> Vec<FallbackEvent> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Release the model handle.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.provider = None;
    }

    /// Embed one query text (search hot path).
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let output = self
            .embed_texts(std::slice::from_ref(&text.to_string()), &EmbedOpts::default())
            .await?;
        let result = output
            .results
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("empty embed output"))?;
        result
            .vector
            .ok_or_else(|| Error::embedding(result.error.unwrap_or_else(|| "unknown".into())))
    }

    /// Embed whole files by content.
    pub async fn embed_files(&self, paths: &[PathBuf], opts: &EmbedOpts) -> Result<EmbedOutput> {
        let mut texts = Vec::with_capacity(paths.len());
        for path in paths {
            let text = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| Error::transient_io(format!("read {}: {e}", path.display())))?;
            texts.push(text);
        }
        self.embed_texts(&texts, opts).await
    }

    /// Embed a list of texts: cache-first, then batched inference under
    /// the fallback chain and circuit breaker.
    pub async fn embed_texts(&self, texts: &[String], opts: &EmbedOpts) -> Result<EmbedOutput> {
        let mut results: Vec<EmbedResult> = texts
            .iter()
            .enumerate()
            .map(|(index, text)| EmbedResult {
                index,
                content_hash: sha256_hex(text),
                vector: None,
                cached: false,
                error: None,
            })
            .collect();
        let mut summary = EmbedSummary {
            requested: texts.len(),
            ..EmbedSummary::default()
        };

        if texts.is_empty() {
            return Ok(EmbedOutput { results, summary });
        }

        let mut state = self.state.lock().await;

        if let Some(name) = &opts.profile {
            let profile = EmbeddingProfile::preset(name)
                .ok_or_else(|| Error::invalid_input(format!("unknown profile: {name}")))?;
            if profile.name != state.profile.name {
                drop(state);
                self.switch_profile(profile).await?;
                state = self.state.lock().await;
            }
        }

        // Cache pass
        if opts.use_cache {
            let profile = &state.profile;
            for result in &mut results {
                if let Some(vector) = self.cache.get(
                    &result.content_hash,
                    &profile.model,
                    &profile.model_version,
                    profile.dimensions,
                )? {
                    result.vector = Some(vector);
                    result.cached = true;
                    summary.cache_hits += 1;
                }
            }
        }

        let mut pending: Vec<usize> = results
            .iter()
            .filter(|r| r.vector.is_none())
            .map(|r| r.index)
            .collect();
        if pending.is_empty() {
            return Ok(EmbedOutput { results, summary });
        }

        // Open breaker: cache-only path. Cached texts already succeeded;
        // the rest fail without touching the adapter.
        if !self.breaker.is_call_permitted() {
            for &i in &pending {
                results[i].error = Some("embedding circuit open and no cached vector".to_string());
            }
            summary.failed = pending.len();
            tracing::warn!(failed = pending.len(), "circuit open, cache-only embed path");
            return Ok(EmbedOutput { results, summary });
        }

        // Length-sorted batches reduce padding; original order is restored
        // through the index mapping.
        pending.sort_by_key(|&i| texts[i].len());

        let mut batch_size = opts
            .batch_size
            .unwrap_or(state.profile.batch_size)
            .clamp(1, 256) as usize;
        batch_size = self.apply_memory_pressure(batch_size).await;

        let mut generated: Vec<(String, Vec<f32>)> = Vec::new();
        let mut pending_event: Option<FallbackEvent> = None;
        let mut cursor = 0usize;

        while cursor < pending.len() {
            let end = (cursor + batch_size).min(pending.len());
            let batch_indices = &pending[cursor..end];
            let batch_texts: Vec<String> =
                batch_indices.iter().map(|&i| texts[i].clone()).collect();

            if opts.show_progress {
                tracing::info!(
                    done = cursor,
                    total = pending.len(),
                    batch = batch_texts.len(),
                    "embedding batch"
                );
            }

            match self.run_batch(&mut state, batch_texts).await {
                Ok(vectors) => {
                    self.breaker.record_success();
                    state.chain_step = 0;
                    if let Some(mut event) = pending_event.take() {
                        event.success = true;
                        self.append_event(event);
                    }
                    for (j, &i) in batch_indices.iter().enumerate() {
                        results[i].vector = Some(vectors[j].clone());
                        generated.push((results[i].content_hash.clone(), vectors[j].clone()));
                    }
                    summary.generated += batch_indices.len();
                    cursor = end;
                }
                Err(err) => {
                    self.breaker.record_failure();
                    if let Some(mut event) = pending_event.take() {
                        event.success = false;
                        self.append_event(event);
                    }

                    if summary.fallback_attempts >= self.config.max_fallback_attempts {
                        tracing::error!(error = %err, "fallback budget exhausted");
                        for &i in &pending[cursor..] {
                            results[i].error = Some(err.to_string());
                            summary.failed += 1;
                        }
                        break;
                    }

                    match self.apply_fallback(&mut state, &mut batch_size, &err) {
                        Some(event) => {
                            summary.fallback_attempts += 1;
                            pending_event = Some(event);
                            // Retry the same span with the new settings
                        }
                        None => {
                            tracing::error!(error = %err, "fallback chain exhausted");
                            for &i in &pending[cursor..] {
                                results[i].error = Some(err.to_string());
                                summary.failed += 1;
                            }
                            break;
                        }
                    }
                }
            }
        }

        if let Some(mut event) = pending_event.take() {
            event.success = false;
            self.append_event(event);
        }

        if opts.use_cache && !generated.is_empty() {
            let profile = &state.profile;
            self.cache
                .set_batch(&profile.model, &profile.model_version, &generated)?;
        }

        Ok(EmbedOutput { results, summary })
    }

    async fn run_batch(
        &self,
        state: &mut EngineState,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>> {
        let provider = match &state.provider {
            Some(provider) => provider.clone(),
            None => {
                let provider = (self.factory)(&state.profile, &self.models_dir)?;
                state.provider = Some(provider.clone());
                provider
            }
        };

        match tokio::time::timeout(self.config.batch_timeout, provider.embed_batch(&texts)).await {
            Ok(result) => result,
            Err(_) => Err(Error::embedding(format!(
                "batch timed out after {:?}",
                self.config.batch_timeout
            ))),
        }
    }

    /// Walk the fallback chain from the current step; returns the recorded
    /// event template when a remediation was applied.
    fn apply_fallback(
        &self,
        state: &mut EngineState,
        batch_size: &mut usize,
        err: &Error,
    ) -> Option<FallbackEvent> {
        let reason = err.to_string();

        loop {
            match state.chain_step {
                0 => {
                    state.chain_step = 1;
                    if *batch_size > 1 {
                        let from = *batch_size;
                        *batch_size = (*batch_size / 2).max(1);
                        tracing::warn!(from, to = *batch_size, "fallback: reduce batch");
                        return Some(event(FallbackAction::ReduceBatch, from.to_string(), batch_size.to_string(), reason));
                    }
                }
                1 => {
                    state.chain_step = 2;
                    let next = match state.profile.quantization {
                        Quantization::Fp16 => Some(Quantization::Int8),
                        Quantization::Fp32 => Some(Quantization::Fp16),
                        _ => None,
                    };
                    if let Some(next) = next {
                        let from = format!("{:?}", state.profile.quantization);
                        state.profile.quantization = next;
                        state.provider = None;
                        tracing::warn!(%from, to = ?next, "fallback: switch quantization");
                        return Some(event(FallbackAction::SwitchQuantization, from, format!("{next:?}"), reason));
                    }
                }
                2 => {
                    state.chain_step = 3;
                    if state.profile.device != Device::Cpu {
                        let from = format!("{:?}", state.profile.device);
                        state.profile.device = Device::Cpu;
                        state.provider = None;
                        tracing::warn!(%from, "fallback: switch device to cpu");
                        return Some(event(FallbackAction::SwitchDevice, from, "Cpu".to_string(), reason));
                    }
                }
                _ => {
                    let next = match state.profile.name.as_str() {
                        "performance" => Some(EmbeddingProfile::balanced()),
                        "balanced" => Some(EmbeddingProfile::light()),
                        _ => None,
                    }?;
                    let mut next = next;
                    resolve_auto(&mut next, &self.hardware);
                    let from = state.profile.name.clone();
                    tracing::warn!(%from, to = %next.name, "fallback: switch model");
                    state.profile = next;
                    state.provider = None;
                    return Some(event(
                        FallbackAction::SwitchModel,
                        from,
                        state.profile.name.clone(),
                        reason,
                    ));
                }
            }
        }
    }

    fn append_event(&self, event: FallbackEvent) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record_fallback(&event);
        }
        if let Ok(mut history) = self.history.lock() {
            history.push(event);
        }
    }

    /// Sample process memory; above the threshold, halve the batch, log,
    /// and pause briefly if pressure persists.
    async fn apply_memory_pressure(&self, batch_size: usize) -> usize {
        let fraction = hardware::process_memory_fraction();
        if fraction <= self.config.memory_pressure_threshold {
            return batch_size;
        }
        let reduced = (batch_size / 2).max(1);
        tracing::warn!(
            fraction,
            threshold = self.config.memory_pressure_threshold,
            from = batch_size,
            to = reduced,
            "memory pressure: halving batch"
        );
        if hardware::process_memory_fraction() > self.config.memory_pressure_threshold {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        reduced
    }
}

fn event(action: FallbackAction, from: String, to: String, reason: String) -> FallbackEvent {
    FallbackEvent {
        timestamp: chrono::Utc::now(),
        action,
        from,
        to,
        reason,
        success: false,
    }
}

/// SHA-256 hex of a text (the cache key).
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Best preset for the detected hardware: CPU-only machines get `light`,
/// recent CUDA gets `performance`, older CUDA and Apple Silicon get
/// `balanced`.
pub fn select_preset(hw: &HardwareCapabilities) -> EmbeddingProfile {
    match &hw.gpu {
        Some(gpu) if gpu.vendor == "nvidia" => {
            let recent = gpu
                .compute_capability
                .as_deref()
                .and_then(|c| c.parse::<f32>().ok())
                .map(|c| c >= 7.5)
                .unwrap_or(false);
            if recent {
                EmbeddingProfile::performance()
            } else {
                EmbeddingProfile::balanced()
            }
        }
        Some(gpu) if gpu.vendor == "apple" => EmbeddingProfile::balanced(),
        _ => EmbeddingProfile::light(),
    }
}

/// Resolve `auto` device and quantization to concrete values for the
/// hardware: CUDA and MPS when visible, otherwise CPU; int8 on CPU, fp16
/// on GPU devices.
pub fn resolve_auto(profile: &mut EmbeddingProfile, hw: &HardwareCapabilities) {
    if profile.device == Device::Auto {
        profile.device = match &hw.gpu {
            Some(gpu) if gpu.vendor == "nvidia" => Device::Cuda,
            Some(gpu) if gpu.vendor == "apple" => Device::Mps,
            _ => Device::Cpu,
        };
    }
    if profile.quantization == Quantization::Auto {
        profile.quantization = match profile.device {
            Device::Cpu => Quantization::Int8,
            Device::Mps | Device::Cuda => Quantization::Fp16,
            Device::Auto => Quantization::Int8,
        };
    }
}

/// Halve the batch size while the estimated working set exceeds half the
/// available RAM.
fn downscale_batch(profile: &mut EmbeddingProfile, hw: &HardwareCapabilities) {
    let budget = hw.free_ram / 2;
    while profile.batch_size > 1 {
        let estimate = profile.batch_size as u64 * profile.dimensions as u64 * 4;
        if estimate <= budget {
            break;
        }
        profile.batch_size /= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::embedding::hash_provider_factory;
    use crate::domain::ports::EmbeddingProvider;
    use crate::domain::types::GpuInfo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn engine_with(factory: ProviderFactory, config: EngineConfig) -> EmbeddingEngine {
        EmbeddingEngine::initialize(
            PathBuf::from("/tmp/models"),
            Arc::new(EmbeddingCache::open_in_memory().unwrap()),
            None,
            factory,
            config,
            Some(EmbeddingProfile::balanced()),
        )
    }

    struct FlakyProvider {
        failures_left: AtomicU32,
        dimensions: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
                .is_ok()
            {
                return Err(Error::embedding("synthetic failure"));
            }
            Ok(texts.iter().map(|_| vec![0.5; self.dimensions]).collect())
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }
        fn model_id(&self) -> &str {
            "flaky"
        }
        fn model_version(&self) -> &str {
            "1"
        }
    }

    fn flaky_factory(failures: u32) -> ProviderFactory {
        let shared = Arc::new(FlakyProvider {
            failures_left: AtomicU32::new(failures),
            dimensions: 8,
        });
        Arc::new(move |_profile, _dir| Ok(shared.clone() as SharedEmbeddingProvider))
    }

    #[tokio::test]
    async fn embeds_and_caches() {
        let engine = engine_with(hash_provider_factory(), EngineConfig::default());
        let texts = vec!["alpha".to_string(), "beta".to_string()];

        let first = engine.embed_texts(&texts, &EmbedOpts::default()).await.unwrap();
        assert_eq!(first.summary.generated, 2);
        assert_eq!(first.summary.cache_hits, 0);
        assert!(first.results.iter().all(|r| r.vector.is_some()));

        let second = engine.embed_texts(&texts, &EmbedOpts::default()).await.unwrap();
        assert_eq!(second.summary.cache_hits, 2);
        assert_eq!(second.summary.generated, 0);
        assert!(second.results.iter().all(|r| r.cached));
    }

    #[tokio::test]
    async fn embed_files_reads_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snippet.py");
        std::fs::write(&path, "def f():\n    return 1\n").unwrap();

        let engine = engine_with(hash_provider_factory(), EngineConfig::default());
        let output = engine
            .embed_files(&[path], &EmbedOpts::default())
            .await
            .unwrap();
        assert_eq!(output.results.len(), 1);
        assert!(output.results[0].vector.is_some());

        let missing = engine
            .embed_files(&[dir.path().join("gone.py")], &EmbedOpts::default())
            .await;
        assert!(matches!(missing.unwrap_err(), Error::TransientIo { .. }));
    }

    #[tokio::test]
    async fn results_keep_input_order() {
        let engine = engine_with(hash_provider_factory(), EngineConfig::default());
        let texts = vec![
            "a much longer text that sorts later".to_string(),
            "xs".to_string(),
            "middle sized one".to_string(),
        ];
        let output = engine.embed_texts(&texts, &EmbedOpts::default()).await.unwrap();
        for (i, result) in output.results.iter().enumerate() {
            assert_eq!(result.index, i);
            assert_eq!(result.content_hash, sha256_hex(&texts[i]));
        }
    }

    #[tokio::test]
    async fn fallback_chain_recovers_and_records() {
        let engine = engine_with(flaky_factory(2), EngineConfig::default());
        let texts = vec!["one".to_string()];

        let output = engine.embed_texts(&texts, &EmbedOpts::default()).await.unwrap();
        assert!(output.results[0].vector.is_some());
        assert_eq!(output.summary.fallback_attempts, 2);

        let history = engine.fallback_history();
        assert_eq!(history.len(), 2);
        // One event per attempt; the last one succeeded
        assert_eq!(history[0].action, FallbackAction::ReduceBatch);
        assert!(!history[0].success);
        assert!(history[1].success);
    }

    #[tokio::test]
    async fn fallback_budget_caps_attempts() {
        let engine = engine_with(flaky_factory(100), EngineConfig::default());
        let texts = vec!["one".to_string()];

        let output = engine.embed_texts(&texts, &EmbedOpts::default()).await.unwrap();
        assert!(output.results[0].vector.is_none());
        assert_eq!(output.summary.failed, 1);
        assert_eq!(output.summary.fallback_attempts, 3);
    }

    #[tokio::test]
    async fn open_breaker_degrades_to_cache_only() {
        let config = EngineConfig {
            breaker: CircuitBreakerConfig {
                minimum_calls: 1,
                recovery: Duration::from_secs(600),
                ..CircuitBreakerConfig::default()
            },
            max_fallback_attempts: 0,
            ..EngineConfig::default()
        };
        let engine = engine_with(hash_provider_factory(), config);

        // Warm the cache for one text
        let warm = vec!["cached text".to_string()];
        engine.embed_texts(&warm, &EmbedOpts::default()).await.unwrap();

        // Open the breaker with failures
        let flaky = engine_with(flaky_factory(100), EngineConfig {
            breaker: CircuitBreakerConfig {
                minimum_calls: 1,
                recovery: Duration::from_secs(600),
                ..CircuitBreakerConfig::default()
            },
            max_fallback_attempts: 0,
            ..EngineConfig::default()
        });
        let _ = flaky
            .embed_texts(&["x".to_string()], &EmbedOpts::default())
            .await
            .unwrap();
        // Breaker needs minimum_calls failures in window
        let _ = flaky
            .embed_texts(&["y".to_string()], &EmbedOpts::default())
            .await
            .unwrap();

        let output = flaky
            .embed_texts(&["z".to_string()], &EmbedOpts::default())
            .await
            .unwrap();
        assert!(output.results[0].error.is_some());
        assert_eq!(output.summary.failed, 1);
    }

    #[tokio::test]
    async fn profile_switch_invalidates_old_dimension() {
        let cache = Arc::new(EmbeddingCache::open_in_memory().unwrap());
        let engine = EmbeddingEngine::initialize(
            PathBuf::from("/tmp/models"),
            cache.clone(),
            None,
            hash_provider_factory(),
            EngineConfig::default(),
            Some(EmbeddingProfile::balanced()),
        );

        engine
            .embed_texts(&["text".to_string()], &EmbedOpts::default())
            .await
            .unwrap();
        assert_eq!(cache.stats().unwrap().entries, 1);

        engine
            .switch_profile(EmbeddingProfile::performance())
            .await
            .unwrap();
        // balanced is 384-dim, performance 768-dim; old rows are gone
        assert_eq!(cache.stats().unwrap().entries, 0);
        assert_eq!(engine.active_profile().await.dimensions, 768);
    }

    #[test]
    fn preset_selection_by_hardware() {
        let mut hw = HardwareCapabilities {
            platform: "linux".into(),
            arch: "x86_64".into(),
            cpu_cores: 8,
            cpu_model: "test".into(),
            total_ram: 16 << 30,
            free_ram: 8 << 30,
            gpu: None,
            onnx_providers: vec!["CPUExecutionProvider".into()],
        };
        assert_eq!(select_preset(&hw).name, "light");

        hw.gpu = Some(GpuInfo {
            vendor: "nvidia".into(),
            name: "RTX".into(),
            memory: None,
            compute_capability: Some("8.6".into()),
        });
        assert_eq!(select_preset(&hw).name, "performance");

        hw.gpu.as_mut().unwrap().compute_capability = Some("6.1".into());
        assert_eq!(select_preset(&hw).name, "balanced");

        hw.gpu = Some(GpuInfo {
            vendor: "apple".into(),
            name: "Apple Silicon".into(),
            memory: None,
            compute_capability: None,
        });
        assert_eq!(select_preset(&hw).name, "balanced");
    }

    #[test]
    fn auto_resolution_per_device() {
        let hw = HardwareCapabilities {
            platform: "linux".into(),
            arch: "x86_64".into(),
            cpu_cores: 8,
            cpu_model: "test".into(),
            total_ram: 16 << 30,
            free_ram: 8 << 30,
            gpu: None,
            onnx_providers: vec![],
        };
        let mut profile = EmbeddingProfile {
            device: Device::Auto,
            quantization: Quantization::Auto,
            ..EmbeddingProfile::balanced()
        };
        resolve_auto(&mut profile, &hw);
        assert_eq!(profile.device, Device::Cpu);
        assert_eq!(profile.quantization, Quantization::Int8);
    }

    #[test]
    fn batch_downscales_under_tight_ram() {
        let hw = HardwareCapabilities {
            platform: "linux".into(),
            arch: "x86_64".into(),
            cpu_cores: 2,
            cpu_model: "tiny".into(),
            total_ram: 1 << 20,
            free_ram: 64 << 10, // 64 KiB free -> budget 32 KiB
            gpu: None,
            onnx_providers: vec![],
        };
        let mut profile = EmbeddingProfile::performance(); // 64 * 768 * 4 = 192 KiB
        downscale_batch(&mut profile, &hw);
        assert!(profile.batch_size < 64);
        assert!(profile.batch_size >= 1);
        assert!((profile.batch_size as u64 * 768 * 4) <= 32 << 10);
    }
}
