//! Resilience primitives: the circuit breaker guarding embedding inference
//! and a bounded exponential backoff helper for transient I/O.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::domain::error::{Error, Result};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are short-circuited
    Open,
    /// A single probe is admitted
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Rolling window length
    pub window: Duration,
    /// Buckets in the rolling window
    pub buckets: usize,
    /// Failure ratio in the window that opens the circuit
    pub failure_threshold: f64,
    /// Minimum calls in the window before the threshold applies
    pub minimum_calls: u64,
    /// How long the circuit stays open before admitting a probe
    pub recovery: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            buckets: 10,
            failure_threshold: 0.5,
            minimum_calls: 4,
            recovery: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    successes: u64,
    failures: u64,
}

struct BreakerInner {
    state: CircuitState,
    buckets: Vec<Bucket>,
    current_bucket: usize,
    bucket_started: Instant,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Rolling-window circuit breaker. Open state short-circuits callers; after
/// the recovery period a single half-open probe decides whether to close.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Breaker with the given settings.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let buckets = vec![Bucket::default(); config.buckets.max(1)];
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                buckets,
                current_bucket: 0,
                bucket_started: Instant::now(),
                opened_at: None,
                probe_in_flight: false,
            }),
            config,
        }
    }

    /// Whether a call may proceed right now. In half-open state only the
    /// first caller gets through until its outcome is recorded.
    pub fn is_call_permitted(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.rotate(&mut inner);

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!("circuit breaker half-open, admitting probe");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.rotate(&mut inner);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.probe_in_flight = false;
                inner.opened_at = None;
                for bucket in &mut inner.buckets {
                    *bucket = Bucket::default();
                }
                tracing::info!("circuit breaker closed after successful probe");
            }
            _ => {
                let idx = inner.current_bucket;
                inner.buckets[idx].successes += 1;
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.rotate(&mut inner);

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_in_flight = false;
            tracing::warn!("circuit breaker re-opened after failed probe");
            return;
        }

        let idx = inner.current_bucket;
        inner.buckets[idx].failures += 1;

        let (successes, failures) = inner
            .buckets
            .iter()
            .fold((0u64, 0u64), |(s, f), b| (s + b.successes, f + b.failures));
        let total = successes + failures;
        if total >= self.config.minimum_calls
            && failures as f64 / total as f64 >= self.config.failure_threshold
            && inner.state == CircuitState::Closed
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            tracing::warn!(
                failures,
                total,
                "circuit breaker opened: failure ratio over threshold"
            );
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        self.rotate(&mut inner);
        inner.state
    }

    /// Advance the rolling window: each elapsed bucket interval moves the
    /// cursor and clears the reused bucket.
    fn rotate(&self, inner: &mut BreakerInner) {
        let bucket_len = self.config.window / self.config.buckets.max(1) as u32;
        if bucket_len.is_zero() {
            return;
        }
        let elapsed = inner.bucket_started.elapsed();
        let steps = (elapsed.as_micros() / bucket_len.as_micros().max(1)) as usize;
        if steps == 0 {
            return;
        }
        let len = inner.buckets.len();
        for _ in 0..steps.min(len) {
            inner.current_bucket = (inner.current_bucket + 1) % len;
            let idx = inner.current_bucket;
            inner.buckets[idx] = Bucket::default();
        }
        inner.bucket_started = Instant::now();
    }
}

/// Retry a fallible operation with exponential backoff, bounded attempts.
/// Only transient errors are retried.
pub async fn with_backoff<T, F, Fut>(attempts: u32, initial_delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last: Option<Error> = None;

    for attempt in 0..attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                tracing::debug!(attempt, error = %err, "transient failure, backing off");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                last = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last.unwrap_or_else(|| Error::internal("retry loop exhausted with no error")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            window: Duration::from_millis(200),
            buckets: 4,
            failure_threshold: 0.5,
            minimum_calls: 4,
            recovery: Duration::from_millis(50),
        })
    }

    #[test]
    fn opens_after_failure_ratio() {
        let breaker = fast_breaker();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_call_permitted());
    }

    #[test]
    fn below_minimum_calls_stays_closed() {
        let breaker = fast_breaker();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_single_probe_then_closes_on_success() {
        let breaker = fast_breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.is_call_permitted(), "probe admitted after recovery");
        assert!(!breaker.is_call_permitted(), "second caller blocked");

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.is_call_permitted());
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = fast_breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.is_call_permitted());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.is_call_permitted());
    }

    #[tokio::test]
    async fn backoff_retries_transient_only() {
        let mut calls = 0;
        let result: Result<u32> = with_backoff(3, Duration::from_millis(1), || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(Error::transient_io("flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);

        let mut calls = 0;
        let result: Result<u32> = with_backoff(3, Duration::from_millis(1), || {
            calls += 1;
            async { Err(Error::invalid_input("bad")) }
        })
        .await;
        assert!(matches!(result.unwrap_err(), Error::InvalidInput { .. }));
        assert_eq!(calls, 1);
    }
}
