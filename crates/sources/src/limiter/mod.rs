//! Per-source rate limiting and circuit breaking
//!
//! Provides:
//! - Token-bucket permits with continuous refill, one bucket per source
//! - A three-state circuit breaker (CLOSED / OPEN / HALF_OPEN) per source
//! - Usage statistics snapshots for operational reads
//!
//! Every acquired [`Permit`] is paired with exactly one outcome report.
//! Dropping an unreported permit reports a failure, so the pairing holds
//! under cancellation as well.

use paperscout_common::errors::{AppError, Result};
use paperscout_common::metrics::record_permit;
use paperscout_common::models::DiscoverySource;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Per-source limiter configuration. Rates are ceilings, not targets.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Maximum tokens the bucket can hold
    pub capacity: f64,
    /// Continuous refill rate, strictly positive
    pub refill_per_sec: f64,
    /// Failures within the window that open the circuit
    pub failure_threshold: u32,
    /// Sliding failure window
    pub failure_window: Duration,
    /// How long an open circuit stays open before probing
    pub cooldown: Duration,
}

impl LimiterConfig {
    pub fn per_second(rate: f64) -> Self {
        Self {
            capacity: rate.max(1.0),
            refill_per_sec: rate.max(0.001),
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }

    pub fn per_minute(rate: f64) -> Self {
        Self {
            capacity: rate.max(1.0),
            refill_per_sec: (rate / 60.0).max(0.001),
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }

    pub fn with_breaker(mut self, threshold: u32, window: Duration, cooldown: Duration) -> Self {
        self.failure_threshold = threshold.max(1);
        self.failure_window = window;
        self.cooldown = cooldown;
        self
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of one permitted outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Cumulative per-source usage counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageStats {
    pub acquired: u64,
    pub rejected_rate_limited: u64,
    pub rejected_circuit_open: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl UsageStats {
    fn record_latency(&mut self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        self.total_latency_ms += ms;
        self.max_latency_ms = self.max_latency_ms.max(ms);
    }

    /// Mean latency across all reported permits
    pub fn mean_latency_ms(&self) -> f64 {
        let reports = self.successes + self.failures;
        if reports == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / reports as f64
        }
    }
}

/// Point-in-time view of one source's limiter
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub source: DiscoverySource,
    pub capacity: f64,
    pub tokens: f64,
    pub refill_per_sec: f64,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    /// Seconds since the circuit opened, when open
    pub open_for_secs: Option<u64>,
    pub stats: UsageStats,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    circuit: CircuitState,
    consecutive_failures: u32,
    failure_times: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_inflight: bool,
    stats: UsageStats,
}

impl BucketState {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            circuit: CircuitState::Closed,
            consecutive_failures: 0,
            failure_times: VecDeque::new(),
            opened_at: None,
            half_open_inflight: false,
            stats: UsageStats::default(),
        }
    }

    fn refill(&mut self, now: Instant, config: &LimiterConfig) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_sec).min(config.capacity);
        self.last_refill = now;
    }

    fn open(&mut self, now: Instant) {
        self.circuit = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_inflight = false;
    }
}

enum TryAcquire {
    Ready,
    CircuitOpen,
    Wait(Duration),
}

#[derive(Debug)]
struct SourceLimiter {
    source: DiscoverySource,
    config: LimiterConfig,
    state: Mutex<BucketState>,
}

impl SourceLimiter {
    fn new(source: DiscoverySource, config: LimiterConfig) -> Self {
        let state = Mutex::new(BucketState::new(config.capacity, Instant::now()));
        Self {
            source,
            config,
            state,
        }
    }

    fn try_acquire(&self) -> TryAcquire {
        let mut state = self.state.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        state.refill(now, &self.config);

        if state.circuit == CircuitState::Open {
            let elapsed = state
                .opened_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default();
            if elapsed >= self.config.cooldown {
                debug!(source = %self.source, "circuit cooldown elapsed, probing");
                state.circuit = CircuitState::HalfOpen;
                state.half_open_inflight = false;
            } else {
                state.stats.rejected_circuit_open += 1;
                return TryAcquire::CircuitOpen;
            }
        }

        // A half-open circuit admits a single probe at a time
        if state.circuit == CircuitState::HalfOpen && state.half_open_inflight {
            state.stats.rejected_circuit_open += 1;
            return TryAcquire::CircuitOpen;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            if state.circuit == CircuitState::HalfOpen {
                state.half_open_inflight = true;
            }
            state.stats.acquired += 1;
            TryAcquire::Ready
        } else {
            let deficit = 1.0 - state.tokens;
            TryAcquire::Wait(Duration::from_secs_f64(deficit / self.config.refill_per_sec))
        }
    }

    fn report(&self, outcome: Outcome, latency: Duration) {
        let mut state = self.state.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        state.stats.record_latency(latency);

        match outcome {
            Outcome::Success => {
                state.stats.successes += 1;
                state.consecutive_failures = 0;
                state.failure_times.clear();
                if state.circuit == CircuitState::HalfOpen {
                    debug!(source = %self.source, "probe succeeded, closing circuit");
                    state.circuit = CircuitState::Closed;
                    state.half_open_inflight = false;
                    state.opened_at = None;
                }
            }
            Outcome::Failure => {
                state.stats.failures += 1;
                state.consecutive_failures += 1;
                state.failure_times.push_back(now);
                let window_start = now
                    .checked_sub(self.config.failure_window)
                    .unwrap_or(now - Duration::from_secs(0));
                while let Some(&front) = state.failure_times.front() {
                    if front < window_start {
                        state.failure_times.pop_front();
                    } else {
                        break;
                    }
                }

                match state.circuit {
                    CircuitState::HalfOpen => {
                        warn!(source = %self.source, "probe failed, reopening circuit");
                        state.open(now);
                    }
                    CircuitState::Closed => {
                        if state.failure_times.len() as u32 >= self.config.failure_threshold {
                            warn!(
                                source = %self.source,
                                failures = state.failure_times.len(),
                                "failure threshold reached, opening circuit"
                            );
                            state.open(now);
                        }
                    }
                    CircuitState::Open => {}
                }
            }
        }
    }

    fn record_wait_timeout(&self) {
        let mut state = self.state.lock().expect("limiter lock poisoned");
        state.stats.rejected_rate_limited += 1;
    }

    fn snapshot(&self) -> RateLimiterSnapshot {
        let mut state = self.state.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        state.refill(now, &self.config);
        RateLimiterSnapshot {
            source: self.source,
            capacity: self.config.capacity,
            tokens: state.tokens,
            refill_per_sec: self.config.refill_per_sec,
            circuit_state: state.circuit,
            consecutive_failures: state.consecutive_failures,
            open_for_secs: state
                .opened_at
                .filter(|_| state.circuit == CircuitState::Open)
                .map(|at| now.saturating_duration_since(at).as_secs()),
            stats: state.stats.clone(),
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock().expect("limiter lock poisoned");
        state.circuit = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.failure_times.clear();
        state.opened_at = None;
        state.half_open_inflight = false;
        state.tokens = self.config.capacity;
        state.last_refill = Instant::now();
    }
}

/// The right to make one outbound call to a source. Report the outcome with
/// [`Permit::success`] or [`Permit::failure`]; dropping an unreported permit
/// reports a failure.
#[derive(Debug)]
pub struct Permit {
    limiter: Arc<SourceLimiter>,
    acquired_at: Instant,
    reported: bool,
}

impl Permit {
    pub fn source(&self) -> DiscoverySource {
        self.limiter.source
    }

    pub fn success(mut self) {
        self.report(Outcome::Success);
    }

    pub fn failure(mut self) {
        self.report(Outcome::Failure);
    }

    fn report(&mut self, outcome: Outcome) {
        if !self.reported {
            self.reported = true;
            self.limiter.report(outcome, self.acquired_at.elapsed());
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.report(Outcome::Failure);
    }
}

/// Rate-limit and circuit-breaker manager for all discovery sources
pub struct RateLimitManager {
    sources: HashMap<DiscoverySource, Arc<SourceLimiter>>,
}

impl RateLimitManager {
    /// Build from explicit per-source configurations
    pub fn new(configs: HashMap<DiscoverySource, LimiterConfig>) -> Self {
        let sources = configs
            .into_iter()
            .map(|(source, config)| (source, Arc::new(SourceLimiter::new(source, config))))
            .collect();
        Self { sources }
    }

    /// Build from application settings
    pub fn from_settings(settings: &paperscout_common::config::RateLimitSettings) -> Self {
        let breaker = |config: LimiterConfig| {
            config.with_breaker(
                settings.failure_threshold,
                Duration::from_secs(settings.failure_window_secs),
                Duration::from_secs(settings.cooldown_secs),
            )
        };
        let mut configs = HashMap::new();
        configs.insert(
            DiscoverySource::Crossref,
            breaker(LimiterConfig::per_second(
                settings.crossref_requests_per_second,
            )),
        );
        configs.insert(
            DiscoverySource::SemanticScholar,
            breaker(LimiterConfig::per_minute(
                settings.semantic_scholar_requests_per_minute,
            )),
        );
        configs.insert(
            DiscoverySource::Perplexity,
            breaker(LimiterConfig::per_minute(
                settings.perplexity_requests_per_minute,
            )),
        );
        Self::new(configs)
    }

    /// Wait for a token on `source`, up to `timeout`.
    ///
    /// Cooperative: no lock is held while parked. Returns
    /// `SOURCE_CIRCUIT_OPEN` immediately while the circuit rejects traffic
    /// and `SOURCE_RATE_LIMITED` when the wait budget runs out.
    pub async fn acquire(&self, source: DiscoverySource, timeout: Duration) -> Result<Permit> {
        let limiter = self.limiter(source)?;
        let deadline = Instant::now() + timeout;

        loop {
            match limiter.try_acquire() {
                TryAcquire::Ready => {
                    record_permit(source.as_str(), "acquired");
                    return Ok(Permit {
                        limiter: limiter.clone(),
                        acquired_at: Instant::now(),
                        reported: false,
                    });
                }
                TryAcquire::CircuitOpen => {
                    record_permit(source.as_str(), "circuit_open");
                    return Err(AppError::SourceCircuitOpen { source });
                }
                TryAcquire::Wait(wait) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        limiter.record_wait_timeout();
                        record_permit(source.as_str(), "rate_limited");
                        return Err(AppError::SourceRateLimited { source });
                    }
                    tokio::time::sleep(wait.min(remaining)).await;
                }
            }
        }
    }

    /// Current limiter state for one source
    pub fn stats(&self, source: DiscoverySource) -> Result<RateLimiterSnapshot> {
        Ok(self.limiter(source)?.snapshot())
    }

    /// Snapshots for every registered source
    pub fn all_stats(&self) -> Vec<RateLimiterSnapshot> {
        let mut snapshots: Vec<_> = self.sources.values().map(|l| l.snapshot()).collect();
        snapshots.sort_by_key(|s| s.source);
        snapshots
    }

    /// Administrative override forcing the circuit CLOSED
    pub fn reset(&self, source: DiscoverySource) -> Result<()> {
        self.limiter(source)?.reset();
        Ok(())
    }

    fn limiter(&self, source: DiscoverySource) -> Result<&Arc<SourceLimiter>> {
        self.sources.get(&source).ok_or_else(|| AppError::Internal {
            message: format!("no rate limiter registered for source {}", source),
        })
    }
}
