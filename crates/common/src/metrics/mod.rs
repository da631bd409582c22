//! Metrics and observability utilities
//!
//! Provides Prometheus-style metrics through the `metrics` facade with
//! standardized naming conventions for the discovery pipeline.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all PaperScout metrics
pub const METRICS_PREFIX: &str = "paperscout";

/// Histogram buckets for source API latency (in seconds)
pub const SOURCE_LATENCY_BUCKETS: &[f64] = &[
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_discovery_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Total discovery runs by outcome"
    );

    describe_histogram!(
        format!("{}_discovery_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end discovery run latency in seconds"
    );

    describe_counter!(
        format!("{}_source_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Outbound source API requests by source and outcome"
    );

    describe_histogram!(
        format!("{}_source_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Outbound source API latency in seconds"
    );

    describe_counter!(
        format!("{}_permits_total", METRICS_PREFIX),
        Unit::Count,
        "Rate limiter permit acquisitions by source and outcome"
    );

    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total discovery cache hits by tier"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total discovery cache misses"
    );

    describe_counter!(
        format!("{}_tasks_total", METRICS_PREFIX),
        Unit::Count,
        "Agent tasks by terminal status"
    );

    describe_counter!(
        format!("{}_task_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Agent task attempt retries"
    );

    describe_histogram!(
        format!("{}_task_run_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Agent task run latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to time a discovery run
pub struct DiscoveryRunTimer {
    start: Instant,
}

impl DiscoveryRunTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn finish(self, outcome: &str) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_discovery_runs_total", METRICS_PREFIX),
            "outcome" => outcome.to_string()
        )
        .increment(1);

        histogram!(format!("{}_discovery_duration_seconds", METRICS_PREFIX)).record(duration);
    }
}

/// Helper to record one outbound source request
pub fn record_source_request(source: &str, duration_secs: f64, success: bool) {
    let outcome = if success { "success" } else { "failure" };

    counter!(
        format!("{}_source_requests_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_source_request_duration_seconds", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a permit acquisition outcome
pub fn record_permit(source: &str, outcome: &str) {
    counter!(
        format!("{}_permits_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, tier: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "tier" => tier.to_string()
        )
        .increment(1);
    } else {
        counter!(format!("{}_cache_misses_total", METRICS_PREFIX)).increment(1);
    }
}

/// Helper to record a terminal task transition
pub fn record_task(status: &str, run_secs: f64) {
    counter!(
        format!("{}_tasks_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(format!("{}_task_run_duration_seconds", METRICS_PREFIX)).record(run_secs);
}

/// Helper to record a task retry
pub fn record_task_retry(agent_id: &str) {
    counter!(
        format!("{}_task_retries_total", METRICS_PREFIX),
        "agent" => agent_id.to_string()
    )
    .increment(1);
}
