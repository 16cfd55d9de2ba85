//! Metrics collection for the acquisition pipeline using Prometheus
//!
//! Counters and histograms live in the default registry; an embedding service can
//! expose them with `prometheus::gather()`.
//!
//! Registration only fails on a duplicate metric name, which the `Lazy` statics rule out.
#![allow(clippy::unwrap_used)]

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

// ======================
// PIPELINE METRICS
// ======================

/// Finished requests by outcome
/// Labels: outcome (completed or an error class label)
pub static PIPELINE_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ytmux_pipeline_outcomes_total",
        "Finished acquisition requests by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// End-to-end request duration
/// Labels: strategy (primary/secondary/none)
pub static PIPELINE_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ytmux_pipeline_duration_seconds",
        "Time from request start to terminal state",
        &["strategy"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    )
    .unwrap()
});

/// Switches from the primary to the secondary strategy
/// Labels: reason (error class label)
pub static STRATEGY_FALLBACKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ytmux_strategy_fallbacks_total",
        "Requests that fell back to the secondary strategy",
        &["reason"]
    )
    .unwrap()
});

/// Failed attempts that were followed by another try
/// Labels: operation
pub static RETRY_ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ytmux_retry_attempts_total",
        "Failed attempts that were followed by a retry",
        &["operation"]
    )
    .unwrap()
});

/// Bytes pulled from elementary streams
/// Labels: kind (audio/video)
pub static STREAM_BYTES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ytmux_stream_bytes_total",
        "Bytes read from secondary elementary streams",
        &["kind"]
    )
    .unwrap()
});

/// Merge duration by mode
/// Labels: mode (files/piped)
pub static MERGE_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ytmux_merge_duration_seconds",
        "Time spent in ffmpeg merges",
        &["mode"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    )
    .unwrap()
});

/// Records the terminal outcome of a request.
pub fn record_outcome(outcome: &str, strategy: &str, elapsed_secs: f64) {
    PIPELINE_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
    PIPELINE_DURATION_SECONDS
        .with_label_values(&[strategy])
        .observe(elapsed_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let before = STRATEGY_FALLBACKS_TOTAL.with_label_values(&["test"]).get();
        STRATEGY_FALLBACKS_TOTAL.with_label_values(&["test"]).inc();
        let after = STRATEGY_FALLBACKS_TOTAL.with_label_values(&["test"]).get();
        assert!(after >= before + 1.0);
    }

    #[test]
    fn record_outcome_touches_both_metrics() {
        record_outcome("completed", "primary", 1.5);
        assert!(PIPELINE_OUTCOMES_TOTAL.with_label_values(&["completed"]).get() >= 1.0);
    }
}
