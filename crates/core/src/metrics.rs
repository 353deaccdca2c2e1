//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Runs (outcomes, duration, search attempts)
//! - Stages (submissions, classifications, transport failures)
//! - Challenge recognition (engine answers, consensus outcomes)
//! - Sessions

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

// =============================================================================
// Runs
// =============================================================================

/// Finished runs by service and outcome.
pub static RUN_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("railbot_run_outcomes_total", "Finished runs by outcome"),
        &["service", "outcome"], // "booked", "listed", "cancelled", "indeterminate", "failed"
    )
    .unwrap()
});

/// Run duration in seconds.
pub static RUN_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("railbot_run_duration_seconds", "Duration of a whole run")
            .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0, 1800.0, 3600.0]),
        &["service"],
    )
    .unwrap()
});

/// Fresh searches started, including those after a sold-out cooldown.
pub static SEARCH_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("railbot_search_attempts_total", "Searches started"),
        &["reason"], // "initial", "sold_out"
    )
    .unwrap()
});

// =============================================================================
// Stages
// =============================================================================

/// Stage submissions by outcome.
pub static STAGE_SUBMISSIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("railbot_stage_submissions_total", "Stage submissions"),
        &["stage", "outcome"], // "advanced", "rejected"
    )
    .unwrap()
});

/// Classifications of rejected submissions.
pub static CLASSIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "railbot_classifications_total",
            "Retry policy decisions for rejected submissions",
        ),
        &["stage", "classification"],
    )
    .unwrap()
});

/// Transport failures while submitting a stage.
pub static TRANSPORT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "railbot_transport_failures_total",
            "Transport failures during stage submission",
        ),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Recognition
// =============================================================================

/// Engine answers by result.
pub static RECOGNITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("railbot_recognitions_total", "Challenge recognition calls"),
        &["engine", "result"], // "code", "malformed", "empty", "error"
    )
    .unwrap()
});

/// How a challenge code was settled.
pub static CONSENSUS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("railbot_consensus_total", "Consensus outcomes"),
        &["outcome"], // "agreed", "arbitrated", "fallback", "single", "failed"
    )
    .unwrap()
});

// =============================================================================
// Sessions
// =============================================================================

/// Session acquisition attempts.
pub static SESSIONS_OPENED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("railbot_sessions_opened_total", "Session acquisition attempts"),
        &["entry", "result"],
    )
    .unwrap()
});

/// All core metrics, for registration by the binary.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(RUN_OUTCOMES.clone()),
        Box::new(RUN_DURATION.clone()),
        Box::new(SEARCH_ATTEMPTS.clone()),
        Box::new(STAGE_SUBMISSIONS.clone()),
        Box::new(CLASSIFICATIONS.clone()),
        Box::new(TRANSPORT_FAILURES.clone()),
        Box::new(RECOGNITIONS.clone()),
        Box::new(CONSENSUS.clone()),
        Box::new(SESSIONS_OPENED.clone()),
    ]
}
