//! Cancelling several reservations in a row.

use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::{CancelConfig, CancelMode, CancellationTarget};
use super::pipeline::{CancelOutcome, CancelPipeline};
use crate::metrics;
use crate::pipeline::{sleep_or_cancel, PipelineError};
use crate::run::{RunContext, RunStatus};

const SERVICE: &str = "thsrc-cancel";

/// Result for one reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ItemResult {
    Cancelled,
    Indeterminate { excerpt: String },
    Failed { kind: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub pnr: String,
    #[serde(flatten)]
    pub result: ItemResult,
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    /// Stopped by the cancellation token before finishing.
    pub interrupted: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(|r| matches!(r, ItemResult::Cancelled))
    }

    pub fn indeterminate(&self) -> usize {
        self.count(|r| matches!(r, ItemResult::Indeterminate { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, ItemResult::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&ItemResult) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.result)).count()
    }

    pub fn status(&self) -> RunStatus {
        if self.interrupted {
            RunStatus::Cancelled
        } else if self.failed() > 0 || self.items.is_empty() {
            RunStatus::Failed
        } else if self.indeterminate() > 0 {
            RunStatus::Indeterminate
        } else {
            RunStatus::Succeeded
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} cancelled, {} unconfirmed, {} failed",
            self.succeeded(),
            self.indeterminate(),
            self.failed()
        )
    }
}

/// Work through `targets` one at a time, pausing between them.
///
/// A failed reservation does not stop the batch; the cancellation token does.
pub async fn run_batch(
    pipeline: &CancelPipeline,
    targets: &[CancellationTarget],
    config: &CancelConfig,
    run: &RunContext,
    cancel: &CancellationToken,
) -> BatchReport {
    let mut report = BatchReport::default();
    let targets = match config.mode {
        CancelMode::All => targets,
        CancelMode::Single => &targets[..targets.len().min(1)],
    };
    let delay = Duration::from_secs(config.delay_between_secs);
    info!(count = targets.len(), mode = ?config.mode, "Cancellation batch started");

    for (idx, target) in targets.iter().enumerate() {
        if idx > 0 {
            info!(delay_secs = delay.as_secs(), "Waiting before the next reservation");
            if sleep_or_cancel(delay, cancel).await.is_err() {
                report.interrupted = true;
                break;
            }
        }

        let result = match pipeline.run(target, run, cancel).await {
            Ok(CancelOutcome::Cancelled { .. }) => ItemResult::Cancelled,
            Ok(CancelOutcome::Indeterminate { excerpt, .. }) => ItemResult::Indeterminate { excerpt },
            Err(PipelineError::Cancelled) => {
                report.interrupted = true;
                break;
            }
            Err(e) => {
                error!(target = %target, error = %e, "Cancellation failed");
                ItemResult::Failed {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        };

        let outcome = match &result {
            ItemResult::Cancelled => "cancelled",
            ItemResult::Indeterminate { .. } => "indeterminate",
            ItemResult::Failed { .. } => "failed",
        };
        metrics::RUN_OUTCOMES.with_label_values(&[SERVICE, outcome]).inc();
        run.note(format!("{}: {}", target.pnr, outcome));
        report.items.push(BatchItem {
            pnr: target.pnr.clone(),
            result,
        });
    }

    let elapsed = run.elapsed();
    metrics::RUN_DURATION
        .with_label_values(&[SERVICE])
        .observe(elapsed.as_secs_f64());
    run.finish(report.status(), report.summary());

    if report.interrupted {
        warn!(summary = %report.summary(), "Cancellation batch interrupted");
    } else {
        info!(
            succeeded = report.succeeded(),
            indeterminate = report.indeterminate(),
            failed = report.failed(),
            elapsed_secs = elapsed.as_secs(),
            "Cancellation batch finished"
        );
    }
    report
}
