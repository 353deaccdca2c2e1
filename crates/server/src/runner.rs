//! Runs one service to completion and maps the result to an exit code.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use railbot_core::{
    run_batch, transport::Connector, BookingOutcome, BookingPipeline, CancelPipeline,
    ChallengeSolver, Config, PipelineError, RunContext, RunStatus, SelectionMode, ServiceKind,
    TripSelection,
};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_INDETERMINATE: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;

pub fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Succeeded => EXIT_SUCCESS,
        RunStatus::Indeterminate => EXIT_INDETERMINATE,
        RunStatus::Cancelled => EXIT_INTERRUPTED,
        RunStatus::Running | RunStatus::Failed => EXIT_FAILED,
    }
}

/// Run `kind` against `connector`. Errors are setup failures; a run that
/// started always ends in a status.
pub async fn run_service(
    kind: ServiceKind,
    config: &Config,
    connector: Arc<dyn Connector>,
    solver: ChallengeSolver,
    run: &RunContext,
    cancel: &CancellationToken,
) -> Result<RunStatus> {
    match kind {
        ServiceKind::Booking => run_booking(config, connector, solver, run, cancel).await,
        ServiceKind::Cancellation => run_cancellation(config, connector, solver, run, cancel).await,
    }
}

async fn run_booking(
    config: &Config,
    connector: Arc<dyn Connector>,
    solver: ChallengeSolver,
    run: &RunContext,
    cancel: &CancellationToken,
) -> Result<RunStatus> {
    let trip_config = config
        .trip
        .as_ref()
        .context("Booking needs a [trip] section")?;
    let trip = TripSelection::from_config(trip_config)
        .map_err(|e| anyhow!(e))
        .context("Invalid [trip] section")?;

    let pipeline = BookingPipeline::new(
        connector,
        solver,
        config.site.clone(),
        config.retry.clone(),
        &config.patterns,
        trip,
        SelectionMode::from(&trip_config.selection),
    )
    .context("Failed to set up booking")?;

    match pipeline.run(run, cancel).await {
        Ok(BookingOutcome::Booked(receipt)) => {
            for line in receipt.to_string().lines() {
                info!("{}", line);
            }
            Ok(RunStatus::Succeeded)
        }
        Ok(BookingOutcome::Listed(candidates)) => {
            for (idx, candidate) in candidates.iter().enumerate() {
                info!("{:>2}. {}", idx + 1, candidate);
            }
            Ok(RunStatus::Succeeded)
        }
        Err(PipelineError::Cancelled) => Ok(RunStatus::Cancelled),
        // logged and recorded on the run by the pipeline
        Err(_) => Ok(RunStatus::Failed),
    }
}

async fn run_cancellation(
    config: &Config,
    connector: Arc<dyn Connector>,
    solver: ChallengeSolver,
    run: &RunContext,
    cancel: &CancellationToken,
) -> Result<RunStatus> {
    let cancel_config = config
        .cancel
        .as_ref()
        .context("Cancellation needs a [cancel] section")?;
    let targets = cancel_config.targets();
    if targets.is_empty() {
        return Err(anyhow!("No enabled reservations in the [cancel] section"));
    }

    let pipeline = CancelPipeline::new(
        connector,
        solver,
        config.site.clone(),
        config.retry.clone(),
        &config.patterns,
    )
    .context("Failed to set up cancellation")?;

    let report = run_batch(&pipeline, &targets, cancel_config, run, cancel).await;
    for item in &report.items {
        match serde_json::to_string(&item.result) {
            Ok(result) => info!(pnr = %item.pnr, result = %result, "Reservation result"),
            Err(e) => warn!(pnr = %item.pnr, error = %e, "Failed to render result"),
        }
    }
    info!(summary = %report.summary(), "Cancellation finished");
    Ok(report.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use railbot_core::{
        load_config_from_str,
        site::SiteConfig,
        testing::{fixtures, pages, MockConnector, MockReply},
    };

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(RunStatus::Succeeded), 0);
        assert_eq!(exit_code(RunStatus::Failed), 1);
        assert_eq!(exit_code(RunStatus::Indeterminate), 2);
        assert_eq!(exit_code(RunStatus::Cancelled), 130);
    }

    #[tokio::test]
    async fn test_booking_without_trip_section() {
        let connector = Arc::new(MockConnector::new());
        let run = RunContext::new("thsrc");

        let err = run_service(
            ServiceKind::Booking,
            &Config::default(),
            connector.clone(),
            fixtures::agreeing_solver("AB12"),
            &run,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("[trip]"));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_not_found_fails() {
        let config = load_config_from_str(
            r#"
[cancel]
[[cancel.items]]
id = "A123456789"
pnr = "12345678"
"#,
        )
        .unwrap();
        let site = SiteConfig::default();
        let connector = Arc::new(MockConnector::new());
        connector.route(
            "HistoryForm",
            MockReply::page(&site.history_url(), pages::error_page("查無此筆訂位紀錄")),
        );
        connector.route("captcha-", MockReply::bytes(pages::CAPTCHA_IMAGE));
        connector.route(
            "bookmarkablePage",
            MockReply::page(&site.history_url(), pages::history_page("/IMINT/captcha-h.png")),
        );
        let run = RunContext::new("thsrc-cancel");

        let status = run_service(
            ServiceKind::Cancellation,
            &config,
            connector,
            fixtures::agreeing_solver("CD34"),
            &run,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(status, RunStatus::Failed);
        assert_eq!(exit_code(status), EXIT_FAILED);
        assert_eq!(run.snapshot().status, RunStatus::Failed);
    }
}
