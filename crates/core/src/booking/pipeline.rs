//! The reservation state machine.
//!
//! One search runs query → select → confirm in a single session. A sold-out
//! result ends the search; the pipeline cools down and starts another one
//! until a seat is booked or a fatal classification stops it.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::forms;
use super::selection::{log_candidates, parse_candidates, select_candidate, Candidate, SelectionMode};
use super::trip::TripSelection;
use crate::document::Document;
use crate::ids::mask_id;
use crate::metrics;
use crate::pipeline::{check_cancelled, sleep_or_cancel, PipelineError, PipelineState};
use crate::receipt::{extract_receipt, Receipt};
use crate::recognizer::ChallengeSolver;
use crate::retry::{Classification, PatternConfig, RetryConfig, RetryPolicy};
use crate::run::{RunContext, RunStatus};
use crate::session::{Challenge, EntryPage, Session, SessionProvider};
use crate::site::SiteConfig;
use crate::stage::{Stage, StageExecutor, StageRequest, StageResponse};
use crate::transport::Connector;

/// Service label used in metrics.
const SERVICE: &str = "thsrc";

/// What a finished booking run produced.
#[derive(Debug, Clone)]
pub enum BookingOutcome {
    Booked(Receipt),
    /// List-only mode: the trains of the first successful search.
    Listed(Vec<Candidate>),
}

/// How one search ended, short of a fatal error.
enum SearchEnd {
    Done(BookingOutcome),
    SoldOut { cooldown: Duration, message: String },
    Restart(String),
}

/// What a rejected submission leads to inside a stage loop.
enum Next {
    Retry,
    End(SearchEnd),
}

/// Books one trip.
pub struct BookingPipeline {
    sessions: SessionProvider,
    solver: ChallengeSolver,
    executor: StageExecutor,
    policy: RetryPolicy,
    site: SiteConfig,
    trip: TripSelection,
    mode: SelectionMode,
}

impl BookingPipeline {
    /// Validate the trip and retry settings. Nothing is sent yet.
    pub fn new(
        connector: Arc<dyn Connector>,
        solver: ChallengeSolver,
        site: SiteConfig,
        retry: RetryConfig,
        patterns: &PatternConfig,
        trip: TripSelection,
        mode: SelectionMode,
    ) -> Result<Self, PipelineError> {
        trip.validate().map_err(PipelineError::Config)?;
        retry.validate().map_err(PipelineError::Config)?;
        let policy =
            RetryPolicy::new(retry, patterns).map_err(|e| PipelineError::Config(e.to_string()))?;

        Ok(Self {
            sessions: SessionProvider::new(
                connector,
                site.clone(),
                EntryPage::Reservation,
                policy.config(),
            ),
            solver,
            executor: StageExecutor::new(&site),
            policy,
            site,
            trip,
            mode,
        })
    }

    pub fn trip(&self) -> &TripSelection {
        &self.trip
    }

    /// Search until booked, listed, failed or cancelled.
    pub async fn run(
        &self,
        run: &RunContext,
        cancel: &CancellationToken,
    ) -> Result<BookingOutcome, PipelineError> {
        info!(
            run_id = %run.id(),
            from = %self.trip.start,
            to = %self.trip.dest,
            date = %self.trip.date,
            train_no = self.trip.train_no.as_deref().unwrap_or("-"),
            passenger = %mask_id(&self.trip.passenger.id),
            "Booking run started"
        );

        let result = self.search_until_done(run, cancel).await;
        let elapsed = run.elapsed();
        metrics::RUN_DURATION
            .with_label_values(&[SERVICE])
            .observe(elapsed.as_secs_f64());

        match &result {
            Ok(BookingOutcome::Booked(receipt)) => {
                run.transition(PipelineState::Success);
                run.finish(RunStatus::Succeeded, receipt.to_string());
                metrics::RUN_OUTCOMES.with_label_values(&[SERVICE, "booked"]).inc();
                info!(
                    reservation = %receipt.reservation_code,
                    searches = run.search_attempts(),
                    elapsed_secs = elapsed.as_secs(),
                    "Booking succeeded"
                );
            }
            Ok(BookingOutcome::Listed(candidates)) => {
                run.transition(PipelineState::Success);
                run.finish(
                    RunStatus::Succeeded,
                    format!("{} trains listed", candidates.len()),
                );
                metrics::RUN_OUTCOMES.with_label_values(&[SERVICE, "listed"]).inc();
                info!(trains = candidates.len(), elapsed_secs = elapsed.as_secs(), "Listing finished");
            }
            Err(PipelineError::Cancelled) => {
                run.finish(RunStatus::Cancelled, "cancelled");
                metrics::RUN_OUTCOMES.with_label_values(&[SERVICE, "cancelled"]).inc();
                warn!(elapsed_secs = elapsed.as_secs(), "Booking run cancelled");
            }
            Err(e) => {
                run.transition(PipelineState::Fatal);
                run.finish(RunStatus::Failed, e.to_string());
                metrics::RUN_OUTCOMES.with_label_values(&[SERVICE, "failed"]).inc();
                error!(error = %e, kind = e.kind(), elapsed_secs = elapsed.as_secs(), "Booking failed");
            }
        }
        result
    }

    async fn search_until_done(
        &self,
        run: &RunContext,
        cancel: &CancellationToken,
    ) -> Result<BookingOutcome, PipelineError> {
        let mut reason = Some("initial");
        let mut attempt = 0;
        loop {
            check_cancelled(cancel)?;
            // a restart keeps the current search; only sold-out starts a new one
            if let Some(reason) = reason.take() {
                attempt = run.begin_search();
                metrics::SEARCH_ATTEMPTS.with_label_values(&[reason]).inc();
                info!(attempt, "Starting search");
            }

            run.transition(PipelineState::Init);
            let (session, challenge) = self.sessions.acquire().await?;
            run.session_opened();
            run.transition(PipelineState::SessionReady);

            match self.book_in_session(run, cancel, &session, challenge).await? {
                SearchEnd::Done(outcome) => return Ok(outcome),
                SearchEnd::SoldOut { cooldown, message } => {
                    run.transition(PipelineState::Cooldown);
                    run.note(message.clone());
                    info!(
                        attempt,
                        cooldown_secs = cooldown.as_secs(),
                        reason = %message,
                        "No seats on offer, searching again after cooldown"
                    );
                    sleep_or_cancel(cooldown, cancel).await?;
                    reason = Some("sold_out");
                }
                SearchEnd::Restart(message) => {
                    run.transition(PipelineState::Restart);
                    run.note(message.clone());
                    warn!(
                        reason = %message,
                        session_age_secs = (Utc::now() - session.opened_at()).num_seconds(),
                        "Restarting with a new session"
                    );
                }
            }
        }
    }

    async fn book_in_session(
        &self,
        run: &RunContext,
        cancel: &CancellationToken,
        session: &Session,
        challenge: Challenge,
    ) -> Result<SearchEnd, PipelineError> {
        let results = match self.query(run, cancel, session, challenge).await? {
            Ok(response) => response,
            Err(end) => return Ok(end),
        };

        let ticket_page = if self.trip.train_no.is_some() {
            results
        } else {
            let candidates = parse_candidates(&results.document());
            info!(trains = candidates.len(), "Search returned trains");

            if self.mode == SelectionMode::ListOnly {
                log_candidates(&candidates);
                return Ok(SearchEnd::Done(BookingOutcome::Listed(candidates)));
            }
            if matches!(self.mode, SelectionMode::Manual { .. }) {
                log_candidates(&candidates);
            }

            let chosen = match select_candidate(&candidates, &self.trip.criteria(), &self.mode) {
                Ok(chosen) => chosen,
                Err(no_offering) => {
                    return Ok(SearchEnd::SoldOut {
                        cooldown: self.policy.config().sold_out_cooldown(),
                        message: no_offering.to_string(),
                    })
                }
            };
            info!(train = %chosen, "Train selected");

            match self.select(run, cancel, session, chosen).await? {
                Ok(response) => response,
                Err(end) => return Ok(end),
            }
        };

        match self.confirm(run, cancel, session, ticket_page).await? {
            Ok(response) => {
                let receipt = extract_receipt(&response.document());
                if !receipt.has_reservation_code() {
                    run.note("no reservation code on the result page");
                    warn!("Booking accepted without a reservation code, check the booking history");
                } else if !receipt.is_complete() {
                    warn!(missing = ?receipt.missing, "Receipt incomplete");
                }
                Ok(SearchEnd::Done(BookingOutcome::Booked(receipt)))
            }
            Err(end) => Ok(end),
        }
    }

    /// Stage 1. Solves challenges until the search is accepted.
    async fn query(
        &self,
        run: &RunContext,
        cancel: &CancellationToken,
        session: &Session,
        mut challenge: Challenge,
    ) -> Result<Result<StageResponse, SearchEnd>, PipelineError> {
        let config = self.policy.config();
        let mut recognition_failures = 0;

        loop {
            check_cancelled(cancel)?;
            run.transition(PipelineState::ChallengeReady);

            let consensus = match self.solver.solve(session, &challenge).await {
                Ok(consensus) => {
                    recognition_failures = 0;
                    consensus
                }
                Err(failure) => {
                    recognition_failures += 1;
                    run.recognition_failed();
                    warn!(
                        error = %failure,
                        consecutive = recognition_failures,
                        "Challenge not recognized"
                    );
                    if recognition_failures >= config.recognition_failures_before_restart {
                        return Ok(Err(SearchEnd::Restart(format!(
                            "{} consecutive recognition failures",
                            recognition_failures
                        ))));
                    }
                    sleep_or_cancel(config.recognition_failure_delay(), cancel).await?;
                    match self.refresh(run, session).await {
                        Ok(fresh) => challenge = fresh,
                        Err(end) => return Ok(Err(end)),
                    }
                    continue;
                }
            };

            let request =
                forms::query_request(&self.site, &self.trip, &consensus.code, session.id());
            let rejected = match self.submit(run, cancel, session, &request).await? {
                Ok(response) => return Ok(Ok(response)),
                Err(rejected) => rejected,
            };

            match self.after_rejection(cancel, Stage::Query, rejected).await? {
                Next::Retry => {
                    run.transition(PipelineState::ChallengeRefresh);
                    match self.refresh(run, session).await {
                        Ok(fresh) => challenge = fresh,
                        Err(end) => return Ok(Err(end)),
                    }
                }
                Next::End(end) => return Ok(Err(end)),
            }
        }
    }

    /// Stage 2. Resubmits the selection on retryable rejections.
    async fn select(
        &self,
        run: &RunContext,
        cancel: &CancellationToken,
        session: &Session,
        mut chosen: Candidate,
    ) -> Result<Result<StageResponse, SearchEnd>, PipelineError> {
        loop {
            check_cancelled(cancel)?;
            let request = forms::select_request(&self.site, &chosen);
            let rejected = match self.submit(run, cancel, session, &request).await? {
                Ok(response) => return Ok(Ok(response)),
                Err(rejected) => rejected,
            };

            // The rejection page may list the trains again with fresh radio values.
            let relisted = parse_candidates(&rejected.response.document());
            if let Ok(again) = select_candidate(&relisted, &self.trip.criteria(), &self.mode) {
                chosen = again;
            }

            if let Next::End(end) = self.after_rejection(cancel, Stage::SelectTrain, rejected).await? {
                return Ok(Err(end));
            }
        }
    }

    /// Stage 3. The form is rebuilt from the latest page that still carries
    /// the passenger fields.
    async fn confirm(
        &self,
        run: &RunContext,
        cancel: &CancellationToken,
        session: &Session,
        mut ticket_page: StageResponse,
    ) -> Result<Result<StageResponse, SearchEnd>, PipelineError> {
        loop {
            check_cancelled(cancel)?;
            let request = {
                let doc = ticket_page.document();
                forms::confirm_request(&self.site, &self.trip, &doc)
            };
            let rejected = match self.submit(run, cancel, session, &request).await? {
                Ok(response) => return Ok(Ok(response)),
                Err(rejected) => rejected,
            };

            if has_ticket_form(&rejected.response.document()) {
                ticket_page = rejected.response.clone();
            }

            if let Next::End(end) = self.after_rejection(cancel, Stage::ConfirmTicket, rejected).await? {
                return Ok(Err(end));
            }
        }
    }

    /// Submit and, on rejection, classify. Transport exhaustion is fatal.
    async fn submit(
        &self,
        run: &RunContext,
        cancel: &CancellationToken,
        session: &Session,
        request: &StageRequest,
    ) -> Result<Result<StageResponse, Rejected>, PipelineError> {
        let stage = request.stage;
        let response = self
            .executor
            .submit(session, request, &self.policy, cancel)
            .await
            .map_err(|e| PipelineError::from_stage(stage, e))?;

        if response.reached(&request.expected) {
            metrics::STAGE_SUBMISSIONS
                .with_label_values(&[stage.as_str(), "advanced"])
                .inc();
            run.transition(PipelineState::Submitted(stage));
            info!(stage = %stage, retries = run.retries(stage), "Stage accepted");
            return Ok(Ok(response));
        }

        metrics::STAGE_SUBMISSIONS
            .with_label_values(&[stage.as_str(), "rejected"])
            .inc();
        let errors = response.error_messages();
        let rejection = self.policy.detect(stage, &errors, &response.body);
        let retries = if rejection.consumes_retry() {
            run.bump_retry(stage)
        } else {
            run.retries(stage)
        };
        let classification = self.policy.classify(stage, &rejection, retries);

        metrics::CLASSIFICATIONS
            .with_label_values(&[stage.as_str(), classification.as_str()])
            .inc();
        run.note(format!("{}: {}", rejection.kind(), rejection.message()));
        warn!(
            stage = %stage,
            rejection = rejection.kind(),
            message = %rejection.message(),
            retries,
            ceiling = self.policy.config().ceiling(stage).unwrap_or_default(),
            next = classification.as_str(),
            final_url = %response.final_url,
            "Stage rejected"
        );

        Ok(Err(Rejected {
            response,
            message: rejection.message().to_string(),
            classification,
        }))
    }

    async fn after_rejection(
        &self,
        cancel: &CancellationToken,
        stage: Stage,
        rejected: Rejected,
    ) -> Result<Next, PipelineError> {
        match rejected.classification {
            Classification::TransientRetry { delay } => {
                sleep_or_cancel(delay, cancel).await?;
                Ok(Next::Retry)
            }
            Classification::ChallengeRefresh => Ok(Next::Retry),
            Classification::SoftRestart { cooldown } => Ok(Next::End(SearchEnd::SoldOut {
                cooldown,
                message: rejected.message,
            })),
            Classification::Restart => Ok(Next::End(SearchEnd::Restart(format!(
                "{} retries exhausted: {}",
                stage, rejected.message
            )))),
            Classification::Fatal(reason) => Err(PipelineError::fatal(stage, reason)),
        }
    }

    /// New challenge in the same session; a failure restarts the session.
    async fn refresh(&self, run: &RunContext, session: &Session) -> Result<Challenge, SearchEnd> {
        match self.sessions.refresh_challenge(session).await {
            Ok(challenge) => Ok(challenge),
            Err(e) => {
                warn!(error = %e, "Challenge refresh failed");
                run.note(e.to_string());
                Err(SearchEnd::Restart(e.to_string()))
            }
        }
    }
}

/// A submission the site did not accept.
struct Rejected {
    response: StageResponse,
    message: String,
    classification: Classification,
}

fn has_ticket_form(doc: &Document) -> bool {
    doc.select_first("input[name$='passengerDataIdNumber']").is_some()
        || doc.select_first("input[name='dummyId']").is_some()
}
