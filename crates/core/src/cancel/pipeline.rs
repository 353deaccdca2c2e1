//! Lookup, then cancel, one reservation.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::action::{judge_cancellation, CancelAction, CancelVerdict};
use super::config::CancellationTarget;
use crate::ids::{is_roc_id, mask_id};
use crate::metrics;
use crate::pipeline::{check_cancelled, sleep_or_cancel, PipelineError, PipelineState};
use crate::receipt::{extract_receipt, Receipt};
use crate::recognizer::{ChallengeCode, ChallengeSolver};
use crate::retry::{Classification, FatalReason, PatternConfig, RetryConfig, RetryPolicy};
use crate::run::RunContext;
use crate::session::{Challenge, EntryPage, Session, SessionProvider};
use crate::site::SiteConfig;
use crate::stage::{ExpectedMarker, Stage, StageExecutor, StageRequest};
use crate::transport::Connector;

/// How a cancellation ended.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled { pnr: String, summary: Receipt },
    /// The site answered without error but did not confirm; check by hand.
    Indeterminate {
        pnr: String,
        summary: Receipt,
        excerpt: String,
    },
}

impl CancelOutcome {
    pub fn pnr(&self) -> &str {
        match self {
            CancelOutcome::Cancelled { pnr, .. } | CancelOutcome::Indeterminate { pnr, .. } => pnr,
        }
    }
}

/// Where the lookup stage left off.
enum Lookup {
    Found { action: CancelAction, summary: Receipt },
    Restart(String),
}

/// Failed lookups allowed for one reservation, across session restarts.
/// Unreadable challenges and rejected submissions both spend it.
struct LookupBudget {
    spent: u32,
    limit: u32,
}

impl LookupBudget {
    fn new(limit: u32) -> Self {
        Self { spent: 0, limit }
    }

    fn spend(&mut self, message: &str) -> Result<(), PipelineError> {
        self.spent += 1;
        if self.spent >= self.limit {
            return Err(PipelineError::fatal(
                Stage::Lookup,
                FatalReason::StageExhausted {
                    stage: Stage::Lookup,
                    retries: self.spent,
                    message: message.to_string(),
                },
            ));
        }
        Ok(())
    }
}

/// Cancels reservations through the history lookup.
pub struct CancelPipeline {
    sessions: SessionProvider,
    solver: ChallengeSolver,
    executor: StageExecutor,
    policy: RetryPolicy,
    site: SiteConfig,
}

impl CancelPipeline {
    pub fn new(
        connector: Arc<dyn Connector>,
        solver: ChallengeSolver,
        site: SiteConfig,
        retry: RetryConfig,
        patterns: &PatternConfig,
    ) -> Result<Self, PipelineError> {
        retry.validate().map_err(PipelineError::Config)?;
        let policy =
            RetryPolicy::new(retry, patterns).map_err(|e| PipelineError::Config(e.to_string()))?;

        Ok(Self {
            sessions: SessionProvider::new(
                connector,
                site.clone(),
                EntryPage::History,
                policy.config(),
            ),
            solver,
            executor: StageExecutor::new(&site),
            policy,
            site,
        })
    }

    /// Cancel one reservation. The caller finishes `run`.
    pub async fn run(
        &self,
        target: &CancellationTarget,
        run: &RunContext,
        cancel: &CancellationToken,
    ) -> Result<CancelOutcome, PipelineError> {
        if target.id.is_empty() || target.pnr.is_empty() {
            return Err(PipelineError::Config(
                "cancellation needs both id and reservation code".to_string(),
            ));
        }
        info!(target = %target, "Cancelling reservation");

        let mut budget = LookupBudget::new(
            self.policy
                .config()
                .ceiling(Stage::Lookup)
                .unwrap_or_default(),
        );
        let (session, action, summary) = loop {
            check_cancelled(cancel)?;
            run.transition(PipelineState::Init);
            let (session, challenge) = self.sessions.acquire().await?;
            run.session_opened();
            run.transition(PipelineState::SessionReady);

            match self
                .lookup(target, run, cancel, &session, challenge, &mut budget)
                .await?
            {
                Lookup::Found { action, summary } => break (session, action, summary),
                Lookup::Restart(message) => {
                    run.transition(PipelineState::Restart);
                    run.note(message.clone());
                    warn!(
                        reason = %message,
                        session_age_secs = (Utc::now() - session.opened_at()).num_seconds(),
                        "Restarting lookup with a new session"
                    );
                }
            }
        };

        log_summary(&summary);
        check_cancelled(cancel)?;

        let request = action.to_request(&self.site.lookup_submit_url(session.id()));
        let response = self
            .executor
            .submit(&session, &request, &self.policy, cancel)
            .await
            .map_err(|e| PipelineError::from_stage(Stage::Cancel, e))?;
        if !(200..300).contains(&response.status) {
            return Err(PipelineError::Rejected {
                stage: Stage::Cancel,
                message: format!("HTTP {}", response.status),
            });
        }

        let verdict = judge_cancellation(self.policy.matcher(), &response.document());
        match verdict {
            CancelVerdict::Confirmed => {
                metrics::STAGE_SUBMISSIONS
                    .with_label_values(&[Stage::Cancel.as_str(), "advanced"])
                    .inc();
                run.transition(PipelineState::Submitted(Stage::Cancel));
                info!(pnr = %target.pnr, "Reservation cancelled");
                Ok(CancelOutcome::Cancelled {
                    pnr: target.pnr.clone(),
                    summary,
                })
            }
            CancelVerdict::Refused(errors) => {
                metrics::STAGE_SUBMISSIONS
                    .with_label_values(&[Stage::Cancel.as_str(), "rejected"])
                    .inc();
                Err(PipelineError::Rejected {
                    stage: Stage::Cancel,
                    message: errors.join("; "),
                })
            }
            CancelVerdict::Unclear(excerpt) => {
                run.transition(PipelineState::Submitted(Stage::Cancel));
                run.note("cancellation not confirmed by the site");
                warn!(pnr = %target.pnr, "Cancellation result unclear, confirm manually");
                Ok(CancelOutcome::Indeterminate {
                    pnr: target.pnr.clone(),
                    summary,
                    excerpt,
                })
            }
        }
    }

    async fn lookup(
        &self,
        target: &CancellationTarget,
        run: &RunContext,
        cancel: &CancellationToken,
        session: &Session,
        mut challenge: Challenge,
        budget: &mut LookupBudget,
    ) -> Result<Lookup, PipelineError> {
        let config = self.policy.config();
        let mut recognition_failures = 0;

        loop {
            check_cancelled(cancel)?;
            run.transition(PipelineState::ChallengeReady);

            let code = match self.solver.solve(session, &challenge).await {
                Ok(consensus) => {
                    recognition_failures = 0;
                    consensus.code
                }
                Err(failure) => {
                    recognition_failures += 1;
                    run.recognition_failed();
                    warn!(error = %failure, consecutive = recognition_failures, "Challenge not recognized");
                    budget.spend(&failure.to_string())?;
                    if recognition_failures >= config.recognition_failures_before_restart {
                        return Ok(Lookup::Restart(format!(
                            "{} consecutive recognition failures",
                            recognition_failures
                        )));
                    }
                    sleep_or_cancel(config.recognition_failure_delay(), cancel).await?;
                    match self.sessions.refresh_challenge(session).await {
                        Ok(fresh) => challenge = fresh,
                        Err(e) => return Ok(Lookup::Restart(e.to_string())),
                    }
                    continue;
                }
            };

            let request = self.lookup_request(target, &code, session.id());
            let response = self
                .executor
                .submit(session, &request, &self.policy, cancel)
                .await
                .map_err(|e| PipelineError::from_stage(Stage::Lookup, e))?;

            if response.reached(&request.expected) {
                let found = {
                    let doc = response.document();
                    CancelAction::locate(&doc, &self.site).map(|action| (action, extract_receipt(&doc)))
                };
                let Some((action, summary)) = found else {
                    return Err(PipelineError::NoCancelAction);
                };
                metrics::STAGE_SUBMISSIONS
                    .with_label_values(&[Stage::Lookup.as_str(), "advanced"])
                    .inc();
                run.transition(PipelineState::Submitted(Stage::Lookup));
                info!(retries = run.retries(Stage::Lookup), "Reservation found");
                return Ok(Lookup::Found { action, summary });
            }

            metrics::STAGE_SUBMISSIONS
                .with_label_values(&[Stage::Lookup.as_str(), "rejected"])
                .inc();
            let errors = response.error_messages();
            let rejection = self.policy.detect(Stage::Lookup, &errors, &response.body);
            let retries = if rejection.consumes_retry() {
                run.bump_retry(Stage::Lookup)
            } else {
                run.retries(Stage::Lookup)
            };
            let classification = self.policy.classify(Stage::Lookup, &rejection, retries);
            metrics::CLASSIFICATIONS
                .with_label_values(&[Stage::Lookup.as_str(), classification.as_str()])
                .inc();
            run.note(format!("{}: {}", rejection.kind(), rejection.message()));
            warn!(
                rejection = rejection.kind(),
                message = %rejection.message(),
                retries,
                next = classification.as_str(),
                "Lookup rejected"
            );

            if !matches!(classification, Classification::Fatal(_)) {
                budget.spend(rejection.message())?;
            }
            match classification {
                Classification::Fatal(reason) => {
                    return Err(PipelineError::fatal(Stage::Lookup, reason))
                }
                Classification::Restart => {
                    return Ok(Lookup::Restart(rejection.message().to_string()))
                }
                Classification::SoftRestart { cooldown } => {
                    sleep_or_cancel(cooldown, cancel).await?;
                    return Ok(Lookup::Restart(rejection.message().to_string()));
                }
                Classification::TransientRetry { delay } => {
                    sleep_or_cancel(delay, cancel).await?;
                }
                Classification::ChallengeRefresh => {}
            }

            run.transition(PipelineState::ChallengeRefresh);
            match self.sessions.refresh_challenge(session).await {
                Ok(fresh) => challenge = fresh,
                Err(e) => return Ok(Lookup::Restart(e.to_string())),
            }
        }
    }

    fn lookup_request(
        &self,
        target: &CancellationTarget,
        code: &ChallengeCode,
        jsessionid: Option<&str>,
    ) -> StageRequest {
        let id_type = if is_roc_id(&target.id) { "0" } else { "1" };
        let form = vec![
            ("typesofid".to_string(), id_type.to_string()),
            ("rocId".to_string(), target.id.clone()),
            ("orderId".to_string(), target.pnr.clone()),
            ("divCaptcha:securityCode".to_string(), code.as_str().to_string()),
            ("SubmitButton".to_string(), "查詢".to_string()),
        ];
        StageRequest::post(
            Stage::Lookup,
            self.site.lookup_submit_url(jsessionid),
            form,
            ExpectedMarker::NoErrorBanner,
        )
        .with_referer(self.site.history_url())
    }
}

fn log_summary(summary: &Receipt) {
    info!(
        reservation = %summary.reservation_code,
        payment = %summary.payment_status,
        date = %summary.date,
        train_no = %summary.train_no,
        route = %format!(
            "{} {} -> {} {}",
            summary.departure_station,
            summary.departure_time,
            summary.arrival_station,
            summary.arrival_time
        ),
        seats = %summary.seats.join(", "),
        "Reservation details"
    );
}
