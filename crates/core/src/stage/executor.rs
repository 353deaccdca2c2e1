//! Submits stage payloads through a session.

use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{StageRequest, StageResponse};
use crate::metrics;
use crate::pipeline::sleep_or_cancel;
use crate::retry::{Classification, FatalReason, RetryPolicy};
use crate::session::Session;
use crate::site::SiteConfig;

/// A submission that could not be delivered.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    Fatal(FatalReason),

    #[error("submission cancelled")]
    Cancelled,
}

/// Sends stage requests, retrying transport failures with backoff.
///
/// Site rejections are returned as ordinary responses; deciding what they
/// mean is the pipeline's job.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    timeout: Duration,
}

impl StageExecutor {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            timeout: Duration::from_secs(site.submit_timeout_secs),
        }
    }

    pub async fn submit(
        &self,
        session: &Session,
        request: &StageRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<StageResponse, StageError> {
        let stage = request.stage.as_str();
        let mut attempt = 0;

        loop {
            let http = request.to_http().with_timeout(self.timeout);
            match session.execute(http).await {
                Ok(response) => {
                    debug!(
                        stage,
                        status = response.status,
                        final_url = %response.final_url,
                        "Stage response"
                    );
                    return Ok(StageResponse::new(request.stage, response));
                }
                Err(e) => {
                    attempt += 1;
                    metrics::TRANSPORT_FAILURES.with_label_values(&[stage]).inc();
                    match policy.classify_transport(attempt, &e) {
                        Classification::TransientRetry { delay } => {
                            warn!(
                                stage,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "Transport failure, retrying"
                            );
                            sleep_or_cancel(delay, cancel)
                                .await
                                .map_err(|_| StageError::Cancelled)?;
                        }
                        Classification::Fatal(reason) => return Err(StageError::Fatal(reason)),
                        other => {
                            return Err(StageError::Fatal(FatalReason::Transport {
                                attempts: attempt,
                                message: format!("{} ({})", e, other.as_str()),
                            }))
                        }
                    }
                }
            }
        }
    }
}
