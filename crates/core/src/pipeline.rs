//! States and errors shared by the booking and cancellation pipelines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::retry::FatalReason;
use crate::session::SessionError;
use crate::stage::{Stage, StageError};

/// Where a pipeline is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    SessionReady,
    ChallengeReady,
    /// The stage was submitted and accepted.
    Submitted(Stage),
    ChallengeRefresh,
    Restart,
    /// Waiting before a fresh search.
    Cooldown,
    Success,
    Fatal,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Success | PipelineState::Fatal)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Init => f.write_str("init"),
            PipelineState::SessionReady => f.write_str("session_ready"),
            PipelineState::ChallengeReady => f.write_str("challenge_ready"),
            PipelineState::Submitted(stage) => write!(f, "{}_submitted", stage),
            PipelineState::ChallengeRefresh => f.write_str("challenge_refresh"),
            PipelineState::Restart => f.write_str("restart"),
            PipelineState::Cooldown => f.write_str("cooldown"),
            PipelineState::Success => f.write_str("success"),
            PipelineState::Fatal => f.write_str("fatal"),
        }
    }
}

/// Why a run ended without success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not open a session after {attempts} attempts: {message}")]
    SessionUnavailable { attempts: u32, message: String },

    #[error("{stage}: transport failed after {attempts} attempts: {message}")]
    Transport {
        stage: Stage,
        attempts: u32,
        message: String,
    },

    #[error("travel date is not open for booking: {0}")]
    DateOutOfRange(String),

    #[error("reservation not found: {0}")]
    LookupNotFound(String),

    #[error("{stage} failed after {retries} retries: {message}")]
    StageExhausted {
        stage: Stage,
        retries: u32,
        message: String,
    },

    #[error("{stage} rejected: {message}")]
    Rejected { stage: Stage, message: String },

    #[error("no cancel action found on the reservation page")]
    NoCancelAction,

    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Map a fatal classification of `stage`.
    pub fn fatal(stage: Stage, reason: FatalReason) -> Self {
        match reason {
            FatalReason::DateOutOfRange(message) => PipelineError::DateOutOfRange(message),
            FatalReason::LookupNotFound(message) => PipelineError::LookupNotFound(message),
            FatalReason::StageExhausted {
                stage,
                retries,
                message,
            } => PipelineError::StageExhausted {
                stage,
                retries,
                message,
            },
            FatalReason::Transport { attempts, message } => PipelineError::Transport {
                stage,
                attempts,
                message,
            },
        }
    }

    pub fn from_stage(stage: Stage, error: StageError) -> Self {
        match error {
            StageError::Fatal(reason) => Self::fatal(stage, reason),
            StageError::Cancelled => PipelineError::Cancelled,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::SessionUnavailable { .. } => "session_unavailable",
            PipelineError::Transport { .. } => "transport",
            PipelineError::DateOutOfRange(_) => "date_out_of_range",
            PipelineError::LookupNotFound(_) => "lookup_not_found",
            PipelineError::StageExhausted { .. } => "stage_exhausted",
            PipelineError::Rejected { .. } => "rejected",
            PipelineError::NoCancelAction => "no_cancel_action",
            PipelineError::Cancelled => "cancelled",
        }
    }
}

impl From<SessionError> for PipelineError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Exhausted {
                attempts,
                last_error,
            } => PipelineError::SessionUnavailable {
                attempts,
                message: last_error,
            },
            other => PipelineError::SessionUnavailable {
                attempts: 1,
                message: other.to_string(),
            },
        }
    }
}

pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

pub(crate) async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    if duration.is_zero() {
        return check_cancelled(cancel);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
