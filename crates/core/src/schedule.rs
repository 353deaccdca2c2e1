//! Delayed start.
//!
//! Bookings open at a fixed time of day; a run can be armed in advance and
//! wait for that moment before opening its first session.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Remaining time is logged at this interval while waiting.
const PROGRESS_EVERY: Duration = Duration::from_secs(60);
const POLL_EVERY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid start time '{0}', expected HH:MM, YYYY-MM-DD or YYYY-MM-DD HH:MM")]
    InvalidFormat(String),

    #[error("invalid UTC offset {0} hours")]
    InvalidOffset(i32),
}

/// The wait was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("scheduled wait interrupted")]
pub struct WaitInterrupted;

/// Fixed offset from whole hours, e.g. 8 for Taiwan.
pub fn utc_offset(hours: i32) -> Result<FixedOffset, ScheduleError> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or(ScheduleError::InvalidOffset(hours))
}

/// A moment to start at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartAt(DateTime<FixedOffset>);

impl StartAt {
    /// Parse `HH:MM` (today), `YYYY-MM-DD` (midnight) or `YYYY-MM-DD HH:MM`,
    /// all in the zone of `now`.
    pub fn parse(value: &str, now: DateTime<FixedOffset>) -> Result<Self, ScheduleError> {
        let value = value.trim();
        let invalid = || ScheduleError::InvalidFormat(value.to_string());

        let local = if let Ok(time) = NaiveTime::parse_from_str(value, "%H:%M") {
            now.date_naive().and_time(time)
        } else if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            date.and_time(NaiveTime::MIN)
        } else {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").map_err(|_| invalid())?
        };

        local
            .and_local_timezone(*now.offset())
            .single()
            .map(StartAt)
            .ok_or_else(invalid)
    }

    pub fn at(&self) -> DateTime<FixedOffset> {
        self.0
    }

    /// Time left from `now`; zero once passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.0.with_timezone(&Utc) - now).to_std().unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for StartAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S %:z"))
    }
}

/// Sleep until `start`, polling once a second.
pub async fn wait_until(start: StartAt, cancel: &CancellationToken) -> Result<(), WaitInterrupted> {
    let remaining = start.remaining(Utc::now());
    if remaining.is_zero() {
        debug!(start = %start, "Start time already passed");
        return Ok(());
    }

    info!(start = %start, remaining_secs = remaining.as_secs(), "Waiting for scheduled start");
    let deadline = Instant::now() + remaining;
    let mut last_report = Instant::now();

    loop {
        let now = Instant::now();
        if now >= deadline {
            info!(start = %start, "Scheduled start reached");
            return Ok(());
        }
        if now.duration_since(last_report) >= PROGRESS_EVERY {
            let left = deadline - now;
            info!(
                remaining = %format_hms(left),
                "Waiting for scheduled start"
            );
            last_report = now;
        }

        let step = POLL_EVERY.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return Err(WaitInterrupted),
            _ = tokio::time::sleep(step) => {}
        }
    }
}

fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
