//! Retry ceilings, cooldowns and rejection patterns.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Backoff;
use crate::stage::Stage;

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts at opening a session before giving up.
    #[serde(default = "default_session_attempts")]
    pub session_attempts: u32,
    /// Sleep between session attempts is `attempt * unit`.
    #[serde(default = "default_session_backoff_unit_ms")]
    pub session_backoff_unit_ms: u64,
    /// Counted rejections of the query stage before a restart.
    #[serde(default = "default_query_max_retries")]
    pub query_max_retries: u32,
    #[serde(default = "default_select_max_retries")]
    pub select_max_retries: u32,
    #[serde(default = "default_confirm_max_retries")]
    pub confirm_max_retries: u32,
    #[serde(default = "default_lookup_max_retries")]
    pub lookup_max_retries: u32,
    /// Wait before a new search when nothing is on sale.
    #[serde(default = "default_sold_out_cooldown_secs")]
    pub sold_out_cooldown_secs: u64,
    /// Consecutive unreadable challenges before the session is replaced.
    #[serde(default = "default_recognition_failures_before_restart")]
    pub recognition_failures_before_restart: u32,
    #[serde(default = "default_recognition_failure_delay_ms")]
    pub recognition_failure_delay_ms: u64,
    #[serde(default)]
    pub transport: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            session_attempts: default_session_attempts(),
            session_backoff_unit_ms: default_session_backoff_unit_ms(),
            query_max_retries: default_query_max_retries(),
            select_max_retries: default_select_max_retries(),
            confirm_max_retries: default_confirm_max_retries(),
            lookup_max_retries: default_lookup_max_retries(),
            sold_out_cooldown_secs: default_sold_out_cooldown_secs(),
            recognition_failures_before_restart: default_recognition_failures_before_restart(),
            recognition_failure_delay_ms: default_recognition_failure_delay_ms(),
            transport: Backoff::default(),
        }
    }
}

fn default_session_attempts() -> u32 {
    3
}

fn default_session_backoff_unit_ms() -> u64 {
    3_000
}

fn default_query_max_retries() -> u32 {
    20
}

fn default_select_max_retries() -> u32 {
    3
}

fn default_confirm_max_retries() -> u32 {
    5
}

fn default_lookup_max_retries() -> u32 {
    10
}

fn default_sold_out_cooldown_secs() -> u64 {
    30
}

fn default_recognition_failures_before_restart() -> u32 {
    5
}

fn default_recognition_failure_delay_ms() -> u64 {
    2_000
}

impl RetryConfig {
    /// Retry ceiling of a stage. The cancel stage is submitted once and has
    /// none.
    pub fn ceiling(&self, stage: Stage) -> Option<u32> {
        match stage {
            Stage::Query => Some(self.query_max_retries),
            Stage::SelectTrain => Some(self.select_max_retries),
            Stage::ConfirmTicket => Some(self.confirm_max_retries),
            Stage::Lookup => Some(self.lookup_max_retries),
            Stage::Cancel => None,
        }
    }

    pub fn sold_out_cooldown(&self) -> Duration {
        Duration::from_secs(self.sold_out_cooldown_secs)
    }

    pub fn session_backoff_unit(&self) -> Duration {
        Duration::from_millis(self.session_backoff_unit_ms)
    }

    pub fn recognition_failure_delay(&self) -> Duration {
        Duration::from_millis(self.recognition_failure_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.session_attempts == 0 {
            return Err("retry.session_attempts must be at least 1".to_string());
        }
        for stage in Stage::ALL {
            if self.ceiling(stage) == Some(0) {
                return Err(format!("retry ceiling for stage {} must be at least 1", stage));
            }
        }
        if self.recognition_failures_before_restart == 0 {
            return Err("retry.recognition_failures_before_restart must be at least 1".to_string());
        }
        if self.transport.multiplier < 1.0 {
            return Err("retry.transport.multiplier must be >= 1.0".to_string());
        }
        if !(0.0..1.0).contains(&self.transport.jitter) {
            return Err("retry.transport.jitter must be in [0, 1)".to_string());
        }
        Ok(())
    }
}

/// Regular expressions recognizing the site's rejection banners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(default = "default_date_out_of_range")]
    pub date_out_of_range: Vec<String>,
    /// Also matched against the whole page body.
    #[serde(default = "default_no_offering")]
    pub no_offering: Vec<String>,
    #[serde(default = "default_challenge_mismatch")]
    pub challenge_mismatch: Vec<String>,
    /// Only meaningful for the reservation lookup.
    #[serde(default = "default_not_found")]
    pub not_found: Vec<String>,
    /// A cancellation result page must contain one of these...
    #[serde(default = "default_cancel_verb")]
    pub cancel_verb: Vec<String>,
    /// ...and one of these.
    #[serde(default = "default_cancel_done")]
    pub cancel_done: Vec<String>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            date_out_of_range: default_date_out_of_range(),
            no_offering: default_no_offering(),
            challenge_mismatch: default_challenge_mismatch(),
            not_found: default_not_found(),
            cancel_verb: default_cancel_verb(),
            cancel_done: default_cancel_done(),
        }
    }
}

fn default_date_out_of_range() -> Vec<String> {
    vec!["選擇的日期超過目前開放預訂之日期".to_string()]
}

fn default_no_offering() -> Vec<String> {
    vec!["查無可售車次".to_string(), "已售完".to_string()]
}

fn default_challenge_mismatch() -> Vec<String> {
    vec!["驗證碼".to_string(), "檢測碼".to_string()]
}

fn default_not_found() -> Vec<String> {
    vec!["查無".to_string(), "不存在".to_string()]
}

fn default_cancel_verb() -> Vec<String> {
    vec!["取消".to_string()]
}

fn default_cancel_done() -> Vec<String> {
    vec!["成功".to_string(), "已取消".to_string()]
}
