use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::booking::TripConfig;
use crate::cancel::CancelConfig;
use crate::ids::mask_id;
use crate::recognizer::{PrimaryEngine, RecognizerConfig, VisionProvider};
use crate::retry::{PatternConfig, RetryConfig};
use crate::site::SiteConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
    /// Required by the booking service.
    #[serde(default)]
    pub trip: Option<TripConfig>,
    /// Required by the cancellation service.
    #[serde(default)]
    pub cancel: Option<CancelConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Delayed start
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// `HH:MM`, `YYYY-MM-DD` or `YYYY-MM-DD HH:MM`; start immediately when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<String>,
    /// Zone `start_at` is read in.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start_at: None,
            utc_offset_hours: default_utc_offset(),
        }
    }
}

fn default_utc_offset() -> i32 {
    8
}

/// Status server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Sanitized config for API responses (secrets and ids redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub site: SiteConfig,
    pub recognizer: SanitizedRecognizerConfig,
    pub retry: RetryConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip: Option<SanitizedTripConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel: Option<SanitizedCancelConfig>,
    pub schedule: ScheduleConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedRecognizerConfig {
    pub primary: PrimaryEngine,
    pub specialized_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision: Option<SanitizedVisionConfig>,
}

/// Vision engine (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedVisionConfig {
    pub provider: VisionProvider,
    pub model: String,
    pub api_key_configured: bool,
}

/// Trip without passenger contact details
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTripConfig {
    pub start_station: String,
    pub dest_station: String,
    pub outbound_date: String,
    pub outbound_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train_no: Option<String>,
    pub tickets: u32,
    pub passenger_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedCancelConfig {
    pub targets: Vec<String>,
    pub delay_between_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            site: config.site.clone(),
            recognizer: SanitizedRecognizerConfig {
                primary: config.recognizer.primary,
                specialized_enabled: config.recognizer.specialized_enabled(),
                vision: config.recognizer.vision.as_ref().map(|v| SanitizedVisionConfig {
                    provider: v.provider,
                    model: v.model().to_string(),
                    api_key_configured: v.api_key_configured(),
                }),
            },
            retry: config.retry.clone(),
            trip: config.trip.as_ref().map(|t| SanitizedTripConfig {
                start_station: t.start_station.clone(),
                dest_station: t.dest_station.clone(),
                outbound_date: t.outbound_date.clone(),
                outbound_time: t.outbound_time.clone(),
                train_no: t.train_no.clone(),
                tickets: t.tickets.total(),
                passenger_id: mask_id(&t.passenger.id),
            }),
            cancel: config.cancel.as_ref().map(|c| SanitizedCancelConfig {
                targets: c.targets().iter().map(ToString::to_string).collect(),
                delay_between_secs: c.delay_between_secs,
            }),
            schedule: config.schedule.clone(),
            server: config.server.clone(),
        }
    }
}
