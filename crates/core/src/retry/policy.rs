//! Classification of failed stage submissions.

use regex_lite::Regex;
use std::time::Duration;
use thiserror::Error;

use super::{PatternConfig, RetryConfig};
use crate::stage::Stage;
use crate::transport::TransportError;

/// Why the site refused a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The travel date is outside the bookable window.
    DateOutOfRange(String),
    /// Nothing on sale for the query.
    NoOffering(String),
    /// The challenge code was wrong.
    ChallengeMismatch(String),
    /// The looked-up reservation does not exist.
    NotFound(String),
    Other(String),
}

impl Rejection {
    pub fn message(&self) -> &str {
        match self {
            Rejection::DateOutOfRange(m)
            | Rejection::NoOffering(m)
            | Rejection::ChallengeMismatch(m)
            | Rejection::NotFound(m)
            | Rejection::Other(m) => m,
        }
    }

    /// Whether this rejection counts against the stage's retry ceiling.
    pub fn consumes_retry(&self) -> bool {
        matches!(self, Rejection::ChallengeMismatch(_) | Rejection::Other(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::DateOutOfRange(_) => "date_out_of_range",
            Rejection::NoOffering(_) => "no_offering",
            Rejection::ChallengeMismatch(_) => "challenge_mismatch",
            Rejection::NotFound(_) => "not_found",
            Rejection::Other(_) => "other",
        }
    }
}

/// Reasons a run cannot continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalReason {
    #[error("travel date is not open for booking: {0}")]
    DateOutOfRange(String),

    #[error("reservation not found: {0}")]
    LookupNotFound(String),

    #[error("stage {stage} failed after {retries} retries: {message}")]
    StageExhausted {
        stage: Stage,
        retries: u32,
        message: String,
    },

    #[error("transport failed after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },
}

/// What the pipeline does next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Resend the same request after a delay.
    TransientRetry { delay: Duration },
    /// New challenge in the same session, then resubmit.
    ChallengeRefresh,
    /// Wait, then start a fresh search with a new session.
    SoftRestart { cooldown: Duration },
    /// Start over with a new session.
    Restart,
    Fatal(FatalReason),
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::TransientRetry { .. } => "transient_retry",
            Classification::ChallengeRefresh => "challenge_refresh",
            Classification::SoftRestart { .. } => "soft_restart",
            Classification::Restart => "restart",
            Classification::Fatal(_) => "fatal",
        }
    }
}

/// Invalid rejection pattern.
#[derive(Debug, Error)]
#[error("invalid pattern in patterns.{field}: {message}")]
pub struct PatternError {
    pub field: &'static str,
    pub message: String,
}

/// Compiled rejection patterns.
#[derive(Debug, Clone)]
pub struct RejectionMatcher {
    date_out_of_range: Vec<Regex>,
    no_offering: Vec<Regex>,
    challenge_mismatch: Vec<Regex>,
    not_found: Vec<Regex>,
    cancel_verb: Vec<Regex>,
    cancel_done: Vec<Regex>,
}

impl RejectionMatcher {
    pub fn new(patterns: &PatternConfig) -> Result<Self, PatternError> {
        Ok(Self {
            date_out_of_range: compile("date_out_of_range", &patterns.date_out_of_range)?,
            no_offering: compile("no_offering", &patterns.no_offering)?,
            challenge_mismatch: compile("challenge_mismatch", &patterns.challenge_mismatch)?,
            not_found: compile("not_found", &patterns.not_found)?,
            cancel_verb: compile("cancel_verb", &patterns.cancel_verb)?,
            cancel_done: compile("cancel_done", &patterns.cancel_done)?,
        })
    }

    /// Detect the rejection behind a failed submission.
    ///
    /// `errors` are the page's error banners; `body` is scanned for the
    /// no-offering patterns too, which the site sometimes renders outside a
    /// banner.
    pub fn detect(&self, stage: Stage, errors: &[String], body: &str) -> Rejection {
        let joined = errors.join("; ");

        if any_match(&self.date_out_of_range, &joined) {
            return Rejection::DateOutOfRange(joined);
        }
        if any_match(&self.no_offering, &joined) {
            return Rejection::NoOffering(joined);
        }
        if any_match(&self.no_offering, body) {
            return Rejection::NoOffering("no trains on sale".to_string());
        }
        if stage == Stage::Lookup && any_match(&self.not_found, &joined) {
            return Rejection::NotFound(joined);
        }
        if any_match(&self.challenge_mismatch, &joined) {
            return Rejection::ChallengeMismatch(joined);
        }
        if joined.is_empty() {
            Rejection::Other("unexpected page".to_string())
        } else {
            Rejection::Other(joined)
        }
    }

    /// Whether a page text reports a completed cancellation.
    pub fn cancellation_confirmed(&self, text: &str) -> bool {
        any_match(&self.cancel_verb, text) && any_match(&self.cancel_done, text)
    }
}

fn compile(field: &'static str, patterns: &[String]) -> Result<Vec<Regex>, PatternError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| PatternError {
                field,
                message: e.to_string(),
            })
        })
        .collect()
}

fn any_match(patterns: &[Regex], text: &str) -> bool {
    !text.is_empty() && patterns.iter().any(|re| re.is_match(text))
}

/// Maps rejections and transport failures to the next action.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    matcher: RejectionMatcher,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, patterns: &PatternConfig) -> Result<Self, PatternError> {
        Ok(Self {
            config,
            matcher: RejectionMatcher::new(patterns)?,
        })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn matcher(&self) -> &RejectionMatcher {
        &self.matcher
    }

    pub fn detect(&self, stage: Stage, errors: &[String], body: &str) -> Rejection {
        self.matcher.detect(stage, errors, body)
    }

    /// Classify a rejection. `retries` already includes this rejection when it
    /// [consumes a retry](Rejection::consumes_retry).
    pub fn classify(&self, stage: Stage, rejection: &Rejection, retries: u32) -> Classification {
        match rejection {
            Rejection::DateOutOfRange(message) => {
                Classification::Fatal(FatalReason::DateOutOfRange(message.clone()))
            }
            Rejection::NoOffering(_) => Classification::SoftRestart {
                cooldown: self.config.sold_out_cooldown(),
            },
            Rejection::NotFound(message) if stage == Stage::Lookup => {
                Classification::Fatal(FatalReason::LookupNotFound(message.clone()))
            }
            _ if self.config.ceiling(stage).is_some_and(|ceiling| retries >= ceiling) => {
                if stage.restarts_on_exhaustion() {
                    Classification::Restart
                } else {
                    Classification::Fatal(FatalReason::StageExhausted {
                        stage,
                        retries,
                        message: rejection.message().to_string(),
                    })
                }
            }
            _ => Classification::ChallengeRefresh,
        }
    }

    /// Classify the `attempt`-th (1-indexed) consecutive transport failure of
    /// one request.
    pub fn classify_transport(&self, attempt: u32, error: &TransportError) -> Classification {
        let backoff = &self.config.transport;
        if error.is_transient() && attempt <= backoff.max_retries {
            Classification::TransientRetry {
                delay: backoff.delay_for_attempt(attempt.saturating_sub(1)),
            }
        } else {
            Classification::Fatal(FatalReason::Transport {
                attempts: attempt,
                message: error.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;

    fn policy() -> RetryPolicy {
        let config = RetryConfig {
            transport: Backoff {
                jitter: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        RetryPolicy::new(config, &PatternConfig::default()).unwrap()
    }

    fn banners(messages: &[&str]) -> Vec<String> {
        messages.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_detect_date_out_of_range() {
        let rejection = policy().detect(
            Stage::Query,
            &banners(&["選擇的日期超過目前開放預訂之日期"]),
            "",
        );
        assert!(matches!(rejection, Rejection::DateOutOfRange(_)));
    }

    #[test]
    fn test_detect_sold_out_in_body() {
        let rejection = policy().detect(Stage::Query, &[], "<p>去程查無可售車次</p>");
        assert!(matches!(rejection, Rejection::NoOffering(_)));
    }

    #[test]
    fn test_detect_challenge_mismatch() {
        let rejection = policy().detect(Stage::Query, &banners(&["檢測碼輸入錯誤"]), "");
        assert_eq!(rejection, Rejection::ChallengeMismatch("檢測碼輸入錯誤".into()));
        assert!(rejection.consumes_retry());
    }

    #[test]
    fn test_not_found_only_at_lookup() {
        let errors = banners(&["查無此筆訂位紀錄"]);
        let policy = policy();
        assert!(matches!(
            policy.detect(Stage::Lookup, &errors, ""),
            Rejection::NotFound(_)
        ));
        assert!(matches!(
            policy.detect(Stage::Query, &errors, ""),
            Rejection::Other(_)
        ));
    }

    #[test]
    fn test_unexpected_page_without_banner() {
        let rejection = policy().detect(Stage::SelectTrain, &[], "<p>hello</p>");
        assert_eq!(rejection, Rejection::Other("unexpected page".into()));
    }

    #[test]
    fn test_classify_order() {
        let policy = policy();
        assert!(matches!(
            policy.classify(Stage::Query, &Rejection::DateOutOfRange("d".into()), 0),
            Classification::Fatal(FatalReason::DateOutOfRange(_))
        ));
        assert_eq!(
            policy.classify(Stage::Query, &Rejection::NoOffering("x".into()), 99),
            Classification::SoftRestart {
                cooldown: Duration::from_secs(30)
            }
        );
        assert!(matches!(
            policy.classify(Stage::Lookup, &Rejection::NotFound("n".into()), 0),
            Classification::Fatal(FatalReason::LookupNotFound(_))
        ));
        assert_eq!(
            policy.classify(Stage::Query, &Rejection::ChallengeMismatch("c".into()), 1),
            Classification::ChallengeRefresh
        );
    }

    #[test]
    fn test_ceiling_restarts_query_only() {
        let policy = policy();
        let rejection = Rejection::ChallengeMismatch("c".into());
        assert_eq!(
            policy.classify(Stage::Query, &rejection, 19),
            Classification::ChallengeRefresh
        );
        assert_eq!(
            policy.classify(Stage::Query, &rejection, 20),
            Classification::Restart
        );
        assert!(matches!(
            policy.classify(Stage::ConfirmTicket, &Rejection::Other("x".into()), 5),
            Classification::Fatal(FatalReason::StageExhausted {
                stage: Stage::ConfirmTicket,
                retries: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_transport_backoff_then_fatal() {
        let policy = policy();
        let error = TransportError::Timeout("slow".into());
        assert_eq!(
            policy.classify_transport(1, &error),
            Classification::TransientRetry {
                delay: Duration::from_secs(5)
            }
        );
        assert_eq!(
            policy.classify_transport(3, &error),
            Classification::TransientRetry {
                delay: Duration::from_secs(20)
            }
        );
        assert!(matches!(
            policy.classify_transport(4, &error),
            Classification::Fatal(FatalReason::Transport { attempts: 4, .. })
        ));
        assert!(matches!(
            policy.classify_transport(1, &TransportError::Build("bad".into())),
            Classification::Fatal(_)
        ));
    }

    #[test]
    fn test_cancellation_confirmed() {
        let matcher = RejectionMatcher::new(&PatternConfig::default()).unwrap();
        assert!(matcher.cancellation_confirmed("訂位代號 01234567 取消成功"));
        assert!(matcher.cancellation_confirmed("此訂位已取消"));
        assert!(!matcher.cancellation_confirmed("請確認是否取消訂位"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let patterns = PatternConfig {
            not_found: vec!["(".to_string()],
            ..Default::default()
        };
        let err = RejectionMatcher::new(&patterns).unwrap_err();
        assert_eq!(err.field, "not_found");
    }
}
