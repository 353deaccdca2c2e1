//! Sessions and challenges.
//!
//! A [`Session`] is one cookie jar on the site. [`SessionProvider`] opens
//! them, locating the challenge image on the entry page.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::metrics;
use crate::retry::RetryConfig;
use crate::site::SiteConfig;
use crate::transport::{Connector, HttpClient, HttpRequest, HttpResponse, SeedCookie, TransportError};

/// Name of the session cookie set by the site.
pub const SESSION_COOKIE: &str = "JSESSIONID";

/// Errors opening or refreshing a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no usable session after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("challenge refresh failed: {0}")]
    Refresh(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Which page a session starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPage {
    /// Booking form.
    Reservation,
    /// Reservation history lookup form.
    History,
}

impl EntryPage {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryPage::Reservation => "reservation",
            EntryPage::History => "history",
        }
    }

    /// Selector of the challenge image on this page.
    pub fn challenge_selector(&self) -> &'static str {
        match self {
            EntryPage::Reservation => "img.captcha-img",
            EntryPage::History => "img.img-captcha",
        }
    }
}

/// Where to fetch the current challenge image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub locator: String,
}

/// A live session on the site.
pub struct Session {
    id: Option<String>,
    client: Arc<dyn HttpClient>,
    opened_at: DateTime<Utc>,
}

impl Session {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        let id = client.cookie(SESSION_COOKIE);
        Self {
            id,
            client,
            opened_at: Utc::now(),
        }
    }

    /// Session id assigned by the site, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.client.execute(request).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

/// Cookies the site expects from a browser that accepted its cookie banner.
pub fn consent_cookies() -> Vec<SeedCookie> {
    vec![
        SeedCookie::new("cookieAccepted", "true"),
        SeedCookie::new("isShowCookiePolicy", "N"),
    ]
}

/// Opens sessions and refreshes their challenges.
pub struct SessionProvider {
    connector: Arc<dyn Connector>,
    site: SiteConfig,
    entry: EntryPage,
    attempts: u32,
    backoff_unit: Duration,
}

impl SessionProvider {
    pub fn new(
        connector: Arc<dyn Connector>,
        site: SiteConfig,
        entry: EntryPage,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            connector,
            site,
            entry,
            attempts: retry.session_attempts.max(1),
            backoff_unit: retry.session_backoff_unit(),
        }
    }

    pub fn entry(&self) -> EntryPage {
        self.entry
    }

    fn entry_url(&self) -> String {
        match self.entry {
            EntryPage::Reservation => self.site.reservation_url(),
            EntryPage::History => self.site.history_url(),
        }
    }

    /// Open a fresh session and locate its first challenge.
    pub async fn acquire(&self) -> Result<(Session, Challenge), SessionError> {
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match self.try_acquire().await {
                Ok((session, challenge)) => {
                    info!(
                        entry = self.entry.as_str(),
                        session_id = session.id().unwrap_or("-"),
                        attempt,
                        "Session opened"
                    );
                    metrics::SESSIONS_OPENED
                        .with_label_values(&[self.entry.as_str(), "ok"])
                        .inc();
                    return Ok((session, challenge));
                }
                Err(e) => {
                    warn!(
                        entry = self.entry.as_str(),
                        attempt,
                        max_attempts = self.attempts,
                        error = %e,
                        "Failed to open session"
                    );
                    metrics::SESSIONS_OPENED
                        .with_label_values(&[self.entry.as_str(), "error"])
                        .inc();
                    last_error = e;
                    if attempt < self.attempts {
                        tokio::time::sleep(self.backoff_unit * attempt).await;
                    }
                }
            }
        }

        Err(SessionError::Exhausted {
            attempts: self.attempts,
            last_error,
        })
    }

    async fn try_acquire(&self) -> Result<(Session, Challenge), String> {
        let client = self
            .connector
            .connect(&consent_cookies())
            .map_err(|e| e.to_string())?;

        let response = client
            .execute(self.page_request(self.entry_url()))
            .await
            .map_err(|e| e.to_string())?;
        if !response.is_success() {
            return Err(format!("entry page returned HTTP {}", response.status));
        }

        let challenge = self
            .locate_challenge(&response.text())
            .ok_or_else(|| "challenge image not found on entry page".to_string())?;

        Ok((Session::new(client), challenge))
    }

    /// Get a new challenge without leaving the session.
    pub async fn refresh_challenge(&self, session: &Session) -> Result<Challenge, SessionError> {
        match self.entry {
            EntryPage::Reservation => {
                let url = self.site.captcha_refresh_url(rand::random::<f64>());
                let response = session.execute(self.page_request(url)).await?;
                if !response.is_success() {
                    return Err(SessionError::Refresh(format!("HTTP {}", response.status)));
                }
                let locator = image_source(&response.text())
                    .ok_or_else(|| SessionError::Refresh("no image in refresh fragment".into()))?;
                debug!(locator = %locator, "Challenge refreshed");
                Ok(Challenge {
                    locator: self.site.absolute(&locator),
                })
            }
            EntryPage::History => {
                let response = session.execute(self.page_request(self.entry_url())).await?;
                if !response.is_success() {
                    return Err(SessionError::Refresh(format!("HTTP {}", response.status)));
                }
                self.locate_challenge(&response.text())
                    .ok_or_else(|| SessionError::Refresh("challenge image not found".into()))
            }
        }
    }

    fn page_request(&self, url: String) -> HttpRequest {
        HttpRequest::get(url).with_timeout(Duration::from_secs(self.site.timeout_secs))
    }

    fn locate_challenge(&self, body: &str) -> Option<Challenge> {
        let doc = Document::parse(body);
        let src = doc.attr_of(self.entry.challenge_selector(), "src")?;
        Some(Challenge {
            locator: self.site.absolute(&src),
        })
    }
}

static IMAGE_SOURCE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"src="(.+?)""#).unwrap());

/// First `src="..."` in an HTML fragment.
fn image_source(fragment: &str) -> Option<String> {
    IMAGE_SOURCE
        .captures(fragment)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace("&amp;", "&"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pages, MockConnector, MockReply};

    fn provider(connector: &Arc<MockConnector>, entry: EntryPage) -> SessionProvider {
        SessionProvider::new(
            connector.clone(),
            SiteConfig::default(),
            entry,
            &RetryConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_locates_challenge() {
        let connector = Arc::new(MockConnector::new());
        connector.route(
            "?locale=tw",
            MockReply::page(
                "https://irs.thsrc.com.tw/IMINT/?locale=tw",
                pages::reservation_page("/IMINT/captcha-1.png"),
            ),
        );

        let (session, challenge) = provider(&connector, EntryPage::Reservation)
            .acquire()
            .await
            .unwrap();

        assert_eq!(
            challenge.locator,
            "https://irs.thsrc.com.tw/IMINT/captcha-1.png"
        );
        assert_eq!(session.id(), Some("MOCKSESSION1"));
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(
            connector.seeded_cookies(),
            vec![consent_cookies()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_retries_with_fresh_jar() {
        let connector = Arc::new(MockConnector::new());
        connector.route_sequence(
            "?locale=tw",
            vec![
                MockReply::error(TransportError::Timeout("slow".into())),
                MockReply::page("https://irs.thsrc.com.tw/IMINT/?locale=tw", "<p>maintenance</p>"),
                MockReply::page(
                    "https://irs.thsrc.com.tw/IMINT/?locale=tw",
                    pages::reservation_page("/IMINT/captcha-3.png"),
                ),
            ],
        );

        let (session, _) = provider(&connector, EntryPage::Reservation)
            .acquire()
            .await
            .unwrap();

        assert_eq!(connector.connect_count(), 3);
        assert_eq!(session.id(), Some("MOCKSESSION3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_exhausted() {
        let connector = Arc::new(MockConnector::new());
        connector.route(
            "?locale=tw",
            MockReply::status("https://irs.thsrc.com.tw/IMINT/?locale=tw", 503, ""),
        );

        let result = provider(&connector, EntryPage::Reservation).acquire().await;

        match result {
            Err(SessionError::Exhausted {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_reservation_challenge() {
        let connector = Arc::new(MockConnector::new());
        connector.route(
            "?locale=tw",
            MockReply::page(
                "https://irs.thsrc.com.tw/IMINT/?locale=tw",
                pages::reservation_page("/IMINT/captcha-1.png"),
            ),
        );
        connector.route(
            "reCodeLink",
            MockReply::page(
                "https://irs.thsrc.com.tw/IMINT/",
                pages::captcha_refresh_fragment("/IMINT/captcha-2.png?a=1&amp;b=2"),
            ),
        );
        let provider = provider(&connector, EntryPage::Reservation);
        let (session, _) = provider.acquire().await.unwrap();

        let challenge = provider.refresh_challenge(&session).await.unwrap();

        assert_eq!(
            challenge.locator,
            "https://irs.thsrc.com.tw/IMINT/captcha-2.png?a=1&b=2"
        );
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_history_challenge_refetches_page() {
        let connector = Arc::new(MockConnector::new());
        connector.route_sequence(
            "History",
            vec![
                MockReply::page(
                    "https://irs.thsrc.com.tw/IMINT/",
                    pages::history_page("/IMINT/h-1.png"),
                ),
                MockReply::page(
                    "https://irs.thsrc.com.tw/IMINT/",
                    pages::history_page("/IMINT/h-2.png"),
                ),
            ],
        );
        let provider = provider(&connector, EntryPage::History);
        let (session, first) = provider.acquire().await.unwrap();
        let second = provider.refresh_challenge(&session).await.unwrap();

        assert!(first.locator.ends_with("h-1.png"));
        assert!(second.locator.ends_with("h-2.png"));
        assert_eq!(connector.connect_count(), 1);
    }

    #[test]
    fn test_image_source() {
        assert_eq!(
            image_source(r#"<img id="x" src="/a.png" alt="">"#).as_deref(),
            Some("/a.png")
        );
        assert!(image_source("<span></span>").is_none());
    }
}
