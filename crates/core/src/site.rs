//! Booking site endpoints.
//!
//! Every URL the pipelines touch is derived from a [`SiteConfig`], so a test
//! or a mirror deployment can point the whole flow somewhere else.

use serde::{Deserialize, Serialize};

/// Site endpoints and client identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Scheme and host, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    /// Timeout for page fetches in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Timeout for stage submissions in seconds.
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
    #[serde(default)]
    pub endpoints: Endpoints,
}

/// Endpoint paths relative to `base_url`.
///
/// Placeholders: `{interface}`, `{jsessionid}`, `{random}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_reservation_page")]
    pub reservation_page: String,
    #[serde(default = "default_history_page")]
    pub history_page: String,
    #[serde(default = "default_interface_page")]
    pub interface_page: String,
    #[serde(default = "default_query_submit")]
    pub query_submit: String,
    #[serde(default = "default_select_submit")]
    pub select_submit: String,
    #[serde(default = "default_confirm_submit")]
    pub confirm_submit: String,
    #[serde(default = "default_captcha_refresh")]
    pub captcha_refresh: String,
    #[serde(default = "default_lookup_submit")]
    pub lookup_submit: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            timeout_secs: default_timeout(),
            submit_timeout_secs: default_submit_timeout(),
            endpoints: Endpoints::default(),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            reservation_page: default_reservation_page(),
            history_page: default_history_page(),
            interface_page: default_interface_page(),
            query_submit: default_query_submit(),
            select_submit: default_select_submit(),
            confirm_submit: default_confirm_submit(),
            captcha_refresh: default_captcha_refresh(),
            lookup_submit: default_lookup_submit(),
        }
    }
}

fn default_base_url() -> String {
    "https://irs.thsrc.com.tw".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_accept_language() -> String {
    "zh-TW,zh;q=0.8,en-US;q=0.5,en;q=0.3".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_submit_timeout() -> u64 {
    180
}

fn default_reservation_page() -> String {
    "/IMINT/?locale=tw".to_string()
}

fn default_history_page() -> String {
    "/IMINT/?wicket:bookmarkablePage=:tw.com.mitac.webapp.thsr.viewer.History".to_string()
}

fn default_interface_page() -> String {
    "/IMINT/?wicket:interface=:{interface}::".to_string()
}

fn default_query_submit() -> String {
    "/IMINT/;jsessionid={jsessionid}?wicket:interface=:0:BookingS1Form::IFormSubmitListener"
        .to_string()
}

fn default_select_submit() -> String {
    "/IMINT/?wicket:interface=:1:BookingS2Form::IFormSubmitListener".to_string()
}

fn default_confirm_submit() -> String {
    "/IMINT/?wicket:interface=:{interface}:BookingS3Form::IFormSubmitListener".to_string()
}

fn default_captcha_refresh() -> String {
    "/IMINT/?wicket:interface=:0:BookingS1Form:homeCaptcha:reCodeLink::IBehaviorListener&wicket:behaviorId=0&random={random}".to_string()
}

fn default_lookup_submit() -> String {
    "/IMINT/;jsessionid={jsessionid}?wicket:interface=:0:HistoryForm::IFormSubmitListener"
        .to_string()
}

impl SiteConfig {
    /// Resolve a path or absolute URL against `base_url`.
    pub fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Site root, used as the Referer of form posts.
    pub fn root_url(&self) -> String {
        self.absolute("/IMINT/")
    }

    pub fn reservation_url(&self) -> String {
        self.absolute(&self.endpoints.reservation_page)
    }

    pub fn history_url(&self) -> String {
        self.absolute(&self.endpoints.history_page)
    }

    /// Page the site lands on after a stage succeeds.
    pub fn interface_url(&self, interface: u8) -> String {
        self.absolute(
            &self
                .endpoints
                .interface_page
                .replace("{interface}", &interface.to_string()),
        )
    }

    pub fn query_submit_url(&self, jsessionid: Option<&str>) -> String {
        self.absolute(
            &self
                .endpoints
                .query_submit
                .replace("{jsessionid}", jsessionid.unwrap_or_default()),
        )
    }

    pub fn select_submit_url(&self) -> String {
        self.absolute(&self.endpoints.select_submit)
    }

    pub fn confirm_submit_url(&self, interface: u8) -> String {
        self.absolute(
            &self
                .endpoints
                .confirm_submit
                .replace("{interface}", &interface.to_string()),
        )
    }

    pub fn captcha_refresh_url(&self, random: f64) -> String {
        self.absolute(
            &self
                .endpoints
                .captcha_refresh
                .replace("{random}", &random.to_string()),
        )
    }

    pub fn lookup_submit_url(&self, jsessionid: Option<&str>) -> String {
        self.absolute(
            &self
                .endpoints
                .lookup_submit
                .replace("{jsessionid}", jsessionid.unwrap_or_default()),
        )
    }

    /// Host part of `base_url`, for cookie scoping.
    pub fn host(&self) -> &str {
        let without_scheme = self
            .base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.base_url);
        without_scheme.split('/').next().unwrap_or(without_scheme)
    }
}

/// Compare two URLs ignoring `;jsessionid=` path parameters and a trailing slash.
pub fn urls_match(a: &str, b: &str) -> bool {
    fn normalize(url: &str) -> String {
        let (head, query) = match url.split_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (url, None),
        };
        let head = match head.find(";jsessionid=") {
            Some(pos) => &head[..pos],
            None => head,
        };
        let head = head.trim_end_matches('/');
        match query {
            Some(query) => format!("{}?{}", head, query),
            None => head.to_string(),
        }
    }
    normalize(a) == normalize(b)
}
