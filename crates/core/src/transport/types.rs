//! Transport types and traits.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// HTTP method used by the flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    /// `application/x-www-form-urlencoded`, in field order.
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

/// A request issued through a session.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Body::Empty,
            timeout: None,
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Body::Form(form),
            timeout: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of a form field, if this is a form post.
    pub fn form_value(&self, name: &str) -> Option<&str> {
        match &self.body {
            Body::Form(fields) => fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A response after redirects were followed.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// URL of the last hop.
    pub final_url: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Transport failures.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to build client: {0}")]
    Build(String),
}

impl TransportError {
    /// Whether retrying the same request can help.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Build(_))
    }
}

/// Cookie placed in a fresh jar before the first request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedCookie {
    pub name: String,
    pub value: String,
}

impl SeedCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A cookie-bearing HTTP client bound to one session.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute a request, following redirects.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Current value of a cookie held for the site.
    fn cookie(&self, name: &str) -> Option<String>;
}

/// Opens clients with an empty cookie jar.
pub trait Connector: Send + Sync {
    fn connect(&self, seed: &[SeedCookie]) -> Result<Arc<dyn HttpClient>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::post_form(
            "https://h/submit",
            vec![("a".to_string(), "1".to_string())],
        )
        .with_header("Referer", "https://h/")
        .with_timeout(Duration::from_secs(5));

        assert_eq!(request.method, Method::Post);
        assert_eq!(request.form_value("a"), Some("1"));
        assert_eq!(request.form_value("b"), None);
        assert_eq!(request.header("referer"), Some("https://h/"));
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_response_helpers() {
        let response = HttpResponse {
            status: 302,
            body: "héllo".as_bytes().to_vec(),
            final_url: "https://h/".to_string(),
        };
        assert!(!response.is_success());
        assert_eq!(response.text(), "héllo");
    }

    #[test]
    fn test_build_errors_are_not_transient() {
        assert!(TransportError::Timeout("x".into()).is_transient());
        assert!(!TransportError::Build("x".into()).is_transient());
    }
}
