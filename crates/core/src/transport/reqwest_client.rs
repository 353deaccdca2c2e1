//! reqwest-backed transport.

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{Body, Connector, HttpClient, HttpRequest, HttpResponse, Method, SeedCookie, TransportError};
use crate::site::SiteConfig;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const MAX_REDIRECTS: usize = 10;

/// Opens one reqwest client per session, each with its own cookie jar.
#[derive(Debug, Clone)]
pub struct ReqwestConnector {
    base_url: String,
    user_agent: String,
    accept_language: String,
    timeout: Duration,
}

impl ReqwestConnector {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            base_url: site.base_url.clone(),
            user_agent: site.user_agent.clone(),
            accept_language: site.accept_language.clone(),
            timeout: Duration::from_secs(site.timeout_secs),
        }
    }
}

impl Connector for ReqwestConnector {
    fn connect(&self, seed: &[SeedCookie]) -> Result<Arc<dyn HttpClient>, TransportError> {
        let site_url =
            Url::parse(&self.base_url).map_err(|e| TransportError::Build(e.to_string()))?;

        let jar = Arc::new(Jar::default());
        for cookie in seed {
            jar.add_cookie_str(
                &format!(
                    "{}={}; Path=/",
                    cookie.name,
                    urlencoding::encode(&cookie.value)
                ),
                &site_url,
            );
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&self.accept_language)
                .map_err(|e| TransportError::Build(e.to_string()))?,
        );

        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(self.user_agent.clone())
            .default_headers(headers)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .timeout(self.timeout)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        debug!(base_url = %self.base_url, seeded = seed.len(), "Opened HTTP client");

        Ok(Arc::new(ReqwestHttpClient {
            client,
            jar,
            site_url,
        }))
    }
}

/// A reqwest client with the jar it writes to.
pub struct ReqwestHttpClient {
    client: Client,
    jar: Arc<Jar>,
    site_url: Url,
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Form(fields) => builder.form(fields),
            Body::Json(value) => builder.json(value),
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        debug!(url = %request.url, status, final_url = %final_url, bytes = body.len(), "HTTP exchange");

        Ok(HttpResponse {
            status,
            body,
            final_url,
        })
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let header = self.jar.cookies(&self.site_url)?;
        let header = header.to_str().ok()?;
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::Build(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}
