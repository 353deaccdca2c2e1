//! Scripted HTTP transport for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::transport::{
    Connector, HttpClient, HttpRequest, HttpResponse, SeedCookie, TransportError,
};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Response(HttpResponse),
    Error(TransportError),
}

impl MockReply {
    /// A 200 page that ended at `final_url`.
    pub fn page(final_url: &str, body: impl Into<String>) -> Self {
        Self::status(final_url, 200, body)
    }

    pub fn status(final_url: &str, status: u16, body: impl Into<String>) -> Self {
        MockReply::Response(HttpResponse {
            status,
            body: body.into().into_bytes(),
            final_url: final_url.to_string(),
        })
    }

    /// A 200 binary body, e.g. a challenge image.
    pub fn bytes(body: &[u8]) -> Self {
        MockReply::Response(HttpResponse {
            status: 200,
            body: body.to_vec(),
            final_url: String::new(),
        })
    }

    pub fn error(error: TransportError) -> Self {
        MockReply::Error(error)
    }
}

/// Replies for URLs containing `pattern`. The last reply repeats once the
/// queue is drained.
#[derive(Debug)]
struct Route {
    pattern: String,
    replies: VecDeque<MockReply>,
}

#[derive(Debug, Default)]
struct MockState {
    routes: Vec<Route>,
    requests: Vec<HttpRequest>,
    seeded: Vec<Vec<SeedCookie>>,
    connects: u32,
}

/// Mock implementation of [`Connector`].
///
/// Every client it opens shares the same routes and request log, and gets a
/// distinct `JSESSIONID` (`MOCKSESSION1`, `MOCKSESSION2`, ...).
///
/// # Example
///
/// ```rust,ignore
/// let connector = Arc::new(MockConnector::new());
/// connector.route("?locale=tw", MockReply::page(url, pages::reservation_page("/c.png")));
/// connector.route_sequence("BookingS1Form::", vec![miss, hit]);
/// // run a pipeline...
/// assert_eq!(connector.requests_to("BookingS1Form::").len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A test that panicked while holding the lock has already failed.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Always answer URLs containing `pattern` with `reply`.
    pub fn route(&self, pattern: &str, reply: MockReply) {
        self.route_sequence(pattern, vec![reply]);
    }

    /// Answer URLs containing `pattern` with `replies` in order.
    ///
    /// Routes are matched in registration order; register specific patterns
    /// first.
    pub fn route_sequence(&self, pattern: &str, replies: Vec<MockReply>) {
        self.state().routes.push(Route {
            pattern: pattern.to_string(),
            replies: replies.into(),
        });
    }

    /// Number of clients opened so far.
    pub fn connect_count(&self) -> u32 {
        self.state().connects
    }

    /// Seed cookies passed to each `connect` call.
    pub fn seeded_cookies(&self) -> Vec<Vec<SeedCookie>> {
        self.state().seeded.clone()
    }

    /// All requests, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state().requests.clone()
    }

    /// Requests whose URL contains `pattern`.
    pub fn requests_to(&self, pattern: &str) -> Vec<HttpRequest> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.url.contains(pattern))
            .cloned()
            .collect()
    }

    fn reply_for(&self, request: &HttpRequest) -> MockReply {
        let mut state = self.state();
        state.requests.push(request.clone());

        let route = state
            .routes
            .iter_mut()
            .find(|route| request.url.contains(&route.pattern));

        let reply = match route {
            Some(route) if route.replies.len() > 1 => route.replies.pop_front(),
            Some(route) => route.replies.front().cloned(),
            None => None,
        };

        reply.unwrap_or_else(|| MockReply::status(&request.url, 404, "not found"))
    }
}

impl Connector for MockConnector {
    fn connect(&self, seed: &[SeedCookie]) -> Result<Arc<dyn HttpClient>, TransportError> {
        let session_id = {
            let mut state = self.state();
            state.connects += 1;
            state.seeded.push(seed.to_vec());
            format!("MOCKSESSION{}", state.connects)
        };
        Ok(Arc::new(MockHttpClient {
            connector: self.clone(),
            session_id,
            seed: seed.to_vec(),
        }))
    }
}

/// Client returned by [`MockConnector`].
#[derive(Debug)]
pub struct MockHttpClient {
    connector: MockConnector,
    session_id: String,
    seed: Vec<SeedCookie>,
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        match self.connector.reply_for(&request) {
            MockReply::Response(mut response) => {
                if response.final_url.is_empty() {
                    response.final_url = request.url.clone();
                }
                Ok(response)
            }
            MockReply::Error(e) => Err(e),
        }
    }

    fn cookie(&self, name: &str) -> Option<String> {
        if name == crate::session::SESSION_COOKIE {
            return Some(self.session_id.clone());
        }
        self.seed
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.clone())
    }
}
