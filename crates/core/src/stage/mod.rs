//! Stage submissions.
//!
//! A stage is one form post in a chain. It counts as progress only when the
//! response reaches the stage's [`ExpectedMarker`].

mod executor;

pub use executor::{StageError, StageExecutor};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::document::Document;
use crate::site::urls_match;
use crate::transport::{HttpRequest, HttpResponse, Method};

/// Stages of the reservation and cancellation chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Trip search with the challenge code.
    Query,
    /// Train selection.
    SelectTrain,
    /// Passenger details and final confirmation.
    ConfirmTicket,
    /// Reservation lookup with the challenge code.
    Lookup,
    /// Executing the cancel action.
    Cancel,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Query,
        Stage::SelectTrain,
        Stage::ConfirmTicket,
        Stage::Lookup,
        Stage::Cancel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Query => "query",
            Stage::SelectTrain => "select_train",
            Stage::ConfirmTicket => "confirm_ticket",
            Stage::Lookup => "lookup",
            Stage::Cancel => "cancel",
        }
    }

    /// Whether exhausting this stage's ceiling replaces the session instead
    /// of failing the run.
    pub fn restarts_on_exhaustion(&self) -> bool {
        matches!(self, Stage::Query)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful response of a stage looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedMarker {
    /// The final URL after redirects.
    Url(String),
    /// Any page without error banners.
    NoErrorBanner,
}

/// One stage submission.
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub stage: Stage,
    pub method: Method,
    pub url: String,
    pub referer: Option<String>,
    pub form: Vec<(String, String)>,
    pub expected: ExpectedMarker,
}

impl StageRequest {
    pub fn post(
        stage: Stage,
        url: impl Into<String>,
        form: Vec<(String, String)>,
        expected: ExpectedMarker,
    ) -> Self {
        Self {
            stage,
            method: Method::Post,
            url: url.into(),
            referer: None,
            form,
            expected,
        }
    }

    pub fn get(stage: Stage, url: impl Into<String>, expected: ExpectedMarker) -> Self {
        Self {
            stage,
            method: Method::Get,
            url: url.into(),
            referer: None,
            form: Vec::new(),
            expected,
        }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn to_http(&self) -> HttpRequest {
        let mut request = match self.method {
            Method::Get => HttpRequest::get(&self.url),
            Method::Post => HttpRequest::post_form(&self.url, self.form.clone()),
        };
        request = request.with_header("Upgrade-Insecure-Requests", "1");
        if let Some(referer) = &self.referer {
            request = request.with_header("Referer", referer.clone());
        }
        request
    }
}

/// Response of a stage submission.
#[derive(Debug, Clone)]
pub struct StageResponse {
    pub stage: Stage,
    pub status: u16,
    pub body: String,
    pub final_url: String,
}

impl StageResponse {
    pub(crate) fn new(stage: Stage, response: HttpResponse) -> Self {
        Self {
            stage,
            status: response.status,
            body: response.text(),
            final_url: response.final_url,
        }
    }

    pub fn document(&self) -> Document {
        Document::parse(&self.body)
    }

    /// Whether the response shows the stage succeeded.
    pub fn reached(&self, expected: &ExpectedMarker) -> bool {
        if !(200..300).contains(&self.status) {
            return false;
        }
        match expected {
            ExpectedMarker::Url(url) => urls_match(&self.final_url, url),
            ExpectedMarker::NoErrorBanner => self.document().error_messages().is_empty(),
        }
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.document().error_messages()
    }
}
