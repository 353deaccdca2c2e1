//! Locating and judging the cancel action on a reservation page.

use crate::document::{Document, Node};
use crate::retry::RejectionMatcher;
use crate::site::SiteConfig;
use crate::stage::{ExpectedMarker, Stage, StageRequest};

/// Characters of page text kept for an indeterminate result.
const EXCERPT_CHARS: usize = 200;

/// How the page offers cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelAction {
    /// A link, followed with GET.
    Link { url: String },
    /// A form button; the form's inputs are posted to its action.
    Form {
        action: String,
        fields: Vec<(String, String)>,
    },
}

impl CancelAction {
    /// Find the cancel control, most specific match first.
    pub fn locate(doc: &Document, site: &SiteConfig) -> Option<Self> {
        let control = doc
            .select_first("input[value='取消訂位']")
            .or_else(|| find_with_text(doc, "button", "取消"))
            .or_else(|| find_with_text(doc, "a", "取消訂位"))
            .or_else(|| find_with_text(doc, "input, button, a", "取消"))?;

        Self::from_control(control, site)
    }

    fn from_control(control: Node<'_>, site: &SiteConfig) -> Option<Self> {
        if control.name() == "a" {
            let href = control.attr("href").filter(|href| !href.trim().is_empty())?;
            return Some(CancelAction::Link {
                url: site.absolute(href.trim()),
            });
        }

        let form = control.ancestor("form")?;
        let fields = form
            .select_all("input")
            .into_iter()
            .filter_map(|input| {
                let name = input.attr("name")?;
                Some((
                    name.to_string(),
                    input.attr("value").unwrap_or_default().to_string(),
                ))
            })
            .collect();

        Some(CancelAction::Form {
            action: site.absolute(form.attr("action").unwrap_or_default()),
            fields,
        })
    }

    pub fn to_request(&self, referer: &str) -> StageRequest {
        let request = match self {
            CancelAction::Link { url } => {
                StageRequest::get(Stage::Cancel, url.clone(), ExpectedMarker::NoErrorBanner)
            }
            CancelAction::Form { action, fields } => StageRequest::post(
                Stage::Cancel,
                action.clone(),
                fields.clone(),
                ExpectedMarker::NoErrorBanner,
            ),
        };
        request.with_referer(referer)
    }
}

fn find_with_text<'a>(doc: &'a Document, css: &str, needle: &str) -> Option<Node<'a>> {
    doc.select_all(css)
        .into_iter()
        .find(|node| node.text().contains(needle))
}

/// What the page after the cancel action says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelVerdict {
    Confirmed,
    /// Error banners; the cancellation did not go through.
    Refused(Vec<String>),
    /// No error, but no confirmation either. Carries a page excerpt.
    Unclear(String),
}

/// Judge the response page of the cancel action.
pub fn judge_cancellation(matcher: &RejectionMatcher, doc: &Document) -> CancelVerdict {
    let errors = doc.error_messages();
    if !errors.is_empty() {
        return CancelVerdict::Refused(errors);
    }

    let text = doc.text();
    if matcher.cancellation_confirmed(&text) {
        CancelVerdict::Confirmed
    } else {
        CancelVerdict::Unclear(text.chars().take(EXCERPT_CHARS).collect())
    }
}
