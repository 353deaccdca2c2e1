//! Read-only queries over a fetched HTML page.
//!
//! All structural lookups of site pages go through [`Document`]. A document
//! is not `Send`; parse, extract what is needed, and drop it before awaiting.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// CSS class of the site's error banners.
pub const ERROR_BANNER: &str = ".feedbackPanelERROR";

/// A parsed HTML page.
pub struct Document {
    html: Html,
}

impl Document {
    pub fn parse(body: &str) -> Self {
        Self {
            html: Html::parse_document(body),
        }
    }

    pub fn select_first(&self, css: &str) -> Option<Node<'_>> {
        let selector = selector(css)?;
        self.html.select(&selector).next().map(Node::new)
    }

    pub fn select_all(&self, css: &str) -> Vec<Node<'_>> {
        match selector(css) {
            Some(selector) => self.html.select(&selector).map(Node::new).collect(),
            None => Vec::new(),
        }
    }

    /// Stripped text of the first match, if non-empty.
    pub fn text_of(&self, css: &str) -> Option<String> {
        self.select_first(css)
            .map(|node| node.text())
            .filter(|text| !text.is_empty())
    }

    pub fn attr_of(&self, css: &str, attr: &str) -> Option<String> {
        self.select_first(css)
            .and_then(|node| node.attr(attr))
            .map(str::to_string)
    }

    /// Texts of all error banners, in page order.
    pub fn error_messages(&self) -> Vec<String> {
        self.select_all(ERROR_BANNER)
            .into_iter()
            .map(|node| node.text())
            .filter(|text| !text.is_empty())
            .collect()
    }

    /// All text of the page, stripped and joined.
    pub fn text(&self) -> String {
        self.html
            .root_element()
            .text()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// An element inside a [`Document`].
#[derive(Clone, Copy)]
pub struct Node<'a> {
    element: ElementRef<'a>,
}

impl<'a> Node<'a> {
    fn new(element: ElementRef<'a>) -> Self {
        Self { element }
    }

    /// Tag name, lowercase.
    pub fn name(&self) -> &'a str {
        self.element.value().name()
    }

    /// Text with each fragment trimmed and concatenated.
    pub fn text(&self) -> String {
        self.element.text().map(str::trim).collect()
    }

    /// Text as it appears, whitespace included.
    pub fn raw_text(&self) -> String {
        self.element.text().collect()
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.element.value().attr(name)
    }

    pub fn select_first(&self, css: &str) -> Option<Node<'a>> {
        let selector = selector(css)?;
        self.element.select(&selector).next().map(Node::new)
    }

    pub fn select_all(&self, css: &str) -> Vec<Node<'a>> {
        match selector(css) {
            Some(selector) => self.element.select(&selector).map(Node::new).collect(),
            None => Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<Node<'a>> {
        self.element
            .parent()
            .and_then(ElementRef::wrap)
            .map(Node::new)
    }

    /// Element siblings after this one.
    pub fn following_siblings(&self) -> impl Iterator<Item = Node<'a>> + 'a {
        self.element
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .map(Node::new)
    }

    /// Closest enclosing element with the given tag.
    pub fn ancestor(&self, tag: &str) -> Option<Node<'a>> {
        self.element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|element| element.value().name() == tag)
            .map(Node::new)
    }
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            debug!(css, error = %e, "Invalid selector");
            None
        }
    }
}
