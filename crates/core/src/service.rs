//! The services the bot can run, by command keyword.

use serde::Serialize;
use std::fmt;

/// What a service does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Booking,
    Cancellation,
}

/// One entry of [`SERVICES`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceEntry {
    pub keyword: &'static str,
    pub name: &'static str,
    pub kind: ServiceKind,
    /// Config section the service cannot run without.
    pub section: &'static str,
}

pub static SERVICES: &[ServiceEntry] = &[
    ServiceEntry {
        keyword: "thsrc",
        name: "THSRC",
        kind: ServiceKind::Booking,
        section: "trip",
    },
    ServiceEntry {
        keyword: "thsrc-cancel",
        name: "THSRC cancellation",
        kind: ServiceKind::Cancellation,
        section: "cancel",
    },
];

/// Find a service by keyword, ignoring case.
pub fn lookup_service(keyword: &str) -> Option<&'static ServiceEntry> {
    let keyword = keyword.trim();
    SERVICES
        .iter()
        .find(|entry| entry.keyword.eq_ignore_ascii_case(keyword))
}

/// Comma separated keywords, for usage messages.
pub fn supported_keywords() -> String {
    SERVICES
        .iter()
        .map(|entry| entry.keyword)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_service() {
        assert_eq!(lookup_service("THSRC").unwrap().kind, ServiceKind::Booking);
        let cancel = lookup_service(" thsrc-cancel ").unwrap();
        assert_eq!(cancel.kind, ServiceKind::Cancellation);
        assert_eq!(cancel.section, "cancel");
        assert!(lookup_service("tra").is_none());
    }

    #[test]
    fn test_supported_keywords() {
        assert_eq!(supported_keywords(), "thsrc, thsrc-cancel");
    }
}
