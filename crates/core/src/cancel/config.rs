//! Cancellation configuration.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::mask_id;

/// The `[cancel]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelConfig {
    #[serde(default)]
    pub mode: CancelMode,
    /// Pause between two reservations.
    #[serde(default = "default_delay_between")]
    pub delay_between_secs: u64,
    /// One id with many reservation codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchConfig>,
    #[serde(default)]
    pub items: Vec<CancelItem>,
}

impl Default for CancelConfig {
    fn default() -> Self {
        Self {
            mode: CancelMode::default(),
            delay_between_secs: default_delay_between(),
            batch: None,
            items: Vec::new(),
        }
    }
}

fn default_delay_between() -> u64 {
    5
}

/// Whether to work through every target or only the first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelMode {
    #[default]
    All,
    Single,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub id: String,
    /// Reservation codes separated by commas, spaces or newlines.
    #[serde(default)]
    pub pnr_list: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelItem {
    pub id: String,
    pub pnr: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// One reservation to cancel.
#[derive(Clone, PartialEq, Eq)]
pub struct CancellationTarget {
    /// National id of the person who booked.
    pub id: String,
    /// Reservation code.
    pub pnr: String,
}

impl CancellationTarget {
    pub fn new(id: impl Into<String>, pnr: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_string(),
            pnr: pnr.into().trim().to_string(),
        }
    }
}

impl fmt::Debug for CancellationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationTarget")
            .field("id", &mask_id(&self.id))
            .field("pnr", &self.pnr)
            .finish()
    }
}

impl fmt::Display for CancellationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.pnr, mask_id(&self.id))
    }
}

/// Split a reservation code list on commas and whitespace.
pub fn split_pnr_list(list: &str) -> Vec<String> {
    match Regex::new(r"[,\s]+") {
        Ok(re) => re
            .split(list.trim())
            .filter(|pnr| !pnr.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => vec![list.trim().to_string()],
    }
}

impl CancelConfig {
    /// Batch codes first, then the enabled items. Incomplete entries are
    /// skipped.
    pub fn targets(&self) -> Vec<CancellationTarget> {
        let mut targets = Vec::new();

        if let Some(batch) = self.batch.as_ref().filter(|b| b.enabled) {
            if !batch.id.trim().is_empty() {
                targets.extend(
                    split_pnr_list(&batch.pnr_list)
                        .into_iter()
                        .map(|pnr| CancellationTarget::new(batch.id.as_str(), pnr)),
                );
            }
        }

        targets.extend(
            self.items
                .iter()
                .filter(|item| item.enabled)
                .map(|item| CancellationTarget::new(item.id.as_str(), item.pnr.as_str()))
                .filter(|target| !target.id.is_empty() && !target.pnr.is_empty()),
        );

        targets
    }
}
