//! Picking a train from the search results.

use chrono::NaiveTime;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::info;

use crate::document::{Document, Node};

/// Name of the train radio group on the results page.
pub const TRAIN_GROUP: &str = "TrainQueryDataViewPanel:TrainGroup";

/// One train offered by the search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub departure: NaiveTime,
    pub arrival: NaiveTime,
    /// Travel time in minutes.
    pub duration_minutes: u32,
    pub train_no: String,
    /// Fare discount label, e.g. `早鳥9折`.
    pub discount: Option<String>,
    /// Radio value submitted to pick this train.
    pub value: String,
}

impl Candidate {
    pub fn has_discount(&self) -> bool {
        self.discount.is_some()
    }

    pub fn duration_label(&self) -> String {
        format!("{:02}:{:02}", self.duration_minutes / 60, self.duration_minutes % 60)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({}) | {}",
            self.departure.format("%H:%M"),
            self.arrival.format("%H:%M"),
            self.duration_label(),
            self.train_no
        )?;
        if let Some(discount) = &self.discount {
            write!(f, "\t{}", discount)?;
        }
        Ok(())
    }
}

/// How to choose among candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Deadline filters, discount preference, shortest trip.
    Auto,
    /// The 1-indexed entry of the listing.
    Manual { index: usize },
    /// Only list the trains.
    ListOnly,
}

/// Caller deadlines for automatic selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionCriteria {
    pub latest_arrival: Option<NaiveTime>,
    pub latest_departure: Option<NaiveTime>,
}

/// Nothing to pick from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no train available: {reason}")]
pub struct NoOffering {
    pub reason: String,
}

/// Read the candidates from a search results page.
pub fn parse_candidates(doc: &Document) -> Vec<Candidate> {
    doc.select_all(&format!("input[name='{}']", TRAIN_GROUP))
        .into_iter()
        .filter_map(parse_candidate)
        .collect()
}

fn parse_candidate(input: Node<'_>) -> Option<Candidate> {
    let departure = parse_time(input.attr("querydeparture")?)?;
    let arrival = parse_time(input.attr("queryarrival")?)?;
    let value = input.attr("value")?.to_string();

    let card = input.parent();

    // "schedule1:30｜directions_railway0803"
    let schedule = find_in_card(card, ".duration")
        .map(|node| {
            node.raw_text()
                .replace("schedule", "")
                .replace("directions_railway", "")
                .split_whitespace()
                .collect::<String>()
        })
        .unwrap_or_default();
    let mut parts = schedule.split('｜');
    let duration_text = parts.next().unwrap_or_default().to_string();
    let train_from_schedule = parts.next().map(str::to_string);

    let duration_minutes = input
        .attr("queryestimatedtime")
        .and_then(parse_duration)
        .or_else(|| parse_duration(&duration_text))
        .unwrap_or_else(|| minutes_between(departure, arrival));

    let train_no = input
        .attr("querycode")
        .map(str::to_string)
        .or(train_from_schedule)
        .unwrap_or_default();

    let discount = find_in_card(card, ".discount")
        .map(|node| node.text())
        .filter(|text| !text.is_empty());

    Some(Candidate {
        departure,
        arrival,
        duration_minutes,
        train_no,
        discount,
        value,
    })
}

/// Look inside the card, then in the elements that follow it.
fn find_in_card<'a>(card: Option<Node<'a>>, css: &str) -> Option<Node<'a>> {
    let card = card?;
    card.select_first(css).or_else(|| {
        card.following_siblings()
            .find_map(|sibling| sibling.select_first(css))
    })
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// `H:MM` or `HH:MM` to minutes.
fn parse_duration(value: &str) -> Option<u32> {
    let (hours, minutes) = value.trim().split_once(':')?;
    let hours: u32 = hours.trim().parse().ok()?;
    let minutes: u32 = minutes.trim().parse().ok()?;
    (minutes < 60).then_some(hours * 60 + minutes)
}

fn minutes_between(departure: NaiveTime, arrival: NaiveTime) -> u32 {
    let minutes = (arrival - departure).num_minutes();
    if minutes < 0 {
        (minutes + 24 * 60) as u32
    } else {
        minutes as u32
    }
}

/// Log the 1-indexed listing.
pub fn log_candidates(candidates: &[Candidate]) {
    for (idx, candidate) in candidates.iter().enumerate() {
        info!("{}. {}", idx + 1, candidate);
    }
}

/// Choose a candidate.
pub fn select_candidate(
    candidates: &[Candidate],
    criteria: &SelectionCriteria,
    mode: &SelectionMode,
) -> Result<Candidate, NoOffering> {
    if candidates.is_empty() {
        return Err(NoOffering {
            reason: "search returned no trains".to_string(),
        });
    }

    match mode {
        SelectionMode::Manual { index } => {
            let chosen = index
                .checked_sub(1)
                .and_then(|i| candidates.get(i))
                .unwrap_or(&candidates[0]);
            Ok(chosen.clone())
        }
        SelectionMode::Auto | SelectionMode::ListOnly => auto_select(candidates, criteria),
    }
}

fn auto_select(
    candidates: &[Candidate],
    criteria: &SelectionCriteria,
) -> Result<Candidate, NoOffering> {
    let in_time: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| criteria.latest_arrival.map_or(true, |latest| c.arrival <= latest))
        .filter(|c| {
            criteria
                .latest_departure
                .map_or(true, |latest| c.departure <= latest)
        })
        .collect();

    if in_time.is_empty() {
        return Err(NoOffering {
            reason: "no train meets the time limits".to_string(),
        });
    }

    let discounted: Vec<&Candidate> = in_time.iter().copied().filter(|c| c.has_discount()).collect();
    let pool = if discounted.is_empty() { in_time } else { discounted };

    pool.into_iter()
        .min_by_key(|c| (c.duration_minutes, c.departure))
        .cloned()
        .ok_or_else(|| NoOffering {
            reason: "no train left after filtering".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, pages};

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    #[test]
    fn test_auto_prefers_discount_then_shortest() {
        let candidates = vec![
            fixtures::candidate("08:00", "09:40", false),
            fixtures::candidate("08:30", "09:55", true),
            fixtures::candidate("09:00", "10:55", false),
        ];

        let chosen =
            select_candidate(&candidates, &SelectionCriteria::default(), &SelectionMode::Auto)
                .unwrap();

        assert_eq!(chosen.duration_minutes, 85);
        assert!(chosen.has_discount());
    }

    #[test]
    fn test_auto_falls_back_to_undiscounted() {
        let candidates = vec![
            fixtures::candidate("08:00", "09:40", false),
            fixtures::candidate("08:30", "09:55", false),
        ];
        let chosen =
            select_candidate(&candidates, &SelectionCriteria::default(), &SelectionMode::Auto)
                .unwrap();
        assert_eq!(chosen.departure, t("08:30"));
    }

    #[test]
    fn test_auto_ties_break_on_departure() {
        let candidates = vec![
            fixtures::candidate("09:00", "10:30", false),
            fixtures::candidate("07:00", "08:30", false),
        ];
        let chosen =
            select_candidate(&candidates, &SelectionCriteria::default(), &SelectionMode::Auto)
                .unwrap();
        assert_eq!(chosen.departure, t("07:00"));
    }

    #[test]
    fn test_auto_applies_deadlines() {
        let candidates = vec![
            fixtures::candidate("08:00", "09:20", true),
            fixtures::candidate("08:30", "10:10", false),
            fixtures::candidate("09:30", "10:40", false),
        ];
        let criteria = SelectionCriteria {
            latest_arrival: Some(t("10:45")),
            latest_departure: Some(t("09:00")),
        };
        let chosen = select_candidate(&candidates, &criteria, &SelectionMode::Auto).unwrap();
        assert_eq!(chosen.departure, t("08:00"));

        let strict = SelectionCriteria {
            latest_arrival: Some(t("09:00")),
            latest_departure: None,
        };
        assert!(select_candidate(&candidates, &strict, &SelectionMode::Auto).is_err());
    }

    #[test]
    fn test_empty_list_is_no_offering() {
        let result = select_candidate(&[], &SelectionCriteria::default(), &SelectionMode::Auto);
        assert!(result.is_err());
    }

    #[test]
    fn test_manual_index() {
        let candidates = vec![
            fixtures::candidate("08:00", "09:40", false),
            fixtures::candidate("08:30", "09:55", true),
        ];
        let criteria = SelectionCriteria::default();
        let second =
            select_candidate(&candidates, &criteria, &SelectionMode::Manual { index: 2 }).unwrap();
        assert_eq!(second.departure, t("08:30"));
        let fallback =
            select_candidate(&candidates, &criteria, &SelectionMode::Manual { index: 9 }).unwrap();
        assert_eq!(fallback.departure, t("08:00"));
    }

    #[test]
    fn test_parse_candidates_from_page() {
        let html = pages::train_list_page(&[
            pages::TrainRow::new("0803", "08:06", "09:36", Some("早鳥9折")),
            pages::TrainRow::new("0615", "08:21", "10:11", None),
        ]);
        let candidates = parse_candidates(&Document::parse(&html));

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].train_no, "0803");
        assert_eq!(candidates[0].duration_minutes, 90);
        assert_eq!(candidates[0].discount.as_deref(), Some("早鳥9折"));
        assert_eq!(candidates[0].value, "radio1");
        assert_eq!(candidates[1].duration_label(), "01:50");
        assert!(candidates[1].discount.is_none());
    }

    #[test]
    fn test_parse_duration_from_card_text() {
        let html = r#"
<label>
  <input type="radio" name="TrainQueryDataViewPanel:TrainGroup" querydeparture="06:00" queryarrival="07:45" value="radio9">
  <div class="uk-card">
    <div class="duration"><span><i>schedule</i>1:45</span>｜<span><i>directions_railway</i>0117</span></div>
    <div class="discount"></div>
  </div>
</label>"#;
        let candidates = parse_candidates(&Document::parse(html));
        assert_eq!(candidates[0].duration_minutes, 105);
        assert_eq!(candidates[0].train_no, "0117");
        assert!(candidates[0].discount.is_none());
    }
}
