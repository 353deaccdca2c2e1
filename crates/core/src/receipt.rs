//! Structured result of a finished reservation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::document::{Document, Node};

/// Placeholder for a field the page did not show.
pub const UNKNOWN: &str = "unknown";

/// Reservation details read from a result or details page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub reservation_code: String,
    pub payment_status: String,
    pub car_type: String,
    pub ticket_type: String,
    pub price: String,
    pub date: String,
    pub train_no: String,
    pub duration: String,
    pub departure_station: String,
    pub departure_time: String,
    pub arrival_station: String,
    pub arrival_time: String,
    pub seats: Vec<String>,
    /// Names of the fields that were not found.
    pub missing: Vec<String>,
}

impl Receipt {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn has_reservation_code(&self) -> bool {
        self.reservation_code != UNKNOWN
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reservation: {} ({})", self.reservation_code, self.payment_status)?;
        writeln!(
            f,
            "Train {} on {}: {} {} -> {} {} ({})",
            self.train_no,
            self.date,
            self.departure_station,
            self.departure_time,
            self.arrival_station,
            self.arrival_time,
            self.duration
        )?;
        writeln!(f, "{} / {} / {}", self.car_type, self.ticket_type, self.price)?;
        if self.seats.is_empty() {
            write!(f, "Seats: {}", UNKNOWN)
        } else {
            write!(f, "Seats: {}", self.seats.join(", "))
        }
    }
}

struct Fields<'d> {
    doc: &'d Document,
    card: Option<Node<'d>>,
    missing: Vec<String>,
}

impl<'d> Fields<'d> {
    fn page(&mut self, name: &str, selectors: &[&str]) -> String {
        let found = selectors.iter().find_map(|css| self.doc.text_of(css));
        self.record(name, found)
    }

    fn card(&mut self, name: &str, selectors: &[&str]) -> String {
        let found = match self.card {
            Some(card) => selectors.iter().find_map(|css| {
                card.select_first(css)
                    .map(|node| node.text())
                    .filter(|text| !text.is_empty())
            }),
            None => None,
        }
        .or_else(|| selectors.iter().find_map(|css| self.doc.text_of(css)));
        self.record(name, found)
    }

    fn record(&mut self, name: &str, found: Option<String>) -> String {
        found.unwrap_or_else(|| {
            self.missing.push(name.to_string());
            UNKNOWN.to_string()
        })
    }
}

/// Read the reservation details from a page. Never fails; missing fields are
/// [`UNKNOWN`] and listed in [`Receipt::missing`].
pub fn extract_receipt(doc: &Document) -> Receipt {
    let mut fields = Fields {
        doc,
        card: doc.select_first("div.ticket-card"),
        missing: Vec::new(),
    };

    let reservation_code = fields.page("reservation_code", &["p.pnr-code", "span.pnr-code", ".pnr-code"]);
    let payment_status = fields.page("payment_status", &["p.payment-status"]);
    let car_type = fields.page("car_type", &["div.car-type p.info-data"]);
    let ticket_type = fields.page("ticket_type", &["div.ticket-type div"]);
    let price = fields.page("price", &["#setTrainTotalPriceValue"]);
    let date = fields.card("date", &["span.date"]);
    let train_no = fields.card("train_no", &["#setTrainCode0", "span[id^='setTrainCode']"]);
    let duration = fields.page("duration", &["#InfoEstimatedTime0"]);
    let departure_time = fields.card("departure_time", &["p.departure-time"]);
    let departure_station = fields.card("departure_station", &["p.departure-stn"]);
    let arrival_time = fields.card("arrival_time", &["p.arrival-time"]);
    let arrival_station = fields.card("arrival_station", &["p.arrival-stn"]);

    let seats: Vec<String> = doc
        .select_all("div.detail div.seat-label")
        .into_iter()
        .chain(doc.select_all("div.seat-label"))
        .map(|node| node.text())
        .filter(|text| !text.is_empty())
        .fold(Vec::new(), |mut acc, seat| {
            if !acc.contains(&seat) {
                acc.push(seat);
            }
            acc
        });
    if seats.is_empty() {
        fields.missing.push("seats".to_string());
    }

    Receipt {
        reservation_code,
        payment_status,
        car_type,
        ticket_type,
        price,
        date,
        train_no,
        duration,
        departure_station,
        departure_time,
        arrival_station,
        arrival_time,
        seats,
        missing: fields.missing,
    }
}
