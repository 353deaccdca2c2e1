//! Resolved trip parameters.

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::{CarType, PassengerConfig, SeatPreference, TicketCounts, TripConfig};
use super::selection::SelectionCriteria;
use crate::ids::{is_roc_id, is_tax_id};

/// High speed rail stations, numbered as the site numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Station {
    Nangang,
    Taipei,
    Banqiao,
    Taoyuan,
    Hsinchu,
    Miaoli,
    Taichung,
    Changhua,
    Yunlin,
    Chiayi,
    Tainan,
    /// Spelled the way the site's station table spells it.
    Zuouing,
}

impl Station {
    pub const ALL: [Station; 12] = [
        Station::Nangang,
        Station::Taipei,
        Station::Banqiao,
        Station::Taoyuan,
        Station::Hsinchu,
        Station::Miaoli,
        Station::Taichung,
        Station::Changhua,
        Station::Yunlin,
        Station::Chiayi,
        Station::Tainan,
        Station::Zuouing,
    ];

    /// Form value of the station.
    pub fn id(&self) -> u8 {
        Station::ALL
            .iter()
            .position(|s| s == self)
            .map(|i| i as u8 + 1)
            .unwrap_or_default()
    }

    pub fn english(&self) -> &'static str {
        match self {
            Station::Nangang => "Nangang",
            Station::Taipei => "Taipei",
            Station::Banqiao => "Banqiao",
            Station::Taoyuan => "Taoyuan",
            Station::Hsinchu => "Hsinchu",
            Station::Miaoli => "Miaoli",
            Station::Taichung => "Taichung",
            Station::Changhua => "Changhua",
            Station::Yunlin => "Yunlin",
            Station::Chiayi => "Chiayi",
            Station::Tainan => "Tainan",
            Station::Zuouing => "Zuouing",
        }
    }

    pub fn chinese(&self) -> &'static str {
        match self {
            Station::Nangang => "南港",
            Station::Taipei => "台北",
            Station::Banqiao => "板橋",
            Station::Taoyuan => "桃園",
            Station::Hsinchu => "新竹",
            Station::Miaoli => "苗栗",
            Station::Taichung => "台中",
            Station::Changhua => "彰化",
            Station::Yunlin => "雲林",
            Station::Chiayi => "嘉義",
            Station::Tainan => "台南",
            Station::Zuouing => "左營",
        }
    }

    /// Look a station up by English name, Chinese name or form value.
    pub fn parse(name: &str) -> Option<Station> {
        let name = name.trim();
        if let Ok(id) = name.parse::<usize>() {
            return id.checked_sub(1).and_then(|i| Station::ALL.get(i)).copied();
        }
        if name.chars().any(|c| c.is_ascii_alphabetic()) {
            let lower = name.to_ascii_lowercase();
            if lower == "zuoying" {
                return Some(Station::Zuouing);
            }
            return Station::ALL
                .into_iter()
                .find(|s| s.english().eq_ignore_ascii_case(&lower));
        }
        let normalized = name.replace('臺', "台");
        Station::ALL.into_iter().find(|s| s.chinese() == normalized)
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.english())
    }
}

/// Fare class codes in the site's row order.
const FARE_CODES: [char; 6] = ['F', 'H', 'W', 'E', 'P', 'T'];

/// Encode a departure time in the site's timetable form.
///
/// The time is rounded down to the half hour: 00:00 is `1201A`, 00:30
/// `1230A`, 12:00 `1200N`, 12:30 `1230P`, 10:00 `1000A`, 16:30 `430P`.
pub fn encode_time_slot(time: NaiveTime) -> String {
    let minutes = if time.minute() >= 30 { 30 } else { 0 };
    let hhmm = time.hour() * 100 + minutes;
    match hhmm {
        0 => "1201A".to_string(),
        30 => "1230A".to_string(),
        1200 => "1200N".to_string(),
        1230 => "1230P".to_string(),
        t if t < 1200 => format!("{}A", t),
        t => format!("{}P", t - 1200),
    }
}

/// Parse an `HH:MM` clock time.
pub fn parse_clock(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| format!("invalid time '{}', expected HH:MM", value))
}

/// Parse a travel date in `YYYY-MM-DD` or `YYYY/MM/DD` form.
pub fn parse_travel_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(&value.trim().replace('/', "-"), "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{}', expected YYYY-MM-DD", value))
}

/// Trip parameters, immutable for a run.
#[derive(Debug, Clone)]
pub struct TripSelection {
    pub start: Station,
    pub dest: Station,
    pub date: NaiveDate,
    pub outbound_time: NaiveTime,
    pub latest_arrival: Option<NaiveTime>,
    pub latest_departure: Option<NaiveTime>,
    pub train_no: Option<String>,
    pub tickets: TicketCounts,
    pub max_tickets: u32,
    pub car_type: CarType,
    pub seat_preference: SeatPreference,
    pub passenger: PassengerConfig,
}

impl TripSelection {
    pub fn from_config(config: &TripConfig) -> Result<Self, String> {
        let start = Station::parse(&config.start_station)
            .ok_or_else(|| format!("unknown station '{}'", config.start_station))?;
        let dest = Station::parse(&config.dest_station)
            .ok_or_else(|| format!("unknown station '{}'", config.dest_station))?;

        Ok(Self {
            start,
            dest,
            date: parse_travel_date(&config.outbound_date)?,
            outbound_time: parse_clock(&config.outbound_time)?,
            latest_arrival: config.latest_arrival.as_deref().map(parse_clock).transpose()?,
            latest_departure: config
                .latest_departure
                .as_deref()
                .map(parse_clock)
                .transpose()?,
            train_no: config
                .train_no
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            tickets: config.tickets,
            max_tickets: config.max_tickets,
            car_type: config.car_type,
            seat_preference: config.seat_preference,
            passenger: config.passenger.clone(),
        })
    }

    /// Checks that must pass before any request is sent.
    pub fn validate(&self) -> Result<(), String> {
        let total = self.tickets.total();
        if total > self.max_tickets {
            return Err(format!(
                "{} tickets requested, at most {} allowed",
                total, self.max_tickets
            ));
        }
        if self.start == self.dest {
            return Err(format!("start and destination are both {}", self.start));
        }
        if self.train_no.is_none() {
            if let Some(latest) = self.latest_arrival {
                if latest <= self.outbound_time {
                    return Err("latest_arrival must be later than outbound_time".to_string());
                }
            }
        }
        if self.passenger.id.trim().is_empty() {
            return Err("passenger.id is required".to_string());
        }
        if let Some(tgo) = &self.passenger.tgo_id {
            if !is_roc_id(tgo) {
                return Err("passenger.tgo_id is not a valid national id".to_string());
            }
        }
        if let Some(tax) = &self.passenger.tax_id {
            if !is_tax_id(tax) {
                return Err("passenger.tax_id is not a valid tax id".to_string());
            }
        }
        Ok(())
    }

    /// Requested tickets; nothing requested means one adult.
    pub fn effective_tickets(&self) -> TicketCounts {
        if self.tickets.total() == 0 {
            TicketCounts {
                adult: 1,
                ..Default::default()
            }
        } else {
            self.tickets
        }
    }

    pub fn passenger_count(&self) -> u32 {
        self.effective_tickets().total()
    }

    /// Ticket amount fields, e.g. `["2F", "0H", "0W", "1E", "0P", "0T"]`.
    pub fn ticket_amounts(&self) -> [String; 6] {
        let rows = self.effective_tickets().rows();
        std::array::from_fn(|i| format!("{}{}", rows[i], FARE_CODES[i]))
    }

    pub fn date_field(&self) -> String {
        self.date.format("%Y/%m/%d").to_string()
    }

    pub fn time_slot(&self) -> String {
        encode_time_slot(self.outbound_time)
    }

    pub fn criteria(&self) -> SelectionCriteria {
        SelectionCriteria {
            latest_arrival: self.latest_arrival,
            latest_departure: self.latest_departure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn t(s: &str) -> NaiveTime {
        parse_clock(s).unwrap()
    }

    #[test]
    fn test_station_lookup() {
        assert_eq!(Station::parse("taipei"), Some(Station::Taipei));
        assert_eq!(Station::parse(" 臺北 "), Some(Station::Taipei));
        assert_eq!(Station::parse("左營"), Some(Station::Zuouing));
        assert_eq!(Station::parse("Zuoying"), Some(Station::Zuouing));
        assert_eq!(Station::parse("7"), Some(Station::Taichung));
        assert_eq!(Station::parse("13"), None);
        assert_eq!(Station::parse("Kaohsiung"), None);
        assert_eq!(Station::Nangang.id(), 1);
        assert_eq!(Station::Zuouing.id(), 12);
    }

    #[test]
    fn test_time_slot_encoding() {
        assert_eq!(encode_time_slot(t("00:10")), "1201A");
        assert_eq!(encode_time_slot(t("00:45")), "1230A");
        assert_eq!(encode_time_slot(t("10:00")), "1000A");
        assert_eq!(encode_time_slot(t("06:31")), "630A");
        assert_eq!(encode_time_slot(t("12:05")), "1200N");
        assert_eq!(encode_time_slot(t("12:30")), "1230P");
        assert_eq!(encode_time_slot(t("16:59")), "430P");
    }

    #[test]
    fn test_ticket_amounts_default_to_one_adult() {
        let mut trip = fixtures::trip_selection();
        trip.tickets = TicketCounts::default();
        assert_eq!(trip.ticket_amounts(), ["1F", "0H", "0W", "0E", "0P", "0T"]);
        assert_eq!(trip.passenger_count(), 1);

        trip.tickets = TicketCounts {
            adult: 2,
            elder: 1,
            ..Default::default()
        };
        assert_eq!(trip.ticket_amounts(), ["2F", "0H", "0W", "1E", "0P", "0T"]);
    }

    #[test]
    fn test_validate_ticket_limit() {
        let mut trip = fixtures::trip_selection();
        trip.tickets = TicketCounts {
            adult: 8,
            child: 3,
            ..Default::default()
        };
        let err = trip.validate().unwrap_err();
        assert!(err.contains("at most 10"));
    }

    #[test]
    fn test_validate_latest_arrival_after_outbound() {
        let mut trip = fixtures::trip_selection();
        trip.outbound_time = t("10:00");
        trip.latest_arrival = Some(t("09:30"));
        assert!(trip.validate().is_err());

        trip.train_no = Some("0803".to_string());
        assert!(trip.validate().is_ok());
    }

    #[test]
    fn test_validate_tax_id() {
        let mut trip = fixtures::trip_selection();
        trip.passenger.tax_id = Some("12345678".to_string());
        assert!(trip.validate().is_err());
        trip.passenger.tax_id = Some("04595257".to_string());
        assert!(trip.validate().is_ok());
    }

    #[test]
    fn test_from_config() {
        let config: TripConfig = toml::from_str(
            r#"
start_station = "台北"
dest_station = "Zuouing"
outbound_date = "2026-11-02"
outbound_time = "08:15"
train_no = "  "
"#,
        )
        .unwrap();
        let trip = TripSelection::from_config(&config).unwrap();
        assert_eq!(trip.start, Station::Taipei);
        assert_eq!(trip.date_field(), "2026/11/02");
        assert_eq!(trip.time_slot(), "800A");
        assert!(trip.train_no.is_none());
    }

    #[test]
    fn test_from_config_rejects_unknown_station() {
        let config: TripConfig = toml::from_str(
            r#"
start_station = "Hualien"
dest_station = "Zuouing"
outbound_date = "2026-11-02"
"#,
        )
        .unwrap();
        let err = TripSelection::from_config(&config).unwrap_err();
        assert!(err.contains("Hualien"));
    }
}
