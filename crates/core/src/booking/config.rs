//! Trip configuration as written in the config file.

use serde::{Deserialize, Serialize};

use super::selection::SelectionMode;

/// The `[trip]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripConfig {
    /// English or Chinese station name.
    pub start_station: String,
    pub dest_station: String,
    /// `YYYY-MM-DD` or `YYYY/MM/DD`.
    pub outbound_date: String,
    /// `HH:MM`; rounded down to the half hour.
    #[serde(default = "default_outbound_time")]
    pub outbound_time: String,
    /// `HH:MM`; trains arriving later are skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_arrival: Option<String>,
    /// `HH:MM`; trains departing later are skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_departure: Option<String>,
    /// Book this train directly instead of searching by time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_no: Option<String>,
    #[serde(default)]
    pub tickets: TicketCounts,
    #[serde(default = "default_max_tickets")]
    pub max_tickets: u32,
    #[serde(default)]
    pub car_type: CarType,
    #[serde(default)]
    pub seat_preference: SeatPreference,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub passenger: PassengerConfig,
}

fn default_outbound_time() -> String {
    "10:00".to_string()
}

fn default_max_tickets() -> u32 {
    10
}

/// Tickets per fare class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCounts {
    #[serde(default)]
    pub adult: u32,
    #[serde(default)]
    pub child: u32,
    #[serde(default)]
    pub disabled: u32,
    #[serde(default)]
    pub elder: u32,
    #[serde(default)]
    pub college: u32,
    #[serde(default)]
    pub teenager: u32,
}

impl TicketCounts {
    pub fn total(&self) -> u32 {
        self.adult + self.child + self.disabled + self.elder + self.college + self.teenager
    }

    /// Counts in the site's row order: adult, child, disabled, elder,
    /// college, teenager.
    pub fn rows(&self) -> [u32; 6] {
        [
            self.adult,
            self.child,
            self.disabled,
            self.elder,
            self.college,
            self.teenager,
        ]
    }
}

/// Car class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarType {
    #[default]
    Standard,
    Business,
}

impl CarType {
    pub fn form_value(&self) -> &'static str {
        match self {
            CarType::Standard => "0",
            CarType::Business => "1",
        }
    }
}

/// Seat preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatPreference {
    #[default]
    None,
    Window,
    Aisle,
}

impl SeatPreference {
    pub fn form_value(&self) -> &'static str {
        match self {
            SeatPreference::None => "0",
            SeatPreference::Window => "1",
            SeatPreference::Aisle => "2",
        }
    }
}

/// How a train is picked from the search results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionModeConfig {
    #[default]
    Auto,
    Manual,
    /// Print the trains and stop.
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub mode: SelectionModeConfig,
    /// 1-indexed position used by manual mode.
    #[serde(default = "default_index")]
    pub index: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            mode: SelectionModeConfig::default(),
            index: default_index(),
        }
    }
}

fn default_index() -> usize {
    1
}

impl From<&SelectionConfig> for SelectionMode {
    fn from(config: &SelectionConfig) -> Self {
        match config.mode {
            SelectionModeConfig::Auto => SelectionMode::Auto,
            SelectionModeConfig::Manual => SelectionMode::Manual {
                index: config.index.max(1),
            },
            SelectionModeConfig::List => SelectionMode::ListOnly,
        }
    }
}

/// Passenger details for the confirmation stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassengerConfig {
    /// National id or passport number of the person booking.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    /// TGo membership id (a national id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tgo_id: Option<String>,
    /// Business tax id printed on the receipt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    /// Ids for disabled concession tickets, in passenger order.
    #[serde(default)]
    pub disabled_ids: Vec<String>,
    /// Ids for elder concession tickets, in passenger order.
    #[serde(default)]
    pub elder_ids: Vec<String>,
}
