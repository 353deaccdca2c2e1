//! Seat reservation.

mod config;
mod forms;
mod pipeline;
mod selection;
mod trip;

pub use config::{
    CarType, PassengerConfig, SeatPreference, SelectionConfig, SelectionModeConfig, TicketCounts,
    TripConfig,
};
pub use forms::{confirm_request, query_request, select_request};
pub use pipeline::{BookingOutcome, BookingPipeline};
pub use selection::{
    log_candidates, parse_candidates, select_candidate, Candidate, NoOffering, SelectionCriteria,
    SelectionMode, TRAIN_GROUP,
};
pub use trip::{encode_time_slot, parse_clock, parse_travel_date, Station, TripSelection};
