use super::{types::Config, ConfigError};
use crate::booking::{parse_clock, TripSelection};
use crate::schedule::{utc_offset, StartAt};
use crate::service::ServiceKind;

/// Validate configuration for the service about to run.
///
/// Checks the server port, the recognizer engines, retry settings, the
/// schedule, and the section the service needs: the trip (stations, dates,
/// ticket counts, passenger ids) or at least one cancellation target.
pub fn validate_config(config: &Config, service: ServiceKind) -> Result<(), ConfigError> {
    let invalid = ConfigError::ValidationError;

    if config.server.enabled && config.server.port == 0 {
        return Err(invalid("server.port cannot be 0".to_string()));
    }

    config.recognizer.validate().map_err(invalid)?;
    config
        .retry
        .validate()
        .map_err(|e| invalid(format!("retry: {}", e)))?;

    let offset = utc_offset(config.schedule.utc_offset_hours).map_err(|e| invalid(e.to_string()))?;
    if let Some(start_at) = &config.schedule.start_at {
        StartAt::parse(start_at, chrono::Utc::now().with_timezone(&offset))
            .map_err(|e| invalid(format!("schedule.start_at: {}", e)))?;
    }

    match service {
        ServiceKind::Booking => {
            let trip = config
                .trip
                .as_ref()
                .ok_or_else(|| invalid("[trip] section is required for booking".to_string()))?;
            if let Some(value) = &trip.latest_arrival {
                parse_clock(value).map_err(|e| invalid(format!("trip.latest_arrival: {}", e)))?;
            }
            TripSelection::from_config(trip)
                .and_then(|selection| selection.validate())
                .map_err(|e| invalid(format!("trip: {}", e)))?;
        }
        ServiceKind::Cancellation => {
            let cancel = config.cancel.as_ref().ok_or_else(|| {
                invalid("[cancel] section is required for cancellation".to_string())
            })?;
            if cancel.targets().is_empty() {
                return Err(invalid(
                    "cancel: no enabled reservation with both id and pnr".to_string(),
                ));
            }
        }
    }

    Ok(())
}
