use std::sync::Arc;
use railbot_core::{Config, RunRegistry, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: SanitizedConfig,
    runs: Arc<RunRegistry>,
}

impl AppState {
    pub fn new(config: &Config, runs: Arc<RunRegistry>) -> Self {
        Self {
            config: SanitizedConfig::from(config),
            runs,
        }
    }

    pub fn sanitized_config(&self) -> &SanitizedConfig {
        &self.config
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }
}
