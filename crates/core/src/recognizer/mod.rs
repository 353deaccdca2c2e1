//! Challenge recognition.
//!
//! Two independent engines read each challenge: a specialized OCR service
//! ([`HoleyOcr`]) and a general vision model ([`GeminiVision`] or
//! [`OpenAiVision`]). [`ChallengeSolver`] reconciles their answers.

mod config;
mod engines;
mod solver;
mod types;

pub use config::{PrimaryEngine, RecognizerConfig, SpecializedConfig, VisionConfig, VisionProvider};
pub use engines::{arbitration_prompt, GeminiVision, HoleyOcr, OpenAiVision, RECOGNITION_PROMPT};
pub use solver::ChallengeSolver;
pub use types::*;

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Build a solver with the engines the configuration enables.
///
/// A vision section without an API key leaves that engine out.
pub fn create_solver(config: &RecognizerConfig) -> Result<ChallengeSolver, RecognizerError> {
    let mut solver = ChallengeSolver::new(config.primary)
        .with_image_timeout(Duration::from_secs(config.image_timeout_secs));

    if let Some(specialized) = config.specialized.as_ref().filter(|s| s.enabled) {
        info!(endpoint = %specialized.endpoint, "Specialized recognizer enabled");
        solver = solver.with_specialized(Arc::new(HoleyOcr::new(specialized)?));
    }

    if let Some(vision) = &config.vision {
        if vision.api_key_configured() {
            let engine: Arc<dyn VisionRecognizer> = match vision.provider {
                VisionProvider::Gemini => Arc::new(GeminiVision::new(vision)?),
                VisionProvider::OpenAi => Arc::new(OpenAiVision::new(vision)?),
            };
            info!(provider = ?vision.provider, model = vision.model(), "Vision recognizer enabled");
            solver = solver.with_vision(engine);
        } else {
            warn!(provider = ?vision.provider, "Vision recognizer has no api_key, disabled");
        }
    }

    if !solver.has_engines() {
        return Err(RecognizerError::NotConfigured);
    }
    Ok(solver)
}
