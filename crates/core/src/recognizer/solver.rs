//! Two-engine challenge solving with arbitration.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::engines::{arbitration_prompt, RECOGNITION_PROMPT};
use super::{
    ChallengeCode, CodeRecognizer, Consensus, Engine, PrimaryEngine, RecognitionFailure,
    RecognitionResult, VisionRecognizer,
};
use crate::metrics;
use crate::session::{Challenge, Session};
use crate::transport::HttpRequest;

/// Resolves challenges by consulting both engines.
pub struct ChallengeSolver {
    specialized: Option<Arc<dyn CodeRecognizer>>,
    vision: Option<Arc<dyn VisionRecognizer>>,
    primary: PrimaryEngine,
    image_timeout: Duration,
}

impl ChallengeSolver {
    pub fn new(primary: PrimaryEngine) -> Self {
        Self {
            specialized: None,
            vision: None,
            primary,
            image_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_specialized(mut self, engine: Arc<dyn CodeRecognizer>) -> Self {
        self.specialized = Some(engine);
        self
    }

    pub fn with_vision(mut self, engine: Arc<dyn VisionRecognizer>) -> Self {
        self.vision = Some(engine);
        self
    }

    pub fn with_image_timeout(mut self, timeout: Duration) -> Self {
        self.image_timeout = timeout;
        self
    }

    pub fn has_engines(&self) -> bool {
        self.specialized.is_some() || self.vision.is_some()
    }

    /// Fetch the challenge image through the session and solve it.
    pub async fn solve(
        &self,
        session: &Session,
        challenge: &Challenge,
    ) -> Result<Consensus, RecognitionFailure> {
        let request = HttpRequest::get(&challenge.locator).with_timeout(self.image_timeout);
        let response = session
            .execute(request)
            .await
            .map_err(|e| RecognitionFailure::ImageUnavailable(e.to_string()))?;

        if !response.is_success() {
            return Err(RecognitionFailure::ImageUnavailable(format!(
                "HTTP {}",
                response.status
            )));
        }
        if response.body.is_empty() {
            return Err(RecognitionFailure::ImageUnavailable("empty body".to_string()));
        }

        self.solve_image(&response.body).await
    }

    /// Solve from image bytes.
    pub async fn solve_image(&self, image: &[u8]) -> Result<Consensus, RecognitionFailure> {
        let specialized = self.read_specialized(image).await;
        let vision = self.read_vision(image).await;

        let consensus = match (specialized, vision) {
            (Some(a), Some(b)) if a.code == b.code => {
                debug!(code = %a.code, "Engines agree");
                metrics::CONSENSUS.with_label_values(&["agreed"]).inc();
                Consensus::agreed(a.code)
            }
            (Some(a), Some(b)) => {
                warn!(specialized = %a.code, vision = %b.code, "Engines disagree, arbitrating");
                self.arbitrate(image, a, b).await
            }
            (Some(only), None) | (None, Some(only)) => {
                metrics::CONSENSUS.with_label_values(&["single"]).inc();
                Consensus::single(only)
            }
            (None, None) => {
                metrics::CONSENSUS.with_label_values(&["failed"]).inc();
                return Err(RecognitionFailure::NoCode);
            }
        };

        info!(
            code = %consensus.code,
            source = consensus.source.as_str(),
            agreement = consensus.agreement,
            arbitration = consensus.arbitration,
            "Challenge solved"
        );
        Ok(consensus)
    }

    async fn read_specialized(&self, image: &[u8]) -> Option<RecognitionResult> {
        let engine = self.specialized.as_ref()?;
        let raw = engine.recognize(image).await;
        accept(Engine::Specialized, engine.name(), raw)
    }

    async fn read_vision(&self, image: &[u8]) -> Option<RecognitionResult> {
        let engine = self.vision.as_ref()?;
        let raw = engine.recognize(image, RECOGNITION_PROMPT).await;
        accept(Engine::Vision, engine.name(), raw)
    }

    async fn arbitrate(
        &self,
        image: &[u8],
        specialized: RecognitionResult,
        vision: RecognitionResult,
    ) -> Consensus {
        if let Some(engine) = &self.vision {
            let prompt = arbitration_prompt(&specialized.code, &vision.code);
            match engine.recognize(image, &prompt).await {
                Ok(Some(raw)) => match ChallengeCode::parse(&raw) {
                    Some(code) => {
                        metrics::CONSENSUS.with_label_values(&["arbitrated"]).inc();
                        return Consensus::arbitrated(code);
                    }
                    None => warn!(raw = %raw.trim(), "Arbitration answer malformed"),
                },
                Ok(None) => warn!("Arbitration returned nothing"),
                Err(e) => warn!(error = %e, "Arbitration failed"),
            }
        }

        metrics::CONSENSUS.with_label_values(&["fallback"]).inc();
        let chosen = match self.primary {
            PrimaryEngine::Specialized => specialized,
            PrimaryEngine::Vision => vision,
        };
        Consensus::single(chosen)
    }
}

fn accept(
    engine: Engine,
    name: &str,
    raw: Result<Option<String>, super::RecognizerError>,
) -> Option<RecognitionResult> {
    let outcome = match raw {
        Ok(Some(text)) => match ChallengeCode::parse(&text) {
            Some(code) => {
                debug!(engine = engine.as_str(), name, code = %code, "Engine answered");
                metrics::RECOGNITIONS
                    .with_label_values(&[engine.as_str(), "code"])
                    .inc();
                return Some(RecognitionResult { code, engine });
            }
            None => {
                warn!(engine = engine.as_str(), name, raw = %text.trim(), "Malformed engine answer");
                "malformed"
            }
        },
        Ok(None) => {
            debug!(engine = engine.as_str(), name, "Engine returned nothing");
            "empty"
        }
        Err(e) => {
            warn!(engine = engine.as_str(), name, error = %e, "Engine failed");
            "error"
        }
    };
    metrics::RECOGNITIONS
        .with_label_values(&[engine.as_str(), outcome])
        .inc();
    None
}
