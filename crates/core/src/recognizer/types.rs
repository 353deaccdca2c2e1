//! Recognizer types and traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A challenge answer: exactly four characters from `A-Z0-9`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChallengeCode(String);

impl ChallengeCode {
    pub const LEN: usize = 4;

    /// Normalize raw engine output.
    ///
    /// Non-alphanumerics are dropped and letters upper-cased; anything that
    /// does not leave exactly four characters is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let code: String = raw
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        (code.len() == Self::LEN).then_some(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChallengeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Recognition engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Specialized,
    Vision,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Specialized => "specialized",
            Engine::Vision => "vision",
        }
    }
}

/// One engine's well-formed answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub code: ChallengeCode,
    pub engine: Engine,
}

/// The code chosen for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consensus {
    pub code: ChallengeCode,
    /// Both engines produced this code.
    pub agreement: bool,
    /// The engines disagreed and the vision engine settled it.
    pub arbitration: bool,
    /// Engine whose answer was used.
    pub source: Engine,
}

impl Consensus {
    pub fn agreed(code: ChallengeCode) -> Self {
        Self {
            code,
            agreement: true,
            arbitration: false,
            source: Engine::Specialized,
        }
    }

    pub fn arbitrated(code: ChallengeCode) -> Self {
        Self {
            code,
            agreement: false,
            arbitration: true,
            source: Engine::Vision,
        }
    }

    pub fn single(result: RecognitionResult) -> Self {
        Self {
            code: result.code,
            agreement: false,
            arbitration: false,
            source: result.engine,
        }
    }
}

/// No code could be produced for a challenge.
#[derive(Debug, Clone, Error)]
pub enum RecognitionFailure {
    #[error("challenge image unavailable: {0}")]
    ImageUnavailable(String),

    #[error("no engine produced a well-formed code")]
    NoCode,
}

/// Errors from a recognition engine.
#[derive(Debug, Clone, Error)]
pub enum RecognizerError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Not configured")]
    NotConfigured,
}

/// An OCR service trained on this challenge style.
#[async_trait]
pub trait CodeRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Raw text read from the image, if any.
    async fn recognize(&self, image: &[u8]) -> Result<Option<String>, RecognizerError>;
}

/// A general vision model driven by a prompt.
#[async_trait]
pub trait VisionRecognizer: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, image: &[u8], prompt: &str)
        -> Result<Option<String>, RecognizerError>;
}
