//! Recognizer configuration types.

use serde::{Deserialize, Serialize};

/// Engine whose answer wins when the engines disagree and arbitration fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryEngine {
    #[default]
    Specialized,
    Vision,
}

/// Vision model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisionProvider {
    /// Google Gemini `generateContent`.
    Gemini,
    /// OpenAI chat completions with image input.
    OpenAi,
}

/// Recognizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    #[serde(default)]
    pub primary: PrimaryEngine,
    #[serde(default = "default_specialized")]
    pub specialized: Option<SpecializedConfig>,
    #[serde(default)]
    pub vision: Option<VisionConfig>,
    /// Timeout for fetching the challenge image, in seconds.
    #[serde(default = "default_image_timeout")]
    pub image_timeout_secs: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            primary: PrimaryEngine::default(),
            specialized: default_specialized(),
            vision: None,
            image_timeout_secs: default_image_timeout(),
        }
    }
}

fn default_specialized() -> Option<SpecializedConfig> {
    Some(SpecializedConfig::default())
}

fn default_image_timeout() -> u64 {
    30
}

/// Specialized OCR service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecializedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ocr_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
}

impl Default for SpecializedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_ocr_endpoint(),
            timeout_secs: default_engine_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ocr_endpoint() -> String {
    "https://ocr.holey.cc/thsrc?version=v1".to_string()
}

fn default_engine_timeout() -> u64 {
    30
}

/// General-purpose vision model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    pub provider: VisionProvider,
    /// Defaults per provider when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Without a key the engine is treated as unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    256
}

impl VisionConfig {
    pub fn model(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(model), _) => model,
            (None, VisionProvider::Gemini) => "gemini-3-flash-preview",
            (None, VisionProvider::OpenAi) => "gpt-4o",
        }
    }

    pub fn api_key_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

impl RecognizerConfig {
    pub fn specialized_enabled(&self) -> bool {
        self.specialized.as_ref().is_some_and(|s| s.enabled)
    }

    pub fn vision_available(&self) -> bool {
        self.vision.as_ref().is_some_and(VisionConfig::api_key_configured)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.specialized_enabled() && !self.vision_available() {
            return Err(
                "recognizer needs the specialized engine or a vision engine with an api_key"
                    .to_string(),
            );
        }
        if self.primary == PrimaryEngine::Vision && !self.vision_available() {
            return Err("recognizer.primary = \"vision\" requires recognizer.vision.api_key".to_string());
        }
        if let Some(vision) = &self.vision {
            if vision.max_tokens == 0 {
                return Err("recognizer.vision.max_tokens must be positive".to_string());
            }
        }
        Ok(())
    }
}
