//! Recognition engine clients.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::{
    ChallengeCode, CodeRecognizer, RecognizerError, SpecializedConfig, VisionConfig,
    VisionRecognizer,
};

/// Prompt for reading a challenge.
pub const RECOGNITION_PROMPT: &str = "Read the 4 characters in this CAPTCHA image. \
Output EXACTLY 4 characters (A-Z, 0-9) ONLY. No spaces, no explanation.";

const SYSTEM_PROMPT: &str = "You are a CAPTCHA recognition expert. The CAPTCHA contains \
exactly 4 characters, uppercase letters A-Z and digits 0-9. Reply with only those 4 characters.";

/// Prompt asking the vision engine to settle a disagreement.
pub fn arbitration_prompt(specialized: &ChallengeCode, vision: &ChallengeCode) -> String {
    format!(
        "Two recognition systems produced conflicting answers for this 4-character CAPTCHA.\n\
System A (specialized OCR): {}\n\
System B (AI vision): {}\n\n\
Look at the image carefully, especially where the answers differ. \
Common confusions: 0/O, 1/I, 5/S, 8/B, 2/Z, 6/G, 9/P.\n\
Output ONLY the correct 4-character code.",
        specialized, vision
    )
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, RecognizerError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RecognizerError::Http(e.to_string()))
}

async fn api_error(response: reqwest::Response) -> RecognizerError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    RecognizerError::Api { status, message }
}

// ============================================================================
// Specialized OCR
// ============================================================================

/// Client of the holey.cc THSRC OCR service.
pub struct HoleyOcr {
    client: reqwest::Client,
    endpoint: String,
}

impl HoleyOcr {
    pub fn new(config: &SpecializedConfig) -> Result<Self, RecognizerError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct HoleyRequest<'a> {
    base64_str: &'a str,
}

#[derive(Debug, Deserialize)]
struct HoleyResponse {
    data: Option<String>,
}

#[async_trait]
impl CodeRecognizer for HoleyOcr {
    fn name(&self) -> &str {
        "holey"
    }

    async fn recognize(&self, image: &[u8]) -> Result<Option<String>, RecognizerError> {
        let encoded = URL_SAFE_NO_PAD.encode(image);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&HoleyRequest {
                base64_str: &encoded,
            })
            .send()
            .await
            .map_err(|e| RecognizerError::Http(e.to_string()))?;

        if response.status().as_u16() != 200 {
            return Err(api_error(response).await);
        }

        let parsed: HoleyResponse = response
            .json()
            .await
            .map_err(|e| RecognizerError::Json(e.to_string()))?;
        Ok(parsed.data)
    }
}

// ============================================================================
// Gemini
// ============================================================================

/// Google Gemini vision client.
pub struct GeminiVision {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
    max_tokens: u32,
}

impl GeminiVision {
    pub fn new(config: &VisionConfig) -> Result<Self, RecognizerError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(RecognizerError::NotConfigured)?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            model: config.model().to_string(),
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            max_tokens: config.max_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.api_base.trim_end_matches('/'),
            self.model,
            urlencoding::encode(&self.api_key)
        )
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    Image {
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[async_trait]
impl VisionRecognizer for GeminiVision {
    fn name(&self) -> &str {
        &self.model
    }

    async fn recognize(
        &self,
        image: &[u8],
        prompt: &str,
    ) -> Result<Option<String>, RecognizerError> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text {
                        text: prompt.to_string(),
                    },
                    GeminiPart::Image {
                        inline_data: GeminiInlineData {
                            mime_type: "image/png".to_string(),
                            data: STANDARD.encode(image),
                        },
                    },
                ],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: 0.1,
                top_p: 0.1,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| RecognizerError::Http(e.to_string()))?;

        if response.status().as_u16() != 200 {
            return Err(api_error(response).await);
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| RecognizerError::Json(e.to_string()))?;

        Ok(parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|content| {
                content.parts.into_iter().find_map(|part| match part {
                    GeminiPart::Text { text } => Some(text),
                    GeminiPart::Image { .. } => None,
                })
            }))
    }
}

// ============================================================================
// OpenAI
// ============================================================================

/// OpenAI chat completions client with image input.
pub struct OpenAiVision {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
}

impl OpenAiVision {
    pub fn new(config: &VisionConfig) -> Result<Self, RecognizerError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(RecognizerError::NotConfigured)?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key,
            model: config.model().to_string(),
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[async_trait]
impl VisionRecognizer for OpenAiVision {
    fn name(&self) -> &str {
        &self.model
    }

    async fn recognize(
        &self,
        image: &[u8],
        prompt: &str,
    ) -> Result<Option<String>, RecognizerError> {
        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(image));
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": prompt },
                        { "type": "image_url", "image_url": { "url": data_url, "detail": "high" } }
                    ]
                }
            ],
            "max_tokens": 10,
            "temperature": 0
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.api_base.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RecognizerError::Http(e.to_string()))?;

        if response.status().as_u16() != 200 {
            return Err(api_error(response).await);
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| RecognizerError::Json(e.to_string()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}
