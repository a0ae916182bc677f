use crate::config::Config;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Capability over the external generative service. `generate` returns the
/// model's raw text (the caller owns parsing and coercion); `generate_media`
/// returns the raw response document so the caller can probe it for inline
/// binary data.
#[async_trait]
pub trait GenerativeClient: Send + Sync + Debug {
    async fn generate(&self, system: &str, user: &str, schema: Option<&Value>) -> Result<String>;
    async fn generate_media(&self, prompt: &str) -> Result<Value>;
}

pub fn create_client(config: &Config) -> Result<Arc<dyn GenerativeClient>> {
    if config.genai.api_key.is_empty() {
        return Err(anyhow!("GOOGLE_API_KEY environment variable not set."));
    }
    Ok(Arc::new(GeminiClient::new(config)?))
}

#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    text_model: String,
    image_model: String,
    client: reqwest::Client,
    limiter: Arc<Semaphore>,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self> {
        // The service is a shared, rate-limited resource: every outbound call
        // is bounded by the request timeout and gated by the semaphore.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.genai.request_timeout_seconds))
            .build()?;

        Ok(Self {
            api_key: config.genai.api_key.clone(),
            text_model: config.genai.text_model.clone(),
            image_model: config.genai.image_model.clone(),
            client,
            limiter: Arc::new(Semaphore::new(config.genai.max_concurrent_requests.max(1))),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            model, self.api_key
        )
    }

    /// Sends one generateContent call and returns the raw response document.
    async fn post(&self, model: &str, request: &GeminiRequest) -> Result<Value> {
        let _permit = self.limiter.acquire().await?;

        let resp = self
            .client
            .post(self.endpoint(model))
            .json(request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let document: Value = serde_json::from_str(&response_text)
            .map_err(|e| anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text))?;

        if let Some(message) = document.pointer("/error/message").and_then(Value::as_str) {
            return Err(anyhow!("Gemini API returned error: {}", message));
        }

        Ok(document)
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GeminiRequest {
    fn from_prompt(user: &str, system: &str, schema: Option<&Value>) -> Self {
        Self {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text: user.to_string() }],
            }],
            system_instruction: (!system.is_empty()).then(|| GeminiSystemInstruction {
                parts: vec![GeminiPart { text: system.to_string() }],
            }),
            generation_config: schema.map(|schema| GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: schema.clone(),
            }),
        }
    }
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: Value,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl GenerativeClient for GeminiClient {
    async fn generate(&self, system: &str, user: &str, schema: Option<&Value>) -> Result<String> {
        let request = GeminiRequest::from_prompt(user, system, schema);
        let document = self.post(&self.text_model, &request).await?;
        let result: GeminiResponse = serde_json::from_value(document)
            .map_err(|e| anyhow!("Unexpected Gemini response shape: {}", e))?;

        let candidates = result.candidates.unwrap_or_default();
        let mut fragments = Vec::new();
        for candidate in &candidates {
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    if let Some(text) = &part.text {
                        if !text.is_empty() {
                            fragments.push(text.clone());
                        }
                    }
                }
            }
        }

        if fragments.is_empty() {
            let reason = candidates
                .first()
                .and_then(|c| c.finish_reason.as_deref())
                .unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }

        Ok(fragments.join("\n"))
    }

    async fn generate_media(&self, prompt: &str) -> Result<Value> {
        let request = GeminiRequest::from_prompt(prompt, "", None);
        // Handed back raw: the image stage owns probing the wrapping shapes
        // for inline binary data.
        self.post(&self.image_model, &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_parsing_safety_block() {
        // Blocked generations come back with no content at all.
        let json = r#"{
            "candidates": [
                {
                    "finishReason": "SAFETY",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let candidate = &result.candidates.as_ref().unwrap()[0];

        assert!(candidate.content.is_none());
        assert_eq!(candidate.finish_reason.as_deref(), Some("SAFETY"));
    }

    #[test]
    fn test_response_parsing_empty_parts() {
        let json = r#"{
            "candidates": [
                {
                    "content": { "role": "model" },
                    "finishReason": "STOP",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let candidate = &result.candidates.as_ref().unwrap()[0];

        assert!(candidate.content.is_some());
        assert!(candidate.content.as_ref().unwrap().parts.is_empty());
    }

    #[test]
    fn test_response_parsing_success() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [
                            { "text": "Hello world" }
                        ],
                        "role": "model"
                    },
                    "finishReason": "STOP",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let candidate = &result.candidates.as_ref().unwrap()[0];

        assert_eq!(
            candidate.content.as_ref().unwrap().parts[0].text.as_deref(),
            Some("Hello world")
        );
    }

    #[test]
    fn test_response_tolerates_inline_data_parts() {
        // Image generations carry inline_data instead of text; the typed view
        // must not choke on them.
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [
                            { "inline_data": { "mime_type": "image/png", "data": "QUJD" } }
                        ]
                    }
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let candidate = &result.candidates.as_ref().unwrap()[0];
        assert!(candidate.content.as_ref().unwrap().parts[0].text.is_none());
    }

    #[test]
    fn test_request_carries_schema_hint() {
        let schema = json!({"type": "object", "required": ["story"]});
        let request = GeminiRequest::from_prompt("tell me a story", "be brief", Some(&schema));
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["contents"][0]["parts"][0]["text"], "tell me a story");
        assert_eq!(value["system_instruction"]["parts"][0]["text"], "be brief");
        assert_eq!(value["generation_config"]["response_mime_type"], "application/json");
        assert_eq!(value["generation_config"]["response_schema"]["required"][0], "story");
    }

    #[test]
    fn test_request_omits_empty_sections() {
        let request = GeminiRequest::from_prompt("render this", "", None);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("system_instruction").is_none());
        assert!(value.get("generation_config").is_none());
    }
}
