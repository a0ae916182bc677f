use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dialogue {
    pub character: String,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
    pub story: String,
}

/// One narrative page. Created fresh by the writer stage on every call;
/// the caller resubmits `history` to continue a serial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub page: u32,
    pub story: String,
    pub dialogues: Vec<Dialogue>,
    pub choices: Vec<Choice>,
    pub history: Vec<HistoryEntry>,
    pub seed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_choice: Option<String>,
}

/// Narrative fields the model (or the fallback generator) produces before
/// the writer stamps page number, history and seed onto them.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryParts {
    pub story: String,
    pub dialogues: Vec<Dialogue>,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub panel: u32,
    pub description: String,
    pub focus: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IllustrationPlan {
    pub panel_layout: Vec<Panel>,
    pub art_direction: String,
    pub color_palette: String,
    pub lighting: String,
    pub image_prompt: String,
    pub sound_effects: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MimeType {
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/webp")]
    Webp,
}

impl MimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::Png => "image/png",
            MimeType::Jpeg => "image/jpeg",
            MimeType::Webp => "image/webp",
        }
    }

    /// Unknown mime strings degrade to PNG rather than failing.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "image/jpeg" | "image/jpg" => MimeType::Jpeg,
            "image/webp" => MimeType::Webp,
            _ => MimeType::Png,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MimeType::Png => "png",
            MimeType::Jpeg => "jpg",
            MimeType::Webp => "webp",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub mime_type: MimeType,
    pub metadata: BTreeMap<String, String>,
    pub fallback_used: bool,
}

/// Normalized output of one stage invocation, as assembled by the director.
/// Binary bodies are carried as a base64 descriptor so the whole report
/// stays JSON-serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    #[serde(rename = "agent")]
    pub stage: String,
    pub content_type: String,
    pub metadata: Map<String, Value>,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorKind {
    /// Invoking the stage itself failed (unreachable, crashed).
    InvocationFailed,
    /// The stage responded but its body was not a JSON object.
    InvalidPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineError {
    pub stage: String,
    pub kind: PipelineErrorKind,
    pub details: String,
}

/// Final pipeline outcome: either all three stage results, or an error
/// descriptor plus whatever upstream stages completed before the failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer: Option<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illustrator: Option<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PipelineError>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.writer.is_some() && self.illustrator.is_some() && self.image.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_wire_shape() {
        let page = Page {
            page: 2,
            story: "Webs everywhere.".to_string(),
            dialogues: vec![Dialogue {
                character: "Spider-Man".to_string(),
                line: "Hold on!".to_string(),
            }],
            choices: vec![
                Choice { id: "a".to_string(), label: "A".to_string() },
                Choice { id: "b".to_string(), label: "B".to_string() },
            ],
            history: vec![HistoryEntry { page: 1, choice: None, story: "Intro.".to_string() }],
            seed: 42,
            previous_choice: Some("a".to_string()),
        };

        let value = serde_json::to_value(&page).unwrap();
        assert_eq!(value["page"], 2);
        assert_eq!(value["previous_choice"], "a");
        assert!(value["history"][0].get("choice").is_none());

        let back: Page = serde_json::from_value(value).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn test_mime_type_lenient() {
        assert_eq!(MimeType::parse_lenient("image/jpeg"), MimeType::Jpeg);
        assert_eq!(MimeType::parse_lenient("image/webp"), MimeType::Webp);
        assert_eq!(MimeType::parse_lenient("application/pdf"), MimeType::Png);
        assert_eq!(MimeType::Jpeg.extension(), "jpg");
    }

    #[test]
    fn test_report_skips_absent_stages() {
        let report = PipelineReport {
            error: Some(PipelineError {
                stage: "writer".to_string(),
                kind: PipelineErrorKind::InvocationFailed,
                details: "boom".to_string(),
            }),
            ..Default::default()
        };

        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("writer").is_none());
        assert_eq!(value["error"]["kind"], "invocation_failed");
        assert!(!report.is_success());
    }

    #[test]
    fn test_stage_result_uses_agent_key() {
        let result = StageResult {
            stage: "writer".to_string(),
            content_type: "application/json".to_string(),
            metadata: Map::new(),
            body: serde_json::json!({"page": 1}),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["agent"], "writer");
    }
}
