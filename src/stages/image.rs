use crate::coerce::value_to_string;
use crate::genai::GenerativeClient;
use crate::model::{MimeType, RenderedImage};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{error, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 1x1 transparent PNG served when no image can be produced.
const FALLBACK_PIXEL: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
    0x49, 0x48, 0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
    0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00,
    0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

pub struct ImageStage {
    client: Arc<dyn GenerativeClient>,
    model_label: String,
}

impl ImageStage {
    pub fn new(client: Arc<dyn GenerativeClient>, model_label: impl Into<String>) -> Self {
        Self { client, model_label: model_label.into() }
    }

    /// Renders the page image from the illustrator's envelope. Never fails:
    /// on any problem the fixed placeholder pixel is returned with
    /// `fallback_used` set.
    pub async fn render_image(&self, payload: &Value) -> RenderedImage {
        let envelope = super::payload_object(payload);

        // The payload may be the full envelope or a bare page.
        let page = match envelope.get("page") {
            Some(Value::Object(map)) => map.clone(),
            _ => envelope.clone(),
        };
        let illustration = match envelope.get("illustration") {
            Some(Value::Object(map)) => map.clone(),
            _ => {
                error!("image stage received payload without illustration data");
                Map::new()
            }
        };

        let prompt = compose_prompt(&page, &illustration);

        let mut metadata = Map::new();
        metadata.insert("prompt".to_string(), Value::String(prompt.clone()));
        metadata.insert("model".to_string(), Value::String(self.model_label.clone()));
        metadata.insert("page".to_string(), Value::Object(page));
        metadata.insert("illustration".to_string(), Value::Object(illustration));

        let (bytes, mime_type, fallback_used) = match self.client.generate_media(&prompt).await {
            Ok(document) => match extract_image(&document) {
                Some((bytes, mime_type)) => (bytes, mime_type, false),
                None => {
                    warn!("image response missing inline image data; using fallback pixel");
                    (FALLBACK_PIXEL.to_vec(), MimeType::Png, true)
                }
            },
            Err(e) => {
                error!("image generation failed: {:#}", e);
                metadata.insert("error".to_string(), Value::String(format!("{:#}", e)));
                (FALLBACK_PIXEL.to_vec(), MimeType::Png, true)
            }
        };

        metadata.insert("fallback".to_string(), Value::Bool(fallback_used));

        RenderedImage {
            bytes,
            mime_type,
            metadata: sanitize_metadata(&metadata),
            fallback_used,
        }
    }
}

/// Builds the rendering prompt. Pure function of the page and plan; absent
/// fields degrade to fixed generic phrases.
pub fn compose_prompt(page: &Map<String, Value>, illustration: &Map<String, Value>) -> String {
    let story = field_or(page, "story", "Spider-Man faces an unexpected threat in New York City.");
    let art_direction = field_or(
        illustration,
        "art_direction",
        "Dynamic comic book action from Spider-Man's perspective.",
    );
    let color_palette = field_or(
        illustration,
        "color_palette",
        "Bold reds and blues with high-contrast highlights.",
    );
    let lighting = field_or(illustration, "lighting", "City twilight glow with dramatic shadows.");
    let image_prompt = field_or(
        illustration,
        "image_prompt",
        "Spider-Man swings through Manhattan as energy crackles around him.",
    );

    let mut sections = vec![
        "Spider-Man comic page concept art.".to_string(),
        format!("Story beat: {}", story),
        format!("Art direction: {}", art_direction),
        format!("Color palette: {}", color_palette),
        format!("Lighting: {}", lighting),
        format!("Primary focus: {}", image_prompt),
    ];

    let panels = format_panels(illustration.get("panel_layout"));
    if !panels.is_empty() {
        sections.push(format!("Panel breakdown:\n{}", panels.join("\n")));
    }

    let choices = format_choices(page.get("choices").or_else(|| illustration.get("choices")));
    if !choices.is_empty() {
        sections.push(format!("Choices presented: {}", choices.join(" | ")));
    }

    sections.push(
        "Style: dynamic Marvel comic illustration, crisp inks, expressive action, cinematic perspective."
            .to_string(),
    );

    sections.join("\n")
}

fn field_or(map: &Map<String, Value>, key: &str, default: &str) -> String {
    let value = map.get(key).map(value_to_string).unwrap_or_default();
    if value.is_empty() { default.to_string() } else { value }
}

fn format_panels(raw: Option<&Value>) -> Vec<String> {
    let items = match raw {
        Some(Value::Array(items)) => items,
        _ => return Vec::new(),
    };

    let mut panels = Vec::new();
    for entry in items.iter().take(5) {
        match entry {
            Value::Object(map) => {
                let number = map
                    .get("panel")
                    .and_then(Value::as_u64)
                    .unwrap_or(panels.len() as u64 + 1);
                let description = map.get("description").map(value_to_string).unwrap_or_default();
                let focus = map.get("focus").map(value_to_string).unwrap_or_default();
                if !description.is_empty() {
                    let focus = if focus.is_empty() { "Spider-Man".to_string() } else { focus };
                    panels.push(format!("Panel {}: {} (focus: {})", number, description, focus));
                }
            }
            Value::String(s) if !s.trim().is_empty() => {
                panels.push(format!("Panel {}: {}", panels.len() + 1, s.trim()));
            }
            _ => {}
        }
    }
    panels
}

fn format_choices(raw: Option<&Value>) -> Vec<String> {
    let items = match raw {
        Some(Value::Array(items)) => items,
        _ => return Vec::new(),
    };

    items
        .iter()
        .take(2)
        .filter_map(|choice| {
            let label = match choice {
                Value::Object(map) => map.get("label").map(value_to_string).unwrap_or_default(),
                Value::String(s) => s.trim().to_string(),
                _ => String::new(),
            };
            (!label.is_empty()).then_some(label)
        })
        .collect()
}

/// Extraction strategy over one response part, tried in priority order:
/// direct inline data, then the "data" wrapper, then the "image" wrapper.
type PartExtractor = fn(&Value) -> Option<(Vec<u8>, MimeType)>;

const PART_EXTRACTORS: [PartExtractor; 3] = [
    extract_inline_data,
    extract_data_wrapper,
    extract_image_wrapper,
];

fn extract_inline_data(part: &Value) -> Option<(Vec<u8>, MimeType)> {
    let inline = part.get("inline_data").or_else(|| part.get("inlineData"))?;
    let data = inline.get("data")?;
    let bytes = decode_bytes(data)?;
    let mime = inline
        .get("mime_type")
        .or_else(|| inline.get("mimeType"))
        .and_then(Value::as_str)
        .map(MimeType::parse_lenient)
        .unwrap_or(MimeType::Png);
    (!bytes.is_empty()).then_some((bytes, mime))
}

fn extract_data_wrapper(part: &Value) -> Option<(Vec<u8>, MimeType)> {
    extract_inline_data(part.get("data")?)
}

fn extract_image_wrapper(part: &Value) -> Option<(Vec<u8>, MimeType)> {
    extract_inline_data(part.get("image")?)
}

fn decode_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => match BASE64.decode(s) {
            Ok(bytes) => Some(bytes),
            // Some responses carry raw (non-base64) payloads in the field.
            Err(_) => Some(s.as_bytes().to_vec()),
        },
        _ => None,
    }
}

/// Walks the response document for inline image bytes, probing every part
/// with each extraction strategy in priority order.
pub fn extract_image(document: &Value) -> Option<(Vec<u8>, MimeType)> {
    let mut part_groups: Vec<&Vec<Value>> = Vec::new();

    if let Some(candidates) = document.get("candidates").and_then(Value::as_array) {
        for candidate in candidates {
            if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
                part_groups.push(parts);
            }
        }
    }
    if let Some(parts) = document.pointer("/content/parts").and_then(Value::as_array) {
        part_groups.push(parts);
    }

    for parts in part_groups {
        for part in parts {
            for extractor in PART_EXTRACTORS {
                if let Some(found) = extractor(part) {
                    return Some(found);
                }
            }
        }
    }
    None
}

/// Metadata values must be single-line text for transport: containers are
/// serialized compactly, newlines stripped, nulls and empties dropped.
pub fn sanitize_metadata(metadata: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut sanitized = BTreeMap::new();
    for (key, value) in metadata {
        if value.is_null() {
            continue;
        }
        let text = match value {
            Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
            other => value_to_string(other),
        };
        let text = text.replace(['\r', '\n'], " ").trim().to_string();
        if !text.is_empty() {
            sanitized.insert(key.clone(), text);
        }
    }
    sanitized
}
