//! The three pipeline stages. Each wraps one external generative call with
//! schema coercion and fallback, and must produce a valid payload even when
//! invoked in isolation.

pub mod illustrator;
pub mod image;
pub mod writer;

pub use illustrator::IllustratorStage;
pub use image::ImageStage;
pub use writer::WriterStage;

use serde_json::{Map, Value};

pub const WRITER_STAGE: &str = "writer";
pub const ILLUSTRATOR_STAGE: &str = "illustrator";
pub const IMAGE_STAGE: &str = "image-generator";

/// Lenient inbound decode: structured first, then text with a second
/// structured attempt, then an empty mapping. No field is required; an empty
/// request is a valid "start a new story" request.
pub fn read_payload(raw: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => return map,
        Ok(Value::String(text)) => {
            // JSON-encoded text body; retry the inner text as structured.
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text.trim()) {
                return map;
            }
        }
        Ok(other) => {
            log::debug!("inbound payload was JSON but not an object: {}", other);
        }
        Err(_) => {
            if let Ok(text) = std::str::from_utf8(raw) {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text.trim()) {
                    return map;
                }
                log::debug!("inbound payload was not structured: {:?}", text.trim());
            }
        }
    }
    Map::new()
}

/// Stage payloads may arrive as anything; only object shapes carry fields.
pub(crate) fn payload_object(value: &Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
