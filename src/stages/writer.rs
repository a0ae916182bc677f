use crate::coerce::{coerce_choices, coerce_dialogues, parse_object, value_to_string};
use crate::fallback::{assemble_page, fallback_story};
use crate::genai::GenerativeClient;
use crate::model::{HistoryEntry, Page, StoryParts};
use log::{error, info, warn};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are the narrative director for a choose-your-own-adventure Spider-Man comic. \
    Always answer with a single JSON object that matches this schema: {\
    'story': string describing the cinematic scene in 3-5 sentences, \
    'dialogues': list of objects with keys 'character' and 'line', and \
    'choices': list of exactly two objects with keys 'id' (kebab-case) and 'label'. \
    Set the tone to upbeat heroism with quips and high stakes. Keep every dialogue \
    line under 25 words. Never include markdown fencing or commentary outside the JSON object.";

const INTRO_INSTRUCTIONS: &str = "Start a brand-new Spider-Man adventure with a surprising inciting incident in New York City. \
    Invent an original villain motivation or anomaly. End with a sharp cliffhanger that naturally \
    leads into both choices.";

const CONTINUATION_INSTRUCTIONS: &str = "Continue the serialized story using the provided history and the player's latest choice. \
    Reference the most recent events, keep continuity tight, and escalate stakes. Close with \
    a new cliffhanger that matches both next-step choices.";

fn page_schema() -> Value {
    json!({
        "title": "StoryPageSchema",
        "type": "object",
        "required": ["story", "dialogues", "choices"],
        "properties": {
            "story": {"type": "string", "minLength": 1},
            "dialogues": {
                "type": "array",
                "minItems": 1,
                "maxItems": 8,
                "items": {
                    "type": "object",
                    "required": ["character", "line"],
                    "properties": {
                        "character": {"type": "string"},
                        "line": {"type": "string"}
                    }
                }
            },
            "choices": {
                "type": "array",
                "minItems": 2,
                "maxItems": 2,
                "items": {
                    "type": "object",
                    "required": ["id", "label"],
                    "properties": {
                        "id": {"type": "string"},
                        "label": {"type": "string"}
                    }
                }
            }
        }
    })
}

pub struct WriterStage {
    client: Arc<dyn GenerativeClient>,
}

impl WriterStage {
    pub fn new(client: Arc<dyn GenerativeClient>) -> Self {
        Self { client }
    }

    /// Produces the next page from the caller-supplied history and branch.
    /// This operation has no error case: every failure of the external call
    /// or its output is absorbed into fallback synthesis.
    pub async fn produce_next_page(&self, payload: &Value) -> Page {
        let payload = super::payload_object(payload);

        let history = extract_history(payload.get("history"));
        let choice = payload
            .get("choice")
            .filter(|v| !v.is_null())
            .map(value_to_string)
            .filter(|c| !c.is_empty());

        // One seed per run; it threads through coercion and fallback so a
        // single page is internally reproducible.
        let seed: u32 = rand::rng().random();
        let prompt = build_prompt(&history, choice.as_deref(), seed);

        let parts = match self.client.generate(SYSTEM_PROMPT, &prompt, Some(&page_schema())).await {
            Ok(raw) => coerce_model_payload(&raw, seed),
            Err(e) => {
                error!("writer generative call failed: {:#}", e);
                fallback_story(seed)
            }
        };

        assemble_page(parts, &history, choice, seed)
    }
}

fn extract_history(raw: Option<&Value>) -> Vec<HistoryEntry> {
    let items = match raw {
        Some(Value::Array(items)) => items,
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|entry| match serde_json::from_value::<HistoryEntry>(entry.clone()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("dropping malformed history entry: {}", e);
                None
            }
        })
        .collect()
}

fn build_prompt(history: &[HistoryEntry], choice: Option<&str>, seed: u32) -> String {
    let recent: Vec<&HistoryEntry> = history.iter().rev().take(5).rev().collect();
    let mode = if history.is_empty() { "intro" } else { "continuation" };
    let guidance = if history.is_empty() { INTRO_INSTRUCTIONS } else { CONTINUATION_INSTRUCTIONS };

    let frame = json!({
        "random_seed": seed,
        "history": recent,
        "latest_choice": choice,
        "request_type": mode,
    });

    format!(
        "Guidance: {}\nUse the JSON below as your context and craft the next page.\nContext:{}",
        guidance, frame
    )
}

fn coerce_model_payload(raw: &str, seed: u32) -> StoryParts {
    let map = match parse_object(raw) {
        Some(map) => map,
        None => {
            warn!("falling back due to writer parse failure");
            return fallback_story(seed);
        }
    };

    let story = map.get("story").map(value_to_string).unwrap_or_default();
    if story.is_empty() {
        info!("model omitted story text; using fallback narrative");
        return fallback_story(seed);
    }

    StoryParts {
        story,
        dialogues: coerce_dialogues(map.get("dialogues")),
        choices: coerce_choices(map.get("choices"), seed),
    }
}
