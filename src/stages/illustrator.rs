use crate::coerce::{coerce_panels, coerce_sound_effects, parse_object, value_to_string};
use crate::fallback::fallback_illustration;
use crate::genai::GenerativeClient;
use crate::model::IllustrationPlan;
use log::{error, info, warn};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are the cinematic art director for a Spider-Man comic. \
    Given story context, respond with the illustration of comic page. \
    Generate a panel layout of up to 3 panels, each with a 'panel' number, description, and focus. \
    Next give an art direction that guides composition and perspective. \
    Also provide a 'color_palette' that defines the dominant colors and mood lighting. \
    Generate an image prompt that is a concise description of the entire page for an image generator. \
    Finally, suggest up to 4 'sound_effects' (stylized SFX strings). \
    Keep everything faithful to Spider-Man's tone.";

fn plan_schema() -> Value {
    json!({
        "title": "IllustrationPageSchema",
        "type": "object",
        "required": [
            "panel_layout",
            "art_direction",
            "color_palette",
            "lighting",
            "image_prompt",
            "sound_effects"
        ],
        "properties": {
            "panel_layout": {
                "type": "array",
                "minItems": 1,
                "maxItems": 3,
                "items": {
                    "type": "object",
                    "required": ["panel", "description", "focus"],
                    "properties": {
                        "panel": {"type": "integer", "minimum": 1},
                        "description": {"type": "string", "minLength": 1},
                        "focus": {"type": "string", "minLength": 1}
                    }
                }
            },
            "art_direction": {"type": "string", "minLength": 1},
            "color_palette": {"type": "string", "minLength": 1},
            "lighting": {"type": "string", "minLength": 1},
            "image_prompt": {"type": "string", "minLength": 1},
            "sound_effects": {
                "type": "array",
                "minItems": 1,
                "maxItems": 4,
                "items": {"type": "string", "minLength": 1, "maxLength": 18}
            }
        }
    })
}

/// Illustrator stage body: the page echoed back for the next stage plus the
/// plan derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct PlanEnvelope {
    pub page: Value,
    pub illustration: IllustrationPlan,
}

pub struct IllustratorStage {
    client: Arc<dyn GenerativeClient>,
}

impl IllustratorStage {
    pub fn new(client: Arc<dyn GenerativeClient>) -> Self {
        Self { client }
    }

    /// Produces a panel/art-direction plan for a page. Tolerates incomplete
    /// or absent pages and never fails; `panel_layout` and `sound_effects`
    /// are non-empty on return.
    pub async fn produce_plan(&self, payload: &Value) -> PlanEnvelope {
        let page = super::payload_object(payload);

        let seed = page
            .get("seed")
            .and_then(Value::as_u64)
            .map(|s| s as u32)
            .unwrap_or_else(|| rand::rng().random());
        let story = page.get("story").map(value_to_string).unwrap_or_default();

        if page.is_empty() {
            error!("illustrator received empty page payload; responding with fallback");
            return PlanEnvelope {
                page: Value::Object(page),
                illustration: fallback_illustration("", seed),
            };
        }

        let prompt = build_prompt(&page);
        let illustration = match self.client.generate(SYSTEM_PROMPT, &prompt, Some(&plan_schema())).await {
            Ok(raw) => coerce_model_payload(&raw, &story, seed),
            Err(e) => {
                error!("illustrator generative call failed: {:#}", e);
                fallback_illustration(&story, seed)
            }
        };

        PlanEnvelope { page: Value::Object(page), illustration }
    }
}

fn build_prompt(page: &Map<String, Value>) -> String {
    let recent_history = page
        .get("history")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().rev().take(3).rev().cloned().collect::<Vec<_>>())
        .unwrap_or_default();

    let condensed = json!({
        "page": page.get("page"),
        "story": page.get("story"),
        "dialogues": page.get("dialogues"),
        "choices": page.get("choices"),
        "previous_choice": page.get("previous_choice"),
        "recent_history": recent_history,
    });

    format!("Context:{}", condensed)
}

fn coerce_model_payload(raw: &str, story: &str, seed: u32) -> IllustrationPlan {
    let map = match parse_object(raw) {
        Some(map) => map,
        None => {
            warn!("illustrator model output parsing failed");
            return fallback_illustration(story, seed);
        }
    };

    // Fallback is consulted field by field; synthesize it at most once.
    let mut fallback_cache: Option<IllustrationPlan> = None;
    let cached = |cache: &mut Option<IllustrationPlan>| -> IllustrationPlan {
        cache.get_or_insert_with(|| fallback_illustration(story, seed)).clone()
    };

    let mut panel_layout = coerce_panels(map.get("panel_layout"));
    if panel_layout.is_empty() {
        info!("illustrator model missing panel layout; using fallback panels");
        panel_layout = cached(&mut fallback_cache).panel_layout;
    }

    let image_prompt = map.get("image_prompt").map(value_to_string).unwrap_or_default();
    let image_prompt = if image_prompt.is_empty() {
        cached(&mut fallback_cache).image_prompt
    } else {
        image_prompt
    };

    IllustrationPlan {
        panel_layout,
        art_direction: string_or(&map, "art_direction", "Cinematic motion with heroic staging."),
        color_palette: string_or(&map, "color_palette", "Rich reds and deep blues with energy highlights."),
        lighting: string_or(&map, "lighting", "High-contrast with streaked city lights."),
        image_prompt,
        sound_effects: coerce_sound_effects(map.get("sound_effects")),
    }
}

fn string_or(map: &Map<String, Value>, key: &str, default: &str) -> String {
    let value = map.get(key).map(value_to_string).unwrap_or_default();
    if value.is_empty() { default.to_string() } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct MockClient {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockClient {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Some(reply.to_string()), prompts: Mutex::new(Vec::new()) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { reply: None, prompts: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl GenerativeClient for MockClient {
        async fn generate(&self, _system: &str, user: &str, _schema: Option<&Value>) -> Result<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.reply.clone().ok_or_else(|| anyhow!("mock generative failure"))
        }

        async fn generate_media(&self, _prompt: &str) -> Result<Value> {
            Err(anyhow!("not a media client"))
        }
    }

    fn sample_page() -> Value {
        json!({
            "page": 1,
            "story": "Spider-Man chases Mysterio across the Brooklyn Bridge. Smoke screens bloom.",
            "dialogues": [{"character": "Spider-Man", "line": "Nice fog machine."}],
            "choices": [
                {"id": "cut-the-cables", "label": "Cut the illusion projectors."},
                {"id": "web-the-smoke", "label": "Web up the smoke vents."}
            ],
            "seed": 991,
            "history": [{"page": 1, "story": "Intro."}]
        })
    }

    const VALID_PLAN: &str = r#"{
        "panel_layout": [
            {"panel": 1, "description": "Wide shot of the bridge in fog", "focus": "Spider-Man"}
        ],
        "art_direction": "Dutch angles through the mist.",
        "color_palette": "Sickly greens over steel grey.",
        "lighting": "Diffuse glow with hard rim light.",
        "image_prompt": "Spider-Man lunging through illusory fog on the Brooklyn Bridge.",
        "sound_effects": ["thwip!", "FWOOSH"]
    }"#;

    #[tokio::test]
    async fn test_valid_plan_coerced() {
        let stage = IllustratorStage::new(MockClient::replying(VALID_PLAN));

        let envelope = stage.produce_plan(&sample_page()).await;

        assert_eq!(envelope.page["page"], 1);
        assert_eq!(envelope.illustration.panel_layout.len(), 1);
        assert_eq!(envelope.illustration.sound_effects, vec!["THWIP!", "FWOOSH"]);
        assert_eq!(envelope.illustration.art_direction, "Dutch angles through the mist.");
    }

    #[tokio::test]
    async fn test_call_failure_yields_full_fallback() {
        let stage = IllustratorStage::new(MockClient::failing());

        let envelope = stage.produce_plan(&sample_page()).await;

        assert!(!envelope.illustration.panel_layout.is_empty());
        assert!(!envelope.illustration.sound_effects.is_empty());
        assert!(!envelope.illustration.image_prompt.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_is_seed_deterministic() {
        let stage = IllustratorStage::new(MockClient::failing());

        let first = stage.produce_plan(&sample_page()).await;
        let second = stage.produce_plan(&sample_page()).await;
        assert_eq!(first.illustration, second.illustration);
    }

    #[tokio::test]
    async fn test_missing_panels_backfilled_rest_kept() {
        let reply = r#"{
            "panel_layout": [],
            "art_direction": "Tight close-ups.",
            "image_prompt": "A single dramatic panel.",
            "sound_effects": ["KRAK"]
        }"#;
        let stage = IllustratorStage::new(MockClient::replying(reply));

        let envelope = stage.produce_plan(&sample_page()).await;

        assert!(!envelope.illustration.panel_layout.is_empty());
        assert_eq!(envelope.illustration.art_direction, "Tight close-ups.");
        assert_eq!(envelope.illustration.image_prompt, "A single dramatic panel.");
        assert_eq!(envelope.illustration.sound_effects, vec!["KRAK"]);
    }

    #[tokio::test]
    async fn test_empty_payload_still_produces_plan() {
        let client = MockClient::replying(VALID_PLAN);
        let stage = IllustratorStage::new(client.clone());

        let envelope = stage.produce_plan(&json!({})).await;

        // No model call happens for an empty page; the plan is pure fallback.
        assert!(client.prompts.lock().unwrap().is_empty());
        assert!(!envelope.illustration.panel_layout.is_empty());
        assert!(!envelope.illustration.sound_effects.is_empty());
    }

    #[tokio::test]
    async fn test_prompt_embeds_condensed_context() {
        let client = MockClient::replying(VALID_PLAN);
        let stage = IllustratorStage::new(client.clone());

        stage.produce_plan(&sample_page()).await;

        let prompt = client.prompts.lock().unwrap()[0].clone();
        assert!(prompt.starts_with("Context:"));
        assert!(prompt.contains("Mysterio"));
        assert!(prompt.contains("recent_history"));
    }
}
