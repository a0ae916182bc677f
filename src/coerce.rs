//! Best-effort normalization of loosely-shaped model output into the strict
//! record shapes of the data model. Every function here accepts arbitrary
//! JSON and never fails; unusable input yields an empty result or a
//! synthesized minimal default.

use crate::fallback::SeededRng;
use crate::model::{Choice, Dialogue, Panel};
use serde_json::{Map, Value};

const MAX_DIALOGUES: usize = 8;
const MAX_PANELS: usize = 5;
const MAX_SOUND_EFFECTS: usize = 4;
const MAX_SFX_CHARS: usize = 18;
const MAX_CHOICE_ID_CHARS: usize = 64;

/// Candidate pairs used to top up a choice list that came back short.
/// Drawn deterministically from the run seed so the same seed always fills
/// the same gaps.
const CHOICE_POOL: [(&str, &str); 4] = [
    ("swing-right-into-chaos", "Swing toward the source of the disturbance."),
    ("shadow-trail", "Stay hidden and trail the villain through the shadows."),
    ("shield-civilians", "Web up a barrier and protect the civilians first."),
    ("tech-diagnosis", "Scan the strange device with your suit's sensors."),
];

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

/// Parses raw model text into a JSON object after stripping fence wrapping.
/// Returns None for anything that is not an object.
pub fn parse_object(raw: &str) -> Option<Map<String, Value>> {
    let cleaned = strip_code_blocks(raw);
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => Some(map),
        Ok(other) => {
            log::warn!("model returned JSON but not an object: {}", type_name(&other));
            None
        }
        Err(e) => {
            log::debug!("model output was not parseable JSON: {}", e);
            None
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Scalar-friendly stringification: strings come through unquoted, scalars
/// via display, containers as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub fn slugify(label: &str) -> String {
    let slug = label.trim().to_lowercase().replace(' ', "-").replace('\'', "");
    truncate_chars(&slug, MAX_CHOICE_ID_CHARS)
}

pub fn coerce_dialogues(raw: Option<&Value>) -> Vec<Dialogue> {
    let mut dialogues = Vec::new();

    match raw {
        Some(Value::Object(map)) => {
            for (character, line) in map {
                let line = value_to_string(line);
                if !line.is_empty() {
                    let character = character.trim();
                    dialogues.push(Dialogue {
                        character: if character.is_empty() { "Narrator".to_string() } else { character.to_string() },
                        line,
                    });
                }
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::Object(entry) => {
                        let character = entry
                            .get("character")
                            .or_else(|| entry.get("speaker"))
                            .map(value_to_string)
                            .unwrap_or_default();
                        let line = entry
                            .get("line")
                            .or_else(|| entry.get("dialogue"))
                            .or_else(|| entry.get("text"))
                            .map(value_to_string)
                            .unwrap_or_default();
                        if !line.is_empty() {
                            dialogues.push(Dialogue {
                                character: if character.is_empty() { "Narrator".to_string() } else { character },
                                line,
                            });
                        }
                    }
                    Value::String(s) => {
                        let line = s.trim();
                        if !line.is_empty() {
                            dialogues.push(Dialogue {
                                character: "Narrator".to_string(),
                                line: line.to_string(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    if dialogues.is_empty() {
        dialogues = vec![
            Dialogue {
                character: "Spider-Man".to_string(),
                line: "Guess it's another Tuesday in the Spider-Verse.".to_string(),
            },
            Dialogue {
                character: "Narrator".to_string(),
                line: "Our hero braces himself as chaos erupts around him.".to_string(),
            },
        ];
    }

    dialogues.truncate(MAX_DIALOGUES);
    dialogues
}

/// Always returns exactly two choices with unique, non-empty ids. Gaps are
/// filled from [`CHOICE_POOL`] in an order fixed by `seed`.
pub fn coerce_choices(raw: Option<&Value>, seed: u32) -> Vec<Choice> {
    let mut choices: Vec<Choice> = Vec::new();

    if let Some(Value::Array(items)) = raw {
        for item in items {
            let (label, id) = match item {
                Value::Object(entry) => {
                    let label = entry
                        .get("label")
                        .or_else(|| entry.get("text"))
                        .or_else(|| entry.get("choice"))
                        .map(value_to_string)
                        .unwrap_or_default();
                    let id = entry
                        .get("id")
                        .or_else(|| entry.get("slug"))
                        .map(value_to_string)
                        .unwrap_or_default();
                    (label, id)
                }
                Value::String(s) => (s.trim().to_string(), String::new()),
                _ => continue,
            };

            if label.is_empty() {
                continue;
            }
            let id = if id.is_empty() { slugify(&label) } else { truncate_chars(&id, MAX_CHOICE_ID_CHARS) };
            if id.is_empty() || choices.iter().any(|c| c.id == id) {
                continue;
            }
            choices.push(Choice { id, label });
            if choices.len() == 2 {
                return choices;
            }
        }
    }

    // Short list: top it up from the fixed pool, shuffled by the run seed.
    let mut rng = SeededRng::new(seed);
    let mut pool: Vec<(&str, &str)> = CHOICE_POOL.to_vec();
    rng.shuffle(&mut pool);
    while choices.len() < 2 {
        match pool.pop() {
            Some((id, label)) if !choices.iter().any(|c| c.id == id) => {
                choices.push(Choice { id: id.to_string(), label: label.to_string() });
            }
            Some(_) => continue,
            None => break,
        }
    }

    choices.truncate(2);
    choices
}

pub fn coerce_panels(raw: Option<&Value>) -> Vec<Panel> {
    let items = match raw {
        Some(Value::Array(items)) => items,
        _ => return Vec::new(),
    };

    let mut panels = Vec::new();
    for entry in items {
        match entry {
            Value::Object(map) => {
                let number = map
                    .get("panel")
                    .and_then(coerce_panel_number)
                    .unwrap_or(panels.len() as u32 + 1);
                let description = map
                    .get("description")
                    .or_else(|| map.get("scene"))
                    .map(value_to_string)
                    .unwrap_or_default();
                let focus = map
                    .get("focus")
                    .or_else(|| map.get("characters"))
                    .map(value_to_string)
                    .unwrap_or_default();
                if !description.is_empty() {
                    panels.push(Panel {
                        panel: number.max(1),
                        description,
                        focus: if focus.is_empty() { "Spider-Man".to_string() } else { focus },
                    });
                }
            }
            Value::String(s) => {
                let description = s.trim();
                if !description.is_empty() {
                    panels.push(Panel {
                        panel: panels.len() as u32 + 1,
                        description: description.to_string(),
                        focus: "Spider-Man".to_string(),
                    });
                }
            }
            _ => {}
        }
        if panels.len() == MAX_PANELS {
            break;
        }
    }

    panels
}

fn coerce_panel_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().map(|v| v as u32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn coerce_sound_effects(raw: Option<&Value>) -> Vec<String> {
    let mut effects = Vec::new();

    if let Some(Value::Array(items)) = raw {
        for item in items {
            let text = truncate_chars(&value_to_string(item).to_uppercase(), MAX_SFX_CHARS);
            if !text.is_empty() {
                effects.push(text);
            }
            if effects.len() == MAX_SOUND_EFFECTS {
                break;
            }
        }
    }

    if effects.is_empty() {
        effects = vec!["THWIP!".to_string(), "WHOOOSH!".to_string()];
    }

    effects
}
