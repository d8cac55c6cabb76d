//! The story document returned by the model, plus the schema and parser that
//! guard it.
//!
//! Parsing is deliberately two-step: the raw text is first read as untyped
//! JSON so that missing keys can be reported by name, then deserialized into
//! [`Story`] and checked against the requested part count.

use indexmap::IndexMap;
use log::warn;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::core::error::{Result, StoryError};

pub const TOP_LEVEL_KEYS: [&str; 5] = ["style", "title", "introduction", "theme", "story"];
pub const STYLE_KEYS: [&str; 3] = ["background-color", "font-color", "font-family"];
pub const PART_PREFIX: &str = "part_";

/// Example answer embedded in the instruction block.
pub const EXAMPLE_STORY_JSON: &str = r##"{
  "style": {
    "background-color": "#f0f8ff",
    "font-color": "#333",
    "font-family": "Arial, sans-serif"
  },
  "title": "The Magical Treehouse Adventure",
  "introduction": "Lily and Tom discover a hidden treehouse in their backyard, leading them on an amazing adventure through enchanted lands and whimsical creatures.",
  "theme": "A story of two friends and their adventures. A vibrant, high-contrast style suits it, with a palette such as #A31D1D, #E5D0AC, #FEF9E1.",
  "story": {
    "part_1": {
      "story": "The sun peeked through the leaves as Lily and Tom stumbled upon a rickety ladder leading to a treehouse hidden among the branches.",
      "image_prompt": "A sunny, whimsical treehouse hidden in a lush forest with a ladder leading up to it. Light background, one third of a corner left free for text."
    },
    "part_2": {
      "story": "Inside, they found a sparkling map that promised a journey to the land of talking animals.",
      "image_prompt": "Inside the treehouse, a map glitters invitingly, surrounded by simple wooden furniture. Light background, one third of a corner left free for text."
    },
    "part_3": {
      "story": "They met a friendly fox who gave them directions to the land of happy smiles.",
      "image_prompt": "A smiling fox and two friends standing on a path surrounded by lush green grass. Light background, one third of a corner left free for text."
    }
  }
}"##;

/// HTML CSS style to be used for the story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoryStyle {
    #[serde(rename = "background-color")]
    pub background_color: String,
    #[serde(rename = "font-color")]
    pub font_color: String,
    #[serde(rename = "font-family")]
    pub font_family: String,
}

/// Free-form theme description. Models return either prose or an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum StoryTheme {
    Text(String),
    Details(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoryPart {
    /// Text of this story part
    pub story: String,
    /// Image generation prompt for this story part
    pub image_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Story {
    pub style: StoryStyle,
    /// Title of the story
    pub title: String,
    /// Introduction for the story
    pub introduction: String,
    /// The story theme describing purpose, colors and style that suit the story
    pub theme: StoryTheme,
    /// The story parts, keyed part_1 to part_N
    #[schemars(with = "std::collections::BTreeMap<String, StoryPart>")]
    pub story: IndexMap<String, StoryPart>,
}

impl Story {
    pub fn part(&self, number: usize) -> Option<&StoryPart> {
        self.story.get(&part_key(number))
    }

    pub fn parts(&self) -> impl Iterator<Item = &StoryPart> {
        self.story.values()
    }

    pub fn image_prompts(&self) -> Vec<&str> {
        self.parts().map(|p| p.image_prompt.as_str()).collect()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

pub fn part_key(number: usize) -> String {
    format!("{}{}", PART_PREFIX, number)
}

/// Number of a canonical part key. `part_01` and `part_+1` are not canonical.
fn part_number(key: &str) -> Option<usize> {
    let number: usize = key.strip_prefix(PART_PREFIX)?.parse().ok()?;
    (part_key(number) == key).then_some(number)
}

/// JSON Schema describing a story with `part_count` parts.
///
/// The derived schema types `story` as an open map; the requested part keys
/// are pinned here so the model sees every `part_N` it has to fill.
pub fn story_schema(part_count: usize) -> Value {
    let root = schema_for!(Story);
    let mut schema = json!(root);
    if let Some(story) = schema
        .pointer_mut("/properties/story")
        .and_then(Value::as_object_mut)
    {
        let part_schema = story
            .remove("additionalProperties")
            .unwrap_or_else(|| json!({ "$ref": "#/definitions/StoryPart" }));
        let parts: Map<String, Value> = (1..=part_count)
            .map(|n| (part_key(n), part_schema.clone()))
            .collect();
        let part_names: Vec<String> = (1..=part_count).map(part_key).collect();
        story.insert("properties".to_string(), Value::Object(parts));
        story.insert("required".to_string(), json!(part_names));
        story.insert("additionalProperties".to_string(), Value::Bool(false));
    }
    schema
}

/// Turns a schema into the directive appended to every story prompt.
pub fn format_instructions(schema: &Value) -> String {
    let schema_text = schema.to_string();
    format!(
        "The output should be formatted as a JSON instance that conforms to the JSON schema below.\n\n\
As an example, for the schema {{\"properties\": {{\"foo\": {{\"title\": \"Foo\", \"description\": \"a list of strings\", \"type\": \"array\", \"items\": {{\"type\": \"string\"}}}}}}, \"required\": [\"foo\"]}}\n\
the object {{\"foo\": [\"bar\", \"baz\"]}} is a well-formatted instance of the schema. \
The object {{\"properties\": {{\"foo\": [\"bar\", \"baz\"]}}}} is not well-formatted.\n\n\
Here is the output schema:\n```\n{}\n```",
        schema_text
    )
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    let Some(body) = s.strip_prefix("```") else {
        return s.to_string();
    };
    // The fence language tag is matched without regard to case (```JSON).
    let body = match body.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &body[4..],
        _ => body,
    };
    body.trim_end_matches("```").trim().to_string()
}

fn parse_json_value(raw: &str) -> Option<Value> {
    let clean = strip_code_blocks(raw);
    if let Ok(value) = serde_json::from_str(&clean) {
        return Some(value);
    }
    // Some models wrap the object in prose.
    let start = clean.find('{')?;
    let end = clean.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&clean[start..=end]).ok()
}

/// Parses and structurally validates a model response.
pub fn parse_story(raw: &str, part_count: usize) -> Result<Story> {
    let result = validate(raw, part_count);
    if let Err(StoryError::MalformedResponse { reason, .. }) = &result {
        warn!("Rejected story response: {}", reason);
    }
    result
}

fn validate(raw: &str, part_count: usize) -> Result<Story> {
    let value = parse_json_value(raw)
        .ok_or_else(|| StoryError::malformed("response is not valid JSON", raw))?;

    let object = value
        .as_object()
        .ok_or_else(|| StoryError::malformed("response is not a JSON object", raw))?;

    let missing: Vec<&str> = TOP_LEVEL_KEYS
        .iter()
        .copied()
        .filter(|key| !object.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(StoryError::malformed(
            format!("missing top-level keys: {}", missing.join(", ")),
            raw,
        ));
    }

    let style = object["style"]
        .as_object()
        .ok_or_else(|| StoryError::malformed("`style` is not an object", raw))?;
    let missing: Vec<&str> = STYLE_KEYS
        .iter()
        .copied()
        .filter(|key| !style.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(StoryError::malformed(
            format!("missing style keys: {}", missing.join(", ")),
            raw,
        ));
    }

    let mut story: Story = serde_json::from_value(value)
        .map_err(|e| StoryError::malformed(format!("unexpected story shape: {}", e), raw))?;

    if story.story.len() != part_count {
        return Err(StoryError::malformed(
            format!(
                "expected {} story parts, got {}",
                part_count,
                story.story.len()
            ),
            raw,
        ));
    }

    for (key, part) in &story.story {
        match part_number(key) {
            Some(n) if (1..=part_count).contains(&n) => {}
            _ => {
                return Err(StoryError::malformed(
                    format!("unexpected story part key `{}`", key),
                    raw,
                ))
            }
        }
        if part.story.trim().is_empty() {
            return Err(StoryError::malformed(format!("`{}.story` is empty", key), raw));
        }
        if part.image_prompt.trim().is_empty() {
            return Err(StoryError::malformed(
                format!("`{}.image_prompt` is empty", key),
                raw,
            ));
        }
    }

    // Keys are canonical, distinct and in range; with the count check they are
    // exactly part_1..part_N.
    story
        .story
        .sort_by(|a, _, b, _| part_number(a).cmp(&part_number(b)));
    Ok(story)
}
