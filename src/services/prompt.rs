use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use crate::core::error::{Result, StoryError};

pub const TOPIC_VAR: &str = "TOPIC";
pub const INSTRUCTIONS_VAR: &str = "instructions_placeholder";
pub const CONTEXT_VAR: &str = "context_placeholder";
pub const FORMAT_VAR: &str = "format_instructions";

/// Topic used when topic mode is selected without one.
pub const DEFAULT_TOPIC: &str = "Random";

pub const DEFAULT_TOPIC_TEMPLATE: &str =
    "Generate a story on {TOPIC} \nINSTRUCTIONS: \n {instructions_placeholder}";

pub const CONTEXT_TEMPLATE: &str = "Generate a short story based on the context provided in the STORY_CONTEXT section.

INSTRUCTIONS:
{instructions_placeholder}

STORY_CONTEXT:
{context_placeholder}
";

pub const IMAGE_ANALYSIS_PROMPT: &str = r#"Objective: describe the provided image in enough detail that a storyteller can build a story from the description alone.

Instructions:

1. Image Type and Overall Impression
   - Identify the kind of image (photograph, painting, digital illustration, infographic, chart, ...).
   - Summarise the overall impression or mood: whimsical, serious, chaotic, peaceful, and so on.

2. Key Elements and Characters
   - List and describe every significant element, object and character.
   - For characters, describe appearance (age, clothing, facial features, posture), likely emotions or expressions, and interactions with other elements or characters.
   - For objects, describe shape, size, material, distinctive features, and where they sit in the frame.

3. Visual Style and Aesthetics
   - Style: realistic, abstract, cartoonish, impressionistic, ...
   - Color Palette: the dominant colors, how they relate, and the atmosphere they create.
   - Composition: how the elements are arranged, the focal point, leading lines, perspective, symmetry.
   - Lighting: bright or dim, natural or artificial, and how light shapes characters, shadows and mood.

4. Data and Information (if present)
   - Numbers and statistics: state the values and what they mean, as bullet points.
   - Charts, graphs, infographics and tables: name the visualization type, its axes and labels, and summarise the key data points and relationships.
   - Text and labels: transcribe them as bullet points and explain their purpose.

5. Contextual Relevance
   - Do the elements seem related? Is there a sense of place or location?
   - Note anything that hints at a story: a determined character, an unusual object, a mysterious atmosphere.

6. Restrictions
   - Describe only what is visible in the image or can be inferred directly from it.
   - Do not add information the image does not support.

Example output structure:

Type of image: Photograph
Mood: Serene, nostalgic
Key Elements:
    - An old wooden rowboat resting on a calm lake.
    - A few tall pine trees surrounding the lake.
    - A soft, hazy sunset.
Characters:
    - No people are present.
    - A family of ducks swimming near the boat.
Style: Realistic
Color Palette:
    - Muted shades of blue, grey, green and orange dominate.
    - The palette creates a peaceful, slightly melancholic mood.
Composition:
    - Horizontal framing with the rowboat as the point of interest on the left and open space on the right.
Data:
    - No data is present.
Contextual relevance:
    - A feeling of peace and tranquility; it could be a scene from the past.
"#;

/// A prompt with `{name}` placeholders. `{{` and `}}` are literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
    variables: BTreeSet<String>,
}

enum Segment<'a> {
    Literal(&'a str),
    Variable(&'a str),
}

fn segments(text: &str) -> Result<Vec<Segment<'_>>> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
        out.push(Segment::Literal(&rest[..pos]));
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            out.push(Segment::Literal("{"));
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push(Segment::Literal("}"));
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            return Err(StoryError::Configuration(
                "prompt template has an unmatched '}'".to_string(),
            ));
        } else {
            let close = tail.find('}').ok_or_else(|| {
                StoryError::Configuration("prompt template has an unclosed '{'".to_string())
            })?;
            let name = &tail[1..close];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(StoryError::Configuration(format!(
                    "prompt template has an invalid placeholder '{{{}}}'",
                    name
                )));
            }
            out.push(Segment::Variable(name));
            rest = &tail[close + 1..];
        }
    }
    out.push(Segment::Literal(rest));
    Ok(out)
}

impl PromptTemplate {
    pub fn parse(text: &str) -> Result<Self> {
        let variables = segments(text)?
            .into_iter()
            .filter_map(|s| match s {
                Segment::Variable(name) => Some(name.to_string()),
                Segment::Literal(_) => None,
            })
            .collect();
        Ok(Self {
            text: text.to_string(),
            variables,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(String::as_str)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains(name)
    }

    /// Fails unless `required` are present and nothing outside `required` and `optional` is.
    pub fn expect_variables(&self, required: &[&str], optional: &[&str]) -> Result<()> {
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|name| !self.has_variable(name))
            .collect();
        if !missing.is_empty() {
            return Err(StoryError::Configuration(format!(
                "prompt template is missing placeholders: {}",
                missing.join(", ")
            )));
        }
        let unknown: Vec<&str> = self
            .variables()
            .filter(|name| !required.contains(name) && !optional.contains(name))
            .collect();
        if !unknown.is_empty() {
            return Err(StoryError::Configuration(format!(
                "prompt template has unknown placeholders: {}",
                unknown.join(", ")
            )));
        }
        Ok(())
    }

    /// Substitutes every placeholder. Values are inserted verbatim.
    pub fn render(&self, values: &[(&str, &str)]) -> Result<String> {
        let mut out = String::with_capacity(self.text.len());
        for segment in segments(&self.text)? {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Variable(name) => {
                    let value = values
                        .iter()
                        .find(|(key, _)| *key == name)
                        .map(|(_, value)| *value)
                        .ok_or_else(|| {
                            StoryError::Configuration(format!(
                                "no value supplied for placeholder '{}'",
                                name
                            ))
                        })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Where the topic-mode template comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TemplateSource {
    #[default]
    Builtin,
    File(PathBuf),
}

impl TemplateSource {
    pub fn from_option(path: Option<PathBuf>) -> Self {
        path.map(TemplateSource::File).unwrap_or_default()
    }

    pub fn load_topic_template(&self) -> Result<PromptTemplate> {
        let template = match self {
            TemplateSource::Builtin => PromptTemplate::parse(DEFAULT_TOPIC_TEMPLATE)?,
            TemplateSource::File(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    StoryError::Configuration(format!(
                        "failed to read topic template {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                PromptTemplate::parse(&text)?
            }
        };
        template.expect_variables(&[TOPIC_VAR, INSTRUCTIONS_VAR], &[FORMAT_VAR])?;
        Ok(template)
    }
}

pub fn context_template() -> PromptTemplate {
    PromptTemplate {
        text: CONTEXT_TEMPLATE.to_string(),
        variables: [INSTRUCTIONS_VAR, CONTEXT_VAR]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

/// How the narrative seed is supplied. Exactly one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Topic {
        topic: Option<String>,
        template: PromptTemplate,
    },
    Context {
        context: String,
    },
    ImageContext {
        description: String,
    },
}

impl InputMode {
    pub fn name(&self) -> &'static str {
        match self {
            InputMode::Topic { .. } => "topic",
            InputMode::Context { .. } => "context",
            InputMode::ImageContext { .. } => "image",
        }
    }

    /// Renders the mode's template around `instructions`, then adds `format`,
    /// in place when the template asks for it, appended otherwise.
    pub fn render(&self, instructions: &str, format: &str) -> Result<String> {
        let (template, seed_var, seed) = match self {
            InputMode::Topic { topic, template } => (
                template.clone(),
                TOPIC_VAR,
                topic.as_deref().unwrap_or(DEFAULT_TOPIC),
            ),
            InputMode::Context { context } => (context_template(), CONTEXT_VAR, context.as_str()),
            InputMode::ImageContext { description } => {
                (context_template(), CONTEXT_VAR, description.as_str())
            }
        };

        let values = [
            (INSTRUCTIONS_VAR, instructions),
            (seed_var, seed),
            (FORMAT_VAR, format),
        ];
        let prompt = template.render(&values)?;
        if template.has_variable(FORMAT_VAR) {
            Ok(prompt)
        } else {
            Ok(format!("{}\n\n{}", prompt.trim_end(), format))
        }
    }
}
