use serde::{Deserialize, Serialize};

use crate::services::story::EXAMPLE_STORY_JSON;

/// Words budgeted per story part.
pub const WORDS_PER_PART: u32 = 200;

/// Generation parameters fixed when the generator is built.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct GenerationConfig {
    #[serde(default = "default_label")]
    pub theme: String,

    #[serde(default = "default_label")]
    pub inspiration: String,

    #[serde(default = "default_target_word_count", alias = "n_words")]
    pub target_word_count: u32,
}

fn default_label() -> String {
    "General".to_string()
}
fn default_target_word_count() -> u32 {
    WORDS_PER_PART
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            theme: default_label(),
            inspiration: default_label(),
            target_word_count: default_target_word_count(),
        }
    }
}

impl GenerationConfig {
    pub fn new(theme: &str, inspiration: &str, target_word_count: u32) -> Self {
        Self {
            theme: theme.to_string(),
            inspiration: inspiration.to_string(),
            target_word_count,
        }
    }

    /// Number of story parts requested from the model. Zero below 200 words.
    pub fn part_count(&self) -> usize {
        (self.target_word_count / WORDS_PER_PART) as usize
    }

    pub fn instructions(&self) -> String {
        render(self)
    }
}

/// Renders the instruction block sent alongside every story prompt.
pub fn render(config: &GenerationConfig) -> String {
    let words = config.target_word_count;
    let parts = config.part_count();
    let theme = &config.theme;
    let inspiration = &config.inspiration;

    format!(
        "You are an expert storyteller and visual content creator. Write a compelling, \
visually engaging story from the material provided. The result is consumed by a web \
application, so its structure matters as much as its prose.

STORY GENERATION:

1. Story Length: the story must not exceed {words} words.
2. Story Segmentation: divide the story into exactly {parts} parts. Each part must lead \
naturally into the next so the narrative reads as one piece.
3. Story Theme: the story must follow the theme \"{theme}\". Plot, characters and tone \
all have to fit it.
4. Inspiration Source: draw inspiration from \"{inspiration}\". It may be an event, a \
historical figure, a literary work or anything else; let it shape the narrative without \
copying from it.
5. Title: give the story a short, engaging title.
6. Introduction: write a 50-60 word introduction that sets the scene, introduces the main \
idea and makes the reader curious.
7. Theme Description: describe the story's theme in a few sentences, including the \
colors and visual style that would present it well on a web page. A theme generator uses \
this text to pick page colors, font colors and styles.

IMAGE PROMPT GENERATION (one per story part):

1. Purpose: write a distinct, concise image prompt for every story part. A separate \
image generation model renders these prompts.
2. Context Alignment: each image prompt must depict the content of its own story part.
3. Visual Style: every image must
   - have a light, mostly white background so text can be placed over it;
   - match the inspiration \"{inspiration}\" and the theme \"{theme}\";
   - name the color palette explicitly, so consecutive images share contrast, colors \
and backgrounds.
4. Prompt Clarity: keep prompts short and focused on the key visual elements.
5. Prompt Safety: prompts must be suitable for a general audience. Do not include \
children, sexual orientation or references to any race, and avoid anything that could \
hurt sentiments.
6. Characters: when a prompt contains a character, person or imaginary figure, describe \
their appearance in enough detail that the prompts of the other parts reproduce the same \
characters.

HTML STYLE GUIDE:

1. Purpose: define a cohesive style for the HTML page that shows the story: background \
color, font color and font family.
2. Context Matching: the style must complement the story theme and the image style and \
give a comfortable reading experience.
3. Attributes:
   - `background-color`: a background color suited to the theme and image aesthetic.
   - `font-color`: a font color with enough contrast against the background.
   - `font-family`: a readable font family that fits the tone of the story.

OUTPUT FORMAT (JSON):

1. Structure: the output MUST be a single JSON object.
2. Top-Level Keys: `style`, `title`, `introduction`, `theme` and `story`.
   - `style`: HTML style parameters with the keys `background-color`, `font-color` and \
`font-family`.
   - `title`: the story title.
   - `introduction`: the short introduction.
   - `theme`: the theme description used for CSS styling.
   - `story`: an object holding the story parts.
3. Story Parts: every key of `story` names a part: `part_1`, `part_2` and so on up to \
`part_{parts}`.
4. Part Contents: every part is an object with the keys `story` (the text of that part) \
and `image_prompt` (the image prompt for that part).

Example JSON structure:

```json
{EXAMPLE_STORY_JSON}
```
"
    )
}
