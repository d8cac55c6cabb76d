use log::{debug, info};

use crate::core::error::{Result, StoryError};
use crate::services::image::ImagePayload;
use crate::services::instructions::GenerationConfig;
use crate::services::llm::{ChatRequest, LlmClient};
use crate::services::prompt::{InputMode, TemplateSource, IMAGE_ANALYSIS_PROMPT};
use crate::services::story::{format_instructions, parse_story, story_schema, Story};

const TEXT_SERVICE: &str = "text generation";
const IMAGE_SERVICE: &str = "image description";

/// Builds story prompts, sends them to the language model and validates the
/// answer.
///
/// The generator keeps one selected [`InputMode`]. Selecting a new mode
/// replaces the old one; a failed selection leaves it untouched.
#[derive(Debug)]
pub struct StoryGenerator {
    settings: GenerationConfig,
    text_model: Box<dyn LlmClient>,
    image_model: Box<dyn LlmClient>,
    topic_template: TemplateSource,
    mode: Option<InputMode>,
}

impl StoryGenerator {
    pub fn new(
        settings: GenerationConfig,
        text_model: Box<dyn LlmClient>,
        image_model: Box<dyn LlmClient>,
    ) -> Result<Self> {
        if text_model.model().trim().is_empty() {
            return Err(StoryError::Configuration(
                "text generation model id is empty".to_string(),
            ));
        }
        if image_model.model().trim().is_empty() {
            return Err(StoryError::Configuration(
                "image description model id is empty".to_string(),
            ));
        }
        if settings.part_count() == 0 {
            return Err(StoryError::Configuration(format!(
                "target word count {} is below one story part ({} words)",
                settings.target_word_count,
                crate::services::instructions::WORDS_PER_PART
            )));
        }

        Ok(Self {
            settings,
            text_model,
            image_model,
            topic_template: TemplateSource::Builtin,
            mode: None,
        })
    }

    pub fn with_topic_template(mut self, source: TemplateSource) -> Self {
        self.topic_template = source;
        self
    }

    pub fn settings(&self) -> &GenerationConfig {
        &self.settings
    }

    pub fn mode(&self) -> Option<&InputMode> {
        self.mode.as_ref()
    }

    pub fn select_topic(&mut self, topic: Option<&str>) -> Result<()> {
        let template = self.topic_template.load_topic_template()?;
        let topic = topic
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        info!(
            "Topic mode selected: {}",
            topic.as_deref().unwrap_or("<random>")
        );
        self.mode = Some(InputMode::Topic { topic, template });
        Ok(())
    }

    pub fn select_context(&mut self, context: &str) -> Result<()> {
        if context.trim().is_empty() {
            return Err(StoryError::Precondition("story context is empty".to_string()));
        }
        info!("Context mode selected ({} chars)", context.len());
        self.mode = Some(InputMode::Context {
            context: context.to_string(),
        });
        Ok(())
    }

    /// Describes the image with the image model and uses the description as
    /// story context.
    pub async fn select_image(&mut self, image: &[u8]) -> Result<()> {
        let payload = ImagePayload::from_bytes(image)?;
        self.select_image_payload(&payload).await
    }

    pub async fn select_image_payload(&mut self, payload: &ImagePayload) -> Result<()> {
        let (width, height) = payload.dimensions();
        info!(
            "Describing {} image ({}x{}) with {}",
            payload.mime_type(),
            width,
            height,
            self.image_model.model()
        );

        let description = self
            .image_model
            .chat(ChatRequest::with_image(IMAGE_ANALYSIS_PROMPT, payload))
            .await
            .map_err(|e| StoryError::service(IMAGE_SERVICE, e))?;

        if description.trim().is_empty() {
            return Err(StoryError::malformed(
                "image description is empty",
                &description,
            ));
        }
        debug!("Image description: {} chars", description.len());
        self.mode = Some(InputMode::ImageContext { description });
        Ok(())
    }

    /// Instruction block for the current settings, rendered fresh each call.
    pub fn instructions(&self) -> String {
        self.settings.instructions()
    }

    /// The complete prompt `generate` would send.
    pub fn build_prompt(&self) -> Result<String> {
        let mode = self
            .mode
            .as_ref()
            .ok_or_else(|| StoryError::Precondition("no input mode selected".to_string()))?;
        let format = format_instructions(&story_schema(self.settings.part_count()));
        mode.render(&self.instructions(), &format)
    }

    pub async fn generate(&self) -> Result<Story> {
        let prompt = self.build_prompt()?;
        let part_count = self.settings.part_count();
        let mode = self.mode.as_ref().map(InputMode::name).unwrap_or_default();

        info!(
            "Generating story ({} mode, {} parts) with {}",
            mode,
            part_count,
            self.text_model.model()
        );
        debug!("Prompt: {} chars", prompt.len());

        let raw = self
            .text_model
            .chat(ChatRequest::json(&prompt))
            .await
            .map_err(|e| StoryError::service(TEXT_SERVICE, e))?;

        let story = parse_story(&raw, part_count)?;
        info!("Generated \"{}\" ({} parts)", story.title, story.story.len());
        Ok(story)
    }
}
