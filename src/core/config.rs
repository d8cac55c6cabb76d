use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::services::instructions::GenerationConfig;
use crate::services::llm::{GeminiConfig, LlmConfig, OpenAIConfig};
use crate::services::prompt::TemplateSource;

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub story: GenerationConfig,

    /// File holding the topic-mode prompt; the built-in template when unset.
    #[serde(default)]
    pub topic_template: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Reads the YAML file when it exists, then applies environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_yaml_ng::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            log::debug!("{} not found, using defaults", path.display());
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| env::var(key).ok());
    }

    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = lookup("LANGUAGE_MODEL") {
            self.llm.language_model = Some(model);
        }
        if let Some(model) = lookup("IMAGE_TO_TEXT_MODEL") {
            self.llm.image_to_text_model = Some(model);
        }
        if let Some(key) = lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")) {
            self.llm
                .gemini
                .get_or_insert_with(GeminiConfig::default)
                .api_key = key;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.llm
                .openai
                .get_or_insert_with(OpenAIConfig::default)
                .api_key = key;
        }
    }

    pub fn topic_template_source(&self) -> TemplateSource {
        TemplateSource::from_option(self.topic_template.clone())
    }
}
