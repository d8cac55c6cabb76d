pub mod core;
pub mod services;

pub use crate::core::config::Config;
pub use crate::core::error::{Result, StoryError};
pub use crate::services::generator::StoryGenerator;
pub use crate::services::instructions::GenerationConfig;
pub use crate::services::llm::{create_llm, ChatRequest, LlmClient, ModelRole};
pub use crate::services::prompt::{InputMode, TemplateSource};
pub use crate::services::story::{Story, StoryPart, StoryStyle, StoryTheme};
