pub mod generator;
pub mod image;
pub mod instructions;
pub mod llm;
pub mod prompt;
pub mod story;
