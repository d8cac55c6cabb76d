use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use std::fs;
use std::path::PathBuf;

use storybook::services::image::ImagePayload;
use storybook::{create_llm, Config, ModelRole, StoryGenerator};

#[derive(Debug, Parser)]
#[command(name = "storybook", version, about = "Generate a short illustrated story")]
#[command(group(ArgGroup::new("input").args(["topic", "context", "context_file", "image"])))]
struct Cli {
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,
    #[arg(long)]
    theme: Option<String>,
    #[arg(long)]
    inspiration: Option<String>,
    /// Target word count; one story part per 200 words.
    #[arg(long)]
    words: Option<u32>,
    #[arg(long)]
    topic: Option<String>,
    #[arg(long)]
    context: Option<String>,
    #[arg(long)]
    context_file: Option<PathBuf>,
    #[arg(long)]
    image: Option<PathBuf>,
    /// Write the story JSON here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Print the story prompt and exit without calling the language model.
    #[arg(long)]
    print_prompt: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    // 1. Load config
    let mut config = match Config::load_from(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Check '{}' or set LANGUAGE_MODEL / IMAGE_TO_TEXT_MODEL.", cli.config.display());
            return Err(e);
        }
    };
    if let Some(theme) = cli.theme {
        config.story.theme = theme;
    }
    if let Some(inspiration) = cli.inspiration {
        config.story.inspiration = inspiration;
    }
    if let Some(words) = cli.words {
        config.story.target_word_count = words;
    }

    // 2. Initialize models
    let text_model = create_llm(&config.llm, ModelRole::Text)?;
    let image_model = create_llm(&config.llm, ModelRole::ImageToText)?;

    let mut generator = StoryGenerator::new(config.story.clone(), text_model, image_model)?
        .with_topic_template(config.topic_template_source());

    // 3. Select input mode
    if let Some(path) = &cli.image {
        let payload = ImagePayload::from_path(path)?;
        generator.select_image_payload(&payload).await?;
    } else if let Some(path) = &cli.context_file {
        let context = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        generator.select_context(&context)?;
    } else if let Some(context) = &cli.context {
        generator.select_context(context)?;
    } else {
        generator.select_topic(cli.topic.as_deref())?;
    }

    if cli.print_prompt {
        println!("{}", generator.build_prompt()?);
        return Ok(());
    }

    // 4. Generate
    let story = generator.generate().await?;
    let json = story.to_json_pretty()?;

    match &cli.out {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Story \"{}\" written to {}", story.title, path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
