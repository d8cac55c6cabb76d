use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

use crate::core::error::StoryError;
use crate::services::image::ImagePayload;

/// One prompt sent to a model, optionally with an image attached.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub prompt: &'a str,
    pub image: Option<&'a ImagePayload>,
    /// Ask the provider for JSON output when it supports a JSON mode.
    pub json_output: bool,
}

impl<'a> ChatRequest<'a> {
    pub fn text(prompt: &'a str) -> Self {
        Self {
            prompt,
            image: None,
            json_output: false,
        }
    }

    pub fn json(prompt: &'a str) -> Self {
        Self {
            prompt,
            image: None,
            json_output: true,
        }
    }

    pub fn with_image(prompt: &'a str, image: &'a ImagePayload) -> Self {
        Self {
            prompt,
            image: Some(image),
            json_output: false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    /// Model identifier this client talks to.
    fn model(&self) -> &str;
    async fn chat(&self, request: ChatRequest<'_>) -> Result<String>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "gemini", "ollama" or "openai"
    pub language_model: Option<String>,
    pub image_to_text_model: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    pub gemini: Option<GeminiConfig>,
    pub ollama: Option<OllamaConfig>,
    pub openai: Option<OpenAIConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_timeout() -> u64 {
    120
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            language_model: None,
            image_to_text_model: None,
            timeout_seconds: default_timeout(),
            gemini: None,
            ollama: None,
            openai: None,
        }
    }
}

/// Which of the two configured models a client is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Text,
    ImageToText,
}

impl ModelRole {
    fn setting(&self) -> &'static str {
        match self {
            ModelRole::Text => "LANGUAGE_MODEL",
            ModelRole::ImageToText => "IMAGE_TO_TEXT_MODEL",
        }
    }
}

impl LlmConfig {
    pub fn model_for(&self, role: ModelRole) -> Option<&str> {
        let model = match role {
            ModelRole::Text => self.language_model.as_deref(),
            ModelRole::ImageToText => self.image_to_text_model.as_deref(),
        };
        model.map(str::trim).filter(|m| !m.is_empty())
    }
}

pub fn create_llm(
    config: &LlmConfig,
    role: ModelRole,
) -> std::result::Result<Box<dyn LlmClient>, StoryError> {
    let model = config.model_for(role).ok_or_else(|| {
        StoryError::Configuration(format!("{} is not set", role.setting()))
    })?;
    if config.timeout_seconds == 0 {
        return Err(StoryError::Configuration(
            "timeout_seconds must be greater than zero".to_string(),
        ));
    }
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .map_err(|e| StoryError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

    match config.provider.as_str() {
        "gemini" => {
            let cfg = config
                .gemini
                .as_ref()
                .ok_or_else(|| StoryError::Configuration("Gemini config missing".to_string()))?;
            if cfg.api_key.is_empty() {
                return Err(StoryError::Configuration("Gemini API key missing".to_string()));
            }
            Ok(Box::new(GeminiClient::new(
                client,
                &cfg.api_key,
                model,
                cfg.base_url.as_deref(),
            )))
        }
        "ollama" => {
            let base_url = config
                .ollama
                .as_ref()
                .map(|c| c.base_url.clone())
                .unwrap_or_else(default_ollama_base_url);
            Ok(Box::new(OllamaClient::new(client, &base_url, model)))
        }
        "openai" => {
            let cfg = config
                .openai
                .as_ref()
                .ok_or_else(|| StoryError::Configuration("OpenAI config missing".to_string()))?;
            Ok(Box::new(OpenAIClient::new(
                client,
                &cfg.api_key,
                model,
                cfg.base_url.as_deref(),
            )))
        }
        _ => Err(StoryError::Configuration(format!(
            "Unknown LLM provider: {}",
            config.provider
        ))),
    }
}

// --- Gemini ---
const GEMINI_API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(client: reqwest::Client, api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://generativelanguage.googleapis.com/v1beta")
                .trim_end_matches('/')
                .to_string(),
            client,
        }
    }

    /// The key travels in a header so it never shows up in URLs or errors.
    fn request(&self, request: &ChatRequest<'_>) -> reqwest::RequestBuilder {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        self.client
            .post(url)
            .header(GEMINI_API_KEY_HEADER, &self.api_key)
            .json(&GeminiRequest::from_chat(request))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    InlineData {
        inline_data: GeminiInlineData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_mime_type: String,
}

impl GeminiRequest {
    fn from_chat(request: &ChatRequest<'_>) -> Self {
        let mut parts = vec![GeminiPart::Text {
            text: request.prompt.to_string(),
        }];
        if let Some(image) = request.image {
            parts.push(GeminiPart::InlineData {
                inline_data: GeminiInlineData {
                    mime_type: image.mime_type().to_string(),
                    data: image.to_base64(),
                },
            });
        }
        Self {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts,
            }],
            generation_config: request.json_output.then(|| GeminiGenerationConfig {
                response_mime_type: "application/json".to_string(),
            }),
        }
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

impl GeminiResponse {
    fn into_text(self, body: &str) -> Result<String> {
        if let Some(err) = self.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        let first = self
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| anyhow!("Gemini response format unexpected or empty. Body: {}", body))?;

        let text: String = first
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.is_empty() {
            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<String> {
        let resp = self
            .request(&request)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error ({}): {}", status, error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = match serde_json::from_str(&response_text) {
            Ok(r) => r,
            Err(e) => {
                return Err(anyhow!(
                    "Failed to parse Gemini response: {}. Body: {}",
                    e,
                    response_text
                ))
            }
        };
        result.into_text(&response_text)
    }
}

// --- Ollama ---
#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(client: reqwest::Client, base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

impl OllamaRequest {
    fn from_chat(model: &str, request: &ChatRequest<'_>) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![OllamaMessage {
                role: "user".to_string(),
                content: request.prompt.to_string(),
                images: request.image.map(|i| vec![i.to_base64()]).unwrap_or_default(),
            }],
            stream: false,
            format: request.json_output.then(|| "json".to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(&OllamaRequest::from_chat(&self.model, &request))
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Ollama API error: {}", error_text));
        }

        let result: OllamaResponse = resp.json().await?;
        Ok(result.message.content)
    }
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(client: reqwest::Client, api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            client,
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAIResponseFormat>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: OpenAIContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Serialize)]
struct OpenAIImageUrl {
    url: String,
}

#[derive(Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

impl OpenAIRequest {
    fn from_chat(model: &str, request: &ChatRequest<'_>) -> Self {
        let content = match request.image {
            Some(image) => OpenAIContent::Parts(vec![
                OpenAIContentPart::Text {
                    text: request.prompt.to_string(),
                },
                OpenAIContentPart::ImageUrl {
                    image_url: OpenAIImageUrl {
                        url: image.to_data_url(),
                    },
                },
            ]),
            None => OpenAIContent::Text(request.prompt.to_string()),
        };
        Self {
            model: model.to_string(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content,
            }],
            response_format: request.json_output.then(|| OpenAIResponseFormat {
                kind: "json_object".to_string(),
            }),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest<'_>) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self.client.post(&url);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let resp = builder
            .json(&OpenAIRequest::from_chat(&self.model, &request))
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let result: OpenAIResponse = resp.json().await?;
        if let Some(choice) = result.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.clone());
            }
        }

        Err(anyhow!("OpenAI response empty or missing content"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::image::sample_png;

    fn gemini_config() -> LlmConfig {
        LlmConfig {
            language_model: Some("gemini-2.0-flash".to_string()),
            image_to_text_model: Some("gemini-2.0-flash".to_string()),
            gemini: Some(GeminiConfig {
                api_key: "key".to_string(),
                base_url: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_llm_uses_role_model() {
        let mut config = gemini_config();
        config.image_to_text_model = Some("gemini-vision".to_string());

        let text = create_llm(&config, ModelRole::Text).unwrap();
        let vision = create_llm(&config, ModelRole::ImageToText).unwrap();
        assert_eq!(text.model(), "gemini-2.0-flash");
        assert_eq!(vision.model(), "gemini-vision");
    }

    #[test]
    fn test_create_llm_missing_model_fails_fast() {
        let mut config = gemini_config();
        config.image_to_text_model = Some("   ".to_string());

        let err = create_llm(&config, ModelRole::ImageToText).unwrap_err();
        assert!(matches!(err, StoryError::Configuration(_)));
        assert!(err.to_string().contains("IMAGE_TO_TEXT_MODEL"));

        config.language_model = None;
        let err = create_llm(&config, ModelRole::Text).unwrap_err();
        assert!(err.to_string().contains("LANGUAGE_MODEL"));
    }

    #[test]
    fn test_create_llm_provider_errors() {
        let mut config = gemini_config();
        config.provider = "mystery".to_string();
        assert!(create_llm(&config, ModelRole::Text).is_err());

        let mut config = gemini_config();
        config.gemini = Some(GeminiConfig::default());
        assert!(create_llm(&config, ModelRole::Text).is_err());

        let mut config = gemini_config();
        config.provider = "ollama".to_string();
        assert!(create_llm(&config, ModelRole::Text).is_ok());
    }

    #[test]
    fn test_create_llm_rejects_zero_timeout() {
        let mut config = gemini_config();
        config.timeout_seconds = 0;

        let err = create_llm(&config, ModelRole::Text).unwrap_err();
        assert!(matches!(err, StoryError::Configuration(_)));
        assert!(err.to_string().contains("timeout_seconds"));

        config.timeout_seconds = 1;
        assert!(create_llm(&config, ModelRole::Text).is_ok());
    }

    fn unreachable_gemini(api_key: &str) -> GeminiClient {
        GeminiClient::new(
            reqwest::Client::new(),
            api_key,
            "gemini-2.0-flash",
            Some("http://127.0.0.1:1/v1beta"),
        )
    }

    #[test]
    fn test_gemini_key_sent_as_header() {
        let client = unreachable_gemini("secret-gemini-key");
        let request = client.request(&ChatRequest::text("Hi")).build().unwrap();

        assert_eq!(
            request.url().as_str(),
            "http://127.0.0.1:1/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert!(!request.url().as_str().contains("secret-gemini-key"));
        assert_eq!(
            request.headers()[GEMINI_API_KEY_HEADER],
            "secret-gemini-key"
        );
    }

    #[tokio::test]
    async fn test_gemini_transport_error_hides_key() {
        let client = unreachable_gemini("secret-gemini-key");
        let err = client.chat(ChatRequest::text("Hi")).await.unwrap_err();
        assert!(!format!("{:#}", err).contains("secret-gemini-key"));
        assert!(!format!("{:?}", err).contains("secret-gemini-key"));

        let err = StoryError::service("text generation", err);
        assert!(!err.to_string().contains("secret-gemini-key"));
        assert!(!format!("{:?}", err).contains("secret-gemini-key"));
    }

    #[test]
    fn test_gemini_request_with_image_and_json() {
        let image = ImagePayload::from_bytes(&sample_png()).unwrap();
        let request = ChatRequest {
            prompt: "Describe",
            image: Some(&image),
            json_output: true,
        };
        let body = serde_json::to_value(GeminiRequest::from_chat(&request)).unwrap();

        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[0]["text"], "Describe");
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["inlineData"]["data"], image.to_base64());
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn test_gemini_request_plain_text() {
        let body = serde_json::to_value(GeminiRequest::from_chat(&ChatRequest::text("Hi"))).unwrap();
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 1);
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{
            "candidates": [
                {
                    "finishReason": "SAFETY",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = result.into_text(json).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_gemini_response_parsing_empty_content() {
        let json = r#"{
            "candidates": [
                {
                    "content": { "role": "model" },
                    "finishReason": "STOP",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert!(result.into_text(json).is_err());
    }

    #[test]
    fn test_gemini_response_joins_parts() {
        let json = r#"{
            "candidates": [
                {
                    "content": {
                        "parts": [
                            { "text": "{\"title\": " },
                            { "text": "\"Dragons\"}" }
                        ],
                        "role": "model"
                    },
                    "finishReason": "STOP",
                    "index": 0
                }
            ]
        }"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(result.into_text(json).unwrap(), r#"{"title": "Dragons"}"#);
    }

    #[test]
    fn test_gemini_response_api_error() {
        let json = r#"{ "error": { "code": 429, "message": "Resource exhausted" } }"#;
        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let err = result.into_text(json).unwrap_err();
        assert!(err.to_string().contains("Resource exhausted"));
    }

    #[test]
    fn test_ollama_request_shape() {
        let image = ImagePayload::from_bytes(&sample_png()).unwrap();
        let body = serde_json::to_value(OllamaRequest::from_chat(
            "llava",
            &ChatRequest::with_image("Describe", &image),
        ))
        .unwrap();
        assert_eq!(body["model"], "llava");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["images"][0], image.to_base64());
        assert!(body.get("format").is_none());

        let body =
            serde_json::to_value(OllamaRequest::from_chat("llama3", &ChatRequest::json("Go")))
                .unwrap();
        assert_eq!(body["format"], "json");
        assert!(body["messages"][0].get("images").is_none());
    }

    #[test]
    fn test_openai_request_shape() {
        let image = ImagePayload::from_bytes(&sample_png()).unwrap();
        let body = serde_json::to_value(OpenAIRequest::from_chat(
            "gpt-4o",
            &ChatRequest::with_image("Describe", &image),
        ))
        .unwrap();
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
        assert!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));

        let body =
            serde_json::to_value(OpenAIRequest::from_chat("gpt-4o", &ChatRequest::json("Go")))
                .unwrap();
        assert_eq!(body["messages"][0]["content"], "Go");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1677652288,
            "model": "gpt-3.5-turbo-0613",
            "system_fingerprint": "fp_44709d6fcb",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello there, how may I assist you today?"
                },
                "logprobs": null,
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 9,
                "completion_tokens": 12,
                "total_tokens": 21
            }
        }"#;

        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            result.choices[0].message.content.as_deref(),
            Some("Hello there, how may I assist you today?")
        );
    }
}
