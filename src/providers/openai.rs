//! OpenAI-compatible text and image backends.
//!
//! Works against any server speaking the OpenAI REST dialect (OpenRouter,
//! Ollama, vLLM, ...).

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::prompts::MAX_TOKENS;
use super::{ChatMessage, ImageBackend, ImageOutput, ImageRequest, TextBackend};
use crate::error::{DaemonError, Result};

/// Chat completions client for one configured provider.
pub struct OpenAiCompatText {
    name: String,
    base_url: String,
    api_key: Option<String>,
    models: Vec<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatText {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        models: Vec<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            models,
            client,
        }
    }
}

#[async_trait]
impl TextBackend for OpenAiCompatText {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model,
            messages,
            temperature,
            max_tokens: MAX_TOKENS,
        };

        tracing::debug!(provider = %self.name, model, "Sending chat completion");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DaemonError::backend_failed(
                &self.name,
                format!("HTTP {}: {}", status.as_u16(), text),
            ));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| DaemonError::backend_failed(&self.name, "empty completion"))
    }
}

/// Images client for OpenAI-compatible `/images/generations`.
pub struct OpenAiImages {
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    size: (u32, u32),
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ImagesRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: String,
    n: u32,
    response_format: &'static str,
}

#[derive(Deserialize)]
pub(crate) struct ImagesResponse {
    pub(crate) data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
pub(crate) struct ImageDatum {
    #[serde(default)]
    pub(crate) b64_json: Option<String>,
}

impl ImagesResponse {
    /// Decodes the first base64 image in the response.
    pub(crate) fn first_image(self, backend: &str) -> Result<Vec<u8>> {
        let encoded = self
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| DaemonError::backend_failed(backend, "response contained no image"))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| DaemonError::backend_failed(backend, format!("invalid base64 image: {}", e)))
    }
}

impl OpenAiImages {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        size: (u32, u32),
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            size,
            client,
        }
    }
}

#[async_trait]
impl ImageBackend for OpenAiImages {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn default_size(&self) -> (u32, u32) {
        self.size
    }

    async fn generate(&self, request: &ImageRequest) -> Result<ImageOutput> {
        let url = format!("{}/images/generations", self.base_url);
        let body = ImagesRequest {
            model: &self.model,
            prompt: &request.prompt,
            size: format!("{}x{}", request.width, request.height),
            n: 1,
            response_format: "b64_json",
        };

        tracing::info!(backend = %self.name, "Requesting cover image");

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DaemonError::backend_failed(
                &self.name,
                format!("HTTP {}: {}", status.as_u16(), text),
            ));
        }

        let parsed: ImagesResponse = response.json().await?;
        Ok(ImageOutput {
            image_data: Some(parsed.first_image(&self.name)?),
            image_path: None,
            format: "png".to_string(),
        })
    }
}
