//! Together AI image backend (FLUX models).

use async_trait::async_trait;
use serde::Serialize;

use super::openai::ImagesResponse;
use super::{ImageBackend, ImageOutput, ImageRequest};
use crate::error::{DaemonError, Result};

pub const TOGETHER_API_URL: &str = "https://api.together.xyz/v1/images/generations";

pub struct TogetherImage {
    name: String,
    model: String,
    url: String,
    api_key: Option<String>,
    size: (u32, u32),
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TogetherRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    width: u32,
    height: u32,
    n: u32,
    response_format: &'static str,
}

impl TogetherImage {
    /// Creates a client; `url` defaults to the public Together endpoint.
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        url: Option<String>,
        api_key: Option<String>,
        size: (u32, u32),
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            url: url.unwrap_or_else(|| TOGETHER_API_URL.to_string()),
            api_key,
            size,
            client,
        }
    }
}

#[async_trait]
impl ImageBackend for TogetherImage {
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
        let body = TogetherRequest {
            model: &self.model,
            prompt: &request.prompt,
            width: request.width,
            height: request.height,
            n: 1,
            response_format: "b64_json",
        };

        let preview: String = request.prompt.chars().take(80).collect();
        tracing::info!(model = %self.model, prompt = %preview, "Together image generation");

        let mut http = self.client.post(&self.url).json(&body);
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
