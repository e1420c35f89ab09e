//! Audio backend that delegates inference to an HTTP music server.
//!
//! The server receives the request as JSON on `POST {base_url}/generate` and
//! answers with a WAV body.

use std::collections::BTreeMap;
use std::io::Cursor;

use async_trait::async_trait;
use serde::Serialize;

use super::prompts::compose_music_prompt;
use super::{AudioBackend, AudioOutput, AudioRequest};
use crate::error::{DaemonError, Result};

pub struct RemoteAudio {
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct RemoteRequest<'a> {
    model: &'a str,
    prompt: String,
    lyrics: Option<&'a str>,
    duration: f32,
    seed: Option<u64>,
    language: &'a str,
    instrumental: bool,
}

impl RemoteAudio {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }
}

/// Maps a failed inference response onto the error taxonomy.
fn classify_failure(backend: &str, status: u16, body: &str) -> DaemonError {
    let lowered = body.to_lowercase();
    if status == 507 || lowered.contains("out of memory") {
        DaemonError::resource_exhausted(format!("{} ran out of memory", backend))
    } else {
        DaemonError::backend_failed(backend, format!("HTTP {}: {}", status, body))
    }
}

/// Reads sample rate and duration from a WAV header.
fn probe_wav(backend: &str, bytes: &[u8]) -> Result<(u32, f32)> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| DaemonError::audio_codec(format!("{} returned invalid WAV: {}", backend, e)))?;
    let spec = reader.spec();
    let frames = reader.duration();
    let duration = if spec.sample_rate == 0 {
        0.0
    } else {
        frames as f32 / spec.sample_rate as f32
    };
    Ok((spec.sample_rate, duration))
}

#[async_trait]
impl AudioBackend for RemoteAudio {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &AudioRequest) -> Result<AudioOutput> {
        let url = format!("{}/generate", self.base_url);
        let body = RemoteRequest {
            model: &self.model,
            prompt: compose_music_prompt(request),
            lyrics: request.lyrics.as_deref(),
            duration: request.duration,
            seed: request.seed,
            language: &request.language,
            instrumental: request.instrumental,
        };

        tracing::info!(
            backend = %self.name,
            duration = request.duration,
            "Dispatching audio generation"
        );

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(&self.name, status.as_u16(), &text));
        }

        let bytes = response.bytes().await?.to_vec();
        let (sample_rate, duration) = probe_wav(&self.name, &bytes)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("model".to_string(), self.model.clone());
        metadata.insert("backend".to_string(), self.name.clone());

        Ok(AudioOutput {
            audio_data: Some(bytes),
            audio_path: None,
            sample_rate,
            duration,
            format: "wav".to_string(),
            metadata,
        })
    }
}
