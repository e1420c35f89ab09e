//! Content-generation backends and the router that selects them.
//!
//! Three capability classes are supported, each behind an object-safe async
//! trait so the orchestrator only ever holds `Arc<dyn ...>` handles:
//!
//! - [`TextBackend`]: chat-style LLMs used for prompt enhancement, lyrics and
//!   cover prompts
//! - [`AudioBackend`]: music generation
//! - [`ImageBackend`]: cover-art rendering
//!
//! Concrete implementations are chosen once, at configuration load, from the
//! closed [`BackendKind`] enum.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod openai;
pub mod prompts;
pub mod remote;
pub mod router;
pub mod together;

pub use router::{AudioPlan, ImageRoute, ProviderRouter, RouteTable, TextRoute};

/// Capability class served by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text,
    Audio,
    Image,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Text => "text",
            Capability::Audio => "audio",
            Capability::Image => "image",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete backend implementations known to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// OpenAI-compatible `/chat/completions` endpoint (OpenRouter, Ollama, ...).
    OpenaiCompat,

    /// HTTP music inference server returning WAV bytes.
    Remote,

    /// Together AI images API.
    Together,

    /// OpenAI-compatible `/images/generations` endpoint.
    OpenaiImages,
}

impl BackendKind {
    /// Returns the string representation used in config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::OpenaiCompat => "openai_compat",
            BackendKind::Remote => "remote",
            BackendKind::Together => "together",
            BackendKind::OpenaiImages => "openai_images",
        }
    }

    /// Parses a backend kind from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "openai_compat" | "openai" | "openrouter" => Some(BackendKind::OpenaiCompat),
            "remote" | "http" => Some(BackendKind::Remote),
            "together" => Some(BackendKind::Together),
            "openai_images" => Some(BackendKind::OpenaiImages),
            _ => None,
        }
    }

    /// Capability class this kind implements.
    pub fn capability(&self) -> Capability {
        match self {
            BackendKind::OpenaiCompat => Capability::Text,
            BackendKind::Remote => Capability::Audio,
            BackendKind::Together | BackendKind::OpenaiImages => Capability::Image,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Song metadata used to seed a cover-art prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverMetadata {
    pub title: Option<String>,
    pub genre: Option<String>,
    pub mood: Option<String>,
    pub lyrics: Option<String>,
}

/// Text generation capability.
///
/// Implementors only provide [`chat`](TextBackend::chat); the song-specific
/// helpers are built on it with the fixed system prompts in [`prompts`].
#[async_trait]
pub trait TextBackend: Send + Sync {
    /// Provider name as configured.
    fn name(&self) -> &str;

    /// Models this provider declares.
    fn models(&self) -> &[String];

    async fn chat(&self, model: &str, messages: &[ChatMessage], temperature: f32)
        -> Result<String>;

    async fn enhance_prompt(
        &self,
        model: &str,
        prompt: &str,
        genre: Option<&str>,
        mood: Option<&str>,
    ) -> Result<String> {
        let messages = prompts::enhancement_messages(prompt, genre, mood);
        let text = self.chat(model, &messages, prompts::DEFAULT_TEMPERATURE).await?;
        Ok(text.trim().to_string())
    }

    async fn generate_lyrics(
        &self,
        model: &str,
        prompt: &str,
        genre: Option<&str>,
        mood: Option<&str>,
        language: &str,
    ) -> Result<String> {
        let messages = prompts::lyrics_messages(prompt, genre, mood, language);
        let text = self.chat(model, &messages, prompts::DEFAULT_TEMPERATURE).await?;
        Ok(text.trim().to_string())
    }

    async fn generate_cover_prompt(&self, model: &str, meta: &CoverMetadata) -> Result<String> {
        let messages = prompts::cover_prompt_messages(meta);
        let text = self.chat(model, &messages, prompts::COVER_TEMPERATURE).await?;
        Ok(text.trim().to_string())
    }
}

/// A music generation request as seen by audio backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioRequest {
    pub prompt: String,
    pub lyrics: Option<String>,
    pub duration: f32,
    pub genre: Option<String>,
    pub mood: Option<String>,
    pub tempo: Option<u32>,
    pub key: Option<String>,
    pub instruments: Vec<String>,
    pub instrumental: bool,
    pub seed: Option<u64>,
    pub language: String,
}

impl AudioRequest {
    /// True when the request carries non-blank lyrics.
    pub fn has_lyrics(&self) -> bool {
        self.lyrics.as_deref().is_some_and(|l| !l.trim().is_empty())
    }

    /// Copy of this request with lyrics stripped and the instrumental flag set.
    pub fn instrumental_variant(&self) -> Self {
        Self {
            lyrics: None,
            instrumental: true,
            ..self.clone()
        }
    }
}

/// Result of an audio backend call.
///
/// Backends return either in-memory bytes or a path to a file they wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioOutput {
    pub audio_data: Option<Vec<u8>>,
    pub audio_path: Option<PathBuf>,
    pub sample_rate: u32,
    pub duration: f32,
    pub format: String,
    pub metadata: BTreeMap<String, String>,
}

/// Music generation capability.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Route key, `provider:model`.
    fn name(&self) -> &str;

    /// Model identifier reported in pipeline metadata.
    fn model_id(&self) -> &str;

    fn is_loaded(&self) -> bool {
        true
    }

    async fn generate(&self, request: &AudioRequest) -> Result<AudioOutput>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageOutput {
    pub image_data: Option<Vec<u8>>,
    pub image_path: Option<PathBuf>,
    pub format: String,
}

/// Image generation capability.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Route key, `provider:model`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Width and height used when the caller has no preference.
    fn default_size(&self) -> (u32, u32) {
        (1024, 1024)
    }

    async fn generate(&self, request: &ImageRequest) -> Result<ImageOutput>;
}

/// Summary of a registered backend for `get_backends`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub capability: Capability,
    pub models: Vec<String>,
    pub loaded: bool,
}

/// Splits a `provider:model` route into its parts.
///
/// A route without a colon names the provider only.
pub fn parse_route(route: &str) -> (&str, &str) {
    match route.split_once(':') {
        Some((provider, model)) => (provider, model),
        None => (route, ""),
    }
}
