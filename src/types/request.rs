//! Request parameter types for creating and deriving generations.
//!
//! These deserialize straight from JSON-RPC params, so every optional field
//! has a serde default matching the daemon's behaviour when it is omitted.

use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, Result};

/// Maximum prompt length in characters.
pub const MAX_PROMPT_CHARS: usize = 2000;

/// Accepted duration range in seconds.
pub const MIN_DURATION: f32 = 1.0;
pub const MAX_DURATION: f32 = 300.0;

/// Accepted tempo range in BPM.
pub const MIN_TEMPO: u32 = 40;
pub const MAX_TEMPO: u32 = 240;

fn default_duration() -> f32 {
    30.0
}

fn default_language() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

/// Parameters for a new generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,

    #[serde(default = "default_duration")]
    pub duration: f32,

    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
    #[serde(default)]
    pub tempo: Option<u32>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub instruments: Vec<String>,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub instrumental: bool,

    #[serde(default)]
    pub seed: Option<u64>,

    /// Rewrite the prompt through the `enhancement` text route.
    #[serde(default = "default_true")]
    pub enhance_prompt: bool,

    /// Write lyrics through the `lyrics` text route when none are supplied.
    #[serde(default)]
    pub generate_lyrics: bool,

    /// Produce cover art after the audio completes.
    #[serde(default = "default_true")]
    pub generate_cover: bool,
}

impl GenerationParams {
    /// Creates parameters with defaults for everything but the prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            duration: default_duration(),
            title: None,
            genre: None,
            mood: None,
            lyrics: None,
            tempo: None,
            key: None,
            instruments: Vec::new(),
            language: default_language(),
            instrumental: false,
            seed: None,
            enhance_prompt: true,
            generate_lyrics: false,
            generate_cover: true,
        }
    }

    /// Validates the request before anything is persisted.
    pub fn validate(&self) -> Result<()> {
        validate_prompt(&self.prompt)?;
        validate_duration(self.duration)?;
        if let Some(tempo) = self.tempo {
            if !(MIN_TEMPO..=MAX_TEMPO).contains(&tempo) {
                return Err(DaemonError::invalid_params(format!(
                    "Tempo must be between {} and {} BPM, got {}",
                    MIN_TEMPO, MAX_TEMPO, tempo
                )));
            }
        }
        Ok(())
    }
}

pub fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(DaemonError::empty_prompt());
    }
    let len = prompt.chars().count();
    if len > MAX_PROMPT_CHARS {
        return Err(DaemonError::prompt_too_long(len, MAX_PROMPT_CHARS));
    }
    Ok(())
}

pub fn validate_duration(duration: f32) -> Result<()> {
    if !duration.is_finite() || !(MIN_DURATION..=MAX_DURATION).contains(&duration) {
        return Err(DaemonError::invalid_duration(duration));
    }
    Ok(())
}

/// Parameters for extending an existing generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendParams {
    pub parent_id: i64,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
    #[serde(default = "default_duration")]
    pub duration: f32,
}

/// Fields a remix may override; anything left `None` comes from the parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemixOverrides {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub tempo: Option<u32>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub instruments: Option<Vec<String>>,
    #[serde(default)]
    pub lyrics: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub instrumental: Option<bool>,
}

/// Metadata overrides for regenerating cover art on an existing job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverOverrides {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub lyrics: Option<String>,
}
