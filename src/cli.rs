//! Command-line interface.
//!
//! The binary runs either as a JSON-RPC daemon over stdio or as a one-shot
//! generator that submits a single prompt and prints the finished record.

use std::path::PathBuf;

use clap::Parser;

use crate::config::DaemonConfig;
use crate::error::Result;
use crate::types::GenerationParams;

/// songweaver: AI song generation daemon
#[derive(Parser, Debug)]
#[command(name = "songweaver")]
#[command(about = "AI song generation daemon with pluggable text, audio and image backends")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for generated audio and cover art
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Number of simultaneous audio inference calls
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Timeout in seconds for the primary generation phase
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Active audio pipeline
    #[arg(long)]
    pub pipeline: Option<String>,

    /// Log filter when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Run in daemon mode (JSON-RPC over stdio)
    #[arg(long)]
    pub daemon: bool,

    /// Text prompt describing the song to generate
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Duration of the song in seconds
    #[arg(short, long, default_value = "30")]
    pub duration: f32,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub genre: Option<String>,

    #[arg(long)]
    pub mood: Option<String>,

    /// Lyrics to sing; omit for an instrumental or generated lyrics
    #[arg(long)]
    pub lyrics: Option<String>,

    /// Random seed for reproducible generation
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Produce an instrumental track
    #[arg(long)]
    pub instrumental: bool,

    /// Skip prompt enhancement
    #[arg(long)]
    pub no_enhance: bool,

    /// Write lyrics with the text backend when none are given
    #[arg(long)]
    pub generate_lyrics: bool,

    /// Skip cover art
    #[arg(long)]
    pub no_cover: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Returns true if running a one-shot generation (not daemon mode).
    pub fn is_oneshot_mode(&self) -> bool {
        !self.daemon && self.prompt.is_some()
    }

    /// Returns true if running in daemon mode.
    pub fn is_daemon_mode(&self) -> bool {
        self.daemon
    }

    /// Loads configuration from `--config` or the environment, then applies
    /// command-line overrides.
    pub fn load_config(&self) -> Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = DaemonConfig::load(path)?;
                config.apply_env_overrides();
                config
            }
            None => DaemonConfig::from_env()?,
        };
        self.apply_overrides(&mut config);
        Ok(config)
    }

    /// Applies flags that take precedence over file and environment values.
    pub fn apply_overrides(&self, config: &mut DaemonConfig) {
        if let Some(ref dir) = self.storage_dir {
            config.storage_path = Some(dir.clone());
        }
        if let Some(n) = self.max_concurrent {
            config.generation.max_concurrent = n;
        }
        if let Some(secs) = self.timeout {
            config.generation.timeout_secs = secs;
        }
        if let Some(ref pipeline) = self.pipeline {
            config.generation.pipeline = pipeline.clone();
        }
    }

    /// Builds the request for one-shot mode.
    pub fn generation_params(&self) -> Option<GenerationParams> {
        let prompt = self.prompt.clone()?;
        let mut params = GenerationParams::new(prompt);
        params.duration = self.duration;
        params.title = self.title.clone();
        params.genre = self.genre.clone();
        params.mood = self.mood.clone();
        params.lyrics = self.lyrics.clone();
        params.seed = self.seed;
        params.instrumental = self.instrumental;
        params.enhance_prompt = !self.no_enhance;
        params.generate_lyrics = self.generate_lyrics;
        params.generate_cover = !self.no_cover;
        Some(params)
    }
}
