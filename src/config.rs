//! Daemon configuration module.
//!
//! Configuration is read from a TOML file with `${VAR}` placeholders in
//! string values substituted from the environment, then adjusted by
//! `SONGWEAVER_*` environment overrides. The provider sections describe which
//! backends exist and how capability routes map onto them:
//!
//! ```toml
//! [generation]
//! max_concurrent = 2
//! pipeline = "direct"
//!
//! [[text.providers]]
//! name = "openrouter"
//! type = "openai_compat"
//! base_url = "https://openrouter.ai/api/v1"
//! api_key = "${OPENROUTER_API_KEY}"
//! models = ["mistralai/mistral-small"]
//!
//! [text.router]
//! default = "openrouter:mistralai/mistral-small"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::audio::MixWeights;
use crate::error::{DaemonError, Result, ERROR_MESSAGE_LIMIT};
use crate::providers::{parse_route, BackendKind, Capability};

static RE_ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

fn default_max_concurrent() -> usize {
    2
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_error_message_limit() -> usize {
    ERROR_MESSAGE_LIMIT
}

fn default_pipeline() -> String {
    "direct".to_string()
}

fn default_vocal_volume() -> f32 {
    0.7
}

fn default_instrumental_volume() -> f32 {
    0.5
}

fn default_image_size() -> u32 {
    1024
}

/// Limits and defaults for the generation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Number of simultaneous audio inference calls.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Wall-clock limit for the primary phase of a job.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum characters kept in a failed job's error message.
    #[serde(default = "default_error_message_limit")]
    pub error_message_limit: usize,

    /// Active audio pipeline.
    #[serde(default = "default_pipeline")]
    pub pipeline: String,

    #[serde(default = "default_vocal_volume")]
    pub vocal_volume: f32,

    #[serde(default = "default_instrumental_volume")]
    pub instrumental_volume: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
            error_message_limit: default_error_message_limit(),
            pipeline: default_pipeline(),
            vocal_volume: default_vocal_volume(),
            instrumental_volume: default_instrumental_volume(),
        }
    }
}

/// One configured backend provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: BackendKind,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub models: Vec<String>,

    /// Text provider whose `base_url`/`api_key` fill in missing values.
    #[serde(default)]
    pub credentials: Option<String>,

    /// Per-request HTTP timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default = "default_image_size")]
    pub default_width: u32,

    #[serde(default = "default_image_size")]
    pub default_height: u32,
}

/// Providers and routes for one capability class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityConfig {
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,

    /// Task tag to `provider:model` route.
    #[serde(default)]
    pub router: BTreeMap<String, String>,
}

/// Role bindings for a composite pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Role name to audio route key (`provider:model`).
    #[serde(default)]
    pub roles: BTreeMap<String, String>,
}

/// Audio providers, routes and pipeline role bindings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,

    #[serde(default)]
    pub router: BTreeMap<String, String>,

    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineConfig>,
}

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory for generated audio and cover art.
    /// If None, uses the platform-specific default data location.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    #[serde(default)]
    pub generation: GenerationSettings,

    #[serde(default)]
    pub text: CapabilityConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub image: CapabilityConfig,

    /// File this configuration was read from, used by reloads.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl DaemonConfig {
    /// Creates a new DaemonConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses configuration from TOML text, substituting `${VAR}` placeholders.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut value: toml::Value = toml::from_str(text)
            .map_err(|e| DaemonError::config_invalid(format!("Invalid TOML: {}", e)))?;
        substitute_env_values(&mut value);
        value
            .try_into()
            .map_err(|e| DaemonError::config_invalid(format!("Invalid configuration: {}", e)))
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DaemonError::config_invalid(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Creates a DaemonConfig from the config file and environment variables.
    ///
    /// The file is `SONGWEAVER_CONFIG` when set, otherwise the platform default
    /// location if it exists. Then these variables override file values:
    /// - `SONGWEAVER_STORAGE_PATH` - Directory for generated assets
    /// - `SONGWEAVER_MAX_CONCURRENT` - Simultaneous inference calls
    /// - `SONGWEAVER_TIMEOUT_SECS` - Primary phase timeout
    /// - `SONGWEAVER_PIPELINE` - Active audio pipeline
    ///
    /// Unparseable override values are ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("SONGWEAVER_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => {
                let path = default_config_path();
                if path.exists() {
                    Self::load(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies `SONGWEAVER_*` overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SONGWEAVER_STORAGE_PATH") {
            self.storage_path = Some(PathBuf::from(path));
        }

        if let Ok(value) = std::env::var("SONGWEAVER_MAX_CONCURRENT") {
            if let Ok(n) = value.parse::<usize>() {
                if n > 0 {
                    self.generation.max_concurrent = n;
                }
            }
        }

        if let Ok(value) = std::env::var("SONGWEAVER_TIMEOUT_SECS") {
            if let Ok(secs) = value.parse::<u64>() {
                if secs > 0 {
                    self.generation.timeout_secs = secs;
                }
            }
        }

        if let Ok(pipeline) = std::env::var("SONGWEAVER_PIPELINE") {
            if !pipeline.trim().is_empty() {
                self.generation.pipeline = pipeline.trim().to_string();
            }
        }
    }

    /// Re-reads the file this configuration came from, keeping CLI-level
    /// overrides of the storage path.
    pub fn reload(&self) -> Result<Self> {
        let path = self
            .source
            .as_deref()
            .ok_or_else(|| DaemonError::config_invalid("Configuration was not loaded from a file"))?;
        let mut fresh = Self::load(path)?;
        fresh.apply_env_overrides();
        if fresh.storage_path.is_none() {
            fresh.storage_path = self.storage_path.clone();
        }
        Ok(fresh)
    }

    /// Returns the effective storage path, using platform defaults if not specified.
    pub fn effective_storage_path(&self) -> PathBuf {
        if let Some(ref path) = self.storage_path {
            path.clone()
        } else {
            default_storage_path()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs)
    }

    pub fn mix_weights(&self) -> MixWeights {
        MixWeights {
            instrumental: self.generation.instrumental_volume,
            vocal: self.generation.vocal_volume,
        }
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        let generation = &self.generation;
        if generation.max_concurrent == 0 {
            return Some("generation.max_concurrent must be > 0".to_string());
        }
        if generation.max_concurrent > 64 {
            return Some(format!(
                "generation.max_concurrent too high: {} (max 64)",
                generation.max_concurrent
            ));
        }
        if generation.timeout_secs == 0 {
            return Some("generation.timeout_secs must be > 0".to_string());
        }
        if generation.error_message_limit == 0 {
            return Some("generation.error_message_limit must be > 0".to_string());
        }
        for (label, volume) in [
            ("vocal_volume", generation.vocal_volume),
            ("instrumental_volume", generation.instrumental_volume),
        ] {
            if !volume.is_finite() || !(0.0..=4.0).contains(&volume) {
                return Some(format!("generation.{} must be within 0.0..=4.0", label));
            }
        }

        let sections = [
            ("text", Capability::Text, &self.text.providers),
            ("audio", Capability::Audio, &self.audio.providers),
            ("image", Capability::Image, &self.image.providers),
        ];
        for (section, capability, providers) in sections {
            let mut seen = HashSet::new();
            for entry in providers {
                if entry.name.trim().is_empty() {
                    return Some(format!("[{}] provider with empty name", section));
                }
                if !seen.insert(entry.name.as_str()) {
                    return Some(format!("[{}] duplicate provider '{}'", section, entry.name));
                }
                if entry.kind.capability() != capability {
                    return Some(format!(
                        "[{}] provider '{}' has type '{}', which is a {} backend",
                        section,
                        entry.name,
                        entry.kind,
                        entry.kind.capability()
                    ));
                }
            }
        }

        for (task, route) in &self.text.router {
            let (provider, _) = parse_route(route);
            if !self.text.providers.iter().any(|p| p.name == provider) {
                return Some(format!(
                    "text.router.{} points to unknown provider '{}'",
                    task, provider
                ));
            }
        }

        let audio_keys = self.audio_route_keys();
        for (task, route) in &self.audio.router {
            if !audio_keys.contains(route) {
                return Some(format!("audio.router.{} points to unknown model '{}'", task, route));
            }
        }
        for (pipeline, cfg) in &self.audio.pipelines {
            for (role, route) in &cfg.roles {
                if !audio_keys.contains(route) {
                    return Some(format!(
                        "audio.pipelines.{}.roles.{} points to unknown model '{}'",
                        pipeline, role, route
                    ));
                }
            }
        }

        let image_keys = route_keys(&self.image.providers);
        for (task, route) in &self.image.router {
            if !image_keys.contains(route) {
                return Some(format!("image.router.{} points to unknown model '{}'", task, route));
            }
        }

        None
    }

    /// All `provider:model` keys declared by audio providers.
    pub fn audio_route_keys(&self) -> HashSet<String> {
        route_keys(&self.audio.providers)
    }
}

fn route_keys(providers: &[ProviderEntry]) -> HashSet<String> {
    providers
        .iter()
        .flat_map(|p| p.models.iter().map(move |m| format!("{}:{}", p.name, m)))
        .collect()
}

/// Replaces `${VAR}` placeholders with environment values.
///
/// Unset variables become empty strings.
pub fn substitute_env(text: &str) -> String {
    RE_ENV_PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => {
                    tracing::warn!(variable = %name, "Config references unset environment variable");
                    String::new()
                }
            }
        })
        .into_owned()
}

fn substitute_env_values(value: &mut toml::Value) {
    match value {
        toml::Value::String(s) => {
            if s.contains("${") {
                *s = substitute_env(s);
            }
        }
        toml::Value::Array(items) => items.iter_mut().for_each(substitute_env_values),
        toml::Value::Table(table) => table.iter_mut().for_each(|(_, v)| substitute_env_values(v)),
        _ => {}
    }
}

/// Returns the platform-specific default config file path.
///
/// - macOS: ~/Library/Application Support/songweaver/config.toml
/// - Linux: ~/.config/songweaver/config.toml
/// - Windows: C:\Users\<user>\AppData\Roaming\songweaver\config\config.toml
pub fn default_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "songweaver") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        PathBuf::from("./songweaver.toml")
    }
}

/// Returns the platform-specific default storage path.
///
/// - macOS: ~/Library/Application Support/songweaver/storage
/// - Linux: ~/.local/share/songweaver/storage
/// - Windows: C:\Users\<user>\AppData\Roaming\songweaver\data\storage
fn default_storage_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "songweaver") {
        proj_dirs.data_dir().join("storage")
    } else {
        PathBuf::from("./storage")
    }
}
