//! Capability routing.
//!
//! A [`RouteTable`] is an immutable snapshot of every registered backend and
//! the task-tag routes that point at them. The [`ProviderRouter`] holds the
//! current snapshot behind an `RwLock<Arc<_>>`; a reload builds a fresh table
//! and swaps it in wholesale, so resolutions already in flight keep the
//! handles they were given.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::openai::{OpenAiCompatText, OpenAiImages};
use super::remote::RemoteAudio;
use super::together::TogetherImage;
use super::{
    parse_route, AudioBackend, AudioRequest, BackendDescriptor, BackendKind, Capability,
    ImageBackend, TextBackend,
};
use crate::config::{DaemonConfig, ProviderEntry};
use crate::error::{DaemonError, Result};

/// Route tag used when a task has no route of its own.
pub const DEFAULT_ROUTE: &str = "default";

/// Audio route tag preferred for requests that carry lyrics.
pub const VOCAL_ROUTE: &str = "vocal";

/// Role name of the single backend bound for the `direct` pipeline.
pub const MODEL_ROLE: &str = "model";

/// Name of the pass-through pipeline.
pub const DIRECT_PIPELINE: &str = "direct";

/// A resolved text backend and the model to call it with.
#[derive(Clone)]
pub struct TextRoute {
    pub backend: Arc<dyn TextBackend>,
    pub model: String,
}

impl TextRoute {
    /// `provider:model`, as recorded on jobs.
    pub fn label(&self) -> String {
        format!("{}:{}", self.backend.name(), self.model)
    }
}

/// A resolved image backend and its model.
#[derive(Clone)]
pub struct ImageRoute {
    pub backend: Arc<dyn ImageBackend>,
    pub model: String,
}

/// Pipeline name plus the role-bound backends it will run with.
#[derive(Clone)]
pub struct AudioPlan {
    pub pipeline: String,
    pub bindings: HashMap<String, Arc<dyn AudioBackend>>,
}

impl AudioPlan {
    /// What the job records as its audio provider: the backend for a
    /// direct plan, the pipeline name otherwise.
    pub fn provider_label(&self) -> String {
        if self.pipeline == DIRECT_PIPELINE {
            if let Some(backend) = self.bindings.get(MODEL_ROLE) {
                return backend.name().to_string();
            }
        }
        self.pipeline.clone()
    }
}

/// Immutable snapshot of backends and routes.
#[derive(Default, Clone)]
pub struct RouteTable {
    text: BTreeMap<String, Arc<dyn TextBackend>>,
    text_routes: HashMap<String, String>,
    audio: BTreeMap<String, Arc<dyn AudioBackend>>,
    audio_routes: HashMap<String, String>,
    image: BTreeMap<String, Arc<dyn ImageBackend>>,
    image_routes: HashMap<String, String>,
    pipeline_roles: HashMap<String, BTreeMap<String, String>>,
    active_pipeline: String,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            active_pipeline: DIRECT_PIPELINE.to_string(),
            ..Default::default()
        }
    }

    /// Registers a text backend under its provider name.
    pub fn with_text(mut self, backend: Arc<dyn TextBackend>) -> Self {
        self.text.insert(backend.name().to_string(), backend);
        self
    }

    /// Registers an audio backend under its `provider:model` key.
    pub fn with_audio(mut self, backend: Arc<dyn AudioBackend>) -> Self {
        self.audio.insert(backend.name().to_string(), backend);
        self
    }

    /// Registers an image backend under its `provider:model` key.
    pub fn with_image(mut self, backend: Arc<dyn ImageBackend>) -> Self {
        self.image.insert(backend.name().to_string(), backend);
        self
    }

    pub fn with_text_route(mut self, task: &str, route: &str) -> Self {
        self.text_routes.insert(task.to_string(), route.to_string());
        self
    }

    pub fn with_audio_route(mut self, task: &str, route: &str) -> Self {
        self.audio_routes.insert(task.to_string(), route.to_string());
        self
    }

    pub fn with_image_route(mut self, task: &str, route: &str) -> Self {
        self.image_routes.insert(task.to_string(), route.to_string());
        self
    }

    /// Binds `role` of `pipeline` to an audio route key.
    pub fn with_pipeline_role(mut self, pipeline: &str, role: &str, route: &str) -> Self {
        self.pipeline_roles
            .entry(pipeline.to_string())
            .or_default()
            .insert(role.to_string(), route.to_string());
        self
    }

    pub fn with_active_pipeline(mut self, pipeline: &str) -> Self {
        self.active_pipeline = pipeline.to_string();
        self
    }

    pub fn active_pipeline(&self) -> &str {
        &self.active_pipeline
    }

    /// Builds concrete backends for every configured provider.
    ///
    /// Entries whose kind does not match their section are skipped with a
    /// warning; `validate()` reports them before this is ever reached.
    pub fn from_config(config: &DaemonConfig) -> Result<Self> {
        let mut table = RouteTable::new().with_active_pipeline(&config.generation.pipeline);

        for entry in &config.text.providers {
            let client = http_client(entry)?;
            match entry.kind {
                BackendKind::OpenaiCompat => {
                    let base_url = entry.base_url.clone().ok_or_else(|| {
                        DaemonError::config_invalid(format!(
                            "text provider '{}' needs a base_url",
                            entry.name
                        ))
                    })?;
                    table = table.with_text(Arc::new(OpenAiCompatText::new(
                        &entry.name,
                        base_url,
                        non_empty(&entry.api_key),
                        entry.models.clone(),
                        client,
                    )));
                }
                other => {
                    tracing::warn!(provider = %entry.name, kind = %other, "Skipping non-text provider in [text]");
                }
            }
        }

        for entry in &config.audio.providers {
            let client = http_client(entry)?;
            match entry.kind {
                BackendKind::Remote => {
                    let base_url = entry.base_url.clone().ok_or_else(|| {
                        DaemonError::config_invalid(format!(
                            "audio provider '{}' needs a base_url",
                            entry.name
                        ))
                    })?;
                    for model in &entry.models {
                        table = table.with_audio(Arc::new(RemoteAudio::new(
                            format!("{}:{}", entry.name, model),
                            model,
                            base_url.clone(),
                            non_empty(&entry.api_key),
                            client.clone(),
                        )));
                    }
                }
                other => {
                    tracing::warn!(provider = %entry.name, kind = %other, "Skipping non-audio provider in [audio]");
                }
            }
        }

        for entry in &config.image.providers {
            let client = http_client(entry)?;
            let (base_url, api_key) = image_credentials(config, entry);
            let size = (entry.default_width, entry.default_height);
            for model in &entry.models {
                let name = format!("{}:{}", entry.name, model);
                match entry.kind {
                    BackendKind::Together => {
                        table = table.with_image(Arc::new(TogetherImage::new(
                            name,
                            model,
                            base_url.clone(),
                            api_key.clone(),
                            size,
                            client.clone(),
                        )));
                    }
                    BackendKind::OpenaiImages => {
                        let base = base_url.clone().ok_or_else(|| {
                            DaemonError::config_invalid(format!(
                                "image provider '{}' needs a base_url or credentials",
                                entry.name
                            ))
                        })?;
                        table = table.with_image(Arc::new(OpenAiImages::new(
                            name,
                            model,
                            base,
                            api_key.clone(),
                            size,
                            client.clone(),
                        )));
                    }
                    other => {
                        tracing::warn!(provider = %entry.name, kind = %other, "Skipping non-image provider in [image]");
                        break;
                    }
                }
            }
        }

        table.text_routes = config.text.router.clone().into_iter().collect();
        table.audio_routes = config.audio.router.clone().into_iter().collect();
        table.image_routes = config.image.router.clone().into_iter().collect();
        table.pipeline_roles = config
            .audio
            .pipelines
            .iter()
            .map(|(name, p)| (name.clone(), p.roles.clone()))
            .collect();

        Ok(table)
    }

    fn route_for<'a>(routes: &'a HashMap<String, String>, task: &str) -> Option<&'a String> {
        routes
            .get(task)
            .or_else(|| routes.get(DEFAULT_ROUTE))
            .filter(|r| !r.trim().is_empty())
    }

    pub fn resolve_text(&self, task: &str) -> Result<TextRoute> {
        let route = Self::route_for(&self.text_routes, task)
            .ok_or_else(|| DaemonError::not_configured("text", task))?;
        let (provider, model) = parse_route(route);
        let backend = self
            .text
            .get(provider)
            .cloned()
            .ok_or_else(|| DaemonError::not_configured("text", route))?;
        Ok(TextRoute {
            backend,
            model: model.to_string(),
        })
    }

    pub fn resolve_audio(&self, request: &AudioRequest) -> Result<Arc<dyn AudioBackend>> {
        let vocal = if request.has_lyrics() {
            self.audio_routes.get(VOCAL_ROUTE)
        } else {
            None
        };
        let route = vocal
            .or_else(|| self.audio_routes.get(DEFAULT_ROUTE))
            .ok_or_else(|| DaemonError::not_configured("audio", DEFAULT_ROUTE))?;
        self.audio_backend(route)
    }

    /// Looks up an audio backend by its `provider:model` key.
    pub fn audio_backend(&self, key: &str) -> Result<Arc<dyn AudioBackend>> {
        self.audio
            .get(key)
            .cloned()
            .ok_or_else(|| DaemonError::not_configured("audio", key))
    }

    pub fn resolve_image(&self, task: &str) -> Option<ImageRoute> {
        let route = Self::route_for(&self.image_routes, task)?;
        match self.image.get(route.as_str()) {
            Some(backend) => Some(ImageRoute {
                backend: Arc::clone(backend),
                model: backend.model().to_string(),
            }),
            None => {
                tracing::warn!(route = %route, "Image route points to an unregistered backend");
                None
            }
        }
    }

    /// Resolves the active pipeline and its role bindings for a request.
    ///
    /// `direct` binds `model` through the normal audio route; any other
    /// pipeline binds the roles configured for it.
    pub fn resolve_plan(&self, request: &AudioRequest) -> Result<AudioPlan> {
        let pipeline = self.active_pipeline.clone();
        let mut bindings = HashMap::new();

        if pipeline == DIRECT_PIPELINE {
            bindings.insert(MODEL_ROLE.to_string(), self.resolve_audio(request)?);
        } else {
            let roles = self.pipeline_roles.get(&pipeline).ok_or_else(|| {
                DaemonError::new(
                    crate::error::ErrorCode::NotConfigured,
                    format!("Pipeline '{}' has no role bindings configured", pipeline),
                )
            })?;
            for (role, key) in roles {
                bindings.insert(role.clone(), self.audio_backend(key)?);
            }
        }

        Ok(AudioPlan { pipeline, bindings })
    }

    pub fn list_backends(&self) -> Vec<BackendDescriptor> {
        let mut out = Vec::new();
        for backend in self.text.values() {
            out.push(BackendDescriptor {
                name: backend.name().to_string(),
                capability: Capability::Text,
                models: backend.models().to_vec(),
                loaded: true,
            });
        }
        for backend in self.audio.values() {
            out.push(BackendDescriptor {
                name: backend.name().to_string(),
                capability: Capability::Audio,
                models: vec![backend.model_id().to_string()],
                loaded: backend.is_loaded(),
            });
        }
        for backend in self.image.values() {
            out.push(BackendDescriptor {
                name: backend.name().to_string(),
                capability: Capability::Image,
                models: vec![backend.model().to_string()],
                loaded: true,
            });
        }
        out
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

fn http_client(entry: &ProviderEntry) -> Result<reqwest::Client> {
    let timeout = Duration::from_secs(entry.timeout_secs.unwrap_or(120));
    reqwest::Client::builder()
        .user_agent(concat!("songweaver/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| {
            DaemonError::config_invalid(format!("HTTP client for '{}': {}", entry.name, e))
        })
}

/// Base URL and key for an image provider, borrowing from the text provider
/// named in `credentials` for anything left unset.
fn image_credentials(config: &DaemonConfig, entry: &ProviderEntry) -> (Option<String>, Option<String>) {
    let mut base_url = non_empty(&entry.base_url);
    let mut api_key = non_empty(&entry.api_key);
    if let Some(source) = &entry.credentials {
        if let Some(text) = config.text.providers.iter().find(|p| &p.name == source) {
            base_url = base_url.or_else(|| non_empty(&text.base_url));
            api_key = api_key.or_else(|| non_empty(&text.api_key));
        }
    }
    (base_url, api_key)
}

/// Resolves capability routes against the current [`RouteTable`].
pub struct ProviderRouter {
    table: RwLock<Arc<RouteTable>>,
}

impl ProviderRouter {
    pub fn new(table: RouteTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Result<Self> {
        Ok(Self::new(RouteTable::from_config(config)?))
    }

    /// Current snapshot. Callers keep it for the duration of one resolution.
    pub fn snapshot(&self) -> Arc<RouteTable> {
        match self.table.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swaps in a new route table.
    pub fn reload(&self, table: RouteTable) {
        let table = Arc::new(table);
        match self.table.write() {
            Ok(mut guard) => *guard = table,
            Err(poisoned) => *poisoned.into_inner() = table,
        }
        tracing::info!("Provider routes reloaded");
    }

    pub fn resolve_text(&self, task: &str) -> Result<TextRoute> {
        self.snapshot().resolve_text(task)
    }

    pub fn resolve_audio(&self, request: &AudioRequest) -> Result<Arc<dyn AudioBackend>> {
        self.snapshot().resolve_audio(request)
    }

    pub fn resolve_image(&self, task: &str) -> Option<ImageRoute> {
        self.snapshot().resolve_image(task)
    }

    pub fn resolve_plan(&self, request: &AudioRequest) -> Result<AudioPlan> {
        self.snapshot().resolve_plan(request)
    }

    pub fn list_backends(&self) -> Vec<BackendDescriptor> {
        self.snapshot().list_backends()
    }

    pub fn active_pipeline(&self) -> String {
        self.snapshot().active_pipeline().to_string()
    }
}
