//! Composite audio generation strategies.
//!
//! A pipeline consumes role-tagged audio backends and one request and
//! produces a single [`AudioOutput`]. Pipelines are registered by name in a
//! [`PipelineRegistry`]; the active name comes from configuration.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;

use crate::audio::MixWeights;
use crate::error::{DaemonError, Result};
use crate::providers::{AudioBackend, AudioOutput, AudioRequest};

mod direct;
mod vocal_instrumental;

pub use direct::DirectPipeline;
pub use vocal_instrumental::VocalInstrumentalPipeline;

/// Role name to backend for one pipeline run.
pub type RoleBindings = HashMap<String, Arc<dyn AudioBackend>>;

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(&self, bindings: &RoleBindings, request: &AudioRequest) -> Result<AudioOutput>;
}

/// Looks up a required role, failing with `MissingRole`.
pub(crate) fn require_role<'a>(
    bindings: &'a RoleBindings,
    pipeline: &str,
    role: &str,
) -> Result<&'a Arc<dyn AudioBackend>> {
    bindings
        .get(role)
        .ok_or_else(|| DaemonError::missing_role(pipeline, role))
}

/// Returns the WAV bytes of a backend result, reading its file if needed.
pub(crate) async fn output_bytes(output: AudioOutput, label: &str) -> Result<Vec<u8>> {
    if let Some(data) = output.audio_data {
        return Ok(data);
    }
    match output.audio_path {
        Some(path) => tokio::fs::read(&path).await.map_err(|e| {
            DaemonError::storage(format!("Cannot read {} audio {}", label, path.display()), e)
        }),
        None => Err(DaemonError::audio_codec(format!(
            "{} backend returned no audio data",
            label
        ))),
    }
}

/// Name and description of a registered pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineInfo {
    pub name: String,
    pub description: String,
}

struct Registered {
    pipeline: Arc<dyn Pipeline>,
    description: String,
}

/// Named pipeline strategies.
pub struct PipelineRegistry {
    entries: RwLock<BTreeMap<String, Registered>>,
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a registry holding `direct` and `vocal_instrumental`.
    pub fn with_builtins(weights: MixWeights) -> Self {
        let registry = Self::new();
        registry.register_builtins(weights);
        registry
    }

    /// (Re)registers the built-in pipelines, e.g. after mix weights change.
    pub fn register_builtins(&self, weights: MixWeights) {
        self.register(
            direct::NAME,
            Arc::new(DirectPipeline),
            "Single model pass-through (uses the configured default model)",
        );
        self.register(
            vocal_instrumental::NAME,
            Arc::new(VocalInstrumentalPipeline::new(weights)),
            "Combines instrumental and vocal models in parallel, then mixes",
        );
    }

    /// Registers a pipeline, replacing any existing one with the same name.
    pub fn register(&self, name: &str, pipeline: Arc<dyn Pipeline>, description: &str) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.contains_key(name) {
            tracing::debug!(pipeline = %name, "Replacing registered pipeline");
        }
        entries.insert(
            name.to_string(),
            Registered {
                pipeline,
                description: description.to_string(),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub async fn run(
        &self,
        name: &str,
        bindings: &RoleBindings,
        request: &AudioRequest,
    ) -> Result<AudioOutput> {
        let pipeline = {
            let entries = self.read();
            match entries.get(name) {
                Some(entry) => Arc::clone(&entry.pipeline),
                None => {
                    let available: Vec<String> = entries.keys().cloned().collect();
                    return Err(DaemonError::unknown_pipeline(name, &available));
                }
            }
        };
        pipeline.run(bindings, request).await
    }

    pub fn list(&self) -> Vec<PipelineInfo> {
        self.read()
            .iter()
            .map(|(name, entry)| PipelineInfo {
                name: name.clone(),
                description: entry.description.clone(),
            })
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Registered>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
