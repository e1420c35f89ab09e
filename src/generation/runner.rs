//! The background unit of work for one job.
//!
//! Primary phase: dispatch, inference under the gate, save, complete. It
//! runs inside the timeout and under the job's cancellation token, and every
//! error it raises lands in one place that writes `failed`. Cover art runs
//! afterwards and can only ever log.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::error::{DaemonError, ErrorCode, Result, ERROR_MESSAGE_LIMIT};
use crate::pipeline::{output_bytes, PipelineRegistry};
use crate::providers::{AudioPlan, AudioRequest, CoverMetadata, ImageRequest, ProviderRouter};
use crate::storage::{AssetStorage, AudioTags};
use crate::store::{JobKey, JobStore};
use crate::types::{progress, JobUpdate};

/// Route tag for cover prompt and image generation.
pub const COVER_TASK: &str = "cover_art";

/// Limits applied to every job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorSettings {
    /// Permits of the inference gate.
    pub max_concurrent: usize,
    /// Budget for the primary phase, gate wait included.
    pub timeout: Duration,
    pub error_message_limit: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            timeout: Duration::from_secs(1800),
            error_message_limit: ERROR_MESSAGE_LIMIT,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            max_concurrent: config.generation.max_concurrent,
            timeout: config.timeout(),
            error_message_limit: config.generation.error_message_limit,
        }
    }
}

/// Everything a spawned job needs, fixed at creation.
pub(crate) struct JobWork {
    pub token: String,
    pub request: AudioRequest,
    pub plan: AudioPlan,
    pub tags: AudioTags,
    /// Present when cover art was requested.
    pub cover: Option<CoverMetadata>,
}

/// Shared services behind the orchestrator and its tasks.
pub(crate) struct Engine {
    pub store: Arc<dyn JobStore>,
    pub storage: Arc<dyn AssetStorage>,
    pub router: Arc<ProviderRouter>,
    pub pipelines: Arc<PipelineRegistry>,
    pub gate: Semaphore,
    settings: RwLock<OrchestratorSettings>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn AssetStorage>,
        router: Arc<ProviderRouter>,
        pipelines: Arc<PipelineRegistry>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            storage,
            router,
            pipelines,
            gate: Semaphore::new(settings.max_concurrent.max(1)),
            settings: RwLock::new(settings),
        }
    }

    pub fn settings(&self) -> OrchestratorSettings {
        match self.settings.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_settings(&self, settings: OrchestratorSettings) {
        match self.settings.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }

    /// Runs one job to a terminal state, then enriches it.
    pub async fn run(self: Arc<Self>, work: JobWork, cancel: CancellationToken) {
        let settings = self.settings();
        let token = work.token.as_str();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DaemonError::cancelled()),
            result = tokio::time::timeout(settings.timeout, self.primary(&work)) => {
                result.unwrap_or_else(|_| Err(DaemonError::timed_out()))
            }
        };

        if let Err(e) = outcome {
            self.record_failure(token, &e, settings.error_message_limit)
                .await;
            return;
        }

        let Some(meta) = &work.cover else {
            return;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(token = %token, "Cover art skipped after cancellation");
            }
            result = self.enrich_cover(token, meta) => {
                if let Err(e) = result {
                    tracing::warn!(token = %token, error = %e.message, "Cover art enrichment failed");
                }
            }
        }
    }

    async fn primary(&self, work: &JobWork) -> Result<()> {
        let token = work.token.as_str();
        self.store
            .update_status(
                token,
                JobUpdate::progress(progress::DISPATCHED, "Waiting for an inference slot"),
            )
            .await?;

        let output = {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| DaemonError::cancelled())?;
            let provider = work.plan.provider_label();
            self.store
                .update_status(
                    token,
                    JobUpdate::progress(
                        progress::GENERATING,
                        format!("Generating audio with {}", provider),
                    ),
                )
                .await?;
            tracing::info!(token = %token, provider = %provider, duration = work.request.duration, "Starting inference");
            self.pipelines
                .run(&work.plan.pipeline, &work.plan.bindings, &work.request)
                .await?
        };

        self.store
            .update_status(token, JobUpdate::progress(progress::ENRICHING, "Saving audio"))
            .await?;

        let format = output.format.clone();
        let duration = output.duration;
        let bytes = output_bytes(output, "audio").await?;

        // save and completion run to the end even if this future is dropped
        let persist = tokio::spawn(persist_audio(
            Arc::clone(&self.store),
            Arc::clone(&self.storage),
            work.token.clone(),
            bytes,
            format,
            duration,
            work.tags.clone(),
        ));
        let name = persist.await.map_err(|e| {
            DaemonError::new(ErrorCode::StorageFailed, format!("Audio save task failed: {}", e))
        })??;

        tracing::info!(token = %token, file = %name, duration, "Generation completed");
        Ok(())
    }

    /// Single catch point: writes `failed` once with the truncated message.
    async fn record_failure(&self, token: &str, error: &DaemonError, limit: usize) {
        let message = error.job_message(limit);
        match error.code {
            ErrorCode::Cancelled => {
                tracing::info!(token = %token, "Generation cancelled")
            }
            _ => tracing::warn!(token = %token, code = %error.code, error = %error.message, "Generation failed"),
        }
        if let Err(e) = self.store.update_status(token, JobUpdate::failed(message)).await {
            tracing::warn!(token = %token, error = %e.message, "Could not record job failure");
        }
    }

    async fn enrich_cover(&self, token: &str, meta: &CoverMetadata) -> Result<()> {
        let Some((name, prompt)) = self.render_cover(meta).await? else {
            tracing::debug!(token = %token, "No image backend, skipping cover art");
            return Ok(());
        };
        let saved = self
            .store
            .update_cover_art(JobKey::Token(token.to_string()), name.clone(), Some(prompt))
            .await;
        if let Err(e) = saved {
            if let Err(cleanup) = self.storage.delete_cover(&name).await {
                tracing::warn!(token = %token, file = %name, error = %cleanup.message, "Could not remove orphaned cover");
            }
            return Err(e);
        }
        tracing::info!(token = %token, file = %name, "Cover art stored");
        Ok(())
    }

    /// Prompt, render and store one cover. `None` when no image backend is
    /// routed for covers.
    pub async fn render_cover(&self, meta: &CoverMetadata) -> Result<Option<(String, String)>> {
        let Some(image) = self.router.resolve_image(COVER_TASK) else {
            return Ok(None);
        };

        let text = self
            .router
            .resolve_text(COVER_TASK)
            .map_err(|e| DaemonError::enrichment_failed("Cover prompt", e.message))?;
        let prompt = text
            .backend
            .generate_cover_prompt(&text.model, meta)
            .await
            .map_err(|e| DaemonError::enrichment_failed("Cover prompt", e.message))?;
        if prompt.is_empty() {
            return Err(DaemonError::enrichment_failed(
                "Cover prompt",
                "empty response",
            ));
        }

        let (width, height) = image.backend.default_size();
        let output = image
            .backend
            .generate(&ImageRequest {
                prompt: prompt.clone(),
                width,
                height,
            })
            .await
            .map_err(|e| DaemonError::enrichment_failed("Cover image", e.message))?;

        let bytes = match (output.image_data, output.image_path) {
            (Some(data), _) => data,
            (None, Some(path)) => tokio::fs::read(&path).await.map_err(|e| {
                DaemonError::storage(format!("Cannot read cover {}", path.display()), e)
            })?,
            (None, None) => {
                return Err(DaemonError::enrichment_failed(
                    "Cover image",
                    "backend returned no image data",
                ))
            }
        };

        let name = self.storage.save_cover(&bytes, &output.format).await?;
        Ok(Some((name, prompt)))
    }
}

/// Stores the audio and marks the job completed. A file whose job can no
/// longer complete is removed again.
async fn persist_audio(
    store: Arc<dyn JobStore>,
    storage: Arc<dyn AssetStorage>,
    token: String,
    bytes: Vec<u8>,
    format: String,
    duration: f32,
    tags: AudioTags,
) -> Result<String> {
    let name = storage
        .save_audio_with_metadata(&bytes, &format, &tags)
        .await?;

    let completed = store
        .update_status(
            &token,
            JobUpdate::Completed {
                audio_path: name.clone(),
                audio_format: format,
                audio_duration: duration,
            },
        )
        .await;
    if let Err(e) = completed {
        if let Err(cleanup) = storage.delete_audio(&name).await {
            tracing::warn!(token = %token, file = %name, error = %cleanup.message, "Could not remove orphaned audio");
        }
        return Err(e);
    }
    Ok(name)
}
