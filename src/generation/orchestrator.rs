//! Generation orchestrator.
//!
//! Accepts creation requests, performs the synchronous text enrichment,
//! persists a `pending` record and hands the rest to a supervised task. Also
//! answers the read, like, cancel, delete and cover requests that address
//! existing jobs.

use std::sync::Arc;

use serde::Serialize;

use super::runner::{Engine, JobWork, OrchestratorSettings};
use super::tasks::TaskTable;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, ErrorCode, Result};
use crate::pipeline::{PipelineInfo, PipelineRegistry};
use crate::providers::{AudioRequest, BackendDescriptor, CoverMetadata, ProviderRouter, RouteTable};
use crate::storage::{AssetStorage, AudioTags};
use crate::store::{JobKey, JobStore, ListQuery};
use crate::types::{
    validate_duration, CoverOverrides, ExtendParams, GenerationJob, GenerationParams, JobStatus,
    Lineage, LineageKind, NewJob, RemixOverrides,
};

const ENHANCEMENT_TASK: &str = "enhancement";
const LYRICS_TASK: &str = "lyrics";

/// Poll view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub token: String,
    pub id: i64,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskStatus {
    pub fn from_job(job: &GenerationJob) -> Self {
        Self {
            token: job.token.clone(),
            id: job.id,
            status: job.status,
            progress: job.progress,
            message: job.progress_message.clone(),
            error: job.error_message.clone(),
        }
    }
}

/// Answer to a result query.
#[derive(Debug, Clone)]
pub enum TaskResult {
    /// Still `pending` or `processing`.
    Pending(TaskStatus),
    /// Terminal record.
    Finished(Box<GenerationJob>),
}

/// Owns job creation and the supervised background work.
pub struct Orchestrator {
    engine: Arc<Engine>,
    tasks: TaskTable,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn AssetStorage>,
        router: Arc<ProviderRouter>,
        pipelines: Arc<PipelineRegistry>,
        settings: OrchestratorSettings,
    ) -> Self {
        tracing::debug!(
            max_concurrent = settings.max_concurrent,
            timeout_secs = settings.timeout.as_secs(),
            "Orchestrator ready"
        );
        Self {
            engine: Arc::new(Engine::new(store, storage, router, pipelines, settings)),
            tasks: TaskTable::new(),
        }
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.engine.settings()
    }

    /// Validates, enriches and persists a new job, then starts its work.
    pub async fn create_generation(&self, params: GenerationParams) -> Result<GenerationJob> {
        self.submit(params, None).await
    }

    /// Continues an existing song.
    pub async fn extend(&self, params: ExtendParams) -> Result<GenerationJob> {
        let parent = self.get(params.parent_id).await?;
        validate_duration(params.duration)?;

        let prompt = params
            .prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| format!("{} (continuation)", parent.prompt));

        let derived = GenerationParams {
            prompt,
            duration: params.duration,
            title: parent.title.clone(),
            genre: parent.genre.clone(),
            mood: parent.mood.clone(),
            lyrics: params.lyrics.or_else(|| parent.lyrics.clone()),
            tempo: parent.tempo,
            key: parent.key.clone(),
            instruments: parent.instruments.clone(),
            language: parent.language.clone(),
            instrumental: parent.instrumental,
            seed: None,
            enhance_prompt: true,
            generate_lyrics: false,
            generate_cover: true,
        };
        self.submit(
            derived,
            Some(Lineage {
                parent_id: parent.id,
                kind: LineageKind::Extend,
            }),
        )
        .await
    }

    /// Regenerates an existing song with some attributes replaced.
    pub async fn remix(&self, parent_id: i64, overrides: RemixOverrides) -> Result<GenerationJob> {
        let parent = self.get(parent_id).await?;

        let derived = GenerationParams {
            prompt: overrides.prompt.unwrap_or_else(|| parent.prompt.clone()),
            duration: parent.duration,
            title: overrides.title.or_else(|| parent.title.clone()),
            genre: overrides.genre.or_else(|| parent.genre.clone()),
            mood: overrides.mood.or_else(|| parent.mood.clone()),
            lyrics: overrides.lyrics.or_else(|| parent.lyrics.clone()),
            tempo: overrides.tempo.or(parent.tempo),
            key: overrides.key.or_else(|| parent.key.clone()),
            instruments: overrides
                .instruments
                .unwrap_or_else(|| parent.instruments.clone()),
            language: overrides
                .language
                .unwrap_or_else(|| parent.language.clone()),
            instrumental: overrides.instrumental.unwrap_or(parent.instrumental),
            seed: None,
            enhance_prompt: true,
            generate_lyrics: false,
            generate_cover: true,
        };
        self.submit(
            derived,
            Some(Lineage {
                parent_id: parent.id,
                kind: LineageKind::Remix,
            }),
        )
        .await
    }

    async fn submit(
        &self,
        params: GenerationParams,
        lineage: Option<Lineage>,
    ) -> Result<GenerationJob> {
        params.validate()?;
        let router = &self.engine.router;
        let genre = params.genre.as_deref();
        let mood = params.mood.as_deref();

        let mut text_provider = None;
        let mut enhanced_prompt = None;
        if params.enhance_prompt {
            match router.resolve_text(ENHANCEMENT_TASK) {
                Ok(route) => match route
                    .backend
                    .enhance_prompt(&route.model, &params.prompt, genre, mood)
                    .await
                {
                    Ok(text) if !text.is_empty() => {
                        enhanced_prompt = Some(text);
                        text_provider = Some(route.label());
                    }
                    Ok(_) => tracing::warn!("Prompt enhancement returned nothing, keeping original"),
                    Err(e) => {
                        tracing::warn!(error = %e.message, "Prompt enhancement failed, keeping original")
                    }
                },
                Err(e) => tracing::debug!(error = %e.message, "Prompt enhancement skipped"),
            }
        }

        let mut lyrics = params.lyrics.clone().filter(|l| !l.trim().is_empty());
        if params.generate_lyrics && lyrics.is_none() {
            match router.resolve_text(LYRICS_TASK) {
                Ok(route) => match route
                    .backend
                    .generate_lyrics(&route.model, &params.prompt, genre, mood, &params.language)
                    .await
                {
                    Ok(text) if !text.is_empty() => {
                        lyrics = Some(text);
                        text_provider.get_or_insert_with(|| route.label());
                    }
                    Ok(_) => tracing::warn!("Lyrics generation returned nothing"),
                    Err(e) => tracing::warn!(error = %e.message, "Lyrics generation failed"),
                },
                Err(e) => tracing::warn!(error = %e.message, "Lyrics generation skipped"),
            }
        }

        let seed = params.seed.unwrap_or_else(|| u64::from(rand::random::<u32>()));
        let request = AudioRequest {
            prompt: enhanced_prompt
                .clone()
                .unwrap_or_else(|| params.prompt.clone()),
            lyrics: lyrics.clone(),
            duration: params.duration,
            genre: params.genre.clone(),
            mood: params.mood.clone(),
            tempo: params.tempo,
            key: params.key.clone(),
            instruments: params.instruments.clone(),
            instrumental: params.instrumental,
            seed: Some(seed),
            language: params.language.clone(),
        };

        let plan = router.resolve_plan(&request).map_err(|e| {
            if e.code == ErrorCode::NotConfigured {
                e
            } else {
                DaemonError::new(ErrorCode::NotConfigured, e.message)
            }
        })?;

        let token = uuid::Uuid::new_v4().simple().to_string();
        let tags = AudioTags::for_song(params.title.as_deref(), &params.prompt, genre);
        let cover = params.generate_cover.then(|| CoverMetadata {
            title: params.title.clone(),
            genre: params.genre.clone(),
            mood: params.mood.clone(),
            lyrics: lyrics.clone(),
        });

        let job = self
            .engine
            .store
            .create(NewJob {
                token: token.clone(),
                prompt: params.prompt,
                enhanced_prompt,
                lyrics,
                title: params.title,
                genre: params.genre,
                mood: params.mood,
                duration: params.duration,
                tempo: params.tempo,
                key: params.key,
                instruments: params.instruments,
                language: params.language,
                instrumental: params.instrumental,
                seed: Some(seed),
                text_provider,
                audio_provider: plan.provider_label(),
                lineage,
            })
            .await?;

        tracing::info!(
            id = job.id,
            token = %job.token,
            provider = %job.audio_provider,
            duration = job.duration,
            "Generation queued"
        );

        let work = JobWork {
            token: token.clone(),
            request,
            plan,
            tags,
            cover,
        };
        let engine = Arc::clone(&self.engine);
        self.tasks
            .spawn(&token, move |cancel| engine.run(work, cancel));

        Ok(job)
    }

    pub async fn get(&self, id: i64) -> Result<GenerationJob> {
        self.engine
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| DaemonError::generation_not_found(id))
    }

    pub async fn get_by_token(&self, token: &str) -> Result<GenerationJob> {
        self.engine
            .store
            .get_by_token(token)
            .await?
            .ok_or_else(|| DaemonError::task_not_found(token))
    }

    pub async fn status(&self, token: &str) -> Result<TaskStatus> {
        Ok(TaskStatus::from_job(&self.get_by_token(token).await?))
    }

    pub async fn result(&self, token: &str) -> Result<TaskResult> {
        let job = self.get_by_token(token).await?;
        if job.status.is_terminal() {
            Ok(TaskResult::Finished(Box::new(job)))
        } else {
            Ok(TaskResult::Pending(TaskStatus::from_job(&job)))
        }
    }

    pub async fn list(&self, query: &ListQuery) -> Result<(Vec<GenerationJob>, usize)> {
        self.engine.store.list_all(query).await
    }

    pub async fn toggle_like(&self, id: i64) -> Result<bool> {
        self.engine.store.toggle_like(id).await
    }

    /// Requests cooperative cancellation. `false` if nothing runs under
    /// `token`.
    pub fn cancel_task(&self, token: &str) -> bool {
        let cancelled = self.tasks.cancel(token);
        if cancelled {
            tracing::info!(token = %token, "Cancellation requested");
        }
        cancelled
    }

    /// True while the background task for `token` is alive.
    pub fn is_running(&self, token: &str) -> bool {
        self.tasks.contains(token)
    }

    pub fn running_count(&self) -> usize {
        self.tasks.len()
    }

    /// Deletes a job: stops its task, removes its files, then the record.
    pub async fn delete(&self, id: i64) -> Result<GenerationJob> {
        let job = self.get(id).await?;
        if self.tasks.cancel_and_join(&job.token).await {
            tracing::info!(id, token = %job.token, "Stopped running generation before delete");
        }

        // re-read: the task may have written its final state meanwhile
        let job = self.get(id).await?;
        let storage = &self.engine.storage;
        if let Some(audio) = &job.audio_path {
            if let Err(e) = storage.delete_audio(audio).await {
                tracing::warn!(id, file = %audio, error = %e.message, "Could not delete audio file");
            }
        }
        if let Some(cover) = &job.cover_art_path {
            if let Err(e) = storage.delete_cover(cover).await {
                tracing::warn!(id, file = %cover, error = %e.message, "Could not delete cover file");
            }
        }

        self.engine
            .store
            .delete(id)
            .await?
            .ok_or_else(|| DaemonError::generation_not_found(id))?;
        tracing::info!(id, "Generation deleted");
        Ok(job)
    }

    /// Renders cover art for an existing job and returns (reference, prompt).
    pub async fn generate_cover_for_existing(
        &self,
        id: i64,
        overrides: CoverOverrides,
    ) -> Result<(String, String)> {
        let job = self.get(id).await?;
        if job.status != JobStatus::Completed {
            return Err(DaemonError::invalid_transition(
                &job.token,
                job.status.as_str(),
                "cover_art",
            ));
        }
        let meta = CoverMetadata {
            title: overrides.title.or(job.title),
            genre: overrides.genre.or(job.genre),
            mood: overrides.mood.or(job.mood),
            lyrics: overrides.lyrics.or(job.lyrics),
        };

        let (name, prompt) = self
            .engine
            .render_cover(&meta)
            .await?
            .ok_or_else(DaemonError::no_image_backend)?;

        if let Err(e) = self
            .engine
            .store
            .update_cover_art(JobKey::Id(id), name.clone(), Some(prompt.clone()))
            .await
        {
            if let Err(cleanup) = self.engine.storage.delete_cover(&name).await {
                tracing::warn!(id, file = %name, error = %cleanup.message, "Could not remove orphaned cover");
            }
            return Err(e);
        }

        if let Some(previous) = job.cover_art_path.filter(|p| p != &name) {
            if let Err(e) = self.engine.storage.delete_cover(&previous).await {
                tracing::warn!(id, file = %previous, error = %e.message, "Could not delete replaced cover");
            }
        }
        tracing::info!(id, file = %name, "Cover art regenerated");
        Ok((name, prompt))
    }

    pub fn list_backends(&self) -> Vec<BackendDescriptor> {
        self.engine.router.list_backends()
    }

    /// Registered pipelines and the name of the active one.
    pub fn list_pipelines(&self) -> (Vec<PipelineInfo>, String) {
        (
            self.engine.pipelines.list(),
            self.engine.router.active_pipeline(),
        )
    }

    /// Applies a freshly loaded configuration.
    ///
    /// Routes and mix weights are swapped; timeout and message limit apply to
    /// jobs started afterwards. The gate size is fixed for the process.
    pub fn reload(&self, config: &DaemonConfig) -> Result<()> {
        if let Some(reason) = config.validate() {
            return Err(DaemonError::config_invalid(reason));
        }
        let table = RouteTable::from_config(config)?;
        self.engine.router.reload(table);
        self.engine
            .pipelines
            .register_builtins(config.mix_weights());

        let current = self.engine.settings();
        let fresh = OrchestratorSettings::from_config(config);
        if fresh.max_concurrent != current.max_concurrent {
            tracing::warn!(
                current = current.max_concurrent,
                requested = fresh.max_concurrent,
                "max_concurrent changes take effect after restart"
            );
        }
        self.engine.set_settings(OrchestratorSettings {
            max_concurrent: current.max_concurrent,
            ..fresh
        });
        Ok(())
    }

    /// Cancels all running work and waits for it to stop.
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MixWeights;
    use crate::providers::router::DEFAULT_ROUTE;
    use crate::providers::AudioBackend;
    use crate::storage::FsStorage;
    use crate::store::MemoryJobStore;
    use crate::test_support::{StubAudio, StubImage, StubText};
    use crate::types::progress;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::watch;

    struct Harness {
        orchestrator: Orchestrator,
        storage: Arc<FsStorage>,
        _dir: TempDir,
    }

    fn harness(table: RouteTable, settings: OrchestratorSettings) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsStorage::new(dir.path()).unwrap());
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryJobStore::new()),
            storage.clone(),
            Arc::new(ProviderRouter::new(table)),
            Arc::new(PipelineRegistry::with_builtins(MixWeights::default())),
            settings,
        );
        Harness {
            orchestrator,
            storage,
            _dir: dir,
        }
    }

    fn audio_table(audio: Arc<StubAudio>) -> RouteTable {
        let key = audio.name().to_string();
        RouteTable::new()
            .with_audio(audio)
            .with_audio_route(DEFAULT_ROUTE, &key)
    }

    fn full_table(audio: Arc<StubAudio>, text: Arc<StubText>, image: Arc<StubImage>) -> RouteTable {
        audio_table(audio)
            .with_text(text)
            .with_text_route(DEFAULT_ROUTE, "llm:m")
            .with_image(image)
            .with_image_route(DEFAULT_ROUTE, "img:flux")
    }

    fn plain(prompt: &str) -> GenerationParams {
        GenerationParams {
            enhance_prompt: false,
            generate_cover: false,
            duration: 5.0,
            ..GenerationParams::new(prompt)
        }
    }

    /// Waits until the job is terminal and its task has exited.
    async fn settle(orchestrator: &Orchestrator, token: &str) -> GenerationJob {
        for _ in 0..500 {
            let job = orchestrator.get_by_token(token).await.unwrap();
            if job.status.is_terminal() && !orchestrator.is_running(token) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never settled", token);
    }

    async fn wait_for<F>(mut check: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never met");
    }

    #[tokio::test]
    async fn full_generation_with_enrichment() {
        let audio = Arc::new(StubAudio::new("gpu:musicgen"));
        let text = Arc::new(StubText::new("llm"));
        let image = Arc::new(StubImage::new("img:flux"));
        let h = harness(
            full_table(audio.clone(), text.clone(), image.clone()),
            OrchestratorSettings::default(),
        );

        let mut params = GenerationParams::new("rainy night jazz");
        params.title = Some("Rainfall".to_string());
        params.generate_lyrics = true;
        let created = h.orchestrator.create_generation(params).await.unwrap();
        assert_eq!(created.status, JobStatus::Pending);
        assert_eq!(created.progress, 0);
        assert_eq!(created.token.len(), 32);
        assert!(created.seed.is_some());
        let enhanced = created.enhanced_prompt.clone().unwrap();
        assert!(enhanced.starts_with("enhanced:"));
        assert!(enhanced.contains("rainy night jazz"));
        assert_eq!(created.lyrics.as_deref(), Some("[Verse]\nstub lyrics"));
        assert_eq!(created.text_provider.as_deref(), Some("llm:m"));
        assert_eq!(created.audio_provider, "gpu:musicgen");

        let job = settle(&h.orchestrator, &created.token).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.error_message.is_none());
        let audio_name = job.audio_path.clone().unwrap();
        assert!(h.storage.audio_path(&audio_name).unwrap().exists());
        assert_eq!(job.audio_format.as_deref(), Some("wav"));

        // the backend saw the enhanced prompt and the generated lyrics
        let sent = audio.last_request().unwrap();
        assert_eq!(sent.prompt, enhanced);
        assert!(sent.has_lyrics());

        let cover = job.cover_art_path.clone().unwrap();
        assert!(h.storage.cover_path(&cover).unwrap().exists());
        assert_eq!(job.cover_art_prompt.as_deref(), Some("moody neon album cover"));
        assert_eq!(image.last_request().unwrap().width, 512);
    }

    #[tokio::test]
    async fn invalid_requests_persist_nothing() {
        let h = harness(
            audio_table(Arc::new(StubAudio::new("gpu:m"))),
            OrchestratorSettings::default(),
        );

        let err = h.orchestrator.create_generation(plain("   ")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPrompt);

        let mut params = plain("ok");
        params.duration = 0.5;
        let err = h.orchestrator.create_generation(params).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidDuration);

        let mut params = plain("ok");
        params.tempo = Some(300);
        let err = h.orchestrator.create_generation(params).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);

        let (items, total) = h.orchestrator.list(&ListQuery::default()).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn missing_audio_route_fails_creation() {
        let h = harness(RouteTable::new(), OrchestratorSettings::default());
        let err = h.orchestrator.create_generation(plain("x")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotConfigured);
        assert_eq!(h.orchestrator.running_count(), 0);
    }

    #[tokio::test]
    async fn text_failures_keep_the_original_prompt() {
        let audio = Arc::new(StubAudio::new("gpu:m"));
        let table = audio_table(audio.clone())
            .with_text(Arc::new(StubText::new("llm").failing()))
            .with_text_route(DEFAULT_ROUTE, "llm:m");
        let h = harness(table, OrchestratorSettings::default());

        let mut params = plain("lofi rain");
        params.enhance_prompt = true;
        params.generate_lyrics = true;
        let created = h.orchestrator.create_generation(params).await.unwrap();
        assert!(created.enhanced_prompt.is_none());
        assert!(created.lyrics.is_none());
        assert!(created.text_provider.is_none());

        let job = settle(&h.orchestrator, &created.token).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(audio.last_request().unwrap().prompt, "lofi rain");
    }

    #[tokio::test]
    async fn gate_bounds_concurrent_inference() {
        let (open, gate) = watch::channel(false);
        let audio = Arc::new(StubAudio::new("gpu:m").with_gate(gate));
        let settings = OrchestratorSettings {
            max_concurrent: 2,
            ..Default::default()
        };
        let h = harness(audio_table(audio.clone()), settings);

        let mut tokens = Vec::new();
        for i in 0..5 {
            let job = h
                .orchestrator
                .create_generation(plain(&format!("song {}", i)))
                .await
                .unwrap();
            tokens.push(job.token);
        }

        wait_for(|| audio.calls() == 2).await;
        for token in &tokens {
            for _ in 0..100 {
                let job = h.orchestrator.get_by_token(token).await.unwrap();
                if job.status == JobStatus::Processing {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(audio.calls(), 2);

        let mut waiting = 0;
        for token in &tokens {
            let job = h.orchestrator.get_by_token(token).await.unwrap();
            assert_eq!(job.status, JobStatus::Processing);
            if job.progress == 10 {
                waiting += 1;
            }
        }
        assert_eq!(waiting, 3);

        open.send(true).unwrap();
        for token in &tokens {
            let job = settle(&h.orchestrator, token).await;
            assert_eq!(job.status, JobStatus::Completed);
        }
        assert_eq!(audio.calls(), 5);
        assert!(audio.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn hung_backend_times_out() {
        let audio = Arc::new(StubAudio::new("gpu:m").hanging());
        let settings = OrchestratorSettings {
            timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let h = harness(audio_table(audio), settings);

        let created = h.orchestrator.create_generation(plain("stuck")).await.unwrap();
        let job = settle(&h.orchestrator, &created.token).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("timed out"));
        assert!(job.audio_path.is_none());
        assert!(!h.orchestrator.is_running(&created.token));
    }

    #[tokio::test]
    async fn cancel_marks_job_failed() {
        let audio = Arc::new(StubAudio::new("gpu:m").hanging());
        let h = harness(audio_table(audio.clone()), OrchestratorSettings::default());

        let created = h.orchestrator.create_generation(plain("long")).await.unwrap();
        wait_for(|| audio.calls() == 1).await;

        assert!(h.orchestrator.cancel_task(&created.token));
        let job = settle(&h.orchestrator, &created.token).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Cancelled by user"));
        assert!(!h.orchestrator.cancel_task(&created.token));
        assert!(!h.orchestrator.cancel_task("no-such-token"));
    }

    /// Filesystem storage whose audio saves take a while.
    struct SlowSaves {
        inner: Arc<FsStorage>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl AssetStorage for SlowSaves {
        async fn save_audio_with_metadata(
            &self,
            data: &[u8],
            format: &str,
            tags: &AudioTags,
        ) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            self.inner.save_audio_with_metadata(data, format, tags).await
        }

        async fn save_cover(&self, data: &[u8], format: &str) -> Result<String> {
            self.inner.save_cover(data, format).await
        }

        async fn delete_audio(&self, name: &str) -> Result<bool> {
            self.inner.delete_audio(name).await
        }

        async fn delete_cover(&self, name: &str) -> Result<bool> {
            self.inner.delete_cover(name).await
        }

        fn audio_path(&self, name: &str) -> Result<std::path::PathBuf> {
            self.inner.audio_path(name)
        }

        fn cover_path(&self, name: &str) -> Result<std::path::PathBuf> {
            self.inner.cover_path(name)
        }
    }

    #[tokio::test]
    async fn cancel_during_save_leaves_no_stray_audio() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(FsStorage::new(dir.path()).unwrap());
        let storage = Arc::new(SlowSaves {
            inner: fs.clone(),
            delay: Duration::from_millis(300),
        });
        let audio = Arc::new(StubAudio::new("gpu:m"));
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryJobStore::new()),
            storage,
            Arc::new(ProviderRouter::new(audio_table(audio))),
            Arc::new(PipelineRegistry::with_builtins(MixWeights::default())),
            OrchestratorSettings::default(),
        );

        let created = orchestrator.create_generation(plain("tape hiss")).await.unwrap();
        for _ in 0..500 {
            let job = orchestrator.get_by_token(&created.token).await.unwrap();
            if job.progress >= progress::ENRICHING {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(orchestrator.cancel_task(&created.token));
        let job = settle(&orchestrator, &created.token).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.audio_path.is_none());

        // the detached save finishes, then removes the file it wrote
        let audio_dir = fs.root().join("audio");
        let mut remaining = usize::MAX;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remaining = std::fs::read_dir(&audio_dir).unwrap().count();
            if remaining == 0 {
                break;
            }
        }
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn backend_errors_fail_the_job() {
        let audio = Arc::new(StubAudio::new("gpu:m").failing("model exploded"));
        let h = harness(audio_table(audio), OrchestratorSettings::default());
        let created = h.orchestrator.create_generation(plain("boom")).await.unwrap();
        let job = settle(&h.orchestrator, &created.token).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("model exploded"));
        assert!(job.audio_path.is_none());

        let audio = Arc::new(StubAudio::new("gpu:m").exhausted());
        let h = harness(audio_table(audio), OrchestratorSettings::default());
        let created = h.orchestrator.create_generation(plain("big")).await.unwrap();
        let job = settle(&h.orchestrator, &created.token).await;
        assert!(job.error_message.unwrap().contains("duration"));
    }

    #[tokio::test]
    async fn error_messages_are_truncated() {
        let long = "x".repeat(2000);
        let audio = Arc::new(StubAudio::new("gpu:m").failing(&long));
        let h = harness(audio_table(audio), OrchestratorSettings::default());
        let created = h.orchestrator.create_generation(plain("boom")).await.unwrap();
        let job = settle(&h.orchestrator, &created.token).await;
        assert_eq!(job.error_message.unwrap().chars().count(), 500);
    }

    #[tokio::test]
    async fn unknown_active_pipeline_fails_the_job() {
        let audio = Arc::new(StubAudio::new("gpu:m"));
        let table = audio_table(audio)
            .with_active_pipeline("karaoke")
            .with_pipeline_role("karaoke", "singer", "gpu:m");
        let h = harness(table, OrchestratorSettings::default());

        let created = h.orchestrator.create_generation(plain("sing")).await.unwrap();
        assert_eq!(created.audio_provider, "karaoke");
        let job = settle(&h.orchestrator, &created.token).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.unwrap().contains("Unknown pipeline"));
    }

    #[tokio::test]
    async fn cover_failure_does_not_fail_the_job() {
        let audio = Arc::new(StubAudio::new("gpu:m"));
        let text = Arc::new(StubText::new("llm").failing_cover());
        let image = Arc::new(StubImage::new("img:flux"));
        let h = harness(
            full_table(audio, text, image.clone()),
            OrchestratorSettings::default(),
        );

        let mut params = plain("city pop");
        params.generate_cover = true;
        let created = h.orchestrator.create_generation(params).await.unwrap();
        let job = settle(&h.orchestrator, &created.token).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.cover_art_path.is_none());
        assert!(job.error_message.is_none());
        assert_eq!(image.calls(), 0);
    }

    #[tokio::test]
    async fn no_image_backend_skips_cover_quietly() {
        let audio = Arc::new(StubAudio::new("gpu:m"));
        let text = Arc::new(StubText::new("llm"));
        let table = audio_table(audio)
            .with_text(text.clone())
            .with_text_route(DEFAULT_ROUTE, "llm:m");
        let h = harness(table, OrchestratorSettings::default());

        let mut params = plain("ambient");
        params.generate_cover = true;
        let created = h.orchestrator.create_generation(params).await.unwrap();
        let job = settle(&h.orchestrator, &created.token).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.cover_art_path.is_none());
        assert_eq!(text.calls(), 0);

        let err = h
            .orchestrator
            .generate_cover_for_existing(job.id, CoverOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NoImageBackend);
    }

    #[tokio::test]
    async fn cover_for_existing_job() {
        let audio = Arc::new(StubAudio::new("gpu:m"));
        let h = harness(
            full_table(
                audio,
                Arc::new(StubText::new("llm")),
                Arc::new(StubImage::new("img:flux")),
            ),
            OrchestratorSettings::default(),
        );
        let created = h.orchestrator.create_generation(plain("dub")).await.unwrap();
        let job = settle(&h.orchestrator, &created.token).await;
        assert!(job.cover_art_path.is_none());

        let overrides = CoverOverrides {
            title: Some("Echoes".to_string()),
            ..Default::default()
        };
        let (name, prompt) = h
            .orchestrator
            .generate_cover_for_existing(job.id, overrides)
            .await
            .unwrap();
        assert_eq!(prompt, "moody neon album cover");
        let job = h.orchestrator.get(job.id).await.unwrap();
        assert_eq!(job.cover_art_path.as_deref(), Some(name.as_str()));
        assert_eq!(job.status, JobStatus::Completed);

        let err = h
            .orchestrator
            .generate_cover_for_existing(999, CoverOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn cover_for_existing_requires_completed_job() {
        let audio = Arc::new(StubAudio::new("gpu:m").failing("model exploded"));
        let image = Arc::new(StubImage::new("img:flux"));
        let h = harness(
            full_table(audio, Arc::new(StubText::new("llm")), image.clone()),
            OrchestratorSettings::default(),
        );
        let created = h.orchestrator.create_generation(plain("dub")).await.unwrap();
        let job = settle(&h.orchestrator, &created.token).await;
        assert_eq!(job.status, JobStatus::Failed);

        let err = h
            .orchestrator
            .generate_cover_for_existing(job.id, CoverOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTransition);
        assert_eq!(image.calls(), 0);

        let job = h.orchestrator.get(job.id).await.unwrap();
        assert!(job.cover_art_path.is_none());
        assert!(job.error_message.unwrap().contains("model exploded"));
        assert_eq!(std::fs::read_dir(h.storage.root().join("covers")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn remix_inherits_unset_fields() {
        let audio = Arc::new(StubAudio::new("gpu:m"));
        let h = harness(audio_table(audio), OrchestratorSettings::default());

        let mut params = plain("loud guitars");
        params.genre = Some("rock".to_string());
        params.mood = Some("sad".to_string());
        params.duration = 12.0;
        let parent = h.orchestrator.create_generation(params).await.unwrap();

        let overrides = RemixOverrides {
            genre: Some("jazz".to_string()),
            ..Default::default()
        };
        let remix = h.orchestrator.remix(parent.id, overrides).await.unwrap();
        assert_eq!(remix.genre.as_deref(), Some("jazz"));
        assert_eq!(remix.mood.as_deref(), Some("sad"));
        assert_eq!(remix.prompt, "loud guitars");
        assert_eq!(remix.duration, 12.0);
        assert_eq!(
            remix.lineage,
            Some(Lineage {
                parent_id: parent.id,
                kind: LineageKind::Remix
            })
        );

        let err = h
            .orchestrator
            .remix(404, RemixOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn extend_continues_the_parent() {
        let audio = Arc::new(StubAudio::new("gpu:m"));
        let h = harness(audio_table(audio), OrchestratorSettings::default());

        let mut params = plain("sunset synthwave");
        params.lyrics = Some("[Chorus] drive".to_string());
        params.mood = Some("nostalgic".to_string());
        let parent = h.orchestrator.create_generation(params).await.unwrap();

        let extended = h
            .orchestrator
            .extend(ExtendParams {
                parent_id: parent.id,
                prompt: None,
                lyrics: None,
                duration: 20.0,
            })
            .await
            .unwrap();
        assert_eq!(extended.prompt, "sunset synthwave (continuation)");
        assert_eq!(extended.lyrics.as_deref(), Some("[Chorus] drive"));
        assert_eq!(extended.mood.as_deref(), Some("nostalgic"));
        assert_eq!(extended.duration, 20.0);
        assert_eq!(extended.lineage.unwrap().kind, LineageKind::Extend);

        let err = h
            .orchestrator
            .extend(ExtendParams {
                parent_id: 77,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn likes_toggle_back() {
        let h = harness(
            audio_table(Arc::new(StubAudio::new("gpu:m"))),
            OrchestratorSettings::default(),
        );
        let job = h.orchestrator.create_generation(plain("x")).await.unwrap();
        assert!(h.orchestrator.toggle_like(job.id).await.unwrap());
        assert!(!h.orchestrator.toggle_like(job.id).await.unwrap());
        assert_eq!(
            h.orchestrator.toggle_like(12345).await.unwrap_err().code,
            ErrorCode::NotFound
        );
    }

    #[tokio::test]
    async fn result_reports_pending_then_record() {
        let (open, gate) = watch::channel(false);
        let audio = Arc::new(StubAudio::new("gpu:m").with_gate(gate));
        let h = harness(audio_table(audio), OrchestratorSettings::default());

        let created = h.orchestrator.create_generation(plain("wait")).await.unwrap();
        match h.orchestrator.result(&created.token).await.unwrap() {
            TaskResult::Pending(status) => assert!(status.status.is_active()),
            TaskResult::Finished(_) => panic!("finished too early"),
        }

        open.send(true).unwrap();
        settle(&h.orchestrator, &created.token).await;
        match h.orchestrator.result(&created.token).await.unwrap() {
            TaskResult::Finished(job) => assert_eq!(job.status, JobStatus::Completed),
            TaskResult::Pending(_) => panic!("still pending"),
        }

        let err = h.orchestrator.result("missing").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn delete_removes_files_and_record() {
        let h = harness(
            full_table(
                Arc::new(StubAudio::new("gpu:m")),
                Arc::new(StubText::new("llm")),
                Arc::new(StubImage::new("img:flux")),
            ),
            OrchestratorSettings::default(),
        );
        let mut params = plain("to delete");
        params.generate_cover = true;
        let created = h.orchestrator.create_generation(params).await.unwrap();
        let job = settle(&h.orchestrator, &created.token).await;
        let audio_file = h.storage.audio_path(job.audio_path.as_ref().unwrap()).unwrap();
        let cover_file = h.storage.cover_path(job.cover_art_path.as_ref().unwrap()).unwrap();

        h.orchestrator.delete(job.id).await.unwrap();
        assert!(!audio_file.exists());
        assert!(!cover_file.exists());
        assert_eq!(
            h.orchestrator.get(job.id).await.unwrap_err().code,
            ErrorCode::NotFound
        );
        assert_eq!(
            h.orchestrator.delete(job.id).await.unwrap_err().code,
            ErrorCode::NotFound
        );
    }

    #[tokio::test]
    async fn delete_stops_running_work() {
        let audio = Arc::new(StubAudio::new("gpu:m").hanging());
        let h = harness(audio_table(audio.clone()), OrchestratorSettings::default());
        let created = h.orchestrator.create_generation(plain("runaway")).await.unwrap();
        wait_for(|| audio.calls() == 1).await;

        h.orchestrator.delete(created.id).await.unwrap();
        assert!(!h.orchestrator.is_running(&created.token));
        assert_eq!(h.orchestrator.running_count(), 0);
    }

    #[tokio::test]
    async fn reload_swaps_routes() {
        let h = harness(
            audio_table(Arc::new(StubAudio::new("gpu:m"))),
            OrchestratorSettings::default(),
        );
        assert_eq!(h.orchestrator.list_backends().len(), 1);

        let config = DaemonConfig::from_toml_str(
            r#"
[generation]
timeout_secs = 60
max_concurrent = 4
"#,
        )
        .unwrap();
        h.orchestrator.reload(&config).unwrap();
        assert!(h.orchestrator.list_backends().is_empty());
        assert_eq!(h.orchestrator.settings().timeout, Duration::from_secs(60));
        assert_eq!(h.orchestrator.settings().max_concurrent, 2);

        let err = h.orchestrator.create_generation(plain("x")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotConfigured);

        let mut bad = config.clone();
        bad.generation.max_concurrent = 0;
        assert_eq!(
            h.orchestrator.reload(&bad).unwrap_err().code,
            ErrorCode::ConfigInvalid
        );
    }

    #[tokio::test]
    async fn lists_pipelines_with_active_name() {
        let h = harness(RouteTable::new(), OrchestratorSettings::default());
        let (pipelines, active) = h.orchestrator.list_pipelines();
        assert_eq!(pipelines.len(), 2);
        assert_eq!(active, "direct");
    }
}
