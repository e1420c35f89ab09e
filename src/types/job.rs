//! GenerationJob record and its status state machine.
//!
//! A job moves `pending -> processing -> {completed, failed}` and never leaves
//! a terminal state. All mutations after creation go through
//! [`GenerationJob::apply`], which the job store calls on behalf of the single
//! background task that owns the job's token.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::error::{DaemonError, Result};

/// Progress checkpoints reported while a job runs.
pub mod progress {
    /// Record persisted, nothing started yet.
    pub const CREATED: u8 = 0;
    /// Background task picked the job up (possibly waiting for the gate).
    pub const DISPATCHED: u8 = 10;
    /// Inference permit acquired, audio generation running.
    pub const GENERATING: u8 = 30;
    /// Audio saved, cover art being produced.
    pub const ENRICHING: u8 = 70;
    /// Terminal success.
    pub const DONE: u8 = 100;
}

/// Status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Record created, background task not yet running.
    #[default]
    Pending,
    /// Background task owns the job.
    Processing,
    /// Audio generated and stored.
    Completed,
    /// Generation failed, was cancelled or timed out.
    Failed,
}

impl JobStatus {
    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Returns true if the job is still waiting on its background task.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parses a status name as used in list filters.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a derived job relates to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineageKind {
    Extend,
    Remix,
}

/// Parent linkage of a derived job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub parent_id: i64,
    pub kind: LineageKind,
}

/// Everything known about a job at creation time.
///
/// The store turns a `NewJob` into a [`GenerationJob`] by assigning the
/// numeric id, the `pending` status and the creation timestamp.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub token: String,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub lyrics: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub mood: Option<String>,
    pub duration: f32,
    pub tempo: Option<u32>,
    pub key: Option<String>,
    pub instruments: Vec<String>,
    pub language: String,
    pub instrumental: bool,
    pub seed: Option<u64>,
    pub text_provider: Option<String>,
    pub audio_provider: String,
    pub lineage: Option<Lineage>,
}

/// A single song generation, tracked from creation through a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    /// Store-assigned numeric id.
    pub id: i64,

    /// Externally addressable job token (32 lowercase hex chars).
    pub token: String,

    pub status: JobStatus,

    /// Progress percentage, non-decreasing while processing.
    pub progress: u8,

    /// Human-readable phase message shown to pollers.
    pub progress_message: String,

    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub lyrics: Option<String>,
    pub title: Option<String>,
    pub genre: Option<String>,
    pub mood: Option<String>,

    /// Requested duration in seconds.
    pub duration: f32,

    pub tempo: Option<u32>,
    pub key: Option<String>,
    pub instruments: Vec<String>,

    /// Vocal language, `en` unless requested otherwise.
    pub language: String,

    pub instrumental: bool,
    pub seed: Option<u64>,

    /// Text backend and model that produced the enhancement or lyrics.
    pub text_provider: Option<String>,

    /// Audio backend or pipeline the job is routed to.
    pub audio_provider: String,

    /// Basename of the stored audio file, set only on completion.
    pub audio_path: Option<String>,
    pub audio_format: Option<String>,

    /// Measured duration of the produced audio.
    pub audio_duration: Option<f32>,

    pub cover_art_path: Option<String>,
    pub cover_art_prompt: Option<String>,

    /// Failure description, present iff the job failed.
    pub error_message: Option<String>,

    pub lineage: Option<Lineage>,
    pub liked: bool,

    #[serde(with = "system_time_serde")]
    pub created_at: SystemTime,

    #[serde(with = "option_system_time_serde")]
    pub completed_at: Option<SystemTime>,
}

/// A status transition requested by the owning task.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// Move to (or stay in) `processing` at the given checkpoint.
    Progress { progress: u8, message: String },

    /// Terminal success with the stored audio reference.
    Completed {
        audio_path: String,
        audio_format: String,
        audio_duration: f32,
    },

    /// Terminal failure.
    Failed { error_message: String },
}

impl JobUpdate {
    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        JobUpdate::Progress {
            progress,
            message: message.into(),
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        JobUpdate::Failed {
            error_message: error_message.into(),
        }
    }

    /// Status the job ends up in after this update.
    pub fn target(&self) -> JobStatus {
        match self {
            JobUpdate::Progress { .. } => JobStatus::Processing,
            JobUpdate::Completed { .. } => JobStatus::Completed,
            JobUpdate::Failed { .. } => JobStatus::Failed,
        }
    }
}

impl GenerationJob {
    /// Materializes a pending job from its creation data.
    pub fn from_new(id: i64, new: NewJob) -> Self {
        Self {
            id,
            token: new.token,
            status: JobStatus::Pending,
            progress: progress::CREATED,
            progress_message: "Queued".to_string(),
            prompt: new.prompt,
            enhanced_prompt: new.enhanced_prompt,
            lyrics: new.lyrics,
            title: new.title,
            genre: new.genre,
            mood: new.mood,
            duration: new.duration,
            tempo: new.tempo,
            key: new.key,
            instruments: new.instruments,
            language: new.language,
            instrumental: new.instrumental,
            seed: new.seed,
            text_provider: new.text_provider,
            audio_provider: new.audio_provider,
            audio_path: None,
            audio_format: None,
            audio_duration: None,
            cover_art_path: None,
            cover_art_prompt: None,
            error_message: None,
            lineage: new.lineage,
            liked: false,
            created_at: SystemTime::now(),
            completed_at: None,
        }
    }

    /// Prompt sent to the audio backend: the enhanced text when present.
    pub fn effective_prompt(&self) -> &str {
        self.enhanced_prompt.as_deref().unwrap_or(&self.prompt)
    }

    /// Applies a transition, enforcing the job invariants.
    ///
    /// Terminal jobs reject every update. Progress never moves backwards:
    /// a lower checkpoint keeps the current value but still updates the
    /// message.
    pub fn apply(&mut self, update: JobUpdate) -> Result<()> {
        if self.status.is_terminal() {
            return Err(DaemonError::invalid_transition(
                &self.token,
                self.status.as_str(),
                update.target().as_str(),
            ));
        }

        match update {
            JobUpdate::Progress { progress, message } => {
                self.status = JobStatus::Processing;
                self.progress = self.progress.max(progress.min(progress::DONE - 1));
                self.progress_message = message;
            }
            JobUpdate::Completed {
                audio_path,
                audio_format,
                audio_duration,
            } => {
                self.status = JobStatus::Completed;
                self.progress = progress::DONE;
                self.progress_message = "Complete".to_string();
                self.audio_path = Some(audio_path);
                self.audio_format = Some(audio_format);
                self.audio_duration = Some(audio_duration);
                self.error_message = None;
                self.completed_at = Some(SystemTime::now());
            }
            JobUpdate::Failed { error_message } => {
                self.status = JobStatus::Failed;
                self.progress_message = "Failed".to_string();
                self.audio_path = None;
                self.error_message = Some(if error_message.is_empty() {
                    "UNKNOWN".to_string()
                } else {
                    error_message
                });
                self.completed_at = Some(SystemTime::now());
            }
        }
        Ok(())
    }

    /// Records cover art on a completed job; never touches `status`.
    pub fn set_cover_art(&mut self, cover_path: String, cover_prompt: Option<String>) -> Result<()> {
        if self.status != JobStatus::Completed {
            return Err(DaemonError::invalid_transition(
                &self.token,
                self.status.as_str(),
                "cover_art",
            ));
        }
        self.cover_art_path = Some(cover_path);
        if cover_prompt.is_some() {
            self.cover_art_prompt = cover_prompt;
        }
        Ok(())
    }

    /// Flips the liked flag and returns the new value.
    pub fn toggle_like(&mut self) -> bool {
        self.liked = !self.liked;
        self.liked
    }
}

/// Custom serde implementation for SystemTime.
mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

/// Custom serde implementation for Option<SystemTime>.
mod option_system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        time.map(|t| t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs())
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt = Option::<u64>::deserialize(deserializer)?;
        Ok(opt.map(|secs| UNIX_EPOCH + Duration::from_secs(secs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn job() -> GenerationJob {
        GenerationJob::from_new(
            1,
            NewJob {
                token: "abc".to_string(),
                prompt: "lofi beats".to_string(),
                duration: 30.0,
                language: "en".to_string(),
                audio_provider: "direct".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn job_status_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert_eq!(JobStatus::parse("FAILED"), Some(JobStatus::Failed));
        assert_eq!(JobStatus::parse("queued"), None);
    }

    #[test]
    fn new_job_is_pending() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, progress::CREATED);
        assert!(job.audio_path.is_none());
        assert!(job.error_message.is_none());
        assert!(!job.liked);
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = job();
        job.apply(JobUpdate::progress(progress::GENERATING, "Generating"))
            .unwrap();
        job.apply(JobUpdate::progress(progress::DISPATCHED, "Again"))
            .unwrap();
        assert_eq!(job.progress, progress::GENERATING);
        assert_eq!(job.progress_message, "Again");
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn completed_sets_audio_only() {
        let mut job = job();
        job.apply(JobUpdate::Completed {
            audio_path: "a.wav".to_string(),
            audio_format: "wav".to_string(),
            audio_duration: 30.0,
        })
        .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, progress::DONE);
        assert_eq!(job.audio_path.as_deref(), Some("a.wav"));
        assert!(job.error_message.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn terminal_rejects_updates() {
        let mut job = job();
        job.apply(JobUpdate::failed("boom")).unwrap();
        assert_eq!(job.error_message.as_deref(), Some("boom"));
        assert!(job.audio_path.is_none());

        let err = job
            .apply(JobUpdate::progress(progress::GENERATING, "late"))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTransition);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn cover_art_keeps_status() {
        let mut job = job();
        job.apply(JobUpdate::Completed {
            audio_path: "a.wav".to_string(),
            audio_format: "wav".to_string(),
            audio_duration: 30.0,
        })
        .unwrap();
        job.set_cover_art("c.png".to_string(), Some("neon city".to_string()))
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.cover_art_path.as_deref(), Some("c.png"));
    }

    #[test]
    fn cover_art_needs_completed_audio() {
        let mut job = job();
        let err = job.set_cover_art("c.png".to_string(), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTransition);

        job.apply(JobUpdate::failed("boom")).unwrap();
        let err = job.set_cover_art("c.png".to_string(), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidTransition);
        assert!(job.cover_art_path.is_none());
        assert!(job.cover_art_prompt.is_none());
    }

    #[test]
    fn toggle_like_twice_restores() {
        let mut job = job();
        assert!(job.toggle_like());
        assert!(!job.toggle_like());
    }

    #[test]
    fn serializes_lowercase_status() {
        let job = job();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "pending");
    }
}
