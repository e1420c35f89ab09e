//! Job record persistence.
//!
//! The orchestrator mutates jobs only through [`JobStore`]; the store applies
//! every status change through [`GenerationJob::apply`] so terminal states
//! are enforced no matter who calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{GenerationJob, JobStatus, JobUpdate, NewJob};

mod memory;

pub use memory::MemoryJobStore;

/// Default and maximum page size for history queries.
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

/// Addresses a job by numeric id or token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKey {
    Id(i64),
    Token(String),
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKey::Id(id) => write!(f, "#{}", id),
            JobKey::Token(token) => f.write_str(token),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    Title,
    Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Filters, ordering and paging for [`JobStore::list_all`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub offset: usize,

    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Case-insensitive substring over prompt, title and lyrics.
    #[serde(default)]
    pub search: Option<String>,

    #[serde(default)]
    pub liked: Option<bool>,

    #[serde(default)]
    pub genre: Option<String>,

    #[serde(default)]
    pub mood: Option<String>,

    #[serde(default)]
    pub status: Option<JobStatus>,

    #[serde(default)]
    pub sort: SortField,

    #[serde(default)]
    pub order: SortOrder,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
            search: None,
            liked: None,
            genre: None,
            mood: None,
            status: None,
            sort: SortField::default(),
            order: SortOrder::default(),
        }
    }
}

impl ListQuery {
    /// True when `job` passes every filter.
    pub fn matches(&self, job: &GenerationJob) -> bool {
        if let Some(liked) = self.liked {
            if job.liked != liked {
                return false;
            }
        }
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(genre) = &self.genre {
            if !eq_ignore_case(job.genre.as_deref(), genre) {
                return false;
            }
        }
        if let Some(mood) = &self.mood {
            if !eq_ignore_case(job.mood.as_deref(), mood) {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let hit = [Some(job.prompt.as_str()), job.title.as_deref(), job.lyrics.as_deref()]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }

    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }
}

fn eq_ignore_case(value: Option<&str>, expected: &str) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case(expected))
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new `pending` job and returns it with its assigned id.
    async fn create(&self, new: NewJob) -> Result<GenerationJob>;

    /// Applies a status transition to the job owning `token`.
    async fn update_status(&self, token: &str, update: JobUpdate) -> Result<GenerationJob>;

    /// Records cover art without touching status.
    async fn update_cover_art(
        &self,
        key: JobKey,
        cover_path: String,
        cover_prompt: Option<String>,
    ) -> Result<GenerationJob>;

    async fn get_by_id(&self, id: i64) -> Result<Option<GenerationJob>>;

    async fn get_by_token(&self, token: &str) -> Result<Option<GenerationJob>>;

    /// Returns one page of matching jobs and the total number of matches.
    async fn list_all(&self, query: &ListQuery) -> Result<(Vec<GenerationJob>, usize)>;

    /// Removes a job, returning the removed record.
    async fn delete(&self, id: i64) -> Result<Option<GenerationJob>>;

    /// Flips `liked` and returns the new value.
    async fn toggle_like(&self, id: i64) -> Result<bool>;
}
