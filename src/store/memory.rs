//! In-memory job store.
//!
//! Jobs live in a `BTreeMap` keyed by id with a token index beside it. Good
//! enough for a single daemon process; records vanish on restart.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{JobKey, JobStore, ListQuery, SortField, SortOrder};
use crate::error::{DaemonError, ErrorCode, Result};
use crate::types::{GenerationJob, JobUpdate, NewJob};

#[derive(Default)]
struct Inner {
    jobs: BTreeMap<i64, GenerationJob>,
    by_token: HashMap<String, i64>,
    next_id: i64,
}

impl Inner {
    fn id_for(&self, key: &JobKey) -> Option<i64> {
        match key {
            JobKey::Id(id) => self.jobs.contains_key(id).then_some(*id),
            JobKey::Token(token) => self.by_token.get(token).copied(),
        }
    }
}

/// Job store backed by process memory.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored jobs.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Returns true if no jobs are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn compare(a: &GenerationJob, b: &GenerationJob, field: SortField) -> Ordering {
    let primary = match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::Title => {
            let ta = a.title.as_deref().unwrap_or("").to_lowercase();
            let tb = b.title.as_deref().unwrap_or("").to_lowercase();
            ta.cmp(&tb)
        }
        SortField::Duration => {
            let da = a.audio_duration.unwrap_or(a.duration);
            let db = b.audio_duration.unwrap_or(b.duration);
            da.total_cmp(&db)
        }
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<GenerationJob> {
        let mut inner = self.lock();
        if inner.by_token.contains_key(&new.token) {
            return Err(DaemonError::invalid_params(format!(
                "Job token {} already exists",
                new.token
            )));
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let job = GenerationJob::from_new(id, new);
        inner.by_token.insert(job.token.clone(), id);
        inner.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn update_status(&self, token: &str, update: JobUpdate) -> Result<GenerationJob> {
        let mut inner = self.lock();
        let id = inner
            .by_token
            .get(token)
            .copied()
            .ok_or_else(|| DaemonError::task_not_found(token))?;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| DaemonError::task_not_found(token))?;
        job.apply(update)?;
        Ok(job.clone())
    }

    async fn update_cover_art(
        &self,
        key: JobKey,
        cover_path: String,
        cover_prompt: Option<String>,
    ) -> Result<GenerationJob> {
        let mut inner = self.lock();
        let not_found = || DaemonError::new(ErrorCode::NotFound, format!("Job {} not found", key));
        let id = inner.id_for(&key).ok_or_else(not_found)?;
        let job = inner.jobs.get_mut(&id).ok_or_else(not_found)?;
        job.set_cover_art(cover_path, cover_prompt)?;
        Ok(job.clone())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<GenerationJob>> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<GenerationJob>> {
        let inner = self.lock();
        Ok(inner
            .by_token
            .get(token)
            .and_then(|id| inner.jobs.get(id))
            .cloned())
    }

    async fn list_all(&self, query: &ListQuery) -> Result<(Vec<GenerationJob>, usize)> {
        let inner = self.lock();
        let mut matched: Vec<&GenerationJob> =
            inner.jobs.values().filter(|job| query.matches(job)).collect();

        matched.sort_by(|a, b| {
            let ord = compare(a, b, query.sort);
            match query.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total = matched.len();
        let page = matched
            .into_iter()
            .skip(query.offset)
            .take(query.effective_limit())
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn delete(&self, id: i64) -> Result<Option<GenerationJob>> {
        let mut inner = self.lock();
        let removed = inner.jobs.remove(&id);
        if let Some(job) = &removed {
            inner.by_token.remove(&job.token);
        }
        Ok(removed)
    }

    async fn toggle_like(&self, id: i64) -> Result<bool> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| DaemonError::generation_not_found(id))?;
        Ok(job.toggle_like())
    }
}
