//! Supervised table of running job tasks.
//!
//! Every background unit of work is registered here under its job token with
//! a cancellation token and its join handle. A task removes its own entry
//! when it ends, whatever the outcome.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct TaskEntry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type Entries = Arc<Mutex<HashMap<String, TaskEntry>>>;

#[derive(Clone, Default)]
pub struct TaskTable {
    entries: Entries,
}

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, TaskEntry>> {
    match entries.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `work` under `token`.
    ///
    /// The table lock is held across spawn and insert, so the task's own
    /// removal can never run before its entry exists.
    pub fn spawn<F, Fut>(&self, token: &str, work: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let fut = work(cancel.clone());
        let entries = Arc::clone(&self.entries);
        let key = token.to_string();

        // tokens are unique per store, so an insert never displaces a live task
        let mut guard = lock(&self.entries);
        let handle = tokio::spawn(async move {
            fut.await;
            lock(&entries).remove(&key);
        });
        guard.insert(token.to_string(), TaskEntry { cancel, handle });
    }

    /// Requests cancellation. Returns false when nothing runs under `token`.
    pub fn cancel(&self, token: &str) -> bool {
        match lock(&self.entries).get(token) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels the task under `token` and waits for it to wind down.
    pub async fn cancel_and_join(&self, token: &str) -> bool {
        let entry = lock(&self.entries).remove(token);
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                if let Err(e) = entry.handle.await {
                    tracing::warn!(token = %token, error = %e, "Cancelled task ended abnormally");
                }
                true
            }
            None => false,
        }
    }

    /// Cancels every task and waits for all of them.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, TaskEntry)> = lock(&self.entries).drain().collect();
        if drained.is_empty() {
            return;
        }
        tracing::info!(count = drained.len(), "Cancelling running generations");
        for (_, entry) in &drained {
            entry.cancel.cancel();
        }
        for (token, entry) in drained {
            if let Err(e) = entry.handle.await {
                tracing::warn!(token = %token, error = %e, "Task ended abnormally during shutdown");
            }
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        lock(&self.entries).contains_key(token)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn wait_until_empty(table: &TaskTable) {
        for _ in 0..200 {
            if table.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task table never drained");
    }

    #[tokio::test]
    async fn entry_removed_when_task_finishes() {
        let table = TaskTable::new();
        let (tx, rx) = oneshot::channel::<()>();
        table.spawn("abc", |_cancel| async move {
            let _ = rx.await;
        });
        assert!(table.contains("abc"));
        assert_eq!(table.len(), 1);

        tx.send(()).unwrap();
        wait_until_empty(&table).await;
        assert!(!table.contains("abc"));
    }

    #[tokio::test]
    async fn instant_task_still_removes_itself() {
        let table = TaskTable::new();
        table.spawn("fast", |_cancel| async {});
        wait_until_empty(&table).await;
    }

    #[tokio::test]
    async fn cancel_reaches_the_task() {
        let table = TaskTable::new();
        let (tx, rx) = oneshot::channel::<bool>();
        table.spawn("job", |cancel| async move {
            cancel.cancelled().await;
            let _ = tx.send(true);
        });

        assert!(table.cancel("job"));
        assert!(rx.await.unwrap());
        wait_until_empty(&table).await;
        assert!(!table.cancel("job"));
    }

    #[tokio::test]
    async fn cancel_and_join_waits() {
        let table = TaskTable::new();
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen = Arc::clone(&flag);
        table.spawn("job", |cancel| async move {
            cancel.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            seen.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        assert!(table.cancel_and_join("job").await);
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!table.cancel_and_join("job").await);
    }

    #[tokio::test]
    async fn shutdown_cancels_everything() {
        let table = TaskTable::new();
        for token in ["a", "b", "c"] {
            table.spawn(token, |cancel| async move { cancel.cancelled().await });
        }
        assert_eq!(table.len(), 3);
        table.shutdown().await;
        assert!(table.is_empty());
    }
}
