//! Fixed-size pool for opportunistic work (tree preloads, predictive
//! fuzzy-cache warming) that must never hold up a foreground lookup.
//!
//! Every submitted job gets a [`TaskId`], a cancellation token and a slot in
//! the registry until it is reaped. Cancellation is cooperative: a job that
//! already started may still finish, and whatever it wrote stays valid.

pub mod jobs;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};
use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

pub type TaskId = Uuid;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed(_) | TaskState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub id: TaskId,
    pub kind: String,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
}

struct TaskEntry {
    kind: String,
    state: Arc<Mutex<TaskState>>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    submitted_at: DateTime<Utc>,
}

impl TaskEntry {
    fn state(&self) -> TaskState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn set_state(state: &Mutex<TaskState>, next: TaskState) {
    *state.lock().unwrap_or_else(|e| e.into_inner()) = next;
}

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    workers: usize,
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queues `job`. It runs once one of the pool's permits frees up; a
    /// cancel before that point means it never starts.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F, Fut>(&self, kind: &str, job: F) -> TaskId
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let state = Arc::new(Mutex::new(TaskState::Queued));

        let permits = Arc::clone(&self.permits);
        let task_token = token.clone();
        let task_state = Arc::clone(&state);
        let task_kind = kind.to_string();

        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                _ = task_token.cancelled() => None,
                permit = permits.acquire_owned() => permit.ok(),
            };
            let Some(_permit) = permit else {
                set_state(&task_state, TaskState::Cancelled);
                return;
            };
            if task_token.is_cancelled() {
                set_state(&task_state, TaskState::Cancelled);
                return;
            }

            set_state(&task_state, TaskState::Running);
            let outcome = job(task_token.clone()).await;
            let next = match outcome {
                Ok(()) if task_token.is_cancelled() => TaskState::Cancelled,
                Ok(()) => TaskState::Completed,
                Err(err) => {
                    log_warn!("background {} task failed: {:#}", task_kind, err);
                    TaskState::Failed(format!("{err:#}"))
                }
            };
            set_state(&task_state, next);
        });

        self.lock_tasks().insert(
            id,
            TaskEntry {
                kind: kind.to_string(),
                state,
                token,
                handle: Some(handle),
                submitted_at: Utc::now(),
            },
        );
        log_debug!("queued background {} task {}", kind, id);
        id
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.lock_tasks().get(&id).map(|entry| TaskStatus {
            id,
            kind: entry.kind.clone(),
            state: entry.state(),
            submitted_at: entry.submitted_at,
        })
    }

    pub fn statuses(&self) -> Vec<TaskStatus> {
        let mut all: Vec<TaskStatus> = self
            .lock_tasks()
            .iter()
            .map(|(id, entry)| TaskStatus {
                id: *id,
                kind: entry.kind.clone(),
                state: entry.state(),
                submitted_at: entry.submitted_at,
            })
            .collect();
        all.sort_by_key(|status| status.submitted_at);
        all
    }

    /// Requests cancellation. Returns `false` for unknown ids.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.lock_tasks().get(&id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Waits for the task to finish and returns its final state. The entry
    /// stays registered until reaped.
    pub async fn wait(&self, id: TaskId) -> Option<TaskState> {
        let (handle, state) = {
            let mut tasks = self.lock_tasks();
            let entry = tasks.get_mut(&id)?;
            (entry.handle.take(), Arc::clone(&entry.state))
        };
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                log_warn!("background task {} did not join: {}", id, err);
                set_state(&state, TaskState::Failed(err.to_string()));
            }
        }
        let final_state = state.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Some(final_state)
    }

    /// Number of registered tasks not yet in a terminal state.
    pub fn active_count(&self) -> usize {
        self.lock_tasks()
            .values()
            .filter(|entry| !entry.state().is_terminal())
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock_tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops registry entries of finished tasks. Returns how many.
    pub fn reap_finished(&self) -> usize {
        let mut tasks = self.lock_tasks();
        let before = tasks.len();
        tasks.retain(|_, entry| match &entry.handle {
            Some(handle) => !handle.is_finished(),
            None => !entry.state().is_terminal(),
        });
        before - tasks.len()
    }

    /// Cancels everything and waits for every task to wind down.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.lock_tasks();
            tasks
                .values_mut()
                .filter_map(|entry| {
                    entry.token.cancel();
                    entry.handle.take()
                })
                .collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        self.reap_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_and_reports_completion() {
        let pool = WorkerPool::new(2);
        let id = pool.submit("noop", |_| async { Ok(()) });
        assert_eq!(pool.wait(id).await, Some(TaskState::Completed));
        assert_eq!(pool.reap_finished(), 1);
        assert!(pool.status(id).is_none());
    }

    #[tokio::test]
    async fn failures_are_recorded() {
        let pool = WorkerPool::new(1);
        let id = pool.submit("boom", |_| async { Err::<(), _>(anyhow::anyhow!("tree went away")) });
        match pool.wait(id).await {
            Some(TaskState::Failed(msg)) => assert!(msg.contains("tree went away")),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn pool_size_bounds_concurrency() {
        let pool = WorkerPool::new(1);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let ids: Vec<_> = (0..4)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.submit("count", move |_| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();
        for id in ids {
            assert_eq!(pool.wait(id).await, Some(TaskState::Completed));
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queued_task_can_be_cancelled() {
        let pool = WorkerPool::new(1);
        let blocker = pool.submit("block", |token| async move {
            token.cancelled().await;
            Ok(())
        });
        let queued = pool.submit("queued", |_| async { Ok(()) });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(pool.cancel(queued));
        assert_eq!(pool.wait(queued).await, Some(TaskState::Cancelled));

        assert!(pool.cancel(blocker));
        assert_eq!(pool.wait(blocker).await, Some(TaskState::Cancelled));
        assert!(!pool.cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn shutdown_cancels_everything() {
        let pool = WorkerPool::new(2);
        for _ in 0..3 {
            pool.submit("sleep", |token| async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                }
                Ok(())
            });
        }
        pool.shutdown().await;
        assert!(pool.is_empty());
        assert_eq!(pool.active_count(), 0);
    }
}
