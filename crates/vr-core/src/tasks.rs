//! Observable background tasks.
//!
//! Work that runs detached from the request that triggered it (a restart of
//! every transcoder, the startup launch, a monitor-driven restart) is wrapped
//! in a [`TaskRecord`] so callers can poll its outcome later by [`TaskId`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::ids::TaskId;

/// Finished records retained before the oldest are pruned.
const DEFAULT_HISTORY: usize = 256;

/// Lifecycle of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Snapshot of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Completion order, used for pruning.
    #[serde(skip)]
    finish_seq: u64,
}

/// Result store keyed by task id.
#[derive(Debug)]
pub struct TaskStore {
    tasks: DashMap<TaskId, TaskRecord>,
    history: usize,
    finished: AtomicU64,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

impl TaskStore {
    /// Create a store that keeps at most `history` finished records.
    pub fn new(history: usize) -> Self {
        Self {
            tasks: DashMap::new(),
            history: history.max(1),
            finished: AtomicU64::new(0),
        }
    }

    /// Register a new pending task.
    pub fn create(&self, kind: impl Into<String>) -> TaskId {
        let id = TaskId::new();
        self.tasks.insert(
            id,
            TaskRecord {
                id,
                kind: kind.into(),
                status: TaskStatus::Pending,
                created_at: Utc::now(),
                started_at: None,
                finished_at: None,
                result: None,
                error: None,
                finish_seq: 0,
            },
        );
        id
    }

    pub fn mark_running(&self, id: TaskId) {
        if let Some(mut rec) = self.tasks.get_mut(&id) {
            rec.status = TaskStatus::Running;
            rec.started_at = Some(Utc::now());
        }
    }

    pub fn complete(&self, id: TaskId, result: serde_json::Value) {
        if let Some(mut rec) = self.tasks.get_mut(&id) {
            rec.status = TaskStatus::Completed;
            rec.finished_at = Some(Utc::now());
            rec.finish_seq = self.finished.fetch_add(1, Ordering::Relaxed);
            rec.result = Some(result);
        }
        self.prune();
    }

    pub fn fail(&self, id: TaskId, error: impl Into<String>) {
        if let Some(mut rec) = self.tasks.get_mut(&id) {
            rec.status = TaskStatus::Failed;
            rec.finished_at = Some(Utc::now());
            rec.finish_seq = self.finished.fetch_add(1, Ordering::Relaxed);
            rec.error = Some(error.into());
        }
        self.prune();
    }

    pub fn get(&self, id: TaskId) -> Option<TaskRecord> {
        self.tasks.get(&id).map(|r| r.value().clone())
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.tasks.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Run `fut` on the tokio runtime, recording its outcome under a new id.
    pub fn spawn_tracked<F, T>(self: &Arc<Self>, kind: &str, fut: F) -> (TaskId, JoinHandle<()>)
    where
        F: Future<Output = crate::Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let id = self.create(kind);
        let store = Arc::clone(self);
        let kind = kind.to_string();

        let handle = tokio::spawn(async move {
            store.mark_running(id);
            tracing::debug!(task = %id, kind = %kind, "Task started");
            match fut.await {
                Ok(value) => {
                    let json = serde_json::to_value(&value).unwrap_or(serde_json::Value::Null);
                    store.complete(id, json);
                    tracing::debug!(task = %id, kind = %kind, "Task completed");
                }
                Err(e) => {
                    tracing::warn!(task = %id, kind = %kind, "Task failed: {e}");
                    store.fail(id, e.to_string());
                }
            }
        });

        (id, handle)
    }

    /// Drop the oldest finished records beyond the history bound.
    fn prune(&self) {
        let mut finished: Vec<(TaskId, u64)> = self
            .tasks
            .iter()
            .filter(|r| r.status.is_finished())
            .map(|r| (r.id, r.finish_seq))
            .collect();

        if finished.len() <= self.history {
            return;
        }

        finished.sort_by_key(|(_, seq)| *seq);
        let excess = finished.len() - self.history;
        for (id, _) in finished.into_iter().take(excess) {
            self.tasks.remove(&id);
        }
    }
}
