use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::model::{DistributedTask, NewTask, TaskStatus};
use crate::error::StoreError;

/// Terminal state written by [`TaskStore::finish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
}

/// Durable table of task records shared by every node.
///
/// Implementations must apply `claim` and `finish` as atomic single-row
/// compare-and-set operations keyed by `(id, version)`, and must refuse any
/// transition out of a terminal status.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new `Pending` record
    async fn insert(&self, task: NewTask) -> Result<DistributedTask, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<DistributedTask>, StoreError>;

    /// Records in any of `statuses`, oldest first
    async fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<DistributedTask>, StoreError>;

    /// Move a non-terminal record to `Processing` under `claimer`
    async fn claim(&self, id: Uuid, expected_version: u64, claimer: &str) -> Result<DistributedTask, StoreError>;

    /// Move a `Processing` record to its terminal status
    async fn finish(&self, id: Uuid, expected_version: u64, outcome: TaskOutcome) -> Result<DistributedTask, StoreError>;

    /// Delete terminal records last updated before `older_than`
    async fn prune_finished(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Process-local store backed by a concurrent map.
///
/// Suitable for a single node, tests, or several services sharing one
/// `Arc` to simulate a cluster over a common table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<DashMap<Uuid, DistributedTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Apply `update` to a record if it is live and at `expected_version`
    fn compare_and_set(
        &self,
        id: Uuid,
        expected_version: u64,
        update: impl FnOnce(&mut DistributedTask) -> Result<(), StoreError>,
    ) -> Result<DistributedTask, StoreError> {
        let mut entry = self.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let task = entry.value_mut();
        if task.status.is_terminal() {
            return Err(StoreError::Terminal(id));
        }
        if task.version != expected_version {
            return Err(StoreError::Conflict {
                id,
                expected: expected_version,
                actual: task.version,
            });
        }
        update(task)?;
        task.version += 1;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: NewTask) -> Result<DistributedTask, StoreError> {
        let task = DistributedTask::from_new(task, Utc::now());
        self.tasks.insert(task.id, task.clone());
        debug!(task_id = %task.id, app_id = task.app_id, action = %task.action, "Inserted task");
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> Result<Option<DistributedTask>, StoreError> {
        Ok(self.tasks.get(&id).map(|t| t.value().clone()))
    }

    async fn list_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<DistributedTask>, StoreError> {
        let mut tasks: Vec<_> = self
            .tasks
            .iter()
            .filter(|t| statuses.contains(&t.status))
            .map(|t| t.value().clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn claim(&self, id: Uuid, expected_version: u64, claimer: &str) -> Result<DistributedTask, StoreError> {
        self.compare_and_set(id, expected_version, |task| {
            task.status = TaskStatus::Processing;
            task.claimed_by = Some(claimer.to_string());
            Ok(())
        })
    }

    async fn finish(&self, id: Uuid, expected_version: u64, outcome: TaskOutcome) -> Result<DistributedTask, StoreError> {
        self.compare_and_set(id, expected_version, |task| {
            if task.status != TaskStatus::Processing {
                return Err(StoreError::NotClaimed(id));
            }
            match outcome {
                TaskOutcome::Completed => {
                    task.status = TaskStatus::Completed;
                    task.error = None;
                }
                TaskOutcome::Failed(error) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(error);
                }
            }
            Ok(())
        })
    }

    async fn prune_finished(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut pruned = 0;
        self.tasks.retain(|_, task| {
            let expired = task.status.is_terminal() && task.updated_at < older_than;
            if expired {
                pruned += 1;
            }
            !expired
        });
        Ok(pruned)
    }
}
