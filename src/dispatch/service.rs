//! Distributed Task Service
//!
//! Handles:
//! - Persisting task requests
//! - Computing task ownership from the hash ring
//! - Claiming and executing locally owned tasks
//! - The recurring poll pass and membership-driven rebalancing

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cluster::Membership;
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Result, StoreError};
use crate::task::model::{ownership_key, DistributedTask, NewTask, TargetApp, TaskAction, TaskStatus};
use crate::task::{ActionHandler, TaskOutcome, TaskStore};

/// Result of one `execute_distributed_task` call that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Another server owns the task; nothing was done
    NotOwner { owner: String },
    /// The record had already reached a terminal status
    AlreadyFinished,
    /// A live server holds a fresh claim on the record
    ClaimedElsewhere { claimer: String },
    /// This process is already running the record
    InFlight,
    Completed,
}

/// Counters for one poll pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub scanned: usize,
    pub eligible: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub pruned: usize,
}

enum Claimability {
    Claimable,
    Held { claimer: String },
    Finished,
}

/// Removes a task id from the in-flight set when execution ends
struct InFlightGuard {
    in_flight: Arc<DashSet<Uuid>>,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

/// Dispatches task records to the server that owns them.
///
/// Cheap to clone; clones share membership, store, handler and the poll loop
/// controls.
#[derive(Clone)]
pub struct DistributedTaskService {
    membership: Arc<Membership>,
    store: Arc<dyn TaskStore>,
    handler: Arc<dyn ActionHandler>,
    config: DispatcherConfig,
    in_flight: Arc<DashSet<Uuid>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
}

impl fmt::Debug for DistributedTaskService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedTaskService")
            .field("membership", &self.membership)
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .field("stopped", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl DistributedTaskService {
    pub fn new(
        membership: Arc<Membership>,
        store: Arc<dyn TaskStore>,
        handler: Arc<dyn ActionHandler>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            membership,
            store,
            handler,
            config,
            in_flight: Arc::new(DashSet::new()),
            wake: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    /// Seed the ring with all known servers and record the local id.
    /// Must run once before any ownership query.
    pub fn init<I, S>(&self, all_servers: I, server_id: impl Into<String>) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.membership.init(all_servers, server_id)
    }

    /// Whether this node owns the tasks of `app_id`
    pub fn is_local_processing(&self, app_id: i64) -> Result<bool> {
        self.membership.is_local(&ownership_key(app_id))
    }

    /// Record a requested action against `target`.
    ///
    /// With `auto_start` set and the application owned locally, the task runs
    /// right away instead of waiting for the next poll. The returned record
    /// reflects the latest stored state.
    pub async fn save_distributed_task(
        &self,
        target: &TargetApp,
        auto_start: bool,
        action: TaskAction,
    ) -> Result<DistributedTask> {
        target.validate()?;
        // Resolve ownership before writing so a misconfigured node leaves no record behind
        let run_now = auto_start && self.is_local_processing(target.app_id)?;

        let task = self
            .store
            .insert(NewTask::for_target(target, action, auto_start)?)
            .await?;
        info!(
            task_id = %task.id,
            app_id = task.app_id,
            action = %action,
            auto_start,
            "Saved distributed task"
        );

        if !run_now {
            return Ok(task);
        }
        self.execute_distributed_task(&task).await?;
        self.store
            .get(task.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(task.id).into())
    }

    /// Execute `task` if, and only if, this node owns it.
    ///
    /// Safe to call speculatively from any node: a non-owner returns
    /// `NotOwner` without touching the store or the handler. A handler failure
    /// is persisted as `Failed` and then returned as `ActionHandler`.
    pub async fn execute_distributed_task(&self, task: &DistributedTask) -> Result<ExecutionOutcome> {
        let self_id = self.membership.self_id()?;
        let owner = self.membership.locate(&task.ownership_key())?;
        if owner != self_id {
            debug!(task_id = %task.id, app_id = task.app_id, %owner, "Task owned by another server");
            return Ok(ExecutionOutcome::NotOwner { owner });
        }
        if task.is_terminal() {
            return Ok(ExecutionOutcome::AlreadyFinished);
        }

        let Some(_guard) = self.begin(task.id) else {
            debug!(task_id = %task.id, "Task already running in this process");
            return Ok(ExecutionOutcome::InFlight);
        };

        match self.claimability(task, &self_id)? {
            Claimability::Claimable => {}
            Claimability::Held { claimer } => {
                return Ok(ExecutionOutcome::ClaimedElsewhere { claimer });
            }
            Claimability::Finished => return Ok(ExecutionOutcome::AlreadyFinished),
        }

        let claimed = match self.store.claim(task.id, task.version, &self_id).await {
            Ok(claimed) => claimed,
            Err(StoreError::Terminal(_)) => return Ok(ExecutionOutcome::AlreadyFinished),
            Err(e) => return Err(e.into()),
        };
        info!(
            task_id = %claimed.id,
            app_id = claimed.app_id,
            action = %claimed.action,
            reclaimed = task.status == TaskStatus::Processing,
            "Claimed task"
        );

        // A panic is recorded like any other handler failure
        let result = match AssertUnwindSafe(self.handler.handle(&claimed)).catch_unwind().await {
            Ok(result) => result.map_err(|e| format!("{:#}", e)),
            Err(panic) => Err(format!("action handler panicked: {}", panic_message(panic.as_ref()))),
        };

        match result {
            Ok(()) => {
                self.store
                    .finish(claimed.id, claimed.version, TaskOutcome::Completed)
                    .await?;
                info!(task_id = %claimed.id, app_id = claimed.app_id, "Task completed");
                Ok(ExecutionOutcome::Completed)
            }
            Err(detail) => {
                warn!(task_id = %claimed.id, app_id = claimed.app_id, error = %detail, "Task action failed");
                self.store
                    .finish(claimed.id, claimed.version, TaskOutcome::Failed(detail.clone()))
                    .await?;
                Err(DispatchError::ActionHandler(detail))
            }
        }
    }

    /// Apply a join signal and rebalance. Returns the tasks that became
    /// eligible on this node.
    pub async fn add_server(&self, server_id: &str) -> Result<Vec<Uuid>> {
        if !self.membership.add_server(server_id)? {
            return Ok(Vec::new());
        }
        self.rebalance().await
    }

    /// Apply a leave signal and rebalance. Records claimed by the departed
    /// server become reclaimable at once.
    pub async fn remove_server(&self, server_id: &str) -> Result<Vec<Uuid>> {
        if !self.membership.remove_server(server_id)? {
            return Ok(Vec::new());
        }
        self.rebalance().await
    }

    /// Re-evaluate ownership of every live record and wake the poll loop
    /// when some of them are now ours to run.
    pub async fn rebalance(&self) -> Result<Vec<Uuid>> {
        let self_id = self.membership.self_id()?;
        let tasks = self.store.list_by_status(&TaskStatus::NON_TERMINAL).await?;
        let scanned = tasks.len();
        let eligible: Vec<Uuid> = self
            .eligible_tasks(tasks, &self_id)?
            .into_iter()
            .map(|task| task.id)
            .collect();

        info!(server = %self_id, scanned, eligible = eligible.len(), "Rebalanced task ownership");
        if !eligible.is_empty() {
            self.wake.notify_one();
        }
        Ok(eligible)
    }

    /// One pass over the live records: execute everything owned here.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let self_id = self.membership.self_id()?;
        let tasks = self.store.list_by_status(&TaskStatus::NON_TERMINAL).await?;
        let mut report = PollReport {
            scanned: tasks.len(),
            ..Default::default()
        };

        let eligible = self.eligible_tasks(tasks, &self_id)?;
        report.eligible = eligible.len();

        let results: Vec<(Uuid, Result<ExecutionOutcome>)> = stream::iter(eligible)
            .map(|task| async move {
                let result = self.execute_distributed_task(&task).await;
                (task.id, result)
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for (task_id, result) in results {
            match result {
                Ok(ExecutionOutcome::Completed) => report.completed += 1,
                Ok(outcome) => {
                    debug!(task_id = %task_id, ?outcome, "Skipped task");
                    report.skipped += 1;
                }
                Err(DispatchError::ActionHandler(_)) => report.failed += 1,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Failed to process task");
                    report.errors += 1;
                }
            }
        }

        report.pruned = self.prune_finished().await;
        Ok(report)
    }

    /// Spawn the recurring poll loop
    pub fn start(&self) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            service.run_poll_loop().await;
        })
    }

    /// Ask the poll loop to exit after its current pass
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<DistributedTask>> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_tasks(&self, statuses: &[TaskStatus]) -> Result<Vec<DistributedTask>> {
        Ok(self.store.list_by_status(statuses).await?)
    }

    async fn run_poll_loop(&self) {
        info!(
            interval_ms = self.config.poll_interval_ms,
            max_concurrency = self.config.max_concurrency,
            "Starting task poll loop"
        );
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => debug!("Poll loop woken by rebalance"),
                _ = time::sleep(self.next_poll_delay()) => {}
            }

            match self.poll_once().await {
                Ok(report) if report.eligible > 0 || report.pruned > 0 => {
                    info!(
                        scanned = report.scanned,
                        completed = report.completed,
                        failed = report.failed,
                        skipped = report.skipped,
                        errors = report.errors,
                        pruned = report.pruned,
                        "Poll pass finished"
                    );
                }
                Ok(_) => {}
                Err(e) if e.is_ownership_error() => warn!(error = %e, "Poll pass skipped"),
                Err(e) => error!(error = %e, "Poll pass failed"),
            }
        }
        info!("Task poll loop stopped");
    }

    pub(crate) fn next_poll_delay(&self) -> Duration {
        let max_jitter = self.config.poll_jitter();
        let jitter = if max_jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::rng().random_range(Duration::ZERO..=max_jitter)
        };
        self.config.poll_interval() + jitter
    }

    /// Records owned by `self_id` that may be claimed now
    fn eligible_tasks(&self, tasks: Vec<DistributedTask>, self_id: &str) -> Result<Vec<DistributedTask>> {
        let mut eligible = Vec::new();
        for task in tasks {
            if self.membership.locate(&task.ownership_key())? != self_id {
                continue;
            }
            if self.in_flight.contains(&task.id) {
                continue;
            }
            if let Claimability::Claimable = self.claimability(&task, self_id)? {
                eligible.push(task);
            }
        }
        Ok(eligible)
    }

    fn claimability(&self, task: &DistributedTask, self_id: &str) -> Result<Claimability> {
        match task.status {
            TaskStatus::Pending => Ok(Claimability::Claimable),
            TaskStatus::Completed | TaskStatus::Failed => Ok(Claimability::Finished),
            TaskStatus::Processing => {
                let Some(claimer) = task.claimed_by.as_deref() else {
                    return Ok(Claimability::Claimable);
                };
                // Callers rule out an in-process run first, so our own claim
                // was left behind by an earlier run of this node
                if claimer == self_id {
                    return Ok(Claimability::Claimable);
                }
                if !self.membership.is_member(claimer)? {
                    debug!(task_id = %task.id, %claimer, "Claimer left the cluster");
                    return Ok(Claimability::Claimable);
                }
                let age = (Utc::now() - task.updated_at).to_std().unwrap_or_default();
                if age >= self.config.reclaim_after() {
                    debug!(task_id = %task.id, %claimer, age_secs = age.as_secs(), "Claim is stale");
                    return Ok(Claimability::Claimable);
                }
                Ok(Claimability::Held {
                    claimer: claimer.to_string(),
                })
            }
        }
    }

    fn begin(&self, id: Uuid) -> Option<InFlightGuard> {
        if !self.in_flight.insert(id) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: self.in_flight.clone(),
            id,
        })
    }

    async fn prune_finished(&self) -> usize {
        let Some(retention) = self.config.retention() else {
            return 0;
        };
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let Some(cutoff) = cutoff else {
            warn!(retention_secs = retention.as_secs(), "Retention out of range, skipping prune");
            return 0;
        };
        match self.store.prune_finished(cutoff).await {
            Ok(pruned) => pruned,
            Err(e) => {
                warn!(error = %e, "Failed to prune finished tasks");
                0
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
