//! Task record types
//!
//! A `DistributedTask` describes one management action against a Flink or
//! Spark application. Ownership is never stored on the record; it is derived
//! from the application id whenever it is needed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;

/// Lifecycle of a task record. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its owner to claim it
    Pending,
    /// Claimed by a node that is running the action
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub const NON_TERMINAL: [TaskStatus; 2] = [TaskStatus::Pending, TaskStatus::Processing];
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Management action requested for an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAction {
    Start,
    Restart,
    Revoke,
    Cancel,
    Abort,
}

impl TaskAction {
    pub const ALL: [TaskAction; 5] = [
        TaskAction::Start,
        TaskAction::Restart,
        TaskAction::Revoke,
        TaskAction::Cancel,
        TaskAction::Abort,
    ];

    /// Numeric code used when the action is persisted or sent over the wire
    pub fn code(self) -> i32 {
        match self {
            TaskAction::Start => 0,
            TaskAction::Restart => 1,
            TaskAction::Revoke => 2,
            TaskAction::Cancel => 3,
            TaskAction::Abort => 4,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, DispatchError> {
        Self::ALL
            .into_iter()
            .find(|action| action.code() == code)
            .ok_or_else(|| DispatchError::UnknownAction(code.to_string()))
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskAction::Start => "START",
            TaskAction::Restart => "RESTART",
            TaskAction::Revoke => "REVOKE",
            TaskAction::Cancel => "CANCEL",
            TaskAction::Abort => "ABORT",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskAction {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|action| action.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| DispatchError::UnknownAction(s.to_string()))
    }
}

impl TryFrom<i32> for TaskAction {
    type Error = DispatchError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::from_code(code)
    }
}

/// Engine running the target application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    Flink,
    Spark,
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineType::Flink => write!(f, "flink"),
            EngineType::Spark => write!(f, "spark"),
        }
    }
}

/// Reference to the job a task acts on.
///
/// Carries only the fields needed for routing and for the action handler to
/// find the application again, never the application's full state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetApp {
    pub app_id: i64,
    pub engine: EngineType,
    pub job_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yarn_queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

impl TargetApp {
    pub fn flink(app_id: i64, job_name: impl Into<String>) -> Self {
        Self::new(app_id, EngineType::Flink, job_name)
    }

    pub fn spark(app_id: i64, job_name: impl Into<String>) -> Self {
        Self::new(app_id, EngineType::Spark, job_name)
    }

    fn new(app_id: i64, engine: EngineType, job_name: impl Into<String>) -> Self {
        Self {
            app_id,
            engine,
            job_name: job_name.into(),
            yarn_queue: None,
            cluster_id: None,
        }
    }

    pub fn with_yarn_queue(mut self, queue: impl Into<String>) -> Self {
        self.yarn_queue = Some(queue.into());
        self
    }

    pub fn with_cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = Some(cluster_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.app_id <= 0 {
            return Err(DispatchError::invalid_target(format!(
                "application id must be positive, got {}",
                self.app_id
            )));
        }
        if self.job_name.trim().is_empty() {
            return Err(DispatchError::invalid_target(format!(
                "application {} has an empty job name",
                self.app_id
            )));
        }
        if matches!(&self.yarn_queue, Some(q) if q.trim().is_empty()) {
            return Err(DispatchError::invalid_target(format!(
                "application {} has a blank yarn queue",
                self.app_id
            )));
        }
        Ok(())
    }
}

/// Ring key for an application: its decimal id
pub fn ownership_key(app_id: i64) -> String {
    app_id.to_string()
}

/// Fields supplied when inserting a new record; the store fills in the rest
#[derive(Debug, Clone)]
pub struct NewTask {
    pub app_id: i64,
    pub engine: EngineType,
    pub action: TaskAction,
    pub auto_start: bool,
    pub properties: serde_json::Value,
}

impl NewTask {
    pub fn for_target(target: &TargetApp, action: TaskAction, auto_start: bool) -> Result<Self, DispatchError> {
        Ok(Self {
            app_id: target.app_id,
            engine: target.engine,
            action,
            auto_start,
            properties: serde_json::to_value(target)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedTask {
    pub id: Uuid,
    pub app_id: i64,
    pub engine: EngineType,
    pub action: TaskAction,
    pub status: TaskStatus,
    pub auto_start: bool,
    /// Serialized `TargetApp` handed to the action handler
    pub properties: serde_json::Value,
    /// Server currently holding the claim
    pub claimed_by: Option<String>,
    pub error: Option<String>,
    /// Bumped on every update, used for compare-and-set
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DistributedTask {
    pub fn from_new(task: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            app_id: task.app_id,
            engine: task.engine,
            action: task.action,
            status: TaskStatus::Pending,
            auto_start: task.auto_start,
            properties: task.properties,
            claimed_by: None,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn ownership_key(&self) -> String {
        ownership_key(self.app_id)
    }

    /// Decode the stored target reference
    pub fn target(&self) -> Result<TargetApp, DispatchError> {
        Ok(serde_json::from_value(self.properties.clone())?)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
