use async_trait::async_trait;
use tracing::info;

use super::model::DistributedTask;

/// Performs the business effect of a task (start, cancel, ... a job).
///
/// Called only on the node that owns the task and only after the record was
/// claimed. Retries, if any, are the handler's own business: a returned error
/// marks the record failed for good.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, task: &DistributedTask) -> anyhow::Result<()>;
}

/// Handler that only records what it would have done
#[derive(Debug, Clone, Default)]
pub struct LoggingActionHandler;

#[async_trait]
impl ActionHandler for LoggingActionHandler {
    async fn handle(&self, task: &DistributedTask) -> anyhow::Result<()> {
        let target = task.target()?;
        info!(
            task_id = %task.id,
            app_id = task.app_id,
            engine = %task.engine,
            job = %target.job_name,
            action = %task.action,
            auto_start = task.auto_start,
            "Executing task action"
        );
        Ok(())
    }
}
