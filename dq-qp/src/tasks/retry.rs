//! Retry of failed or cancelled tasks

use dq_common::{Error, Result};
use tracing::info;
use uuid::Uuid;

use super::TaskOrchestrator;
use crate::db::task_items::succeeded_question_ids;
use crate::db::tasks::load_task;
use crate::models::{BatchTask, TaskScope};

impl TaskOrchestrator {
    /// Create a follow-up task for the questions that did not fully succeed
    ///
    /// The new task keeps the operations and options of the original and
    /// points back to it through `retry_of`.
    pub async fn retry_task(&self, task_id: Uuid, created_by: Option<String>) -> Result<BatchTask> {
        let original = load_task(self.db(), task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Task not found: {}", task_id)))?;
        if !original.status.is_retryable() {
            return Err(Error::Conflict(format!(
                "Only failed or cancelled tasks can be retried; task {} is {}",
                task_id,
                original.status.as_str()
            )));
        }

        let scope = self.resolve_scope(&original.scope).await?;
        let expected_items = original.options.items_per_question(&original.operations);
        let done = succeeded_question_ids(self.db(), task_id, expected_items).await?;
        let remaining: Vec<_> = scope.into_iter().filter(|id| !done.contains(id)).collect();
        if remaining.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Every question of task {} already succeeded",
                task_id
            )));
        }

        let mut task = BatchTask::new(
            original.operations.clone(),
            original.options.clone(),
            TaskScope::questions(remaining),
            original.batch_size,
            original.continue_on_error,
        );
        task.retry_of = Some(task_id);
        task.created_by = created_by.or(original.created_by);
        self.insert(&task).await?;

        info!(
            task_id = %task.task_id,
            retry_of = %task_id,
            questions = task.question_ids().len(),
            "Retry task created"
        );
        Ok(task)
    }
}
