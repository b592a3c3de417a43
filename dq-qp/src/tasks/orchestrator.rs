//! Batch task runner
//!
//! `pending → processing` on start, then batches of `batch_size` questions
//! through `buffer_unordered(batch_size)`. Counters are per question and
//! updated with atomic SQL increments. Cancellation (token or status flip)
//! and aborts let in-flight items finish but start no new ones.

use chrono::Utc;
use dq_common::events::{DqEvent, EventBus};
use dq_common::{Error, Result};
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::handlers::{run_item, HandlerError, ItemContext, ItemFailure};
use crate::ai::AiCollaborator;
use crate::db::questions::{list_question_ids, load_question};
use crate::db::task_items::{complete_item, create_item, fail_item, transition_item, ItemFailureRecord};
use crate::db::tasks::{
    finish_task, insert_task_if_idle, load_status, load_task, mark_processing,
    record_question_outcome, set_current_batch,
};
use crate::models::batch_task::execution_order;
use crate::models::{
    BatchTask, ErrorStage, ItemStatus, Operation, QuestionId, TaskOptions, TaskScope, TaskStatus,
};

/// Default questions per batch
pub const DEFAULT_BATCH_SIZE: u32 = 10;

/// Start request
#[derive(Debug, Clone)]
pub struct NewTask {
    pub operations: Vec<Operation>,
    pub options: TaskOptions,
    pub scope: TaskScope,
    pub batch_size: Option<u32>,
    pub continue_on_error: bool,
    pub created_by: Option<String>,
}

/// Shared state of one run
struct RunState {
    aborted: AtomicBool,
    abort_reason: Mutex<Option<String>>,
}

impl RunState {
    fn new() -> Self {
        Self {
            aborted: AtomicBool::new(false),
            abort_reason: Mutex::new(None),
        }
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Record the first abort reason; later ones are dropped
    fn abort(&self, reason: String) {
        let mut slot = self.abort_reason.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn reason(&self) -> Option<String> {
        self.abort_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    ai: Option<Arc<dyn AiCollaborator>>,
    default_batch_size: u32,
}

impl TaskOrchestrator {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self {
            db,
            event_bus,
            ai: None,
            default_batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_ai(mut self, ai: Option<Arc<dyn AiCollaborator>>) -> Self {
        self.ai = ai;
        self
    }

    pub fn with_default_batch_size(mut self, batch_size: u32) -> Self {
        self.default_batch_size = batch_size.max(1);
        self
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    /// Validate and persist a pending task
    ///
    /// Conflict while another task is pending or processing.
    pub async fn create_task(&self, request: NewTask) -> Result<BatchTask> {
        request
            .options
            .validate(&request.operations)
            .map_err(Error::InvalidInput)?;
        if let TaskScope::Questions { question_ids } = &request.scope {
            if question_ids.is_empty() {
                return Err(Error::InvalidInput("Question list must not be empty".to_string()));
            }
        }
        if request.batch_size == Some(0) {
            return Err(Error::InvalidInput("batch_size must be at least 1".to_string()));
        }

        let mut task = BatchTask::new(
            request.operations,
            request.options,
            request.scope,
            request.batch_size.unwrap_or(self.default_batch_size),
            request.continue_on_error,
        );
        task.created_by = request.created_by;
        self.insert(&task).await?;
        Ok(task)
    }

    pub(crate) async fn insert(&self, task: &BatchTask) -> Result<()> {
        if !insert_task_if_idle(&self.db, task).await? {
            return Err(Error::Conflict(
                "Another task is pending or processing".to_string(),
            ));
        }
        info!(
            task_id = %task.task_id,
            operations = ?task.operations,
            batch_size = task.batch_size,
            continue_on_error = task.continue_on_error,
            retry_of = ?task.retry_of,
            "Batch task created"
        );
        Ok(())
    }

    /// Questions a scope covers, resolved against the store
    pub(crate) async fn resolve_scope(&self, scope: &TaskScope) -> Result<Vec<QuestionId>> {
        match scope {
            TaskScope::All => list_question_ids(&self.db).await,
            TaskScope::Questions { question_ids } => Ok(question_ids.clone()),
        }
    }

    /// Run a pending task to a terminal status
    pub async fn run(&self, task_id: Uuid, cancel: CancellationToken) -> Result<TaskStatus> {
        let task = load_task(&self.db, task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Task not found: {}", task_id)))?;
        if task.status != TaskStatus::Pending {
            return Err(Error::Conflict(format!(
                "Task {} is {}, not pending",
                task_id,
                task.status.as_str()
            )));
        }

        let operations = execution_order(&task.operations);
        if operations.iter().any(Operation::uses_ai) && self.ai.is_none() {
            let reason = "AI service is not configured";
            return self.finish(task_id, TaskStatus::Failed, Some(reason), 0).await;
        }

        let question_ids = self.resolve_scope(&task.scope).await?;
        let total = question_ids.len() as u64;
        let resolved_scope = TaskScope::Questions {
            question_ids: question_ids.clone(),
        };
        if !mark_processing(&self.db, task_id, &resolved_scope, total).await? {
            let status = load_status(&self.db, task_id).await?.unwrap_or(TaskStatus::Cancelled);
            info!(task_id = %task_id, status = status.as_str(), "Task left pending before start");
            return Ok(status);
        }

        info!(task_id = %task_id, total, operations = ?operations, "Batch task started");
        self.event_bus.emit_lossy(DqEvent::TaskStarted {
            task_id,
            operations: operations.iter().map(|op| op.as_str().to_string()).collect(),
            total,
            timestamp: Utc::now(),
        });

        let state = RunState::new();
        let batch_size = task.batch_size.max(1) as usize;
        let mut cancelled = false;

        for (batch_index, batch) in question_ids.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if state.is_aborted() {
                break;
            }
            if load_status(&self.db, task_id).await? != Some(TaskStatus::Processing) {
                cancelled = true;
                break;
            }
            set_current_batch(&self.db, task_id, batch_index as u64 + 1).await?;

            let (task_ref, ops_ref, cancel_ref, state_ref) = (&task, operations.as_slice(), &cancel, &state);
            let results: Vec<Result<()>> = stream::iter(batch.iter().cloned())
                .map(move |question_id| async move {
                    self.process_question(task_ref, ops_ref, &question_id, cancel_ref, state_ref)
                        .await
                })
                .buffer_unordered(batch_size)
                .collect()
                .await;

            for result in results {
                if let Err(e) = result {
                    error!(task_id = %task_id, error = %e, "Task aborted by infrastructure error");
                    state.abort(format!("Infrastructure error: {}", e));
                }
            }
        }

        let processed = load_task(&self.db, task_id)
            .await?
            .map(|t| t.counters.processed)
            .unwrap_or(0);

        if state.is_aborted() {
            let reason = state.reason().unwrap_or_else(|| "Task aborted".to_string());
            self.finish(task_id, TaskStatus::Failed, Some(&reason), processed).await
        } else if cancelled || cancel.is_cancelled() {
            self.finish(task_id, TaskStatus::Cancelled, None, processed).await
        } else {
            self.finish(task_id, TaskStatus::Completed, None, processed).await
        }
    }

    /// Guarded terminal transition plus its event
    async fn finish(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        reason: Option<&str>,
        processed: u64,
    ) -> Result<TaskStatus> {
        if !finish_task(&self.db, task_id, status, reason).await? {
            let current = load_status(&self.db, task_id).await?.unwrap_or(status);
            info!(task_id = %task_id, status = current.as_str(), "Task already terminal");
            return Ok(current);
        }

        let timestamp = Utc::now();
        let event = match status {
            TaskStatus::Failed => {
                warn!(task_id = %task_id, reason = reason.unwrap_or(""), "Batch task failed");
                DqEvent::TaskFailed {
                    task_id,
                    reason: reason.unwrap_or("").to_string(),
                    timestamp,
                }
            }
            TaskStatus::Cancelled => {
                info!(task_id = %task_id, processed, "Batch task cancelled");
                DqEvent::TaskCancelled {
                    task_id,
                    processed,
                    timestamp,
                }
            }
            _ => {
                let counters = load_task(&self.db, task_id)
                    .await?
                    .map(|t| t.counters)
                    .unwrap_or_default();
                info!(
                    task_id = %task_id,
                    succeeded = counters.succeeded,
                    failed = counters.failed,
                    "Batch task completed"
                );
                DqEvent::TaskCompleted {
                    task_id,
                    succeeded: counters.succeeded,
                    failed: counters.failed,
                    timestamp,
                }
            }
        };
        self.event_bus.emit_lossy(event);
        Ok(status)
    }

    /// Run every item of one question in order
    ///
    /// Checks for cancel and abort before each item.
    /// Errors returned here are infrastructure failures; item failures are
    /// recorded and counted.
    async fn process_question(
        &self,
        task: &BatchTask,
        operations: &[Operation],
        question_id: &QuestionId,
        cancel: &CancellationToken,
        state: &RunState,
    ) -> Result<()> {
        if cancel.is_cancelled() || state.is_aborted() {
            return Ok(());
        }

        let mut question_ok = true;
        let mut interrupted = false;

        'operations: for &operation in operations {
            for target in task.options.target_locales(operation) {
                if cancel.is_cancelled() || state.is_aborted() {
                    interrupted = true;
                    break 'operations;
                }
                let item_id =
                    create_item(&self.db, task.task_id, question_id, operation, target.as_deref()).await?;
                transition_item(&self.db, item_id, ItemStatus::Processing).await?;

                let outcome = match load_question(&self.db, question_id).await? {
                    Some(question) => {
                        let ctx = ItemContext {
                            db: &self.db,
                            ai: self.ai.as_deref(),
                            task_id: task.task_id,
                            item_id,
                            question: &question,
                            operation,
                            target_locale: target.as_deref(),
                            options: &task.options,
                        };
                        run_item(&ctx).await
                    }
                    None => Err(HandlerError::Failed(ItemFailure::new(
                        "QUESTION_NOT_FOUND",
                        ErrorStage::Load,
                        format!("Question not found: {}", question_id),
                    ))),
                };

                match outcome {
                    Ok(()) => {
                        complete_item(&self.db, item_id).await?;
                    }
                    Err(HandlerError::Failed(failure)) => {
                        question_ok = false;
                        self.record_failure(task, item_id, question_id, operation, target.as_deref(), &failure)
                            .await?;
                        if !task.continue_on_error {
                            state.abort(format!(
                                "Item failed for question {} ({}): {}",
                                question_id, failure.code, failure.message
                            ));
                            break 'operations;
                        }
                    }
                    Err(HandlerError::Infrastructure(e)) => {
                        let failure = ItemFailure::new("INTERNAL_ERROR", ErrorStage::DbWrite, e.to_string());
                        if let Err(record_error) = self
                            .record_failure(task, item_id, question_id, operation, target.as_deref(), &failure)
                            .await
                        {
                            warn!(
                                task_id = %task.task_id,
                                question_id = %question_id,
                                item_id,
                                error = %record_error,
                                "Could not record infrastructure failure on task item"
                            );
                        }
                        return Err(e);
                    }
                }
            }
        }

        // Partly run without a failure: left uncounted and picked up by retry
        if interrupted && question_ok {
            info!(
                task_id = %task.task_id,
                question_id = %question_id,
                "Question left unfinished by cancel or abort"
            );
            return Ok(());
        }

        let counters = record_question_outcome(&self.db, task.task_id, question_ok).await?;
        self.event_bus.emit_lossy(DqEvent::TaskProgress {
            task_id: task.task_id,
            total: counters.total,
            processed: counters.processed,
            succeeded: counters.succeeded,
            failed: counters.failed,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn record_failure(
        &self,
        task: &BatchTask,
        item_id: i64,
        question_id: &QuestionId,
        operation: Operation,
        target_locale: Option<&str>,
        failure: &ItemFailure,
    ) -> Result<()> {
        warn!(
            task_id = %task.task_id,
            question_id = %question_id,
            operation = operation.as_str(),
            target_locale = target_locale.unwrap_or("-"),
            error_code = %failure.code,
            stage = failure.stage.as_str(),
            "Task item failed"
        );
        fail_item(
            &self.db,
            item_id,
            &ItemFailureRecord {
                code: &failure.code,
                stage: failure.stage.as_str(),
                message: &failure.message,
                detail: failure.detail.as_ref(),
            },
        )
        .await?;
        self.event_bus.emit_lossy(DqEvent::TaskItemFailed {
            task_id: task.task_id,
            question_id: question_id.to_string(),
            operation: operation.as_str().to_string(),
            target_locale: target_locale.map(str::to_string),
            error_code: failure.code.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
