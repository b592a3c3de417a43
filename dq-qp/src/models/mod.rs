//! Data models for dq-qp
//!
//! - Questions and their per-locale explanation maps
//! - Batch tasks, task items and step-log checkpoints
//! - Review candidates and their revisions

pub mod batch_task;
pub mod question;
pub mod review;
pub mod task_item;

pub use batch_task::{BatchTask, Operation, TaskCounters, TaskOptions, TaskScope, TaskStatus};
pub use question::{
    decode_explanation, raw_answer_token, set_explanation_locale, ExplanationMap, Question,
    QuestionId,
};
pub use review::{ReviewCandidate, ReviewRevision, ReviewStatus, RevisionSource};
pub use task_item::{ErrorStage, ItemStatus, StepCheckpoint, StepLogEntry, TaskItem};
