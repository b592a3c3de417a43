//! Batch task orchestration
//!
//! A task runs a set of per-question operations over a resolved scope in
//! batches, through a bounded worker pool. Every (question, operation,
//! target locale) becomes a task item with its own status, captured AI
//! exchange and structured failure detail.

pub mod handlers;
pub mod orchestrator;
pub mod retry;

pub use handlers::{HandlerError, ItemFailure};
pub use orchestrator::{NewTask, TaskOrchestrator};
