//! Event types and broadcast bus for DriveQuiz services
//!
//! Task lifecycle and review decisions are published here so the operator
//! console can follow them over SSE instead of polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// DriveQuiz event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DqEvent {
    /// Batch task moved from pending to processing
    TaskStarted {
        task_id: Uuid,
        operations: Vec<String>,
        total: u64,
        timestamp: DateTime<Utc>,
    },

    /// Counter snapshot after an item finished
    TaskProgress {
        task_id: Uuid,
        total: u64,
        processed: u64,
        succeeded: u64,
        failed: u64,
        timestamp: DateTime<Utc>,
    },

    /// One task item failed
    TaskItemFailed {
        task_id: Uuid,
        question_id: String,
        operation: String,
        target_locale: Option<String>,
        error_code: String,
        timestamp: DateTime<Utc>,
    },

    /// Task reached `completed`
    TaskCompleted {
        task_id: Uuid,
        succeeded: u64,
        failed: u64,
        timestamp: DateTime<Utc>,
    },

    /// Task reached `failed`
    TaskFailed {
        task_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Task reached `cancelled`
    TaskCancelled {
        task_id: Uuid,
        processed: u64,
        timestamp: DateTime<Utc>,
    },

    /// A reviewer approved or rejected a review candidate
    ReviewDecided {
        candidate_id: Uuid,
        question_id: String,
        locale: String,
        decision: String,
        timestamp: DateTime<Utc>,
    },
}

impl DqEvent {
    /// SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            DqEvent::TaskStarted { .. } => "TaskStarted",
            DqEvent::TaskProgress { .. } => "TaskProgress",
            DqEvent::TaskItemFailed { .. } => "TaskItemFailed",
            DqEvent::TaskCompleted { .. } => "TaskCompleted",
            DqEvent::TaskFailed { .. } => "TaskFailed",
            DqEvent::TaskCancelled { .. } => "TaskCancelled",
            DqEvent::ReviewDecided { .. } => "ReviewDecided",
        }
    }

    /// Task this event belongs to, if any
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            DqEvent::TaskStarted { task_id, .. }
            | DqEvent::TaskProgress { task_id, .. }
            | DqEvent::TaskItemFailed { task_id, .. }
            | DqEvent::TaskCompleted { task_id, .. }
            | DqEvent::TaskFailed { task_id, .. }
            | DqEvent::TaskCancelled { task_id, .. } => Some(*task_id),
            DqEvent::ReviewDecided { .. } => None,
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: publishing never blocks, slow subscribers
/// observe `Lagged` instead of stalling producers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DqEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DqEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is subscribed
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: DqEvent) -> Result<usize, broadcast::error::SendError<DqEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: DqEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
