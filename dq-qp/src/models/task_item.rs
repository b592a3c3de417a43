//! Task items and step-log checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Operation, QuestionId};

/// Task item status
///
/// Transitions only move forward: `pending → processing → succeeded|failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Succeeded => "succeeded",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "processing" => Some(ItemStatus::Processing),
            "succeeded" => Some(ItemStatus::Succeeded),
            "failed" => Some(ItemStatus::Failed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ItemStatus::Pending => 0,
            ItemStatus::Processing => 1,
            ItemStatus::Succeeded | ItemStatus::Failed => 2,
        }
    }

    /// True when moving from `self` to `next` keeps the status monotonic
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        next.rank() > self.rank()
    }

    /// Statuses an item may be in right before moving to `self`
    pub fn predecessors(&self) -> &'static [&'static str] {
        match self {
            ItemStatus::Pending => &[],
            ItemStatus::Processing => &["pending"],
            ItemStatus::Succeeded | ItemStatus::Failed => &["pending", "processing"],
        }
    }
}

/// Where in the item pipeline a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorStage {
    Load,
    AiCall,
    Sanitize,
    DbWrite,
    Consistency,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Load => "LOAD",
            ErrorStage::AiCall => "AI_CALL",
            ErrorStage::Sanitize => "SANITIZE",
            ErrorStage::DbWrite => "DB_WRITE",
            ErrorStage::Consistency => "CONSISTENCY",
        }
    }
}

/// Fixed step-log checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepCheckpoint {
    AiCallBefore,
    AiCallAfter,
    SanitizeAfter,
    DbWriteBefore,
}

impl StepCheckpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepCheckpoint::AiCallBefore => "AI_CALL_BEFORE",
            StepCheckpoint::AiCallAfter => "AI_CALL_AFTER",
            StepCheckpoint::SanitizeAfter => "SANITIZE_AFTER",
            StepCheckpoint::DbWriteBefore => "DB_WRITE_BEFORE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AI_CALL_BEFORE" => Some(StepCheckpoint::AiCallBefore),
            "AI_CALL_AFTER" => Some(StepCheckpoint::AiCallAfter),
            "SANITIZE_AFTER" => Some(StepCheckpoint::SanitizeAfter),
            "DB_WRITE_BEFORE" => Some(StepCheckpoint::DbWriteBefore),
            _ => None,
        }
    }
}

/// One (question, operation, target locale) unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: i64,
    pub task_id: Uuid,
    pub question_id: QuestionId,
    pub operation: Operation,
    pub target_locale: Option<String>,
    pub status: ItemStatus,
    pub ai_request: Option<Value>,
    pub ai_response: Option<Value>,
    pub error_code: Option<String>,
    pub error_stage: Option<String>,
    pub error_message: Option<String>,
    pub error_detail: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Structured step-log row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLogEntry {
    pub id: i64,
    pub task_id: Uuid,
    pub item_id: Option<i64>,
    pub question_id: Option<QuestionId>,
    pub operation: Option<String>,
    pub target_locale: Option<String>,
    pub checkpoint: String,
    pub level: String,
    pub message: String,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_status_is_monotonic() {
        assert!(ItemStatus::Pending.can_transition_to(ItemStatus::Processing));
        assert!(ItemStatus::Processing.can_transition_to(ItemStatus::Failed));
        assert!(!ItemStatus::Succeeded.can_transition_to(ItemStatus::Failed));
        assert!(!ItemStatus::Processing.can_transition_to(ItemStatus::Pending));
    }

    #[test]
    fn test_checkpoint_parse_is_case_insensitive() {
        assert_eq!(StepCheckpoint::parse("sanitize_after"), Some(StepCheckpoint::SanitizeAfter));
        assert_eq!(StepCheckpoint::parse("nope"), None);
        assert_eq!(StepCheckpoint::DbWriteBefore.as_str(), "DB_WRITE_BEFORE");
    }
}
