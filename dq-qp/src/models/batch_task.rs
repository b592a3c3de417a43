//! Batch task state machine
//!
//! A task moves `pending → processing` when its run starts and ends in one of
//! `completed`, `failed` or `cancelled`. Terminal states are final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::QuestionId;

/// Batch task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Only failed or cancelled tasks may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

/// Per-question operation a task can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Write a translation of content/options/explanation into target locales
    Translate,
    /// Propose a polished explanation for review
    Polish,
    /// Generate a `zh` explanation when none exists
    FillMissing,
    /// Assign category and topic tags
    CategoryTags,
    /// Check every explanation locale against the canonical answer
    ExplanationAudit,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Translate => "translate",
            Operation::Polish => "polish",
            Operation::FillMissing => "fill_missing",
            Operation::CategoryTags => "category_tags",
            Operation::ExplanationAudit => "explanation_audit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "translate" => Some(Operation::Translate),
            "polish" => Some(Operation::Polish),
            "fill_missing" => Some(Operation::FillMissing),
            "category_tags" => Some(Operation::CategoryTags),
            "explanation_audit" => Some(Operation::ExplanationAudit),
            _ => None,
        }
    }

    /// Scene name sent to the AI collaborator
    pub fn scene(&self) -> &'static str {
        match self {
            Operation::Translate => "question_translation",
            Operation::Polish => "question_polish",
            Operation::FillMissing => "question_fill_missing",
            Operation::CategoryTags => "question_category_tags",
            Operation::ExplanationAudit => "explanation_audit",
        }
    }

    pub fn uses_ai(&self) -> bool {
        !matches!(self, Operation::ExplanationAudit)
    }
}

/// Per-question run order: translate runs after every other operation
pub fn execution_order(operations: &[Operation]) -> Vec<Operation> {
    let mut ordered: Vec<Operation> = Vec::new();
    for op in operations {
        if !ordered.contains(op) {
            ordered.push(*op);
        }
    }
    ordered.sort_by_key(|op| matches!(op, Operation::Translate));
    ordered
}

/// One locale or several
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocaleList {
    One(String),
    Many(Vec<String>),
}

impl LocaleList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            LocaleList::One(l) => vec![l.clone()],
            LocaleList::Many(ls) => ls.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateOptions {
    pub from: String,
    pub to: LocaleList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolishOptions {
    pub locale: String,
}

/// Operation-specific options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translate_options: Option<TranslateOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polish_options: Option<PolishOptions>,
}

impl TaskOptions {
    /// Check that every operation has the options it needs
    pub fn validate(&self, operations: &[Operation]) -> Result<(), String> {
        if operations.is_empty() {
            return Err("At least one operation is required".to_string());
        }
        if operations.contains(&Operation::Translate) {
            let opts = self
                .translate_options
                .as_ref()
                .ok_or_else(|| "translate requires translate_options".to_string())?;
            if opts.from.trim().is_empty() {
                return Err("translate_options.from must not be empty".to_string());
            }
            let targets = opts.to.to_vec();
            if targets.is_empty() || targets.iter().any(|t| t.trim().is_empty()) {
                return Err("translate_options.to must name at least one locale".to_string());
            }
        }
        if operations.contains(&Operation::Polish) {
            let opts = self
                .polish_options
                .as_ref()
                .ok_or_else(|| "polish requires polish_options".to_string())?;
            if opts.locale.trim().is_empty() {
                return Err("polish_options.locale must not be empty".to_string());
            }
        }
        Ok(())
    }

    /// Items one question expands to across `operations`
    pub fn items_per_question(&self, operations: &[Operation]) -> u64 {
        operations
            .iter()
            .map(|&op| self.target_locales(op).len() as u64)
            .sum()
    }

    /// Target locales one question expands to for an operation
    ///
    /// `None` means the operation runs once per question without a target.
    pub fn target_locales(&self, operation: Operation) -> Vec<Option<String>> {
        match operation {
            Operation::Translate => self
                .translate_options
                .as_ref()
                .map(|o| o.to.to_vec().into_iter().map(Some).collect())
                .unwrap_or_default(),
            Operation::Polish => vec![self.polish_options.as_ref().map(|o| o.locale.clone())],
            Operation::FillMissing => vec![Some("zh".to_string())],
            Operation::CategoryTags | Operation::ExplanationAudit => vec![None],
        }
    }
}

/// Which questions a task covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskScope {
    /// Every question in the store, resolved at start
    All,
    /// An explicit list of question keys
    Questions { question_ids: Vec<QuestionId> },
}

impl TaskScope {
    /// Explicit list with duplicates removed, first occurrence kept
    pub fn questions(ids: Vec<QuestionId>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let question_ids = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
        TaskScope::Questions { question_ids }
    }
}

/// Progress counters, in questions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl TaskCounters {
    /// `succeeded + failed <= processed <= total`
    pub fn is_consistent(&self) -> bool {
        self.succeeded + self.failed <= self.processed && self.processed <= self.total
    }
}

/// Batch task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTask {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub operations: Vec<Operation>,
    pub options: TaskOptions,
    /// Requested scope; replaced by the resolved question list at start
    pub scope: TaskScope,
    pub batch_size: u32,
    pub continue_on_error: bool,
    pub counters: TaskCounters,
    pub current_batch: u64,
    pub failure_reason: Option<String>,
    pub retry_of: Option<Uuid>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchTask {
    pub fn new(
        operations: Vec<Operation>,
        options: TaskOptions,
        scope: TaskScope,
        batch_size: u32,
        continue_on_error: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            status: TaskStatus::Pending,
            operations,
            options,
            scope,
            batch_size: batch_size.max(1),
            continue_on_error,
            counters: TaskCounters::default(),
            current_batch: 0,
            failure_reason: None,
            retry_of: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Resolved question list, empty while the scope is still `All`
    pub fn question_ids(&self) -> &[QuestionId] {
        match &self.scope {
            TaskScope::Questions { question_ids } => question_ids,
            TaskScope::All => &[],
        }
    }
}
