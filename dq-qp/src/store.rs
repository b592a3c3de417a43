//! Question store seam
//!
//! The remediation pipelines only need a paged ordered read and a
//! single-row explanation write. `SqliteQuestionStore` is the production
//! implementation.

use async_trait::async_trait;
use dq_common::Result;

use crate::models::{Question, QuestionId};

/// Where the next page starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// First page in key order
    Start,
    /// Rows with a key strictly greater than the cursor
    After(QuestionId),
    /// Rows after skipping this many in key order
    Offset(u64),
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Up to `limit` questions ordered by key ascending
    async fn fetch_page(&self, request: &PageRequest, limit: u32) -> Result<Vec<Question>>;

    async fn load_question(&self, id: &QuestionId) -> Result<Option<Question>>;

    /// Replace the explanation text for one locale
    async fn write_explanation(&self, id: &QuestionId, locale: &str, text: &str) -> Result<()>;

    async fn count_questions(&self) -> Result<u64>;
}
