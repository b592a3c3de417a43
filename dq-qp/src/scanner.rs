//! Corpus scanner
//!
//! Pages through the question store in key order and runs the consistency
//! checker on every explanation locale. Paging starts keyset-based (`id >
//! cursor`) and switches permanently to offset paging when the first page
//! holds non-integer keys or a page fails to move past the cursor.

use dq_common::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::consistency::{check_consistency, resolve_auto_fix, ConsistencyVerdict};
use crate::models::{Question, QuestionId};
use crate::store::{PageRequest, QuestionStore};

/// Default rows per page
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Counters accumulated over one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub scanned_questions: u64,
    pub locales_checked: u64,
    pub inconsistent_detected: u64,
    pub auto_fixable: u64,
    pub needs_manual: u64,
}

/// An inconsistent (question, locale)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub question_id: QuestionId,
    pub locale: String,
    pub old_text: String,
    pub verdict: ConsistencyVerdict,
    /// Replacement from the substitution table, if one matched
    pub suggested_fix: Option<String>,
}

impl Finding {
    pub fn is_auto_fixable(&self) -> bool {
        self.suggested_fix.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Paging {
    Cursor(Option<QuestionId>),
    Offset(u64),
}

/// Resumable paged pass over a question store
pub struct CorpusScanner<'a> {
    store: &'a dyn QuestionStore,
    page_size: u32,
    paging: Paging,
    first_page: bool,
    finished: bool,
    /// Rows consumed so far, in key order
    consumed: u64,
    stats: ScanStats,
}

impl<'a> CorpusScanner<'a> {
    pub fn new(store: &'a dyn QuestionStore, page_size: u32) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            paging: Paging::Cursor(None),
            first_page: true,
            finished: false,
            consumed: 0,
            stats: ScanStats::default(),
        }
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// True once paging fell back to offsets
    pub fn uses_offset_paging(&self) -> bool {
        matches!(self.paging, Paging::Offset(_))
    }

    /// Check the next page of questions
    ///
    /// Returns the inconsistencies found on it, or `None` when the corpus is
    /// exhausted. A store error ends the scan; pages are never skipped.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Finding>>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let request = match &self.paging {
                Paging::Cursor(None) => PageRequest::Start,
                Paging::Cursor(Some(cursor)) => PageRequest::After(cursor.clone()),
                Paging::Offset(offset) => PageRequest::Offset(*offset),
            };
            let rows = self.store.fetch_page(&request, self.page_size).await?;

            if let Paging::Cursor(cursor) = &self.paging {
                let first_page_mixed = self.first_page && rows.iter().any(|q| !q.id.is_numeric());
                let stalled = cursor
                    .as_ref()
                    .is_some_and(|c| rows.iter().any(|q| &q.id <= c));
                if first_page_mixed || stalled {
                    info!(
                        consumed = self.consumed,
                        non_numeric_keys = first_page_mixed,
                        "Switching corpus scan to offset paging"
                    );
                    self.paging = Paging::Offset(self.consumed);
                    self.first_page = false;
                    continue;
                }
            }
            self.first_page = false;

            if (rows.len() as u64) < u64::from(self.page_size) {
                self.finished = true;
            }

            let mut findings = Vec::new();
            for question in &rows {
                self.consumed += 1;
                self.stats.scanned_questions += 1;
                findings.extend(self.check_question(question));
            }

            self.paging = match &self.paging {
                Paging::Offset(_) => Paging::Offset(self.consumed),
                Paging::Cursor(previous) => {
                    Paging::Cursor(rows.last().map(|q| q.id.clone()).or_else(|| previous.clone()))
                }
            };

            debug!(rows = rows.len(), findings = findings.len(), "Scanned page");
            return Ok(Some(findings));
        }
    }

    fn check_question(&mut self, question: &Question) -> Vec<Finding> {
        let answer = question.answer_token();
        let mut findings = Vec::new();

        for (locale, text) in question.explanations() {
            self.stats.locales_checked += 1;
            let verdict = check_consistency(answer.as_deref(), Some(&text), Some(&locale));
            if !verdict.is_inconsistent() {
                continue;
            }

            self.stats.inconsistent_detected += 1;
            let suggested_fix = resolve_auto_fix(verdict.expected, Some(&locale), &text);
            if suggested_fix.is_some() {
                self.stats.auto_fixable += 1;
            } else {
                self.stats.needs_manual += 1;
            }

            findings.push(Finding {
                question_id: question.id.clone(),
                locale,
                old_text: text,
                verdict,
                suggested_fix,
            });
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::TruthValue;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory store sorted by key, recording every page request
    struct VecStore {
        rows: Vec<Question>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl VecStore {
        fn new(mut rows: Vec<Question>) -> Self {
            rows.sort_by(|a, b| a.id.cmp(&b.id));
            Self {
                rows,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl QuestionStore for VecStore {
        async fn fetch_page(&self, request: &PageRequest, limit: u32) -> Result<Vec<Question>> {
            self.requests.lock().unwrap().push(request.clone());
            let iter = self.rows.iter().cloned();
            let rows: Vec<Question> = match request {
                PageRequest::Start => iter.take(limit as usize).collect(),
                PageRequest::After(c) => iter.filter(|q| &q.id > c).take(limit as usize).collect(),
                PageRequest::Offset(o) => iter.skip(*o as usize).take(limit as usize).collect(),
            };
            Ok(rows)
        }

        async fn load_question(&self, id: &QuestionId) -> Result<Option<Question>> {
            Ok(self.rows.iter().find(|q| &q.id == id).cloned())
        }

        async fn write_explanation(&self, _: &QuestionId, _: &str, _: &str) -> Result<()> {
            Ok(())
        }

        async fn count_questions(&self) -> Result<u64> {
            Ok(self.rows.len() as u64)
        }
    }

    #[tokio::test]
    async fn test_numeric_keys_use_cursor_paging() {
        let rows = (1..=5)
            .map(|n| Question::new(QuestionId::Numeric(n), Some("true"), Some("本题是错误的。")))
            .collect();
        let store = VecStore::new(rows);
        let mut scanner = CorpusScanner::new(&store, 2);

        let mut findings = Vec::new();
        while let Some(page) = scanner.next_page().await.unwrap() {
            findings.extend(page);
        }

        assert_eq!(findings.len(), 5);
        assert!(!scanner.uses_offset_paging());
        assert_eq!(scanner.stats().auto_fixable, 5);
        let requests = store.requests.lock().unwrap();
        assert_eq!(requests[1], PageRequest::After(QuestionId::Numeric(2)));
    }

    #[tokio::test]
    async fn test_text_keys_switch_to_offset_paging() {
        let rows = ["q-a", "q-b", "q-c"]
            .iter()
            .map(|id| Question::new(*id, Some("false"), Some(r#"{"en":"This statement is true."}"#)))
            .collect();
        let store = VecStore::new(rows);
        let mut scanner = CorpusScanner::new(&store, 2);

        let mut ids = Vec::new();
        while let Some(page) = scanner.next_page().await.unwrap() {
            ids.extend(page.into_iter().map(|f| f.question_id));
        }

        assert!(scanner.uses_offset_paging());
        assert_eq!(ids, vec![QuestionId::from("q-a"), QuestionId::from("q-b"), QuestionId::from("q-c")]);
        assert_eq!(scanner.stats().needs_manual, 3);
        assert_eq!(scanner.stats().scanned_questions, 3);
    }

    #[tokio::test]
    async fn test_unknown_and_consistent_rows_are_not_findings() {
        let store = VecStore::new(vec![
            Question::new(QuestionId::Numeric(1), Some("maybe"), Some("本题是错误的。")),
            Question::new(QuestionId::Numeric(2), Some("true"), Some(r#"{"zh":"本题是正确的。","en":"no idea"}"#)),
            Question::new(QuestionId::Numeric(3), Some("true"), None),
        ]);
        let mut scanner = CorpusScanner::new(&store, 10);

        let page = scanner.next_page().await.unwrap().unwrap();
        assert!(page.is_empty());
        assert!(scanner.next_page().await.unwrap().is_none());

        let stats = scanner.stats();
        assert_eq!(stats.scanned_questions, 3);
        assert_eq!(stats.locales_checked, 3);
        assert_eq!(stats.inconsistent_detected, 0);
    }

    #[tokio::test]
    async fn test_finding_carries_verdict_and_fix() {
        let store = VecStore::new(vec![Question::new(
            QuestionId::Numeric(1),
            Some("对"),
            Some("本题是错误的。"),
        )]);
        let mut scanner = CorpusScanner::new(&store, 10);

        let page = scanner.next_page().await.unwrap().unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].locale, "zh");
        assert_eq!(page[0].verdict.expected, TruthValue::True);
        assert_eq!(page[0].verdict.inferred, TruthValue::False);
        assert_eq!(page[0].suggested_fix.as_deref(), Some("本题是正确的。"));
    }
}
