//! Direct-Apply pipeline

use tracing::{error, info};

use super::{log_finding, warn_if_nothing_detected, Pipeline, RemediationError, RunMode, RunSummary};
use crate::scanner::CorpusScanner;
use crate::store::QuestionStore;

/// Write every auto-fixable correction; log the rest
///
/// Stops at the first failed write so a concurrent edit is not clobbered by
/// blind retries. Findings without a fix are only logged.
pub async fn run_direct_apply(
    store: &dyn QuestionStore,
    page_size: u32,
    mode: RunMode,
) -> Result<RunSummary, RemediationError> {
    if store.count_questions().await? == 0 {
        return Err(RemediationError::EmptyCorpus);
    }

    info!(mode = mode.as_str(), page_size, "Direct-apply run started");
    let mut summary = RunSummary::new(Pipeline::DirectApply, mode, None);
    let mut scanner = CorpusScanner::new(store, page_size);

    while let Some(findings) = scanner.next_page().await? {
        for finding in &findings {
            log_finding(finding);

            let Some(fix) = &finding.suggested_fix else {
                continue;
            };
            if mode == RunMode::DryRun {
                continue;
            }

            if let Err(e) = store
                .write_explanation(&finding.question_id, &finding.locale, fix)
                .await
            {
                error!(
                    question_id = %finding.question_id,
                    locale = %finding.locale,
                    applied = summary.writes_applied,
                    error = %e,
                    "Explanation write failed, halting further writes"
                );
                return Err(RemediationError::WriteHalted {
                    question_id: finding.question_id.clone(),
                    locale: finding.locale.clone(),
                    applied: summary.writes_applied,
                    source: e,
                });
            }
            summary.writes_applied += 1;
        }
    }

    summary.stats = scanner.stats();
    warn_if_nothing_detected(&summary.stats);
    info!(
        mode = mode.as_str(),
        scanned = summary.stats.scanned_questions,
        inconsistent = summary.stats.inconsistent_detected,
        auto_fixable = summary.stats.auto_fixable,
        needs_manual = summary.stats.needs_manual,
        writes_applied = summary.writes_applied,
        "Direct-apply run finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{questions::upsert_question, SqliteQuestionStore};
    use crate::models::{Question, QuestionId};
    use dq_common::db::init_in_memory_database;

    #[tokio::test]
    async fn test_dry_run_never_writes() {
        let pool = init_in_memory_database().await.unwrap();
        upsert_question(&pool, &Question::new(QuestionId::Numeric(1), Some("true"), Some("本题是错误的。")))
            .await
            .unwrap();
        let store = SqliteQuestionStore::new(pool);

        let summary = run_direct_apply(&store, 10, RunMode::DryRun).await.unwrap();
        assert_eq!(summary.stats.auto_fixable, 1);
        assert_eq!(summary.writes_applied, 0);

        let q = store.load_question(&QuestionId::Numeric(1)).await.unwrap().unwrap();
        assert_eq!(q.explanation.as_deref(), Some("本题是错误的。"));
    }

    #[tokio::test]
    async fn test_empty_corpus_is_fatal() {
        let pool = init_in_memory_database().await.unwrap();
        let store = SqliteQuestionStore::new(pool);

        let result = run_direct_apply(&store, 10, RunMode::Apply).await;
        assert!(matches!(result, Err(RemediationError::EmptyCorpus)));
    }
}
