//! Audit pipeline

use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use super::{log_finding, warn_if_nothing_detected, Pipeline, RemediationError, RunMode, RunSummary};
use crate::db::reviews::{enqueue_revision, NewRevision};
use crate::models::RevisionSource;
use crate::scanner::CorpusScanner;
use crate::store::QuestionStore;

/// Enqueue every inconsistency for review, auto-fixable or not
///
/// Content is never touched. Candidates written by this run share a fresh
/// audit run id.
pub async fn run_audit(
    store: &dyn QuestionStore,
    pool: &SqlitePool,
    page_size: u32,
    mode: RunMode,
) -> Result<RunSummary, RemediationError> {
    run_audit_with_id(store, pool, page_size, mode, Uuid::new_v4()).await
}

/// Audit run under a caller-chosen run id, so it can be announced up front
pub async fn run_audit_with_id(
    store: &dyn QuestionStore,
    pool: &SqlitePool,
    page_size: u32,
    mode: RunMode,
    audit_run_id: Uuid,
) -> Result<RunSummary, RemediationError> {
    if store.count_questions().await? == 0 {
        return Err(RemediationError::EmptyCorpus);
    }

    info!(mode = mode.as_str(), %audit_run_id, page_size, "Audit run started");
    let mut summary = RunSummary::new(Pipeline::Audit, mode, Some(audit_run_id));
    let mut scanner = CorpusScanner::new(store, page_size);

    while let Some(findings) = scanner.next_page().await? {
        for finding in &findings {
            log_finding(finding);
            if mode == RunMode::DryRun {
                continue;
            }

            let revision = NewRevision {
                question_id: finding.question_id.clone(),
                locale: finding.locale.clone(),
                audit_run_id: Some(audit_run_id),
                source: RevisionSource::Audit,
                old_text: Some(finding.old_text.clone()),
                proposed_text: finding.suggested_fix.clone(),
                auto_fixable: finding.is_auto_fixable(),
                verdict: Some(finding.verdict.clone()),
            };
            enqueue_revision(pool, &revision).await?;
            summary.queued_for_review += 1;
        }
    }

    summary.stats = scanner.stats();
    warn_if_nothing_detected(&summary.stats);
    info!(
        mode = mode.as_str(),
        %audit_run_id,
        scanned = summary.stats.scanned_questions,
        inconsistent = summary.stats.inconsistent_detected,
        queued_for_review = summary.queued_for_review,
        "Audit run finished"
    );
    Ok(summary)
}
