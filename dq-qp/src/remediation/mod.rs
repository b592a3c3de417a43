//! Offline explanation remediation
//!
//! Two single-pass pipelines over the corpus scanner:
//! - **Direct-Apply** writes auto-fixable corrections straight to the store
//! - **Audit** only proposes, enqueueing every inconsistency for review
//!
//! Both default to dry-run and are safe to re-run: the checker and resolver
//! depend only on current stored state.

pub mod audit;
pub mod direct_apply;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::QuestionId;
use crate::scanner::{Finding, ScanStats};

pub use audit::{run_audit, run_audit_with_id};
pub use direct_apply::run_direct_apply;

/// Whether a pipeline writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    DryRun,
    Apply,
}

impl RunMode {
    pub fn from_apply_flag(apply: bool) -> Self {
        if apply {
            RunMode::Apply
        } else {
            RunMode::DryRun
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::DryRun => "dry-run",
            RunMode::Apply => "apply",
        }
    }
}

/// Which pipeline produced a summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    DirectApply,
    Audit,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub pipeline: Pipeline,
    pub mode: RunMode,
    /// Groups the review candidates of an audit run
    pub audit_run_id: Option<Uuid>,
    pub stats: ScanStats,
    pub queued_for_review: u64,
    pub writes_applied: u64,
}

impl RunSummary {
    fn new(pipeline: Pipeline, mode: RunMode, audit_run_id: Option<Uuid>) -> Self {
        Self {
            pipeline,
            mode,
            audit_run_id,
            stats: ScanStats::default(),
            queued_for_review: 0,
            writes_applied: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("Question store error: {0}")]
    Store(#[from] dq_common::Error),

    /// Fatal precondition: nothing to scan
    #[error("Question table is empty; refusing to run")]
    EmptyCorpus,

    /// A write failed; no further writes were attempted
    #[error("Write failed for question {question_id} locale {locale} after {applied} writes: {source}")]
    WriteHalted {
        question_id: QuestionId,
        locale: String,
        applied: u64,
        #[source]
        source: dq_common::Error,
    },
}

/// One structured log line per finding
fn log_finding(finding: &Finding) {
    match &finding.suggested_fix {
        Some(fix) => tracing::info!(
            question_id = %finding.question_id,
            locale = %finding.locale,
            expected = %finding.verdict.expected,
            inferred = %finding.verdict.inferred,
            from = %finding.old_text,
            to = %fix,
            "auto-fix-suggestion"
        ),
        None => tracing::info!(
            question_id = %finding.question_id,
            locale = %finding.locale,
            expected = %finding.verdict.expected,
            inferred = %finding.verdict.inferred,
            text = %finding.old_text,
            "need-manual"
        ),
    }
}

/// Warn when a non-empty scan detected nothing, which usually means the
/// answer column is in an unexpected format
fn warn_if_nothing_detected(stats: &ScanStats) {
    if stats.scanned_questions > 0 && stats.inconsistent_detected == 0 {
        tracing::warn!(
            scanned = stats.scanned_questions,
            locales_checked = stats.locales_checked,
            "Questions were scanned but no inconsistency was detected; check answer and explanation formats"
        );
    }
}
