//! Review queue persistence
//!
//! Revisions are append-only. A (question, locale) pair has at most one
//! pending candidate; new proposals attach to it.

use dq_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::{
    bind_question_id, now_rfc3339, parse_optional_timestamp, parse_timestamp, parse_uuid,
};
use crate::consistency::ConsistencyVerdict;
use crate::models::{QuestionId, ReviewCandidate, ReviewRevision, ReviewStatus, RevisionSource};
use crate::utils::retry_on_lock;

/// A proposal to enqueue
#[derive(Debug, Clone, PartialEq)]
pub struct NewRevision {
    pub question_id: QuestionId,
    pub locale: String,
    pub audit_run_id: Option<Uuid>,
    pub source: RevisionSource,
    pub old_text: Option<String>,
    pub proposed_text: Option<String>,
    pub auto_fixable: bool,
    pub verdict: Option<ConsistencyVerdict>,
}

/// Identifiers of an enqueued revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueuedRevision {
    pub candidate_id: Uuid,
    pub revision_id: Uuid,
    /// True when this revision opened a new candidate
    pub new_candidate: bool,
}

const CANDIDATE_COLUMNS: &str = "candidate_id, CAST(question_id AS TEXT) AS question_id_text, \
     typeof(question_id) AS question_id_type, locale, status, selected_revision_id, reviewer, \
     notes, created_at, updated_at, decided_at";

fn candidate_from_row(row: &SqliteRow) -> Result<ReviewCandidate> {
    let candidate_id: String = row.get("candidate_id");
    let id_type: String = row.get("question_id_type");
    let status: String = row.get("status");
    let selected: Option<String> = row.get("selected_revision_id");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(ReviewCandidate {
        candidate_id: parse_uuid("candidate_id", &candidate_id)?,
        question_id: QuestionId::from_sql_parts(row.get("question_id_text"), &id_type),
        locale: row.get("locale"),
        status: ReviewStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown review status: {}", status)))?,
        selected_revision_id: selected
            .map(|s| parse_uuid("selected_revision_id", &s))
            .transpose()?,
        reviewer: row.get("reviewer"),
        notes: row.get("notes"),
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        decided_at: parse_optional_timestamp("decided_at", row.get("decided_at"))?,
        revisions: Vec::new(),
    })
}

fn revision_from_row(row: &SqliteRow) -> Result<ReviewRevision> {
    let revision_id: String = row.get("revision_id");
    let candidate_id: String = row.get("candidate_id");
    let audit_run_id: Option<String> = row.get("audit_run_id");
    let source: String = row.get("source");
    let verdict: Option<String> = row.get("verdict");
    let created_at: String = row.get("created_at");

    Ok(ReviewRevision {
        revision_id: parse_uuid("revision_id", &revision_id)?,
        candidate_id: parse_uuid("candidate_id", &candidate_id)?,
        audit_run_id: audit_run_id
            .map(|s| parse_uuid("audit_run_id", &s))
            .transpose()?,
        source: RevisionSource::parse(&source)
            .ok_or_else(|| Error::Internal(format!("Unknown revision source: {}", source)))?,
        old_text: row.get("old_text"),
        proposed_text: row.get("proposed_text"),
        auto_fixable: row.get::<i64, _>("auto_fixable") != 0,
        verdict: verdict.map(|v| serde_json::from_str(&v)).transpose()?,
        created_at: parse_timestamp("created_at", &created_at)?,
        seq: row.get("seq"),
    })
}

async fn insert_revision(
    tx: &mut Transaction<'_, Sqlite>,
    candidate_id: Uuid,
    revision: &NewRevision,
) -> Result<Uuid> {
    let revision_id = Uuid::new_v4();
    let verdict = revision
        .verdict
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO review_revisions (
            revision_id, candidate_id, audit_run_id, source, old_text, proposed_text,
            auto_fixable, verdict, created_at, seq
        )
        SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(MAX(seq), 0) + 1
        FROM review_revisions WHERE candidate_id = ?
        "#,
    )
    .bind(revision_id.to_string())
    .bind(candidate_id.to_string())
    .bind(revision.audit_run_id.map(|id| id.to_string()))
    .bind(revision.source.as_str())
    .bind(&revision.old_text)
    .bind(&revision.proposed_text)
    .bind(revision.auto_fixable)
    .bind(verdict)
    .bind(now_rfc3339())
    .bind(candidate_id.to_string())
    .execute(&mut **tx)
    .await?;

    sqlx::query("UPDATE review_candidates SET updated_at = ? WHERE candidate_id = ?")
        .bind(now_rfc3339())
        .bind(candidate_id.to_string())
        .execute(&mut **tx)
        .await?;

    Ok(revision_id)
}

/// Attach a proposal to the pending candidate for its (question, locale),
/// opening one if none is pending
pub async fn enqueue_revision(pool: &SqlitePool, revision: &NewRevision) -> Result<EnqueuedRevision> {
    let max_wait_ms = super::settings::get_max_lock_wait_ms(pool).await?;

    retry_on_lock("enqueue_revision", max_wait_ms, || async {
        let mut tx = pool.begin().await?;

        let query = sqlx::query(
            "SELECT candidate_id FROM review_candidates \
             WHERE question_id = ? AND locale = ? AND status = 'pending'",
        );
        let existing = bind_question_id(query, &revision.question_id)
            .bind(&revision.locale)
            .fetch_optional(&mut *tx)
            .await?;

        let (candidate_id, new_candidate) = match existing {
            Some(row) => {
                let id: String = row.get("candidate_id");
                (parse_uuid("candidate_id", &id)?, false)
            }
            None => {
                let candidate_id = Uuid::new_v4();
                let now = now_rfc3339();
                let query = sqlx::query(
                    r#"
                    INSERT INTO review_candidates (
                        candidate_id, question_id, locale, status, created_at, updated_at
                    ) VALUES (?, ?, ?, 'pending', ?, ?)
                    "#,
                )
                .bind(candidate_id.to_string());
                bind_question_id(query, &revision.question_id)
                    .bind(&revision.locale)
                    .bind(&now)
                    .bind(&now)
                    .execute(&mut *tx)
                    .await?;
                (candidate_id, true)
            }
        };

        let revision_id = insert_revision(&mut tx, candidate_id, revision).await?;
        tx.commit().await?;

        Ok(EnqueuedRevision {
            candidate_id,
            revision_id,
            new_candidate,
        })
    })
    .await
}

/// Append a revision to a candidate that is still pending
pub async fn append_revision(
    pool: &SqlitePool,
    candidate_id: Uuid,
    revision: &NewRevision,
) -> Result<Uuid> {
    let mut tx = pool.begin().await?;

    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM review_candidates WHERE candidate_id = ?")
            .bind(candidate_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
    match status.as_deref() {
        None => {
            return Err(Error::NotFound(format!(
                "Review candidate not found: {}",
                candidate_id
            )))
        }
        Some("pending") => {}
        Some(other) => {
            return Err(Error::Conflict(format!(
                "Review candidate {} is already {}",
                candidate_id, other
            )))
        }
    }

    let revision_id = insert_revision(&mut tx, candidate_id, revision).await?;
    tx.commit().await?;
    Ok(revision_id)
}

async fn load_revisions(pool: &SqlitePool, candidate_id: Uuid) -> Result<Vec<ReviewRevision>> {
    let rows = sqlx::query(
        r#"
        SELECT revision_id, candidate_id, audit_run_id, source, old_text, proposed_text,
               auto_fixable, verdict, created_at, seq
        FROM review_revisions
        WHERE candidate_id = ?
        ORDER BY seq
        "#,
    )
    .bind(candidate_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(revision_from_row).collect()
}

/// A candidate with its revisions, oldest first
pub async fn load_candidate(pool: &SqlitePool, candidate_id: Uuid) -> Result<Option<ReviewCandidate>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM review_candidates WHERE candidate_id = ?",
        CANDIDATE_COLUMNS
    ))
    .bind(candidate_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let mut candidate = candidate_from_row(&row)?;
            candidate.revisions = load_revisions(pool, candidate_id).await?;
            Ok(Some(candidate))
        }
        None => Ok(None),
    }
}

/// Candidate list filters
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub status: Option<ReviewStatus>,
    pub locale: Option<String>,
    pub audit_run_id: Option<Uuid>,
}

/// Candidates grouped by (question, locale), each with its revisions
pub async fn list_candidates(
    pool: &SqlitePool,
    filter: &CandidateFilter,
    limit: u32,
    offset: u64,
) -> Result<Vec<ReviewCandidate>> {
    let status = filter.status.map(|s| s.as_str());
    let audit_run_id = filter.audit_run_id.map(|id| id.to_string());

    let rows = sqlx::query(&format!(
        "SELECT {} FROM review_candidates c \
         WHERE (? IS NULL OR c.status = ?) \
         AND (? IS NULL OR c.locale = ?) \
         AND (? IS NULL OR EXISTS (SELECT 1 FROM review_revisions r \
              WHERE r.candidate_id = c.candidate_id AND r.audit_run_id = ?)) \
         ORDER BY c.question_id, c.locale, c.created_at \
         LIMIT ? OFFSET ?",
        CANDIDATE_COLUMNS
    ))
    .bind(status)
    .bind(status)
    .bind(&filter.locale)
    .bind(&filter.locale)
    .bind(&audit_run_id)
    .bind(&audit_run_id)
    .bind(i64::from(limit))
    .bind(offset as i64)
    .fetch_all(pool)
    .await?;

    let mut candidates = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut candidate = candidate_from_row(row)?;
        candidate.revisions = load_revisions(pool, candidate.candidate_id).await?;
        candidates.push(candidate);
    }
    Ok(candidates)
}

/// Record a decision on a pending candidate
///
/// Returns false when the candidate was no longer pending.
pub async fn record_decision(
    pool: &SqlitePool,
    candidate_id: Uuid,
    status: ReviewStatus,
    selected_revision_id: Option<Uuid>,
    reviewer: Option<&str>,
    notes: Option<&str>,
) -> Result<bool> {
    if status == ReviewStatus::Pending {
        return Err(Error::InvalidInput("A decision must approve or reject".to_string()));
    }
    let now = now_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE review_candidates
        SET status = ?, selected_revision_id = ?, reviewer = ?, notes = COALESCE(?, notes),
            decided_at = ?, updated_at = ?
        WHERE candidate_id = ? AND status = 'pending'
        "#,
    )
    .bind(status.as_str())
    .bind(selected_revision_id.map(|id| id.to_string()))
    .bind(reviewer)
    .bind(notes)
    .bind(&now)
    .bind(&now)
    .bind(candidate_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
