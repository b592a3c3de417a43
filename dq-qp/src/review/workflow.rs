//! Approve / reject

use chrono::Utc;
use dq_common::events::{DqEvent, EventBus};
use dq_common::{Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::reviews::{append_revision, load_candidate, record_decision, NewRevision};
use crate::models::{ReviewCandidate, ReviewStatus, RevisionSource};
use crate::store::QuestionStore;

/// What the reviewer commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// One of the candidate's own revisions
    Revision(Uuid),
    /// Reviewer-typed text, recorded as a new revision before the write
    ManualText(String),
}

/// Review decisions over a question store
#[derive(Clone)]
pub struct ReviewWorkflow {
    db: SqlitePool,
    store: Arc<dyn QuestionStore>,
    event_bus: Option<EventBus>,
}

impl ReviewWorkflow {
    pub fn new(db: SqlitePool, store: Arc<dyn QuestionStore>) -> Self {
        Self {
            db,
            store,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    async fn load_pending(&self, candidate_id: Uuid) -> Result<ReviewCandidate> {
        let candidate = load_candidate(&self.db, candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Review candidate not found: {}", candidate_id)))?;
        if candidate.status != ReviewStatus::Pending {
            return Err(Error::Conflict(format!(
                "Review candidate {} is already {}",
                candidate_id,
                candidate.status.as_str()
            )));
        }
        Ok(candidate)
    }

    /// Commit the selected text to the question and close the candidate
    ///
    /// A failed store write leaves the candidate pending so the approval can
    /// be retried.
    pub async fn approve(
        &self,
        candidate_id: Uuid,
        selection: Selection,
        reviewer: Option<&str>,
    ) -> Result<ReviewCandidate> {
        let candidate = self.load_pending(candidate_id).await?;

        let (revision_id, text) = match selection {
            Selection::Revision(revision_id) => {
                let revision = candidate.revision(revision_id).ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "Revision {} does not belong to candidate {}",
                        revision_id, candidate_id
                    ))
                })?;
                let text = revision
                    .proposed_text
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "Revision {} has no proposed text; approve with manual text instead",
                            revision_id
                        ))
                    })?;
                (revision_id, text)
            }
            Selection::ManualText(text) => {
                if text.trim().is_empty() {
                    return Err(Error::InvalidInput("Manual text must not be empty".to_string()));
                }
                let latest = candidate.latest_revision();
                let manual = NewRevision {
                    question_id: candidate.question_id.clone(),
                    locale: candidate.locale.clone(),
                    audit_run_id: None,
                    source: RevisionSource::Manual,
                    old_text: latest.and_then(|r| r.old_text.clone()),
                    proposed_text: Some(text.clone()),
                    auto_fixable: false,
                    verdict: latest.and_then(|r| r.verdict.clone()),
                };
                let revision_id = append_revision(&self.db, candidate_id, &manual).await?;
                (revision_id, text)
            }
        };

        if let Err(e) = self
            .store
            .write_explanation(&candidate.question_id, &candidate.locale, &text)
            .await
        {
            error!(
                %candidate_id,
                question_id = %candidate.question_id,
                locale = %candidate.locale,
                error = %e,
                "Approval write failed, candidate left pending"
            );
            return Err(Error::Internal(format!(
                "Explanation write failed, candidate {} left pending: {}",
                candidate_id, e
            )));
        }

        if !record_decision(
            &self.db,
            candidate_id,
            ReviewStatus::Approved,
            Some(revision_id),
            reviewer,
            None,
        )
        .await?
        {
            return Err(Error::Conflict(format!(
                "Review candidate {} was decided concurrently",
                candidate_id
            )));
        }

        info!(
            %candidate_id,
            %revision_id,
            question_id = %candidate.question_id,
            locale = %candidate.locale,
            reviewer = reviewer.unwrap_or("-"),
            "Review candidate approved"
        );
        self.emit_decision(&candidate, ReviewStatus::Approved);
        self.reload(candidate_id).await
    }

    /// Close the candidate without touching the question
    pub async fn reject(
        &self,
        candidate_id: Uuid,
        reviewer: Option<&str>,
        notes: Option<&str>,
    ) -> Result<ReviewCandidate> {
        let candidate = self.load_pending(candidate_id).await?;

        if !record_decision(&self.db, candidate_id, ReviewStatus::Rejected, None, reviewer, notes).await? {
            return Err(Error::Conflict(format!(
                "Review candidate {} was decided concurrently",
                candidate_id
            )));
        }

        info!(
            %candidate_id,
            question_id = %candidate.question_id,
            locale = %candidate.locale,
            reviewer = reviewer.unwrap_or("-"),
            "Review candidate rejected"
        );
        self.emit_decision(&candidate, ReviewStatus::Rejected);
        self.reload(candidate_id).await
    }

    async fn reload(&self, candidate_id: Uuid) -> Result<ReviewCandidate> {
        load_candidate(&self.db, candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Review candidate not found: {}", candidate_id)))
    }

    fn emit_decision(&self, candidate: &ReviewCandidate, decision: ReviewStatus) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(DqEvent::ReviewDecided {
                candidate_id: candidate.candidate_id,
                question_id: candidate.question_id.to_string(),
                locale: candidate.locale.clone(),
                decision: decision.as_str().to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}
