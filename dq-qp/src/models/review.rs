//! Review candidates
//!
//! A candidate is keyed by (question, locale) and collects an append-only,
//! time-ordered list of revisions. Approval commits exactly one of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::QuestionId;
use crate::consistency::ConsistencyVerdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReviewStatus::Pending),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }
}

/// Who proposed a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionSource {
    /// Offline audit pipeline
    Audit,
    /// `explanation_audit` batch operation
    TaskAudit,
    /// AI polish proposal
    Polish,
    /// Text typed by the reviewer at approval time
    Manual,
}

impl RevisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionSource::Audit => "audit",
            RevisionSource::TaskAudit => "task_audit",
            RevisionSource::Polish => "polish",
            RevisionSource::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audit" => Some(RevisionSource::Audit),
            "task_audit" => Some(RevisionSource::TaskAudit),
            "polish" => Some(RevisionSource::Polish),
            "manual" => Some(RevisionSource::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRevision {
    pub revision_id: Uuid,
    pub candidate_id: Uuid,
    /// Groups revisions written by one audit run
    pub audit_run_id: Option<Uuid>,
    pub source: RevisionSource,
    pub old_text: Option<String>,
    /// Text committed if this revision is approved; `None` when no fix is known
    pub proposed_text: Option<String>,
    pub auto_fixable: bool,
    pub verdict: Option<ConsistencyVerdict>,
    pub created_at: DateTime<Utc>,
    pub seq: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCandidate {
    pub candidate_id: Uuid,
    pub question_id: QuestionId,
    pub locale: String,
    pub status: ReviewStatus,
    pub selected_revision_id: Option<Uuid>,
    pub reviewer: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    /// Oldest first
    pub revisions: Vec<ReviewRevision>,
}

impl ReviewCandidate {
    pub fn revision(&self, revision_id: Uuid) -> Option<&ReviewRevision> {
        self.revisions.iter().find(|r| r.revision_id == revision_id)
    }

    pub fn latest_revision(&self) -> Option<&ReviewRevision> {
        self.revisions.last()
    }

    pub fn selected_revision(&self) -> Option<&ReviewRevision> {
        self.selected_revision_id.and_then(|id| self.revision(id))
    }
}
