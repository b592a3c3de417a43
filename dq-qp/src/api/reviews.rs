//! Review queue API handlers

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::reviews::{list_candidates, load_candidate, CandidateFilter};
use crate::error::{ApiError, ApiResult};
use crate::models::{ReviewCandidate, ReviewStatus};
use crate::review::Selection;
use crate::AppState;

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
pub struct ListReviewsQuery {
    pub status: Option<String>,
    pub locale: Option<String>,
    pub audit_run_id: Option<Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

/// POST /reviews/:id/approve request
///
/// Exactly one of `revision_id` and `manual_text`.
#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub revision_id: Option<Uuid>,
    #[serde(default)]
    pub manual_text: Option<String>,
    #[serde(default)]
    pub reviewer: Option<String>,
}

impl ApproveRequest {
    fn selection(self) -> ApiResult<Selection> {
        match (self.revision_id, self.manual_text) {
            (Some(id), None) => Ok(Selection::Revision(id)),
            (None, Some(text)) => Ok(Selection::ManualText(text)),
            (Some(_), Some(_)) => Err(ApiError::BadRequest(
                "Give either revision_id or manual_text, not both".to_string(),
            )),
            (None, None) => Err(ApiError::BadRequest(
                "revision_id or manual_text is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reviewer: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// GET /reviews?status&locale&audit_run_id
pub async fn list_reviews(
    State(state): State<AppState>,
    Query(query): Query<ListReviewsQuery>,
) -> ApiResult<Json<Vec<ReviewCandidate>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            ReviewStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("Unknown review status: {}", s)))
        })
        .transpose()?;

    let filter = CandidateFilter {
        status,
        locale: query.locale,
        audit_run_id: query.audit_run_id,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let candidates = list_candidates(&state.db, &filter, limit, query.offset.unwrap_or(0)).await?;
    Ok(Json(candidates))
}

/// GET /reviews/:id
pub async fn get_review(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
) -> ApiResult<Json<ReviewCandidate>> {
    let candidate = load_candidate(&state.db, candidate_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Review candidate not found: {}", candidate_id)))?;
    Ok(Json(candidate))
}

/// POST /reviews/:id/approve
///
/// A failed explanation write answers 500 and leaves the candidate pending.
pub async fn approve_review(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
    Json(request): Json<ApproveRequest>,
) -> ApiResult<Json<ReviewCandidate>> {
    let reviewer = request.reviewer.clone();
    let selection = request.selection()?;

    let candidate = state
        .review
        .approve(candidate_id, selection, reviewer.as_deref())
        .await?;
    Ok(Json(candidate))
}

/// POST /reviews/:id/reject
pub async fn reject_review(
    State(state): State<AppState>,
    Path(candidate_id): Path<Uuid>,
    request: Option<Json<RejectRequest>>,
) -> ApiResult<Json<ReviewCandidate>> {
    let Json(request) = request.unwrap_or_default();

    let candidate = state
        .review
        .reject(candidate_id, request.reviewer.as_deref(), request.notes.as_deref())
        .await?;
    Ok(Json(candidate))
}

/// Build review queue routes
pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/reviews", get(list_reviews))
        .route("/reviews/:id", get(get_review))
        .route("/reviews/:id/approve", post(approve_review))
        .route("/reviews/:id/reject", post(reject_review))
}
