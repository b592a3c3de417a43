//! Consistency API handlers
//!
//! Ad-hoc verdicts for the console and the inconsistency listing recorded by
//! `explanation_audit` items.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tasks::WindowQuery;
use crate::consistency::{check_consistency, resolve_auto_fix, ConsistencyVerdict};
use crate::db::task_items::{findings_to_csv, list_findings};
use crate::error::{ApiError, ApiResult};
use crate::models::raw_answer_token;
use crate::AppState;

/// POST /consistency/check request
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// Stored answer, bare token or JSON scalar
    pub answer: Option<String>,
    pub text: Option<String>,
    pub locale: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    #[serde(flatten)]
    pub verdict: ConsistencyVerdict,
    pub auto_fixable: bool,
    pub suggested_fix: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FindingsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub operation: Option<String>,
    pub format: Option<String>,
}

/// POST /consistency/check
pub async fn check_text(Json(request): Json<CheckRequest>) -> ApiResult<Json<CheckResponse>> {
    let answer = raw_answer_token(request.answer.as_deref());
    let verdict = check_consistency(
        answer.as_deref(),
        request.text.as_deref(),
        request.locale.as_deref(),
    );

    let suggested_fix = match (&request.text, verdict.is_inconsistent()) {
        (Some(text), true) => resolve_auto_fix(verdict.expected, request.locale.as_deref(), text),
        _ => None,
    };

    Ok(Json(CheckResponse {
        auto_fixable: suggested_fix.is_some(),
        suggested_fix,
        verdict,
    }))
}

/// GET /consistency/findings?from&to&operation&format=csv
pub async fn get_findings(
    State(state): State<AppState>,
    Query(query): Query<FindingsQuery>,
) -> ApiResult<Response> {
    let window = WindowQuery {
        from: query.from,
        to: query.to,
        operation: query.operation,
    }
    .window()?;
    let findings = list_findings(&state.db, &window).await?;

    match query.format.as_deref() {
        None | Some("json") => Ok(Json(findings).into_response()),
        Some("csv") => {
            let body = findings_to_csv(&findings);
            Ok((
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                    (
                        header::CONTENT_DISPOSITION,
                        "attachment; filename=\"explanation_inconsistencies.csv\"",
                    ),
                ],
                body,
            )
                .into_response())
        }
        Some(other) => Err(ApiError::BadRequest(format!("Unknown format: {}", other))),
    }
}

/// Build consistency routes
pub fn consistency_routes() -> Router<AppState> {
    Router::new()
        .route("/consistency/check", post(check_text))
        .route("/consistency/findings", get(get_findings))
}
