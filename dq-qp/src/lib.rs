//! dq-qp library interface
//!
//! Explanation consistency checking, offline remediation, the review queue
//! and the batch task orchestrator, plus the HTTP API the operator console
//! talks to.

pub mod ai;
pub mod api;
pub mod config;
pub mod consistency;
pub mod db;
pub mod error;
pub mod models;
pub mod remediation;
pub mod review;
pub mod scanner;
pub mod store;
pub mod tasks;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use dq_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::ai::AiCollaborator;
use crate::db::SqliteQuestionStore;
use crate::review::ReviewWorkflow;
use crate::tasks::TaskOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub orchestrator: TaskOrchestrator,
    pub review: ReviewWorkflow,
    /// Cancellation tokens for running batch tasks
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last background failure, reported by `/health`
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// State without an AI collaborator; AI operations fail at task start
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self::with_ai(db, event_bus, None, tasks::orchestrator::DEFAULT_BATCH_SIZE)
    }

    pub fn with_ai(
        db: SqlitePool,
        event_bus: EventBus,
        ai: Option<Arc<dyn AiCollaborator>>,
        default_batch_size: u32,
    ) -> Self {
        let orchestrator = TaskOrchestrator::new(db.clone(), event_bus.clone())
            .with_ai(ai)
            .with_default_batch_size(default_batch_size);
        let store = Arc::new(SqliteQuestionStore::new(db.clone()));
        let review = ReviewWorkflow::new(db.clone(), store).with_event_bus(event_bus.clone());

        Self {
            db,
            event_bus,
            orchestrator,
            review,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::task_routes())
        .merge(api::review_routes())
        .merge(api::consistency_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
