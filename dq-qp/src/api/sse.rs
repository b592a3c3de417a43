//! Server-Sent Events for task and review activity

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams every `DqEvent`: task lifecycle, progress, item failures and
/// review decisions.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    dq_common::sse::event_bus_sse_stream("dq-qp", &state.event_bus)
}
