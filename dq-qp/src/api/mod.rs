//! HTTP API handlers for dq-qp
//!
//! JSON over HTTP for the operator console, plus an SSE event stream.

pub mod consistency;
pub mod health;
pub mod reviews;
pub mod sse;
pub mod tasks;

pub use consistency::consistency_routes;
pub use health::health_routes;
pub use reviews::review_routes;
pub use sse::event_stream;
pub use tasks::task_routes;
