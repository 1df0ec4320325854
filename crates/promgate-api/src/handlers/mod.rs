//! HTTP request handlers for the gateway.
//!
//! Handlers are grouped by listener:
//! - `write` - remote-write ingestion on the data plane
//! - `health` - liveness probe on the data plane
//! - `metrics` - Prometheus exposition on the metrics listener
//!
//! Requests that match no route or method get a bare status code: `400` on
//! the data plane, `404` on the metrics listener.

use axum::http::StatusCode;
use tracing::debug;

pub mod health;
pub mod metrics;
pub mod write;

pub use health::healthcheck;
pub use metrics::metrics;
pub use write::{remote_write, WriteError};

/// Fallback for unknown routes and methods on the data plane.
pub async fn bad_request() -> StatusCode {
    debug!("Rejecting request for unknown route or method");
    StatusCode::BAD_REQUEST
}

/// Fallback for unknown routes on the metrics listener.
pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
