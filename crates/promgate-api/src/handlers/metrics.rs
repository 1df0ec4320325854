//! Prometheus exposition endpoint.

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::metrics::Metrics;

/// Renders the gateway registry in the text exposition format.
pub async fn metrics(State(metrics): State<Metrics>) -> Response {
    match metrics.render() {
        Ok(body) => ([(CONTENT_TYPE, metrics.content_type())], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}
