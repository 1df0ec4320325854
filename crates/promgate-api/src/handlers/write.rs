//! Remote-write handler: decode, validate, authenticate, re-encode, forward.

use axum::{
    body::Body,
    extract::{rejection::BytesRejection, RawQuery, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use promgate_core::{codec, tenant, CodecError, ValidationError};
use promgate_forward::{ForwardError, ForwardRequest, UpstreamResponse};
use thiserror::Error;
use tracing::{debug, error, field, info, instrument, warn, Span};

use crate::{
    auth::{AuthError, TokenVerifier},
    AppState,
};

/// Reasons a write request is not forwarded.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Body could not be read, typically because it exceeds the size limit.
    #[error("error reading remote write request body: {0}")]
    Body(#[from] BytesRejection),
    /// Body is not a snappy-compressed write request.
    #[error("error decoding remote write request: {0}")]
    Decode(#[source] CodecError),
    /// Tenant invariant violated.
    #[error("error validating the remote write request: {0}")]
    Tenant(#[from] ValidationError),
    /// Inbound authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Re-encoding the accepted request failed.
    #[error("error copying remote write request: {0}")]
    Encode(#[source] CodecError),
    /// Upstream could not be reached.
    #[error("error forwarding remote write request: {0}")]
    Forward(#[from] ForwardError),
}

impl IntoResponse for WriteError {
    fn into_response(self) -> Response {
        match self {
            Self::Body(e) => {
                warn!(error = %e, "Rejecting unreadable write request body");
                e.into_response()
            },
            Self::Decode(e) => {
                warn!(error = %e, "Rejecting undecodable write request");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            },
            Self::Tenant(e) => {
                warn!(error = %e, "Rejecting write request violating tenant invariant");
                StatusCode::FORBIDDEN.into_response()
            },
            Self::Auth(e) => {
                warn!(error = %e, "Rejecting unauthenticated write request");
                e.into_response()
            },
            Self::Encode(e) => {
                error!(error = %e, "Failed to re-encode write request");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            },
            Self::Forward(e) => {
                error!(error = %e, "Failed to forward write request");
                StatusCode::BAD_GATEWAY.into_response()
            },
        }
    }
}

/// Handles `POST /`.
///
/// Metadata-only requests skip tenant validation and inbound
/// authentication. Everything else must carry exactly one `cluster_id`
/// value and, when verification is enabled, a token the authority accepts
/// for that tenant. The upstream's answer is relayed as-is.
#[instrument(
    name = "remote_write",
    skip_all,
    fields(body_len = field::Empty, series = field::Empty, tenant = field::Empty)
)]
pub async fn remote_write(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, WriteError> {
    state.metrics.incoming().inc();

    let body = body?;
    Span::current().record("body_len", body.len());
    let request = codec::decode(&body).map_err(WriteError::Decode)?;
    Span::current().record("series", request.timeseries.len());
    debug!(samples = request.sample_count(), metadata = request.metadata.len(), "Write request received");

    if tenant::is_metadata_only(&request) {
        debug!("Metadata-only request, skipping tenant validation");
    } else {
        let tenant = tenant::validate(&request)?;
        Span::current().record("tenant", tenant.as_str());

        if state.verifier.enabled() {
            let token = TokenVerifier::extract_token(&headers);
            if token.is_empty() {
                return Err(AuthError::MissingToken.into());
            }
            state.verifier.verify(&tenant, &token).await.map_err(AuthError::from)?;
        }
    }

    let body = codec::encode(&request).map_err(WriteError::Encode)?;
    let upstream = state.proxy.forward(ForwardRequest { headers, query, body }).await?;

    info!(status = upstream.status.as_u16(), "Write request forwarded");
    Ok(relay(upstream))
}

fn relay(upstream: UpstreamResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = upstream.headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_statuses() {
        let cases = [
            (WriteError::Decode(CodecError::TooLarge { size_bytes: 2, limit_bytes: 1 }), StatusCode::INTERNAL_SERVER_ERROR),
            (WriteError::Tenant(ValidationError::NoTenant), StatusCode::FORBIDDEN),
            (WriteError::Auth(AuthError::MissingToken), StatusCode::BAD_REQUEST),
            (WriteError::Forward(ForwardError::network("refused")), StatusCode::BAD_GATEWAY),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[test]
    fn relay_keeps_status_headers_and_body() {
        let mut headers = HeaderMap::new();
        headers.insert("x-upstream", "receive-0".parse().unwrap());
        let response = relay(UpstreamResponse {
            status: StatusCode::CONFLICT,
            headers,
            body: Bytes::from_static(b"out of order"),
        });

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers()["x-upstream"], "receive-0");
    }
}
