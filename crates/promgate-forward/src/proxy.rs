//! Reverse-proxy leg toward the upstream collector.
//!
//! Rewrites an accepted write request onto the configured upstream URL,
//! marks it with `X-Forwarded-Prefix`, and relays the upstream's answer
//! back verbatim. Nothing is retried.

use std::time::Instant;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

use crate::{
    error::{ForwardError, Result},
    transport::SharedTransport,
};

/// Header marking requests relayed by the gateway.
pub const FORWARDED_PREFIX_HEADER: &str = "x-forwarded-prefix";

/// An accepted request ready to be relayed.
#[derive(Debug, Clone, Default)]
pub struct ForwardRequest {
    /// Headers received from the client.
    pub headers: HeaderMap,
    /// Raw query string received from the client, if any.
    pub query: Option<String>,
    /// Re-encoded request body.
    pub body: Bytes,
}

/// Upstream answer, relayed as-is to the client.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// Upstream status code.
    pub status: StatusCode,
    /// Upstream headers minus hop-by-hop headers.
    pub headers: HeaderMap,
    /// Upstream body.
    pub body: Bytes,
}

/// Relays requests to one fixed upstream through a transport stack.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    upstream: Url,
    transport: SharedTransport,
}

impl UpstreamProxy {
    /// Creates a proxy for `upstream` sending through `transport`.
    pub fn new(upstream: Url, transport: SharedTransport) -> Self {
        Self { upstream, transport }
    }

    /// Upstream URL requests are rewritten to.
    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Relays `request` to the upstream.
    ///
    /// Scheme, host and path come from the upstream URL; the client's query
    /// string, when present, replaces the upstream's.
    ///
    /// # Errors
    ///
    /// Returns a [`ForwardError`] when no upstream response was obtained or
    /// its body could not be read.
    pub async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse> {
        let span = info_span!("upstream_forward", upstream = %self.upstream, body_len = request.body.len());

        async move {
            let started = Instant::now();
            let outbound = self.build_request(request)?;

            let response = match self.transport.send(outbound).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(duration_ms = started.elapsed().as_millis(), error = %e, "Upstream request failed");
                    return Err(e);
                },
            };

            let status = response.status();
            let headers = strip_managed_headers(response.headers());
            let body = response
                .bytes()
                .await
                .map_err(|e| ForwardError::network(format!("failed to read upstream body: {e}")))?;

            debug!(
                status = status.as_u16(),
                duration_ms = started.elapsed().as_millis(),
                "Upstream responded"
            );
            if status.is_server_error() {
                warn!(status = status.as_u16(), "Upstream server error response");
            }

            Ok(UpstreamResponse { status, headers, body })
        }
        .instrument(span)
        .await
    }

    fn build_request(&self, request: ForwardRequest) -> Result<reqwest::Request> {
        let mut url = self.upstream.clone();
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            url.set_query(Some(query));
        }

        let mut outbound = reqwest::Request::new(Method::POST, url);
        let headers = outbound.headers_mut();
        for (name, value) in &request.headers {
            if !is_managed_header(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        headers.append(
            HeaderName::from_static(FORWARDED_PREFIX_HEADER),
            HeaderValue::from_static("/"),
        );
        *outbound.body_mut() = Some(reqwest::Body::from(request.body));

        Ok(outbound)
    }
}

fn strip_managed_headers(headers: &HeaderMap) -> HeaderMap {
    let mut kept = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_managed_header(name) {
            kept.append(name.clone(), value.clone());
        }
    }
    kept
}

/// Checks if a header is connection-scoped or recomputed for the outbound
/// hop and must not be copied across.
fn is_managed_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "content-length"
            | "host"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}
