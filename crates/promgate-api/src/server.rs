//! HTTP routing and listener lifecycle.
//!
//! The gateway runs two listeners: the data plane, which accepts
//! remote-write traffic, and the metrics listener. Requests on both flow
//! through the same outer middleware:
//! 1. Request ID propagation or generation
//! 2. Request/response tracing
//! 3. Handler execution
//!
//! # Graceful Shutdown
//!
//! On SIGINT or SIGTERM both listeners stop accepting connections at once
//! and drain in-flight requests concurrently, each bounded by the
//! configured shutdown timeout. If either listener fails, the other is shut
//! down as well.

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use promgate_forward::{HttpTransport, InstrumentedTransport, OutboundCredentials, SharedTransport, UpstreamProxy};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{auth::TokenVerifier, config::Config, handlers, metrics::Metrics};

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state of the data-plane handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Relays accepted requests upstream.
    pub proxy: UpstreamProxy,
    /// Inbound token verification, possibly disabled.
    pub verifier: TokenVerifier,
    /// Request counters.
    pub metrics: Metrics,
}

impl AppState {
    /// Bundles already-built components.
    pub fn new(proxy: UpstreamProxy, verifier: TokenVerifier, metrics: Metrics) -> Self {
        Self { proxy, verifier, metrics }
    }

    /// Builds every component from configuration.
    ///
    /// The outbound stack is assembled innermost first: the pooled HTTP
    /// client, the outgoing counter, then credential injection when OIDC is
    /// enabled. OIDC discovery runs here, so an unreachable issuer fails
    /// startup.
    ///
    /// # Errors
    ///
    /// Fails on invalid settings, an unreadable CA certificate, failed OIDC
    /// discovery, or metric registration errors.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let metrics = Metrics::new().context("failed to register metrics")?;

        let base: SharedTransport = Arc::new(
            HttpTransport::new(&config.to_client_config()).context("failed to build upstream client")?,
        );
        let instrumented: SharedTransport =
            Arc::new(InstrumentedTransport::new(base, metrics.outgoing().clone()));

        let credentials = OutboundCredentials::from_config(config.to_oidc_config()?)
            .await
            .context("failed to set up outbound OIDC credentials")?;
        let transport = credentials.wrap_transport(instrumented);

        let proxy = UpstreamProxy::new(config.forward_url()?, transport);
        let verifier = TokenVerifier::from_config(&config.token_verification)?;

        info!(
            outbound_auth = credentials.is_enabled(),
            inbound_auth = verifier.enabled(),
            "Gateway components initialized"
        );

        Ok(Self::new(proxy, verifier, metrics))
    }
}

/// Creates the data-plane router.
///
/// - `GET /healthcheck` answers `200`; `HEAD` is not implied
/// - `POST /` runs the remote-write pipeline
/// - everything else answers `400`
///
/// Bodies above `max_body_bytes` are refused with `413`.
pub fn create_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(
            "/healthcheck",
            get(handlers::healthcheck).head(handlers::bad_request).fallback(handlers::bad_request),
        )
        .route("/", post(handlers::remote_write).fallback(handlers::bad_request))
        .fallback(handlers::bad_request)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Creates the metrics router serving `GET /metrics`; other paths get
/// `404`.
pub fn create_metrics_router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(metrics)
}

/// Middleware to attach a request id to every response.
///
/// Keeps a caller-supplied X-Request-Id, otherwise generates one.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

    if let Some(id) = &request_id {
        req.extensions_mut().insert(id.clone());
    }

    let mut response = next.run(req).await;

    if let Some(id) = request_id {
        response.headers_mut().insert(REQUEST_ID_HEADER, id);
    }

    response
}

/// Both listeners, bound and ready to serve.
#[derive(Debug)]
pub struct Gateway {
    proxy_listener: TcpListener,
    metrics_listener: TcpListener,
    proxy_router: Router,
    metrics_router: Router,
    shutdown_timeout: Duration,
}

impl Gateway {
    /// Binds both listeners before anything is served.
    ///
    /// # Errors
    ///
    /// Fails if either address cannot be bound; nothing is served then.
    pub async fn bind(
        proxy_addr: SocketAddr,
        metrics_addr: SocketAddr,
        proxy_router: Router,
        metrics_router: Router,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        let proxy_listener = TcpListener::bind(proxy_addr)
            .await
            .with_context(|| format!("failed to bind proxy listener on {proxy_addr}"))?;
        let metrics_listener = TcpListener::bind(metrics_addr)
            .await
            .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;

        Ok(Self { proxy_listener, metrics_listener, proxy_router, metrics_router, shutdown_timeout })
    }

    /// Builds the routers from `state` and binds the configured addresses.
    ///
    /// # Errors
    ///
    /// Fails on invalid listen addresses or bind failures.
    pub async fn from_config(config: &Config, state: AppState) -> Result<Self> {
        let metrics_router = create_metrics_router(state.metrics.clone());
        let proxy_router = create_router(state, config.proxy.max_body_bytes);

        Self::bind(
            config.proxy_addr()?,
            config.metrics_addr()?,
            proxy_router,
            metrics_router,
            config.shutdown_timeout(),
        )
        .await
    }

    /// Address the data plane is listening on.
    pub fn proxy_addr(&self) -> io::Result<SocketAddr> {
        self.proxy_listener.local_addr()
    }

    /// Address the metrics listener is listening on.
    pub fn metrics_addr(&self) -> io::Result<SocketAddr> {
        self.metrics_listener.local_addr()
    }

    /// Serves until SIGINT or SIGTERM, then shuts down gracefully.
    ///
    /// # Errors
    ///
    /// Returns the first listener failure.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serves until `shutdown` resolves or a listener fails, then drains
    /// both listeners concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first listener failure.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let cancel = CancellationToken::new();

        info!(addr = ?self.proxy_listener.local_addr().ok(), "Proxy listener started");
        info!(addr = ?self.metrics_listener.local_addr().ok(), "Metrics listener started");

        let proxy = tokio::spawn(serve("proxy", self.proxy_listener, self.proxy_router, cancel.clone()));
        let metrics =
            tokio::spawn(serve("metrics", self.metrics_listener, self.metrics_router, cancel.clone()));

        tokio::select! {
            () = shutdown => {},
            () = cancel.cancelled() => warn!("A listener stopped, shutting down the other"),
        }
        cancel.cancel();

        warn!(
            timeout_secs = self.shutdown_timeout.as_secs(),
            "Waiting for in-flight requests to complete"
        );
        let (proxy_result, metrics_result) = tokio::join!(
            drain("proxy", proxy, self.shutdown_timeout),
            drain("metrics", metrics, self.shutdown_timeout),
        );

        proxy_result?;
        metrics_result?;
        info!("Gateway stopped");
        Ok(())
    }
}

async fn serve(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> io::Result<()> {
    let stop = cancel.clone();
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await;

    if let Err(e) = &result {
        error!(listener = name, error = %e, "Listener failed");
    }
    cancel.cancel();
    result
}

async fn drain(name: &'static str, mut task: JoinHandle<io::Result<()>>, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(result)) => {
            if result.is_ok() {
                info!(listener = name, "Listener stopped gracefully");
            }
            result.with_context(|| format!("{name} listener failed"))
        },
        Ok(Err(e)) => Err(anyhow::anyhow!("{name} listener task panicked: {e}")),
        Err(_) => {
            warn!(listener = name, "Shutdown deadline exceeded, dropping in-flight requests");
            task.abort();
            Ok(())
        },
    }
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::StatusCode};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn request_id_is_generated_or_kept() {
        let router = create_metrics_router(Metrics::new().unwrap());

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let generated = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(generated).is_ok());

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .header(REQUEST_ID_HEADER, "caller-id-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "caller-id-1");
    }

    #[tokio::test]
    async fn bind_failure_is_reported_before_serving() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = occupied.local_addr().unwrap();

        let err = Gateway::bind(
            "127.0.0.1:0".parse().unwrap(),
            taken,
            Router::new(),
            Router::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("metrics listener"));
    }

    #[tokio::test]
    async fn drain_reports_failed_listener() {
        let failed = tokio::spawn(async { Err(io::Error::other("accept failed")) });

        let err = drain("metrics", failed, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("metrics listener failed"));
    }

    #[tokio::test]
    async fn drain_accepts_clean_stop_and_aborts_stragglers() {
        let stopped = tokio::spawn(async { Ok(()) });
        drain("proxy", stopped, Duration::from_secs(1)).await.unwrap();

        let stuck = tokio::spawn(std::future::pending::<io::Result<()>>());
        drain("proxy", stuck, Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test]
    async fn run_until_stops_both_listeners() {
        let gateway = Gateway::bind(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            Router::new().route("/healthcheck", get(|| async { StatusCode::OK })),
            Router::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let addr = gateway.proxy_addr().unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(gateway.run_until(async move {
            let _ = rx.await;
        }));

        let response = reqwest::get(format!("http://{addr}/healthcheck")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);

        tx.send(()).unwrap();
        running.await.unwrap().unwrap();

        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
