//! In-process gateway bound to ephemeral ports.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use bytes::Bytes;
use promgate_api::{AppState, Config, Gateway};
use tokio::{sync::oneshot, task::JoinHandle};

/// A running gateway serving on `127.0.0.1` with both listeners on
/// ephemeral ports.
///
/// The gateway is assembled exactly as the binary does it, from a
/// [`Config`], so OIDC discovery and verifier construction run for real.
pub struct TestGateway {
    proxy_addr: SocketAddr,
    metrics_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
    client: reqwest::Client,
}

impl TestGateway {
    /// Configuration pointing at `forward_url` with loopback listeners.
    pub fn config(forward_url: &str) -> Config {
        let mut config = Config::default();
        config.proxy.host = "127.0.0.1".to_string();
        config.proxy.port = 0;
        config.proxy.forward_url = forward_url.to_string();
        config.proxy.shutdown_timeout_secs = 5;
        config.metrics.host = "127.0.0.1".to_string();
        config.metrics.port = 0;
        config
    }

    /// Starts a gateway from `config`.
    ///
    /// # Errors
    ///
    /// Fails when components cannot be built or listeners cannot be bound.
    pub async fn start(config: Config) -> Result<Self> {
        let state = AppState::from_config(&config).await?;
        let gateway = Gateway::from_config(&config, state).await?;
        let proxy_addr = gateway.proxy_addr().context("proxy listener has no address")?;
        let metrics_addr = gateway.metrics_addr().context("metrics listener has no address")?;

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(gateway.run_until(async move {
            let _ = rx.await;
        }));

        Ok(Self { proxy_addr, metrics_addr, shutdown: Some(tx), task, client: reqwest::Client::new() })
    }

    /// Base URL of the data plane.
    pub fn url(&self) -> String {
        format!("http://{}", self.proxy_addr)
    }

    /// URL of the metrics endpoint.
    pub fn metrics_url(&self) -> String {
        format!("http://{}/metrics", self.metrics_addr)
    }

    /// Address of the data plane.
    pub fn proxy_addr(&self) -> SocketAddr {
        self.proxy_addr
    }

    /// Posts a remote-write body, optionally with an `Authorization` value.
    ///
    /// # Errors
    ///
    /// Fails only when no response is obtained.
    pub async fn write(&self, body: Bytes, authorization: Option<&str>) -> reqwest::Result<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}/", self.url()))
            .header("content-encoding", "snappy")
            .header("content-type", "application/x-protobuf")
            .header("x-prometheus-remote-write-version", "0.1.0")
            .body(body);
        if let Some(value) = authorization {
            request = request.header("authorization", value);
        }
        request.send().await
    }

    /// Fetches the metrics exposition text.
    ///
    /// # Errors
    ///
    /// Fails when the metrics listener does not answer.
    pub async fn scrape(&self) -> reqwest::Result<String> {
        self.client.get(self.metrics_url()).send().await?.text().await
    }

    /// Triggers shutdown and waits for both listeners to stop.
    ///
    /// # Errors
    ///
    /// Returns listener failures.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.task).await.context("gateway task panicked")?
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
