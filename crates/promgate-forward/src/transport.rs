//! Composable outbound transports.
//!
//! Every outbound call goes through a single [`Transport::send`]
//! capability. Cross-cutting behaviour (request counting, credential
//! injection) is layered on as decorators that wrap another transport, so
//! the stack is assembled at startup instead of being hardcoded.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use prometheus::IntCounter;
use serde::{Deserialize, Serialize};

use crate::error::{ForwardError, Result};

/// Shared, type-erased transport.
pub type SharedTransport = Arc<dyn Transport>;

/// Sends one HTTP request and returns the response.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Performs the exchange.
    ///
    /// # Errors
    ///
    /// Returns a [`ForwardError`] when no response could be obtained. HTTP
    /// error statuses are responses, not errors.
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response>;
}

/// Configuration for the base HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Overall timeout for one upstream exchange.
    pub timeout: Duration,
    /// Timeout for establishing the TCP/TLS connection.
    pub connect_timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            user_agent: concat!("promgate/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Base transport backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Builds the pooled client.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::ConfigurationError`] if the client cannot be
    /// built with the provided settings.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ForwardError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, timeout: config.timeout })
    }

    /// Wraps an existing client.
    pub fn from_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Returns the underlying client, for building requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        self.client.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::timeout(self.timeout.as_secs())
            } else if e.is_connect() {
                ForwardError::network(format!("connection failed: {e}"))
            } else {
                ForwardError::network(e.to_string())
            }
        })
    }
}

/// Decorator counting every attempted exchange.
///
/// The counter is bumped before delegating, so failed attempts are counted
/// as well.
#[derive(Debug, Clone)]
pub struct InstrumentedTransport {
    inner: SharedTransport,
    attempts: IntCounter,
}

impl InstrumentedTransport {
    /// Wraps `inner`, incrementing `attempts` on every send.
    pub fn new(inner: SharedTransport, attempts: IntCounter) -> Self {
        Self { inner, attempts }
    }
}

#[async_trait]
impl Transport for InstrumentedTransport {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        self.attempts.inc();
        self.inner.send(request).await
    }
}
