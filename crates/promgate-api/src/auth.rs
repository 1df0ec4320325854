//! Inbound bearer-token verification scoped by tenant.
//!
//! The caller's `Authorization` value is relayed untouched to an external
//! verification endpoint at `<endpoint>/<tenant>`. Anything but `200 OK`
//! rejects the request. Verification is fail-closed: a missing token or an
//! unreachable verifier never lets a write through.

use std::{fs, time::Duration};

use anyhow::Context;
use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use promgate_core::TenantId;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::TokenVerificationConfig;

/// Failure of a verification call.
#[derive(Debug, Clone, Error)]
pub enum VerificationError {
    /// The endpoint answered with something other than `200 OK`.
    #[error("unexpected status code from token verification, got {status}")]
    Rejected {
        /// Status returned by the endpoint.
        status: u16,
    },
    /// No answer was obtained.
    #[error("token verification request failed: {message}")]
    Transport {
        /// Underlying error description.
        message: String,
    },
}

/// Errors that can occur during inbound authentication.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The `Authorization` header is absent or empty.
    #[error("missing authorization token")]
    MissingToken,
    /// The verifier rejected the token or could not be reached.
    #[error(transparent)]
    Verification(#[from] VerificationError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::MissingToken => StatusCode::BAD_REQUEST,
            Self::Verification(_) => StatusCode::UNAUTHORIZED,
        };

        status.into_response()
    }
}

/// Client for the external verification authority.
///
/// Built once at startup and shared by every request task.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    client: reqwest::Client,
    endpoint: Option<Url>,
}

impl TokenVerifier {
    /// A verifier that is turned off; [`TokenVerifier::enabled`] is false.
    pub fn disabled() -> Self {
        Self { client: reqwest::Client::new(), endpoint: None }
    }

    /// A verifier calling `endpoint` through `client`.
    pub fn new(endpoint: Url, client: reqwest::Client) -> Self {
        Self { client, endpoint: Some(endpoint) }
    }

    /// Builds the verifier from configuration.
    ///
    /// When the custom CA is enabled, the PEM file is added as a trust
    /// anchor next to the built-in roots.
    ///
    /// # Errors
    ///
    /// Fails when the URL is invalid, the CA file cannot be read or parsed,
    /// or the HTTP client cannot be built.
    pub fn from_config(config: &TokenVerificationConfig) -> anyhow::Result<Self> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let endpoint = Url::parse(&config.url).context("invalid token verification URL")?;

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("promgate/", env!("CARGO_PKG_VERSION")));

        if config.ca_cert_enabled {
            let path = config
                .ca_cert_path
                .as_ref()
                .context("token verification CA certificate path is not set")?;
            let pem = fs::read(path)
                .with_context(|| format!("failed to read CA certificate {}", path.display()))?;
            let certificate = reqwest::Certificate::from_pem(&pem)
                .with_context(|| format!("invalid CA certificate {}", path.display()))?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder.build().context("failed to build token verification client")?;
        Ok(Self::new(endpoint, client))
    }

    /// Returns `true` when inbound requests must be verified.
    pub fn enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Value of the `Authorization` header; empty when absent or not valid
    /// UTF-8.
    pub fn extract_token(headers: &HeaderMap) -> String {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_default()
    }

    /// Asks the authority whether `token` may write for `tenant`.
    ///
    /// A disabled verifier accepts everything.
    ///
    /// # Errors
    ///
    /// [`VerificationError::Rejected`] for any status other than `200 OK`,
    /// [`VerificationError::Transport`] when no answer was obtained.
    #[instrument(name = "verify_token", skip(self, tenant, token), fields(tenant = %tenant))]
    pub async fn verify(&self, tenant: &TenantId, token: &str) -> Result<(), VerificationError> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(());
        };

        let url = tenant_url(endpoint, tenant)?;
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, token)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Token verification request failed");
                VerificationError::Transport { message: e.to_string() }
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            debug!(status = status.as_u16(), "Token rejected");
            return Err(VerificationError::Rejected { status: status.as_u16() });
        }

        debug!("Token accepted");
        Ok(())
    }
}

fn tenant_url(endpoint: &Url, tenant: &TenantId) -> Result<Url, VerificationError> {
    let mut url = endpoint.clone();
    url.path_segments_mut()
        .map_err(|()| VerificationError::Transport {
            message: format!("verification URL {endpoint} cannot take a path"),
        })?
        .pop_if_empty()
        .push(tenant.as_str());
    Ok(url)
}
