//! Error types for outbound calls.
//!
//! Forwarding is never retried: every error here is surfaced to the caller
//! of the gateway as a bad-gateway response.

use thiserror::Error;

/// Result type alias for forwarding operations.
pub type Result<T> = std::result::Result<T, ForwardError>;

/// Failures while relaying a request to the upstream.
#[derive(Debug, Clone, Error)]
pub enum ForwardError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// The upstream did not answer in time.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// No outbound credential could be obtained.
    #[error("outbound credential unavailable: {0}")]
    Credential(#[from] CredentialError),

    /// The outbound client or request could not be built.
    #[error("invalid forwarding configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },
}

impl ForwardError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }
}

/// Failures of the client-credentials flow.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// Issuer discovery document could not be fetched.
    #[error("issuer discovery failed: {message}")]
    Discovery {
        /// Underlying failure
        message: String,
    },

    /// Issuer metadata is present but unusable.
    #[error("invalid issuer metadata: {message}")]
    InvalidMetadata {
        /// What was wrong with the document
        message: String,
    },

    /// The token endpoint refused or failed the grant.
    #[error("token request failed: {message}")]
    TokenRequest {
        /// Underlying failure
        message: String,
    },
}

impl CredentialError {
    /// Creates a discovery error.
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery { message: message.into() }
    }

    /// Creates an invalid-metadata error.
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::InvalidMetadata { message: message.into() }
    }

    /// Creates a token request error.
    pub fn token_request(message: impl Into<String>) -> Self {
        Self::TokenRequest { message: message.into() }
    }
}
