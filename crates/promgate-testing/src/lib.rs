//! Test infrastructure for the promgate workspace.
//!
//! Provides write request fixtures, `wiremock`-backed stand-ins for the
//! upstream collector, token verifier and OIDC issuer, and an in-process
//! gateway bound to ephemeral ports.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod fixtures;
pub mod gateway;
pub mod http;

pub use fixtures::WriteRequestBuilder;
pub use gateway::TestGateway;
pub use http::{MockIssuer, MockUpstream, MockVerifier};
