//! HTTP surface of the promgate gateway.
//!
//! Wires configuration, inbound token verification, the remote-write
//! handler and the metrics endpoint into two axum routers, and runs them
//! under a shared lifecycle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod server;

pub use auth::{AuthError, TokenVerifier, VerificationError};
pub use config::{Config, ConfigOverrides};
pub use metrics::Metrics;
pub use server::{create_metrics_router, create_router, shutdown_signal, AppState, Gateway};
