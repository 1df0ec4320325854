//! Minimal upstream collector for local smoke tests.
//!
//! Answers every request with `200 OK` and a small JSON body, logging what
//! it received.
//!
//! ```bash
//! echo-upstream --port 19291
//! promgate --forward-url http://127.0.0.1:19291/api/v1/receive
//! ```

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    http::{HeaderMap, Method, Uri},
    Json, Router,
};
use clap::Parser;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Upstream stand-in answering 200 to every request.
#[derive(Parser, Debug)]
#[command(name = "echo-upstream", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
}

async fn handle(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    info!(
        %method,
        %uri,
        body_len = body.len(),
        forwarded_prefix = ?headers.get("x-forwarded-prefix"),
        authorized = headers.contains_key("authorization"),
        "Request received"
    );
    Json(json!({ "message": "Status OK" }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let addr: SocketAddr =
        format!("{}:{}", cli.host, cli.port).parse().context("invalid listen address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Echo upstream listening");

    axum::serve(listener, Router::new().fallback(handle))
        .with_graceful_shutdown(promgate_api::shutdown_signal())
        .await
        .context("server error")
}
