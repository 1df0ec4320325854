//! promgate multi-tenant remote-write gateway.
//!
//! Main entry point. Loads configuration, builds the inbound and outbound
//! authentication legs, binds both listeners and serves until SIGINT or
//! SIGTERM.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use promgate_api::{AppState, Config, ConfigOverrides, Gateway};
use tracing::info;

/// Multi-tenant gateway for Prometheus remote-write traffic
#[derive(Parser, Debug)]
#[command(name = "promgate", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "PROMGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter (e.g. info, debug, promgate=trace); overrides RUST_LOG
    #[arg(short, long)]
    log_level: Option<String>,

    /// Port on which the proxy listens for remote-write requests
    #[arg(long, env = "PROMGATE_PROXY__PORT")]
    proxy_port: Option<u16>,

    /// Port on which metrics are exposed
    #[arg(long, env = "PROMGATE_METRICS__PORT")]
    metrics_port: Option<u16>,

    /// URL to forward accepted requests to
    #[arg(long, env = "PROMGATE_PROXY__FORWARD_URL")]
    forward_url: Option<String>,

    /// Enable OIDC client-credentials authentication toward the upstream
    #[arg(long, env = "PROMGATE_OIDC__ENABLED", num_args = 0..=1, default_missing_value = "true")]
    oidc_enabled: Option<bool>,

    /// Token issuer URL
    #[arg(long, env = "PROMGATE_OIDC__ISSUER_URL")]
    oidc_issuer_url: Option<String>,

    /// Service account client id
    #[arg(long, env = "PROMGATE_OIDC__CLIENT_ID")]
    oidc_client_id: Option<String>,

    /// Service account client secret
    #[arg(long, env = "PROMGATE_OIDC__CLIENT_SECRET", hide_env_values = true)]
    oidc_client_secret: Option<String>,

    /// OIDC audience
    #[arg(long, env = "PROMGATE_OIDC__AUDIENCE")]
    oidc_audience: Option<String>,

    /// YAML or JSON file holding issuer_url, client_id, client_secret and audience
    #[arg(long, env = "PROMGATE_OIDC__CREDENTIALS_FILE")]
    oidc_credentials_file: Option<PathBuf>,

    /// Enable verification of inbound bearer tokens
    #[arg(
        long,
        env = "PROMGATE_TOKEN_VERIFICATION__ENABLED",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    token_verification_enabled: Option<bool>,

    /// URL to validate data-plane tokens against
    #[arg(long, env = "PROMGATE_TOKEN_VERIFICATION__URL")]
    token_verification_url: Option<String>,

    /// Trust a custom CA certificate for token verification
    #[arg(
        long,
        env = "PROMGATE_TOKEN_VERIFICATION__CA_CERT_ENABLED",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    token_verification_ca_cert_enabled: Option<bool>,

    /// PEM file of the custom CA certificate
    #[arg(long, env = "PROMGATE_TOKEN_VERIFICATION__CA_CERT_PATH")]
    token_verification_ca_cert_path: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_file: self.config.clone(),
            proxy_port: self.proxy_port,
            metrics_port: self.metrics_port,
            forward_url: self.forward_url.clone(),
            oidc_enabled: self.oidc_enabled,
            oidc_issuer_url: self.oidc_issuer_url.clone(),
            oidc_client_id: self.oidc_client_id.clone(),
            oidc_client_secret: self.oidc_client_secret.clone(),
            oidc_audience: self.oidc_audience.clone(),
            oidc_credentials_file: self.oidc_credentials_file.clone(),
            token_verification_enabled: self.token_verification_enabled,
            token_verification_url: self.token_verification_url.clone(),
            ca_cert_enabled: self.token_verification_ca_cert_enabled,
            ca_cert_path: self.token_verification_ca_cert_path.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting promgate remote-write gateway");

    let config = Config::load(&cli.overrides())?;
    info!(summary = %config.summary(), "Configuration loaded");

    let state = AppState::from_config(&config).await?;
    let gateway = Gateway::from_config(&config, state).await?;

    info!(
        proxy_addr = %gateway.proxy_addr()?,
        metrics_addr = %gateway.metrics_addr()?,
        "promgate is ready to receive remote-write requests"
    );

    gateway.run().await?;

    info!("promgate shutdown complete");
    Ok(())
}

/// Initializes tracing from `--log-level`, then `RUST_LOG`, then defaults.
fn init_tracing(log_level: Option<&str>) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = match log_level {
        Some(directives) => EnvFilter::try_new(directives).context("Invalid --log-level filter")?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info,promgate=debug,tower_http=debug"))
            .context("Invalid RUST_LOG environment variable")?,
    };

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;
    Ok(())
}
