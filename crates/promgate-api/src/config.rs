//! Configuration management for the promgate gateway.

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use promgate_forward::{ClientConfig, OidcConfig};
use serde::{Deserialize, Serialize};
use url::Url;

/// Default configuration file, looked up in the working directory.
pub const CONFIG_FILE: &str = "promgate.toml";

/// Prefix of environment variables read into the configuration.
pub const ENV_PREFIX: &str = "PROMGATE_";

/// Complete gateway configuration.
///
/// Configuration is loaded in priority order:
/// 1. Command-line flags (highest priority)
/// 2. Environment variables prefixed with `PROMGATE_`, nested keys split on
///    `__` (e.g. `PROMGATE_PROXY__FORWARD_URL`)
/// 3. Configuration file (`promgate.toml` or `--config`)
/// 4. Built-in defaults (lowest priority)
///
/// When `oidc.enabled` is set and `oidc.credentials_file` points to a YAML
/// or JSON document, its `issuer_url`, `client_id`, `client_secret` and
/// `audience` replace the inline values.
///
/// # Example
///
/// ```no_run
/// use promgate_api::{Config, ConfigOverrides};
///
/// let config = Config::load(&ConfigOverrides::default()).expect("Failed to load configuration");
///
/// println!("Forwarding to {}", config.proxy.forward_url);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data-plane listener and upstream settings.
    pub proxy: ProxyConfig,
    /// Metrics listener settings.
    pub metrics: MetricsConfig,
    /// Outbound client-credentials authentication.
    pub oidc: OidcSettings,
    /// Inbound bearer-token verification.
    pub token_verification: TokenVerificationConfig,
}

/// Data-plane listener and upstream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listen port for remote-write traffic.
    ///
    /// Environment variable: `PROMGATE_PROXY__PORT`
    pub port: u16,
    /// Listen address for remote-write traffic.
    pub host: String,
    /// Upstream collector accepting the forwarded writes.
    ///
    /// Environment variable: `PROMGATE_PROXY__FORWARD_URL`
    pub forward_url: String,
    /// Largest accepted compressed request body in bytes.
    pub max_body_bytes: usize,
    /// Timeout of one upstream exchange in seconds.
    pub upstream_timeout_secs: u64,
    /// Bound on draining in-flight requests at shutdown, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: default_host(),
            forward_url: String::new(),
            max_body_bytes: 10 * 1024 * 1024,
            upstream_timeout_secs: 30,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Metrics listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Listen port for the metrics endpoint.
    ///
    /// Environment variable: `PROMGATE_METRICS__PORT`
    pub port: u16,
    /// Listen address for the metrics endpoint.
    pub host: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 9090, host: default_host() }
    }
}

/// Outbound client-credentials settings as configured.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcSettings {
    /// Enables outbound authentication.
    pub enabled: bool,
    /// Issuer base URL, used for discovery.
    pub issuer_url: String,
    /// OAuth2 client id.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Optional audience sent with the grant.
    pub audience: Option<String>,
    /// YAML or JSON file holding the four values above.
    pub credentials_file: Option<PathBuf>,
}

impl std::fmt::Debug for OidcSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcSettings")
            .field("enabled", &self.enabled)
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &mask(&self.client_secret))
            .field("audience", &self.audience)
            .field("credentials_file", &self.credentials_file)
            .finish()
    }
}

/// Inbound token verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenVerificationConfig {
    /// Enables inbound verification.
    pub enabled: bool,
    /// Verification endpoint; the tenant id is appended as a path segment.
    pub url: String,
    /// Trusts the certificate at `ca_cert_path` in addition to the system
    /// roots.
    pub ca_cert_enabled: bool,
    /// PEM encoded CA certificate.
    pub ca_cert_path: Option<PathBuf>,
    /// Timeout of one verification call in seconds.
    pub timeout_secs: u64,
}

impl Default for TokenVerificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            ca_cert_enabled: false,
            ca_cert_path: None,
            timeout_secs: 10,
        }
    }
}

/// Values set on the command line, layered above every other source.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Replaces the default `promgate.toml` lookup.
    pub config_file: Option<PathBuf>,
    /// `proxy.port`
    pub proxy_port: Option<u16>,
    /// `metrics.port`
    pub metrics_port: Option<u16>,
    /// `proxy.forward_url`
    pub forward_url: Option<String>,
    /// `oidc.enabled`
    pub oidc_enabled: Option<bool>,
    /// `oidc.issuer_url`
    pub oidc_issuer_url: Option<String>,
    /// `oidc.client_id`
    pub oidc_client_id: Option<String>,
    /// `oidc.client_secret`
    pub oidc_client_secret: Option<String>,
    /// `oidc.audience`
    pub oidc_audience: Option<String>,
    /// `oidc.credentials_file`
    pub oidc_credentials_file: Option<PathBuf>,
    /// `token_verification.enabled`
    pub token_verification_enabled: Option<bool>,
    /// `token_verification.url`
    pub token_verification_url: Option<String>,
    /// `token_verification.ca_cert_enabled`
    pub ca_cert_enabled: Option<bool>,
    /// `token_verification.ca_cert_path`
    pub ca_cert_path: Option<PathBuf>,
}

impl ConfigOverrides {
    fn figment(&self) -> Figment {
        let figment = Figment::new();
        let figment = layer(figment, "proxy.port", self.proxy_port.as_ref());
        let figment = layer(figment, "proxy.forward_url", self.forward_url.as_ref());
        let figment = layer(figment, "metrics.port", self.metrics_port.as_ref());
        let figment = layer(figment, "oidc.enabled", self.oidc_enabled.as_ref());
        let figment = layer(figment, "oidc.issuer_url", self.oidc_issuer_url.as_ref());
        let figment = layer(figment, "oidc.client_id", self.oidc_client_id.as_ref());
        let figment = layer(figment, "oidc.client_secret", self.oidc_client_secret.as_ref());
        let figment = layer(figment, "oidc.audience", self.oidc_audience.as_ref());
        let figment = layer(figment, "oidc.credentials_file", self.oidc_credentials_file.as_ref());
        let figment =
            layer(figment, "token_verification.enabled", self.token_verification_enabled.as_ref());
        let figment = layer(figment, "token_verification.url", self.token_verification_url.as_ref());
        let figment =
            layer(figment, "token_verification.ca_cert_enabled", self.ca_cert_enabled.as_ref());
        layer(figment, "token_verification.ca_cert_path", self.ca_cert_path.as_ref())
    }
}

fn layer<T: Serialize>(figment: Figment, key: &str, value: Option<&T>) -> Figment {
    match value {
        Some(value) => figment.merge(Serialized::default(key, value)),
        None => figment,
    }
}

/// Shape of the optional OIDC credentials file.
#[derive(Debug, Default, Deserialize)]
struct OidcCredentialsFile {
    issuer_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    audience: Option<String>,
}

impl Config {
    /// Builds the layered figment without extracting it.
    pub fn figment(overrides: &ConfigOverrides) -> Figment {
        let file = overrides.config_file.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(overrides.figment())
    }

    /// Loads and validates the configuration from every source.
    ///
    /// # Errors
    ///
    /// Fails when a source cannot be parsed, the OIDC credentials file
    /// cannot be read, or the merged values are invalid.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        if let Some(path) = &overrides.config_file {
            anyhow::ensure!(path.is_file(), "configuration file {} not found", path.display());
        }

        let mut config: Self =
            Self::figment(overrides).extract().context("Failed to load configuration")?;
        config.apply_credentials_file()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_credentials_file(&mut self) -> Result<()> {
        if !self.oidc.enabled {
            return Ok(());
        }
        let Some(path) = self.oidc.credentials_file.clone() else {
            return Ok(());
        };

        let credentials = read_credentials_file(&path)?;
        if let Some(issuer_url) = credentials.issuer_url {
            self.oidc.issuer_url = issuer_url;
        }
        if let Some(client_id) = credentials.client_id {
            self.oidc.client_id = client_id;
        }
        if let Some(client_secret) = credentials.client_secret {
            self.oidc.client_secret = client_secret;
        }
        if credentials.audience.is_some() {
            self.oidc.audience = credentials.audience;
        }
        Ok(())
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<()> {
        if self.proxy.port == 0 {
            anyhow::bail!("proxy.port must be greater than 0");
        }

        if self.metrics.port == 0 {
            anyhow::bail!("metrics.port must be greater than 0");
        }

        if self.proxy.port == self.metrics.port && self.proxy.host == self.metrics.host {
            anyhow::bail!("proxy and metrics listeners cannot share {}:{}", self.proxy.host, self.proxy.port);
        }

        if self.proxy.max_body_bytes == 0 {
            anyhow::bail!("proxy.max_body_bytes must be greater than 0");
        }

        self.forward_url()?;

        if self.token_verification.enabled {
            parse_http_url("token_verification.url", &self.token_verification.url)?;

            if self.token_verification.timeout_secs == 0 {
                anyhow::bail!("token_verification.timeout_secs must be greater than 0");
            }
        }

        if self.token_verification.ca_cert_enabled {
            match &self.token_verification.ca_cert_path {
                Some(path) if path.is_file() => {},
                Some(path) => {
                    anyhow::bail!("token_verification.ca_cert_path {} is not readable", path.display())
                },
                None => anyhow::bail!(
                    "token_verification.ca_cert_path is required when ca_cert_enabled is set"
                ),
            }
        }

        self.to_oidc_config()?;

        Ok(())
    }

    /// Parsed upstream URL.
    ///
    /// # Errors
    ///
    /// Fails when `proxy.forward_url` is empty or not an http(s) URL.
    pub fn forward_url(&self) -> Result<Url> {
        parse_http_url("proxy.forward_url", &self.proxy.forward_url)
    }

    /// Parsed verification endpoint, when verification is enabled.
    ///
    /// # Errors
    ///
    /// Fails when verification is enabled with an invalid URL.
    pub fn token_verification_url(&self) -> Result<Option<Url>> {
        if !self.token_verification.enabled {
            return Ok(None);
        }
        parse_http_url("token_verification.url", &self.token_verification.url).map(Some)
    }

    /// Validated client-credentials settings, when outbound auth is enabled.
    ///
    /// # Errors
    ///
    /// Fails when the issuer URL is missing or invalid, or the client id or
    /// secret is empty.
    pub fn to_oidc_config(&self) -> Result<Option<OidcConfig>> {
        if !self.oidc.enabled {
            return Ok(None);
        }

        if self.oidc.issuer_url.is_empty() {
            anyhow::bail!("oidc.issuer_url is required when oidc is enabled");
        }
        let issuer_url = parse_http_url("oidc.issuer_url", &self.oidc.issuer_url)?;

        if self.oidc.client_id.is_empty() || self.oidc.client_secret.is_empty() {
            anyhow::bail!("oidc.client_id and oidc.client_secret are required when oidc is enabled");
        }

        Ok(Some(OidcConfig {
            issuer_url,
            client_id: self.oidc.client_id.clone(),
            client_secret: self.oidc.client_secret.clone(),
            audience: self.oidc.audience.clone().filter(|a| !a.is_empty()),
        }))
    }

    /// Outbound HTTP client settings.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.proxy.upstream_timeout_secs),
            ..ClientConfig::default()
        }
    }

    /// Parse the data-plane socket address.
    pub fn proxy_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.proxy.host, self.proxy.port)
    }

    /// Parse the metrics socket address.
    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.metrics.host, self.metrics.port)
    }

    /// Shutdown drain bound.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.shutdown_timeout_secs)
    }

    /// Get the forward URL with any password masked for logging.
    pub fn forward_url_masked(&self) -> String {
        mask_url_password(&self.proxy.forward_url)
    }

    /// One-line description of the effective configuration, secrets masked.
    pub fn summary(&self) -> String {
        let oidc = if self.oidc.enabled {
            format!(
                "enabled(issuer={}, client_id={}, client_secret={})",
                self.oidc.issuer_url,
                self.oidc.client_id,
                mask(&self.oidc.client_secret)
            )
        } else {
            "disabled".to_string()
        };

        let verification = if self.token_verification.enabled {
            format!(
                "enabled(url={}, custom_ca={})",
                mask_url_password(&self.token_verification.url),
                self.token_verification.ca_cert_enabled
            )
        } else {
            "disabled".to_string()
        };

        format!(
            "proxy={}:{} metrics={}:{} forward_url={} oidc={} token_verification={}",
            self.proxy.host,
            self.proxy.port,
            self.metrics.host,
            self.metrics.port,
            self.forward_url_masked(),
            oidc,
            verification
        )
    }
}

fn read_credentials_file(path: &Path) -> Result<OidcCredentialsFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read OIDC credentials file {}", path.display()))?;

    let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let figment = if is_json {
        Figment::from(Json::string(&contents))
    } else {
        Figment::from(Yaml::string(&contents))
    };

    figment
        .extract()
        .with_context(|| format!("invalid OIDC credentials file {}", path.display()))
}

fn parse_http_url(field: &str, value: &str) -> Result<Url> {
    if value.is_empty() {
        anyhow::bail!("{field} is required");
    }

    let url = Url::parse(value).with_context(|| format!("{field} is not a valid URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("{field} must use http or https, got {}", url.scheme());
    }
    Ok(url)
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let addr_str = format!("{host}:{port}");
    SocketAddr::from_str(&addr_str).with_context(|| format!("Invalid listen address {addr_str}"))
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "***"
    }
}

fn mask_url_password(raw: &str) -> String {
    if let Some(at_pos) = raw.find('@') {
        if let Some(colon_pos) = raw[..at_pos].rfind(':') {
            if raw[colon_pos + 1..].starts_with("//") {
                return raw.to_string();
            }
            let mut masked = raw.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    raw.to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
