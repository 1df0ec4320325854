//! Outbound credentials via the OAuth2 client-credentials grant.
//!
//! At startup the issuer's OpenID discovery document is fetched to locate
//! the token endpoint. Access tokens are then fetched lazily, cached, and
//! refreshed shortly before they expire. Callers only ever see
//! [`OutboundCredentials::wrap_transport`], which stamps the current token
//! on every outbound request.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use http::{header::AUTHORIZATION, HeaderValue};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{CredentialError, ForwardError, Result},
    transport::{SharedTransport, Transport},
};

/// Tokens are refreshed this long before their announced expiry.
pub const EXPIRY_DELTA: Duration = Duration::from_secs(10);

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Validated client-credentials settings.
#[derive(Clone)]
pub struct OidcConfig {
    /// Issuer base URL.
    pub issuer_url: Url,
    /// OAuth2 client id.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Optional `audience` parameter sent with the grant.
    pub audience: Option<String>,
}

impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("issuer_url", &self.issuer_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("audience", &self.audience)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    token_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at.map_or(true, |expires_at| Instant::now() + EXPIRY_DELTA < expires_at)
    }
}

/// Caching client-credentials token source bound to one issuer.
pub struct CredentialProvider {
    config: OidcConfig,
    token_endpoint: Url,
    http: reqwest::Client,
    cache: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("config", &self.config)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl CredentialProvider {
    /// Discovers the issuer's token endpoint and builds the provider.
    ///
    /// No token is fetched yet; the first outbound call does that.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Discovery`] if the issuer cannot be
    /// reached and [`CredentialError::InvalidMetadata`] if its discovery
    /// document is unusable.
    pub async fn discover(config: OidcConfig) -> std::result::Result<Self, CredentialError> {
        let http = reqwest::Client::builder()
            .timeout(DISCOVERY_TIMEOUT)
            .build()
            .map_err(|e| CredentialError::discovery(format!("failed to build HTTP client: {e}")))?;

        Self::discover_with_client(config, http).await
    }

    /// Same as [`discover`](Self::discover) with a caller-provided client.
    ///
    /// # Errors
    ///
    /// See [`discover`](Self::discover).
    pub async fn discover_with_client(
        config: OidcConfig,
        http: reqwest::Client,
    ) -> std::result::Result<Self, CredentialError> {
        let discovery_url = discovery_url(&config.issuer_url)?;
        debug!(url = %discovery_url, "Fetching OpenID provider metadata");

        let metadata = http
            .get(discovery_url)
            .send()
            .await
            .map_err(|e| CredentialError::discovery(e.to_string()))?
            .error_for_status()
            .map_err(|e| CredentialError::discovery(e.to_string()))?
            .json::<ProviderMetadata>()
            .await
            .map_err(|e| CredentialError::invalid_metadata(e.to_string()))?;

        if metadata.issuer.trim_end_matches('/') != config.issuer_url.as_str().trim_end_matches('/') {
            return Err(CredentialError::invalid_metadata(format!(
                "issuer mismatch: expected {}, got {}",
                config.issuer_url, metadata.issuer
            )));
        }

        let token_endpoint = Url::parse(&metadata.token_endpoint).map_err(|e| {
            CredentialError::invalid_metadata(format!(
                "token_endpoint {:?} is not a URL: {e}",
                metadata.token_endpoint
            ))
        })?;

        info!(
            issuer = %config.issuer_url,
            token_endpoint = %token_endpoint,
            client_id = %config.client_id,
            "Outbound credential provider ready"
        );

        Ok(Self { config, token_endpoint, http, cache: RwLock::new(None), refresh: Mutex::new(()) })
    }

    /// Token endpoint resolved during discovery.
    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    /// Returns a valid access token, fetching a new one when needed.
    ///
    /// At most one grant is in flight at a time. Callers arriving while a
    /// refresh runs wait for it and reuse its token.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::TokenRequest`] when the grant fails.
    pub async fn token(&self) -> std::result::Result<String, CredentialError> {
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let _refresh = self.refresh.lock().await;
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let fresh = self.request_token().await?;
        let access_token = fresh.access_token.clone();
        *self.cache.write().await = Some(fresh);
        Ok(access_token)
    }

    async fn cached_token(&self) -> Option<String> {
        let cache = self.cache.read().await;
        cache.as_ref().filter(|token| token.is_fresh()).map(|token| token.access_token.clone())
    }

    async fn request_token(&self) -> std::result::Result<CachedToken, CredentialError> {
        debug!(token_endpoint = %self.token_endpoint, "Requesting client-credentials token");

        let mut form = vec![("grant_type", "client_credentials")];
        if let Some(audience) = self.config.audience.as_deref().filter(|a| !a.is_empty()) {
            form.push(("audience", audience));
        }

        let requested_at = Instant::now();
        let response = self
            .http
            .post(self.token_endpoint.clone())
            .basic_auth(
                form_encode(&self.config.client_id),
                Some(form_encode(&self.config.client_secret)),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| CredentialError::token_request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Token endpoint rejected client credentials");
            return Err(CredentialError::token_request(format!("HTTP {}", status.as_u16())));
        }

        let body = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| CredentialError::token_request(format!("invalid token response: {e}")))?;

        if body.access_token.is_empty() {
            return Err(CredentialError::token_request("token response has empty access_token"));
        }

        Ok(CachedToken {
            access_token: body.access_token,
            expires_at: body.expires_in.map(|secs| requested_at + Duration::from_secs(secs)),
        })
    }
}

/// The outbound authentication leg, enabled or not.
#[derive(Debug, Clone, Default)]
pub struct OutboundCredentials {
    provider: Option<Arc<CredentialProvider>>,
}

impl OutboundCredentials {
    /// Outbound authentication turned off.
    pub fn disabled() -> Self {
        Self { provider: None }
    }

    /// Outbound authentication backed by `provider`.
    pub fn enabled(provider: CredentialProvider) -> Self {
        Self { provider: Some(Arc::new(provider)) }
    }

    /// Builds the leg from optional configuration, running discovery when
    /// enabled.
    ///
    /// # Errors
    ///
    /// Propagates discovery failures; the gateway must not start on error.
    pub async fn from_config(
        config: Option<OidcConfig>,
    ) -> std::result::Result<Self, CredentialError> {
        match config {
            Some(config) => Ok(Self::enabled(CredentialProvider::discover(config).await?)),
            None => Ok(Self::disabled()),
        }
    }

    /// Returns `true` when tokens are injected.
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Decorates `base` with token injection, or returns it unchanged when
    /// disabled.
    pub fn wrap_transport(&self, base: SharedTransport) -> SharedTransport {
        match &self.provider {
            Some(provider) => Arc::new(BearerTransport { inner: base, provider: Arc::clone(provider) }),
            None => base,
        }
    }
}

/// Decorator attaching `Authorization: Bearer <token>` to every request.
#[derive(Debug)]
pub struct BearerTransport {
    inner: SharedTransport,
    provider: Arc<CredentialProvider>,
}

#[async_trait]
impl Transport for BearerTransport {
    async fn send(&self, mut request: reqwest::Request) -> Result<reqwest::Response> {
        let token = self.provider.token().await?;
        let value = HeaderValue::try_from(format!("Bearer {token}"))
            .map_err(|_| ForwardError::configuration("access token is not a valid header value"))?;
        request.headers_mut().insert(AUTHORIZATION, value);

        self.inner.send(request).await
    }
}

fn discovery_url(issuer: &Url) -> std::result::Result<Url, CredentialError> {
    let base = format!("{}/", issuer.as_str().trim_end_matches('/'));
    Url::parse(&base)
        .and_then(|base| base.join(DISCOVERY_PATH))
        .map_err(|e| CredentialError::invalid_metadata(format!("invalid issuer URL: {e}")))
}

/// Client id and secret are form-encoded before basic auth (RFC 6749 2.3.1).
fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config(issuer: &str) -> OidcConfig {
        OidcConfig {
            issuer_url: Url::parse(issuer).unwrap(),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            audience: None,
        }
    }

    async fn mount_discovery(server: &MockServer) {
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": server.uri(),
                "token_endpoint": format!("{}/oauth/token", server.uri()),
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn discovery_url_handles_paths_and_trailing_slashes() {
        let issuer = Url::parse("https://sso.example.com/auth/realms/main").unwrap();
        assert_eq!(
            discovery_url(&issuer).unwrap().as_str(),
            "https://sso.example.com/auth/realms/main/.well-known/openid-configuration"
        );

        let issuer = Url::parse("https://sso.example.com/").unwrap();
        assert_eq!(
            discovery_url(&issuer).unwrap().as_str(),
            "https://sso.example.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn debug_output_masks_secret() {
        let rendered = format!("{:?}", config("https://sso.example.com"));
        assert!(!rendered.contains("client-secret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn form_encoding_escapes_reserved_characters() {
        assert_eq!(form_encode("a b:c"), "a+b%3Ac");
    }

    #[tokio::test]
    async fn discover_reads_token_endpoint() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;

        let provider = CredentialProvider::discover(config(&server.uri())).await.unwrap();
        assert_eq!(provider.token_endpoint().as_str(), format!("{}/oauth/token", server.uri()));
    }

    #[tokio::test]
    async fn discover_rejects_mismatched_issuer() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": "https://someone-else.example.com",
                "token_endpoint": "https://someone-else.example.com/token",
            })))
            .mount(&server)
            .await;

        let err = CredentialProvider::discover(config(&server.uri())).await.unwrap_err();
        assert!(matches!(err, CredentialError::InvalidMetadata { .. }));
    }

    #[tokio::test]
    async fn discover_fails_when_issuer_unreachable() {
        let err = CredentialProvider::discover(config("http://127.0.0.1:9")).await.unwrap_err();
        assert!(matches!(err, CredentialError::Discovery { .. }));
    }

    #[tokio::test]
    async fn discover_fails_on_non_json_metadata() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let err = CredentialProvider::discover(config(&server.uri())).await.unwrap_err();
        assert!(matches!(err, CredentialError::InvalidMetadata { .. }));
    }

    #[tokio::test]
    async fn token_is_cached_until_close_to_expiry() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/oauth/token"))
            .and(matchers::body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "token-1",
                "token_type": "bearer",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = CredentialProvider::discover(config(&server.uri())).await.unwrap();
        assert_eq!(provider.token().await.unwrap(), "token-1");
        assert_eq!(provider.token().await.unwrap(), "token-1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cold_callers_share_one_grant() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "shared", "expires_in": 3600}))
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(CredentialProvider::discover(config(&server.uri())).await.unwrap());
        let callers: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move { provider.token().await })
            })
            .collect();

        for caller in callers {
            assert_eq!(caller.await.unwrap().unwrap(), "shared");
        }
        let grants = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path() == "/oauth/token")
            .count();
        assert_eq!(grants, 1);
    }

    #[tokio::test]
    async fn failed_refresh_does_not_poison_later_calls() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(matchers::path("/oauth/token"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(matchers::path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "retry"})))
            .mount(&server)
            .await;

        let provider = CredentialProvider::discover(config(&server.uri())).await.unwrap();
        assert!(provider.token().await.is_err());
        assert_eq!(provider.token().await.unwrap(), "retry");
    }

    #[tokio::test]
    async fn short_lived_token_is_refetched() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(matchers::path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "short",
                "expires_in": 5,
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider = CredentialProvider::discover(config(&server.uri())).await.unwrap();
        provider.token().await.unwrap();
        provider.token().await.unwrap();
    }

    #[tokio::test]
    async fn audience_is_sent_when_configured() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(matchers::path("/oauth/token"))
            .and(matchers::body_string_contains("audience=observatorium"))
            .and(matchers::header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "aud"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config(&server.uri());
        config.audience = Some("observatorium".to_string());

        let provider = CredentialProvider::discover(config).await.unwrap();
        assert_eq!(provider.token().await.unwrap(), "aud");
    }

    #[tokio::test]
    async fn rejected_grant_is_an_error() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;
        Mock::given(matchers::path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = CredentialProvider::discover(config(&server.uri())).await.unwrap();
        let err = provider.token().await.unwrap_err();
        assert!(matches!(err, CredentialError::TokenRequest { .. }));
    }

    #[test]
    fn disabled_credentials_pass_base_through() {
        let base: SharedTransport = Arc::new(
            crate::transport::HttpTransport::new(&crate::transport::ClientConfig::default()).unwrap(),
        );
        let credentials = OutboundCredentials::disabled();

        let wrapped = credentials.wrap_transport(Arc::clone(&base));
        assert!(!credentials.is_enabled());
        assert!(Arc::ptr_eq(&wrapped, &base));
    }
}
