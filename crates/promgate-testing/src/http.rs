//! Mock collaborators: upstream collector, token verifier and OIDC issuer.
//!
//! Thin wrappers over `wiremock` that speak the gateway's protocols, so
//! tests read in terms of tenants and tokens rather than matchers.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use promgate_core::{codec, models::WriteRequest};
use serde_json::json;
use wiremock::{
    matchers::{any, body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Path the mock verifier serves under; tenants are appended to it.
pub const VERIFY_PATH: &str = "/verify";

/// Path the mock upstream accepts writes on.
pub const RECEIVE_PATH: &str = "/api/v1/receive";

/// Upstream collector receiving forwarded writes.
pub struct MockUpstream {
    server: MockServer,
}

impl MockUpstream {
    /// Starts an upstream answering `status` to every write.
    pub async fn start(status: u16) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(RECEIVE_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_string("accepted"))
            .mount(&server)
            .await;
        Self { server }
    }

    /// Starts an upstream answering 200.
    pub async fn accepting() -> Self {
        Self::start(200).await
    }

    /// URL to configure as the gateway's forward URL.
    pub fn url(&self) -> String {
        format!("{}{RECEIVE_PATH}", self.server.uri())
    }

    /// Underlying mock server, for extra expectations.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Every request received, in arrival order.
    pub async fn received(&self) -> Vec<wiremock::Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Bodies of every received request, decoded as write requests.
    ///
    /// # Panics
    ///
    /// Panics if a body is not a valid write request.
    #[allow(clippy::expect_used)]
    pub async fn received_writes(&self) -> Vec<WriteRequest> {
        self.received()
            .await
            .iter()
            .map(|request| codec::decode(&request.body).expect("upstream received an invalid body"))
            .collect()
    }

    /// Number of requests received.
    pub async fn request_count(&self) -> usize {
        self.received().await.len()
    }
}

/// External authority verifying inbound tokens per tenant.
pub struct MockVerifier {
    server: MockServer,
}

impl MockVerifier {
    /// Starts a verifier with no expectations; unmatched calls get 404.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Accepts `token` (the full `Authorization` value) for `tenant`.
    pub async fn accept(&self, tenant: &str, token: &str) {
        Mock::given(method("POST"))
            .and(path(format!("{VERIFY_PATH}/{tenant}")))
            .and(header("authorization", token))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.server)
            .await;
    }

    /// Answers `status` to every verification call.
    pub async fn answer_all(&self, status: u16) {
        Mock::given(any()).respond_with(ResponseTemplate::new(status)).mount(&self.server).await;
    }

    /// URL to configure as the verification endpoint.
    pub fn url(&self) -> String {
        format!("{}{VERIFY_PATH}", self.server.uri())
    }

    /// Number of verification calls received.
    pub async fn call_count(&self) -> usize {
        self.server.received_requests().await.map_or(0, |requests| requests.len())
    }
}

/// OIDC issuer supporting discovery and the client-credentials grant.
pub struct MockIssuer {
    server: MockServer,
}

impl MockIssuer {
    /// Starts an issuer handing out `access_token` to `client_id`.
    pub async fn start(client_id: &str, access_token: &str) -> Self {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": server.uri(),
                "token_endpoint": format!("{}/protocol/openid-connect/token", server.uri()),
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/protocol/openid-connect/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(basic_auth_for(client_id))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access_token,
                "token_type": "Bearer",
                "expires_in": 300,
            })))
            .mount(&server)
            .await;

        Self { server }
    }

    /// Issuer base URL.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Number of token grants served.
    pub async fn token_requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path().ends_with("/token"))
            .count()
    }
}

fn basic_auth_for(client_id: &str) -> impl wiremock::Match {
    let expected = format!("{client_id}:");
    move |request: &wiremock::Request| {
        request
            .headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Basic "))
            .and_then(decode_basic)
            .is_some_and(|credentials| credentials.starts_with(&expected))
    }
}

fn decode_basic(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}
