//! Inbound token verification tests.
//!
//! Verification is fail-closed: these tests check that nothing reaches the
//! upstream unless the authority accepted the caller's token for the
//! request's tenant.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use bytes::Bytes;
use promgate_api::{create_router, AppState};
use promgate_core::models::MetricType;
use promgate_testing::{MockUpstream, MockVerifier, TestGateway, WriteRequestBuilder};
use tower::ServiceExt;

async fn verified_router(upstream: &MockUpstream, verifier_url: &str) -> Router {
    let mut config = TestGateway::config(&upstream.url());
    config.token_verification.enabled = true;
    config.token_verification.url = verifier_url.to_string();

    let state = AppState::from_config(&config).await.expect("state should build");
    create_router(state, config.proxy.max_body_bytes)
}

fn post_write(body: Bytes, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/");
    if let Some(value) = authorization {
        builder = builder.header("authorization", value);
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn missing_token_is_bad_request_without_outbound_calls() {
    let upstream = MockUpstream::accepting().await;
    let verifier = MockVerifier::start().await;
    verifier.answer_all(200).await;
    let app = verified_router(&upstream, &verifier.url()).await;
    let body = WriteRequestBuilder::new().tenant_series("cluster-1", 1).encoded();

    let response = app.oneshot(post_write(body, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(verifier.call_count().await, 0);
    assert_eq!(upstream.request_count().await, 0);
}

#[tokio::test]
async fn accepted_token_is_forwarded() {
    let upstream = MockUpstream::accepting().await;
    let verifier = MockVerifier::start().await;
    verifier.accept("cluster-1", "Bearer tenant-token").await;
    let app = verified_router(&upstream, &verifier.url()).await;
    let body = WriteRequestBuilder::new().tenant_series("cluster-1", 3).encoded();

    let response = app.oneshot(post_write(body, Some("Bearer tenant-token"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(verifier.call_count().await, 1);
    assert_eq!(upstream.request_count().await, 1);
}

#[tokio::test]
async fn token_for_another_tenant_is_unauthorized() {
    let upstream = MockUpstream::accepting().await;
    let verifier = MockVerifier::start().await;
    verifier.accept("cluster-1", "Bearer tenant-token").await;
    let app = verified_router(&upstream, &verifier.url()).await;
    let body = WriteRequestBuilder::new().tenant_series("cluster-2", 1).encoded();

    let response = app.oneshot(post_write(body, Some("Bearer tenant-token"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(upstream.request_count().await, 0);
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let upstream = MockUpstream::accepting().await;
    let verifier = MockVerifier::start().await;
    verifier.answer_all(403).await;
    let app = verified_router(&upstream, &verifier.url()).await;
    let body = WriteRequestBuilder::new().tenant_series("cluster-1", 1).encoded();

    let response = app.oneshot(post_write(body, Some("Bearer revoked"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(verifier.call_count().await, 1);
    assert_eq!(upstream.request_count().await, 0);
}

#[tokio::test]
async fn unreachable_verifier_is_unauthorized() {
    let upstream = MockUpstream::accepting().await;
    let app = verified_router(&upstream, "http://127.0.0.1:9/verify").await;
    let body = WriteRequestBuilder::new().tenant_series("cluster-1", 1).encoded();

    let response = app.oneshot(post_write(body, Some("Bearer any"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(upstream.request_count().await, 0);
}

#[tokio::test]
async fn tenant_check_runs_before_verification() {
    let upstream = MockUpstream::accepting().await;
    let verifier = MockVerifier::start().await;
    verifier.answer_all(200).await;
    let app = verified_router(&upstream, &verifier.url()).await;
    let body = WriteRequestBuilder::new().untenanted_series().encoded();

    let response = app.oneshot(post_write(body, Some("Bearer any"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(verifier.call_count().await, 0);
}

#[tokio::test]
async fn metadata_only_request_skips_verification() {
    let upstream = MockUpstream::accepting().await;
    let verifier = MockVerifier::start().await;
    verifier.answer_all(401).await;
    let app = verified_router(&upstream, &verifier.url()).await;
    let body = WriteRequestBuilder::new().metadata("http_requests_total", MetricType::Counter).encoded();

    let response = app.oneshot(post_write(body, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(verifier.call_count().await, 0);
    assert_eq!(upstream.request_count().await, 1);
}
