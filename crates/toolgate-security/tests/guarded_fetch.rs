#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Redirect handling of the guarded HTTP client against a local mock server.
//!
//! The mock server listens on loopback, so every test opts into the loopback
//! bypass; the redirect targets exercise what that bypass still forbids.

use toolgate_core::ToolgateError;
use toolgate_security::{GuardedClient, GuardedRequest, SsrfPolicy};
use wiremock::matchers::{body_string, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn redirect(status: u16, location: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).insert_header("location", location)
}

async fn loopback_client() -> GuardedClient {
    GuardedClient::new(SsrfPolicy::allow_loopback()).unwrap()
}

#[tokio::test]
async fn test_follows_redirect_to_allowed_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(redirect(302, "/final"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/final"))
        .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
        .expect(1)
        .mount(&server)
        .await;

    let client = loopback_client().await;
    let url = client.validate(&format!("{}/start", server.uri())).await.unwrap();
    let resp = client.send(GuardedRequest::get(url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "landed");
}

#[tokio::test]
async fn test_redirect_into_metadata_endpoint_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(redirect(302, "/hop"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hop"))
        .respond_with(redirect(301, "http://169.254.169.254/latest/meta-data/"))
        .mount(&server)
        .await;

    let client = loopback_client().await;
    let url = client.validate(&format!("{}/start", server.uri())).await.unwrap();
    let err = client.send(GuardedRequest::get(url)).await.unwrap_err();
    match err {
        ToolgateError::ForbiddenTarget { host, .. } => assert_eq!(host, "169.254.169.254"),
        other => panic!("expected ForbiddenTarget, got {other:?}"),
    }
}

#[tokio::test]
async fn test_redirect_into_private_range_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(redirect(307, "http://10.0.0.5/admin"))
        .mount(&server)
        .await;

    let client = loopback_client().await;
    let url = client.validate(&format!("{}/mcp", server.uri())).await.unwrap();
    let err = client
        .send(GuardedRequest::post(url, b"{}".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolgateError::ForbiddenTarget { .. }));
}

#[tokio::test]
async fn test_redirect_to_non_http_scheme_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(redirect(302, "file:///etc/passwd"))
        .mount(&server)
        .await;

    let client = loopback_client().await;
    let url = client.validate(&server.uri()).await.unwrap();
    let err = client.send(GuardedRequest::get(url)).await.unwrap_err();
    assert!(matches!(err, ToolgateError::InvalidUrl(_)));
}

#[tokio::test]
async fn test_307_replays_method_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/old"))
        .respond_with(redirect(307, "/new"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/new"))
        .and(body_string("payload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = loopback_client().await;
    let url = client.validate(&format!("{}/old", server.uri())).await.unwrap();
    let resp = client
        .send(GuardedRequest::post(url, b"payload".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_303_switches_to_get() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(redirect(303, "/result"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/result"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = loopback_client().await;
    let url = client.validate(&format!("{}/submit", server.uri())).await.unwrap();
    let resp = client
        .send(GuardedRequest::post(url, b"x".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(redirect(302, "/loop"))
        .mount(&server)
        .await;

    let client = loopback_client().await;
    let url = client.validate(&format!("{}/loop", server.uri())).await.unwrap();
    let err = client.send(GuardedRequest::get(url)).await.unwrap_err();
    match err {
        ToolgateError::Http(msg) => assert!(msg.contains("too many redirects")),
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_static_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-api-key", "k1"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = loopback_client().await;
    let url = client.validate(&server.uri()).await.unwrap();
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("x-api-key", "k1".parse().unwrap());
    headers.insert("authorization", "Bearer t".parse().unwrap());
    let resp = client
        .send(GuardedRequest::get(url).headers(&headers))
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}

#[tokio::test]
async fn test_default_policy_refuses_loopback_before_any_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = GuardedClient::new(SsrfPolicy::default()).unwrap();
    let err = client.validate(&server.uri()).await.unwrap_err();
    assert!(matches!(err, ToolgateError::ForbiddenTarget { .. }));
}

#[tokio::test]
async fn test_hostname_target_connects_through_checked_resolver() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/named"))
        .respond_with(ResponseTemplate::new(200).set_body_string("by name"))
        .expect(1)
        .mount(&server)
        .await;

    // Same listener, reached by name so the connection goes through DNS.
    let named = format!("{}/named", server.uri().replace("127.0.0.1", "localhost"));
    let client = loopback_client().await;
    let url = client.validate(&named).await.unwrap();
    let resp = client.send(GuardedRequest::get(url)).await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "by name");
}
