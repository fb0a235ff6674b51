//! Integration tests for the request dispatcher
//!
//! These tests use wiremock to stand in for the TripWithU API and test
//! the full request/response cycle: auth modes, envelope parsing,
//! error mapping, and the 401 session teardown.

use chrono::{Duration, Utc};
use secure_store::MemoryStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use trip_client::{
    ApiError, AuthMode, Body, HttpClient, HttpClientConfig, Method, RequestOptions, SessionStore,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
struct TripSummary {
    id: u64,
    title: String,
}

fn mint_token(expires_in: Duration) -> String {
    let exp = (Utc::now() + expires_in).timestamp();
    let claims = json!({ "sub": "user-1", "exp": exp });
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(b"test_secret"),
    )
    .unwrap()
}

fn success_envelope(path: &str, data: serde_json::Value) -> serde_json::Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "status": 200,
        "path": path,
        "code": "OK",
        "message": "ok",
        "data": data,
    })
}

fn error_envelope(status: u16, path: &str, code: &str, message: &str) -> serde_json::Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "status": status,
        "path": path,
        "code": code,
        "message": message,
    })
}

/// A client whose session holds a long-lived token pair, so no refresh
/// traffic interferes with the request under test.
async fn logged_in_client(server: &MockServer) -> HttpClient {
    let session = SessionStore::new(server.uri(), Arc::new(MemoryStore::new()));
    session
        .login(
            &mint_token(Duration::hours(1)),
            &mint_token(Duration::days(14)),
            "Bearer",
        )
        .await;
    HttpClient::new(HttpClientConfig::new(server.uri()), session)
}

fn anonymous_client(server: &MockServer) -> HttpClient {
    let session = SessionStore::new(server.uri(), Arc::new(MemoryStore::new()));
    HttpClient::new(HttpClientConfig::new(server.uri()), session)
}

// =============================================================================
// Successful Request Tests
// =============================================================================

#[tokio::test]
async fn test_get_success_envelope() {
    let mock_server = MockServer::start().await;

    let trip = TripSummary { id: 7, title: "Jeju".to_string() };

    Mock::given(method("GET"))
        .and(path("/trips/7"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_envelope("/trips/7", json!(trip))),
        )
        .mount(&mock_server)
        .await;

    let client = logged_in_client(&mock_server).await;
    let envelope = client
        .request::<TripSummary>("/trips/7", Method::Get, RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(envelope.status, 200);
    assert_eq!(envelope.code, "OK");
    assert_eq!(envelope.data, trip);
}

#[tokio::test]
async fn test_authorization_header_attached() {
    let mock_server = MockServer::start().await;

    let session = SessionStore::new(mock_server.uri(), Arc::new(MemoryStore::new()));
    let access = mint_token(Duration::hours(1));
    session.login(&access, &mint_token(Duration::days(14)), "Bearer").await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("Authorization", format!("Bearer {access}").as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_envelope("/me", json!({"id": 1, "title": "me"}))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpClient::new(HttpClientConfig::new(mock_server.uri()), session);
    client
        .request::<TripSummary>("/me", Method::Get, RequestOptions::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_post_with_json_body() {
    let mock_server = MockServer::start().await;

    let payload = json!({"title": "Busan weekend"});

    Mock::given(method("POST"))
        .and(path("/trips"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(&payload))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_envelope("/trips", json!({"id": 3, "title": "Busan weekend"}))),
        )
        .mount(&mock_server)
        .await;

    let client = logged_in_client(&mock_server).await;
    let envelope = client
        .request::<TripSummary>(
            "/trips",
            Method::Post,
            RequestOptions::new().body(Body::Json(payload.clone())),
        )
        .await
        .unwrap();

    assert_eq!(envelope.data.id, 3);
}

#[tokio::test]
async fn test_custom_headers_forwarded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trips/1"))
        .and(header("X-Client-Locale", "ko-KR"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_envelope("/trips/1", json!({"id": 1, "title": "Seoul"}))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = anonymous_client(&mock_server);
    client
        .request::<TripSummary>(
            "/trips/1",
            Method::Get,
            RequestOptions::new()
                .auth(AuthMode::None)
                .header("X-Client-Locale", "ko-KR"),
        )
        .await
        .unwrap();
}

// =============================================================================
// Auth Mode Tests
// =============================================================================

#[tokio::test]
async fn test_required_without_session_fails_before_network() {
    let mock_server = MockServer::start().await;

    // No request must reach the server.
    Mock::given(method("GET"))
        .and(path("/trips/1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = anonymous_client(&mock_server);
    let err = client
        .request::<TripSummary>("/trips/1", Method::Get, RequestOptions::new())
        .await
        .unwrap_err();

    match err {
        ApiError::AuthRequired(ref body) => {
            assert_eq!(body.code, "AUTH_REQUIRED");
            assert_eq!(body.status, 401);
            assert!(body.skip_retry);
        }
        other => panic!("expected AuthRequired, got {other:?}"),
    }
    assert!(err.skip_retry());
}

#[tokio::test]
async fn test_optional_without_session_proceeds_anonymously() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trips/public"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_envelope("/trips/public", json!({"id": 2, "title": "open"}))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = anonymous_client(&mock_server);
    let envelope = client
        .request::<TripSummary>(
            "/trips/public",
            Method::Get,
            RequestOptions::new().auth(AuthMode::Optional),
        )
        .await
        .unwrap();

    assert_eq!(envelope.data.id, 2);
}

#[tokio::test]
async fn test_optional_with_session_attaches_token() {
    let mock_server = MockServer::start().await;

    let session = SessionStore::new(mock_server.uri(), Arc::new(MemoryStore::new()));
    let access = mint_token(Duration::hours(1));
    session.login(&access, &mint_token(Duration::days(14)), "Bearer").await;

    Mock::given(method("GET"))
        .and(path("/trips/public"))
        .and(header("Authorization", format!("Bearer {access}").as_str()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_envelope("/trips/public", json!({"id": 2, "title": "open"}))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpClient::new(HttpClientConfig::new(mock_server.uri()), session);
    client
        .request::<TripSummary>(
            "/trips/public",
            Method::Get,
            RequestOptions::new().auth(AuthMode::Optional),
        )
        .await
        .unwrap();
}

// =============================================================================
// Error Mapping Tests
// =============================================================================

#[tokio::test]
async fn test_server_error_envelope_passthrough() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trips/404"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(error_envelope(404, "/trips/404", "TRIP_NOT_FOUND", "no such trip")),
        )
        .mount(&mock_server)
        .await;

    let client = anonymous_client(&mock_server);
    let err = client
        .request::<TripSummary>(
            "/trips/404",
            Method::Get,
            RequestOptions::new().auth(AuthMode::None),
        )
        .await
        .unwrap_err();

    match err {
        ApiError::Api(body) => {
            assert_eq!(body.code, "TRIP_NOT_FOUND");
            assert_eq!(body.message, "no such trip");
            assert_eq!(body.status, 404);
            // Client errors are marked non-retryable.
            assert!(body.skip_retry);
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_5xx_is_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trips/1"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(error_envelope(503, "/trips/1", "SERVICE_UNAVAILABLE", "try later")),
        )
        .mount(&mock_server)
        .await;

    let client = anonymous_client(&mock_server);
    let err = client
        .request::<TripSummary>(
            "/trips/1",
            Method::Get,
            RequestOptions::new().auth(AuthMode::None),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("SERVICE_UNAVAILABLE"));
    assert!(!err.skip_retry());
}

#[tokio::test]
async fn test_non_json_body_maps_to_non_json_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trips/1"))
        .respond_with(
            ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"),
        )
        .mount(&mock_server)
        .await;

    let client = anonymous_client(&mock_server);
    let err = client
        .request::<TripSummary>(
            "/trips/1",
            Method::Get,
            RequestOptions::new().auth(AuthMode::None),
        )
        .await
        .unwrap_err();

    match err {
        ApiError::Api(body) => {
            assert_eq!(body.code, "NON_JSON_RESPONSE");
            assert_eq!(body.message, "<html>Bad Gateway</html>");
            assert!(!body.skip_retry);
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_success_body_maps_to_non_json_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/trips/1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let client = anonymous_client(&mock_server);
    let err = client
        .request::<TripSummary>(
            "/trips/1",
            Method::Delete,
            RequestOptions::new().auth(AuthMode::None),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("NON_JSON_RESPONSE"));
}

#[tokio::test]
async fn test_success_body_not_matching_envelope_maps_to_non_json_response() {
    let mock_server = MockServer::start().await;

    // Valid JSON, wrong shape.
    Mock::given(method("GET"))
        .and(path("/trips/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(&mock_server)
        .await;

    let client = anonymous_client(&mock_server);
    let err = client
        .request::<TripSummary>(
            "/trips/1",
            Method::Get,
            RequestOptions::new().auth(AuthMode::None),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("NON_JSON_RESPONSE"));
}

#[tokio::test]
async fn test_error_without_envelope_shape_maps_to_unknown_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trips/1"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"oops": true})))
        .mount(&mock_server)
        .await;

    let client = anonymous_client(&mock_server);
    let err = client
        .request::<TripSummary>(
            "/trips/1",
            Method::Get,
            RequestOptions::new().auth(AuthMode::None),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("UNKNOWN_ERROR"));
    assert_eq!(err.status(), Some(500));
}

// =============================================================================
// 401 Session Teardown Tests
// =============================================================================

#[tokio::test]
async fn test_401_with_token_clears_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(error_envelope(401, "/me", "TOKEN_REVOKED", "revoked")),
        )
        .mount(&mock_server)
        .await;

    let client = logged_in_client(&mock_server).await;
    assert!(client.session().is_logged_in().await);

    let err = client
        .request::<TripSummary>("/me", Method::Get, RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("TOKEN_REVOKED"));
    assert!(!client.session().is_logged_in().await);
    assert!(client.session().access_token().is_none());
}

#[tokio::test]
async fn test_401_without_token_leaves_session_alone() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(error_envelope(401, "/auth/login", "BAD_CREDENTIALS", "wrong password")),
        )
        .mount(&mock_server)
        .await;

    // Session from a previous login; the anonymous call must not
    // destroy it.
    let client = logged_in_client(&mock_server).await;

    let err = client
        .request::<TripSummary>(
            "/auth/login",
            Method::Post,
            RequestOptions::new().auth(AuthMode::None),
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some("BAD_CREDENTIALS"));
    assert!(client.session().is_logged_in().await);
}

#[tokio::test]
async fn test_401_with_non_json_body_does_not_clear_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&mock_server)
        .await;

    let client = logged_in_client(&mock_server).await;
    let err = client
        .request::<TripSummary>("/me", Method::Get, RequestOptions::new())
        .await
        .unwrap_err();

    // The unreadable body short-circuits before the 401 handling.
    assert_eq!(err.code(), Some("NON_JSON_RESPONSE"));
    assert!(client.session().is_logged_in().await);
}

// =============================================================================
// Upload Tests
// =============================================================================

#[tokio::test]
async fn test_multipart_upload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/trips/1/photos"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_envelope("/trips/1/photos", json!({"id": 9, "title": "photo"}))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let form = reqwest::multipart::Form::new()
        .text("caption", "sunset")
        .part(
            "file",
            reqwest::multipart::Part::bytes(vec![0xFF, 0xD8, 0xFF])
                .file_name("sunset.jpg")
                .mime_str("image/jpeg")
                .unwrap(),
        );

    let client = logged_in_client(&mock_server).await;
    let envelope = client
        .upload::<TripSummary>("/trips/1/photos", Method::Post, form, RequestOptions::new())
        .await
        .unwrap();

    assert_eq!(envelope.data.id, 9);
}

// =============================================================================
// URL Handling Tests
// =============================================================================

#[tokio::test]
async fn test_path_without_leading_slash() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trips/5"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_envelope("/trips/5", json!({"id": 5, "title": "Tokyo"}))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = anonymous_client(&mock_server);
    let envelope = client
        .request::<TripSummary>(
            "trips/5",
            Method::Get,
            RequestOptions::new().auth(AuthMode::None),
        )
        .await
        .unwrap();

    assert_eq!(envelope.data.id, 5);
}

#[tokio::test]
async fn test_absolute_url_passthrough() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/external"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(success_envelope("/external", json!({"id": 8, "title": "ext"}))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // Base URL points elsewhere; the absolute URL wins.
    let session = SessionStore::new("https://unused.invalid", Arc::new(MemoryStore::new()));
    let client = HttpClient::new(HttpClientConfig::new("https://unused.invalid"), session);

    let envelope = client
        .request::<TripSummary>(
            &format!("{}/external", mock_server.uri()),
            Method::Get,
            RequestOptions::new().auth(AuthMode::None),
        )
        .await
        .unwrap();

    assert_eq!(envelope.data.id, 8);
}
