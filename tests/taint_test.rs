mod common;

use common::{MockDispatcher, MockResponse};
use fetchnet::fetch::{CredentialsMode, RedirectMode, RequestMode, ResponseType};
use fetchnet::{Client, NetError, ResponseView};
use std::sync::Arc;

fn client_from(mock: &Arc<MockDispatcher>, origin: &str) -> Client {
    Client::builder().dispatcher(mock.clone()).global_origin(origin.parse().unwrap()).build()
}

fn json_response() -> MockResponse {
    MockResponse::new(200)
        .header("Content-Type", "application/json")
        .header("X-Secret", "1")
        .header("Set-Cookie", "sid=abc")
        .body(r#"{"x":1}"#)
}

#[tokio::test]
async fn test_opaque_response_hides_everything() {
    let mock = MockDispatcher::with(vec![json_response()]);
    let client = client_from(&mock, "http://app.example");

    let mut resp = client
        .get("http://api.example/data")
        .mode(RequestMode::NoCors)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.response_type(), ResponseType::Opaque);
    assert_eq!(resp.status(), 0);
    assert_eq!(resp.status_text(), "");
    assert!(resp.headers().entries().is_empty());
    assert!(!resp.has_body());
    assert_eq!(resp.url(), "");
    assert_eq!(resp.text().await.unwrap(), "");

    // The unfiltered response is still intact underneath.
    assert_eq!(resp.internal().status, 200);
    assert_eq!(resp.internal().headers.get("x-secret"), Some("1"));
}

#[tokio::test]
async fn test_no_cors_requires_follow() {
    let mock = MockDispatcher::new();
    let client = client_from(&mock, "http://app.example");
    let err = client
        .get("http://api.example/")
        .mode(RequestMode::NoCors)
        .redirect(RedirectMode::Manual)
        .send()
        .await
        .unwrap_err();
    assert!(matches!(err.cause(), Some(NetError::CorsFailure(_))));
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_cors_response_exposes_safelisted_headers() {
    let mock = MockDispatcher::with(vec![json_response()]);
    let client = client_from(&mock, "http://app.example");

    let resp = client.get("http://api.example/data").send().await.unwrap();
    assert_eq!(resp.response_type(), ResponseType::Cors);
    let headers = resp.headers();
    assert_eq!(headers.get("content-type"), Some("application/json"));
    assert!(headers.get("x-secret").is_none());
    assert!(headers.get("set-cookie").is_none());
}

#[tokio::test]
async fn test_cors_expose_headers() {
    let mock = MockDispatcher::with(vec![
        json_response().header("Access-Control-Expose-Headers", "X-Secret"),
    ]);
    let client = client_from(&mock, "http://app.example");

    let mut resp = client.get("http://api.example/data").send().await.unwrap();
    assert_eq!(resp.headers().get("x-secret"), Some("1"));
    assert_eq!(resp.text().await.unwrap(), r#"{"x":1}"#);
}

#[tokio::test]
async fn test_cors_wildcard_ignored_with_credentials() {
    let mock = MockDispatcher::with(vec![
        json_response().header("Access-Control-Expose-Headers", "*"),
        json_response().header("Access-Control-Expose-Headers", "*"),
    ]);
    let client = client_from(&mock, "http://app.example");

    let resp = client.get("http://api.example/data").send().await.unwrap();
    assert_eq!(resp.headers().get("x-secret"), Some("1"));

    let resp = client
        .get("http://api.example/data")
        .credentials(CredentialsMode::Include)
        .send()
        .await
        .unwrap();
    assert!(resp.headers().get("x-secret").is_none());
}

#[tokio::test]
async fn test_same_origin_is_basic() {
    let mock = MockDispatcher::with(vec![json_response()]);
    let client = client_from(&mock, "http://api.example");

    let resp = client.get("http://api.example/data").send().await.unwrap();
    assert_eq!(resp.response_type(), ResponseType::Basic);
    let headers = resp.headers();
    assert_eq!(headers.get("x-secret"), Some("1"));
    assert!(headers.get("set-cookie").is_none());
    assert_eq!(resp.internal().headers.raw_set_cookie_values(), ["sid=abc"]);
}

#[tokio::test]
async fn test_cross_origin_request_sends_origin() {
    let mock = MockDispatcher::with(vec![MockResponse::new(200)]);
    let client = client_from(&mock, "http://app.example");
    client.get("http://api.example/").send().await.unwrap();

    let sent = &mock.requests()[0];
    assert_eq!(sent.header("origin"), Some("http://app.example"));
    assert_eq!(sent.header("sec-fetch-mode"), Some("cors"));
}

#[tokio::test]
async fn test_post_sends_origin_on_same_origin() {
    let mock = MockDispatcher::with(vec![MockResponse::new(200)]);
    let client = client_from(&mock, "http://api.example");
    client.post("http://api.example/").body("x").send().await.unwrap();
    assert_eq!(mock.requests()[0].header("origin"), Some("http://api.example"));
}

#[tokio::test]
async fn test_opaque_partial_content_without_range_is_rejected() {
    let mock = MockDispatcher::with(vec![MockResponse::new(206)
        .status_text("Partial Content")
        .header("Content-Range", "bytes 0-1/10")
        .body("ab")]);
    let client = client_from(&mock, "http://app.example");

    // A ranged no-cors request gets its 206 through.
    let resp = client
        .get("http://media.example/clip")
        .mode(RequestMode::NoCors)
        .header("Range", "bytes=0-1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.response_type(), ResponseType::Opaque);
    assert!(resp.internal().range_requested);
}
