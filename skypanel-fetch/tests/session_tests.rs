//! Integration tests for authentication, proactive refresh, and the 401 retry bound.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Duration;
use common::{CREATE_SESSION, FakeServer, REFRESH_SESSION, client, json, t0};
use skypanel_fetch::{FetchError, HttpResponse, Method};

const FEED: &str = "/xrpc/app.bsky.feed.getTimeline";

fn ok_feed(server: &FakeServer) {
    server.route(FEED, |_| json(200, &serde_json::json!({"feed": []})));
}

#[tokio::test]
async fn test_authenticate_decodes_expiry() {
    let server = FakeServer::new();
    let (client, clock) = client(&server);
    server.with_session_endpoints(Arc::clone(&clock), Duration::hours(2));

    let session = client
        .authenticate("@me.test", "correct-horse")
        .await
        .unwrap();

    assert_eq!(session.did, "did:plc:me");
    assert_eq!(session.expires_at, Some(t0() + Duration::hours(2)));
    assert_eq!(session.issued_at, Some(t0()));
    assert_eq!(session.service_url, "https://pds.test");
    assert!(client.is_authenticated());

    let sent = server.requests_to(CREATE_SESSION);
    assert_eq!(sent.len(), 1);
    let body: serde_json::Value =
        serde_json::from_slice(sent[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(body["identifier"], "@me.test");
    assert!(sent[0].header_value("authorization").is_none());
}

#[tokio::test]
async fn test_authenticate_rejected() {
    let server = FakeServer::new();
    let (client, clock) = client(&server);
    server.with_session_endpoints(clock, Duration::hours(2));

    let err = client.authenticate("me.test", "wrong").await.unwrap_err();
    match err {
        FetchError::AuthenticationFailed(msg) => assert!(msg.contains("Invalid identifier")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn test_authenticate_malformed_body() {
    let server = FakeServer::new();
    let (client, _) = client(&server);
    server.route(CREATE_SESSION, |_| HttpResponse::new(200, "<html>"));

    let err = client.authenticate("me.test", "pw").await.unwrap_err();
    assert!(matches!(err, FetchError::AuthenticationFailed(_)));
}

#[tokio::test]
async fn test_request_succeeds_without_refresh() {
    let server = FakeServer::new();
    let (client, clock) = client(&server);
    server.with_session_endpoints(Arc::clone(&clock), Duration::hours(2));
    ok_feed(&server);

    client.authenticate("me.test", "correct-horse").await.unwrap();
    let response = client.get(FEED).await.unwrap();

    assert!(response.is_success());
    assert_eq!(server.calls(FEED), 1);
    assert_eq!(server.calls(REFRESH_SESSION), 0);

    let access = client.session().unwrap().access_token;
    let sent = server.requests_to(FEED);
    assert_eq!(
        sent[0].header_value("Authorization"),
        Some(format!("Bearer {access}").as_str())
    );
}

#[tokio::test]
async fn test_expired_token_triggers_exactly_one_refresh() {
    let server = FakeServer::new();
    let (client, clock) = client(&server);
    server.with_session_endpoints(Arc::clone(&clock), Duration::hours(2));
    ok_feed(&server);

    client.authenticate("me.test", "correct-horse").await.unwrap();
    let before = client.session().unwrap();

    clock.advance(Duration::hours(3));
    client.get(FEED).await.unwrap();

    assert_eq!(server.calls(REFRESH_SESSION), 1);
    assert_eq!(server.calls(FEED), 1);

    let after = client.session().unwrap();
    assert_ne!(after.access_token, before.access_token);
    assert_eq!(after.refresh_token, "refresh-1");
    assert_eq!(after.expires_at, Some(clock_now_plus(3, 2)));

    let refresh = &server.requests_to(REFRESH_SESSION)[0];
    assert_eq!(refresh.header_value("authorization"), Some("Bearer refresh-0"));
    assert!(refresh.body.is_none());

    let sent = server.requests_to(FEED);
    assert_eq!(
        sent[0].header_value("authorization"),
        Some(format!("Bearer {}", after.access_token).as_str())
    );
}

fn clock_now_plus(elapsed_hours: i64, lifetime_hours: i64) -> chrono::DateTime<chrono::Utc> {
    t0() + Duration::hours(elapsed_hours + lifetime_hours)
}

#[tokio::test]
async fn test_proactive_refresh_near_expiry() {
    let server = FakeServer::new();
    let (client, clock) = client(&server);
    server.with_session_endpoints(Arc::clone(&clock), Duration::minutes(100));
    ok_feed(&server);

    client.authenticate("me.test", "correct-horse").await.unwrap();

    clock.advance(Duration::minutes(80));
    client.get(FEED).await.unwrap();
    assert_eq!(server.calls(REFRESH_SESSION), 0);

    clock.advance(Duration::minutes(11));
    client.get(FEED).await.unwrap();
    assert_eq!(server.calls(REFRESH_SESSION), 1);
}

#[tokio::test]
async fn test_always_unauthorized_bounds_retries() {
    let server = FakeServer::new();
    let (client, clock) = client(&server);
    server.with_session_endpoints(Arc::clone(&clock), Duration::hours(2));
    server.route(FEED, |_| json(401, &serde_json::json!({"error": "ExpiredToken"})));

    client.authenticate("me.test", "correct-horse").await.unwrap();
    let err = client.get(FEED).await.unwrap_err();

    assert!(err.is_unauthorized());
    assert!(err.is_request_error());
    assert_eq!(server.calls(FEED), 2);
    assert_eq!(server.calls(REFRESH_SESSION), 1);
}

#[tokio::test]
async fn test_single_401_is_retried_transparently() {
    let server = FakeServer::new();
    let (client, clock) = client(&server);
    server.with_session_endpoints(Arc::clone(&clock), Duration::hours(2));

    let first = AtomicBool::new(true);
    server.route(FEED, move |_| {
        if first.swap(false, Ordering::SeqCst) {
            json(401, &serde_json::json!({"error": "ExpiredToken"}))
        } else {
            json(200, &serde_json::json!({"feed": []}))
        }
    });

    client.authenticate("me.test", "correct-horse").await.unwrap();
    let response = client
        .request(Method::Get, FEED, None, &[])
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(server.calls(FEED), 2);
    assert_eq!(server.calls(REFRESH_SESSION), 1);
}

#[tokio::test]
async fn test_failed_refresh_keeps_session() {
    let server = FakeServer::new();
    let (client, clock) = client(&server);
    server.with_session_endpoints(Arc::clone(&clock), Duration::hours(2));
    ok_feed(&server);
    client.authenticate("me.test", "correct-horse").await.unwrap();
    let before = client.session().unwrap();

    server.route(REFRESH_SESSION, |_| {
        json(400, &serde_json::json!({"error": "ExpiredToken"}))
    });
    clock.advance(Duration::hours(3));

    let err = client.get(FEED).await.unwrap_err();
    assert!(matches!(err, FetchError::RefreshFailed(_)));
    assert_eq!(server.calls(FEED), 0);
    assert_eq!(client.session(), Some(before));
}

#[tokio::test]
async fn test_concurrent_requests_share_one_refresh() {
    let server = FakeServer::new();
    let (client, clock) = client(&server);
    server.with_session_endpoints(Arc::clone(&clock), Duration::hours(2));
    ok_feed(&server);
    client.authenticate("me.test", "correct-horse").await.unwrap();
    clock.advance(Duration::hours(3));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        tasks.spawn(async move { client.get(FEED).await.map(|r| r.status) });
    }
    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap().unwrap(), 200);
    }

    assert_eq!(server.calls(REFRESH_SESSION), 1);
    assert_eq!(server.calls(FEED), 8);
}

#[tokio::test]
async fn test_restore_then_unknown_expiry_relies_on_401() {
    let server = FakeServer::new();
    let (client, clock) = client(&server);
    server.with_session_endpoints(Arc::clone(&clock), Duration::hours(2));
    ok_feed(&server);

    client
        .restore(skypanel_core::Session {
            access_token: "opaque-token".into(),
            refresh_token: "refresh-0".into(),
            expires_at: Some(t0() - Duration::days(1)),
            issued_at: None,
            did: "did:plc:me".into(),
            handle: "me.test".into(),
            service_url: "https://elsewhere.test".into(),
        })
        .unwrap();

    let session = client.session().unwrap();
    assert!(session.expires_at.is_none());
    assert_eq!(session.service_url, "https://pds.test");

    clock.advance(Duration::days(30));
    client.get(FEED).await.unwrap();
    assert_eq!(server.calls(REFRESH_SESSION), 0);
}

#[tokio::test]
async fn test_session_changes_are_observable() {
    let server = FakeServer::new();
    let (client, clock) = client(&server);
    server.with_session_endpoints(Arc::clone(&clock), Duration::hours(2));
    ok_feed(&server);

    let mut rx = client.subscribe();
    client.authenticate("me.test", "correct-horse").await.unwrap();
    assert!(rx.has_changed().unwrap());
    let _ = rx.borrow_and_update();

    client.refresh().await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(
        rx.borrow_and_update().as_ref().unwrap().refresh_token,
        "refresh-1"
    );

    client.close();
    assert!(rx.borrow_and_update().is_none());
}

#[tokio::test]
async fn test_refresh_without_session() {
    let server = FakeServer::new();
    let (client, _) = client(&server);
    assert!(matches!(
        client.refresh().await,
        Err(FetchError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn test_health_check() {
    let server = FakeServer::new();
    let (client, _) = client(&server);
    server.route("/xrpc/_health", |_| json(200, &serde_json::json!({"version": "0.4"})));

    client.health_check().await.unwrap();
    assert!(server.requests_to("/xrpc/_health")[0]
        .header_value("authorization")
        .is_none());
}
