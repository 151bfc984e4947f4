//! In-memory XRPC server for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, TimeZone, Utc};
use skypanel_core::{Clock, ManualClock};
use skypanel_fetch::{HttpError, HttpRequest, HttpResponse, SessionClient, Transport};

pub const CREATE_SESSION: &str = "/xrpc/com.atproto.server.createSession";
pub const REFRESH_SESSION: &str = "/xrpc/com.atproto.server.refreshSession";

type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

static NONCE: AtomicUsize = AtomicUsize::new(0);

/// Unsigned JWT with `iat`/`exp` claims; every call yields a distinct token.
pub fn jwt(issued_at: DateTime<Utc>, lifetime: Duration) -> String {
    let nonce = NONCE.fetch_add(1, Ordering::SeqCst);
    let claims = serde_json::json!({
        "sub": "did:plc:me",
        "iat": issued_at.timestamp(),
        "exp": (issued_at + lifetime).timestamp(),
        "jti": nonce,
    });
    format!(
        "eyJhbGciOiJIUzI1NiJ9.{}.sig",
        BASE64_URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

pub fn json(status: u16, value: &serde_json::Value) -> HttpResponse {
    HttpResponse::new(status, value.to_string())
}

#[derive(Default)]
pub struct FakeServer {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(
        &self,
        path: &str,
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) {
        self.handlers
            .lock()
            .unwrap()
            .insert(path.to_string(), Box::new(handler));
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| path_of(&r.url) == path)
            .cloned()
            .collect()
    }

    /// Session endpoints minting tokens that live `lifetime` from `clock.now()`.
    pub fn with_session_endpoints(&self, clock: Arc<ManualClock>, lifetime: Duration) {
        let login_clock = Arc::clone(&clock);
        self.route(CREATE_SESSION, move |req| {
            let body: serde_json::Value =
                serde_json::from_slice(req.body.as_deref().unwrap_or_default()).unwrap();
            if body["password"] != "correct-horse" {
                return json(
                    401,
                    &serde_json::json!({"error": "AuthenticationRequired", "message": "Invalid identifier or password"}),
                );
            }
            json(
                200,
                &serde_json::json!({
                    "accessJwt": jwt(login_clock.now(), lifetime),
                    "refreshJwt": "refresh-0",
                    "did": "did:plc:me",
                    "handle": body["identifier"],
                }),
            )
        });

        let refreshes = AtomicUsize::new(0);
        self.route(REFRESH_SESSION, move |req| {
            if req.header_value("authorization").is_none_or(|v| !v.starts_with("Bearer refresh-")) {
                return json(400, &serde_json::json!({"error": "InvalidToken"}));
            }
            let n = refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            json(
                200,
                &serde_json::json!({
                    "accessJwt": jwt(clock.now(), lifetime),
                    "refreshJwt": format!("refresh-{n}"),
                    "did": "did:plc:me",
                    "handle": "me.test",
                }),
            )
        });
    }
}

fn path_of(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl Transport for FakeServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let path = path_of(&request.url);
        *self.calls.lock().unwrap().entry(path.clone()).or_default() += 1;
        self.requests.lock().unwrap().push(request.clone());

        let handlers = self.handlers.lock().unwrap();
        Ok(match handlers.get(&path) {
            Some(handler) => handler(&request),
            None => HttpResponse::new(404, "not found"),
        })
    }
}

/// Client wired to `server` and a manual clock at [`t0`].
pub fn client(server: &Arc<FakeServer>) -> (Arc<SessionClient>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let client = Arc::new(SessionClient::new(
        "https://pds.test",
        Arc::clone(server) as Arc<dyn Transport>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));
    (client, clock)
}
