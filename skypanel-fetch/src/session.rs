//! Session-aware request issuance.
//!
//! [`SessionClient`] owns the authenticated [`Session`] and is the only
//! component that mutates it. Every authenticated request goes through
//! [`SessionClient::request`], which:
//!
//! 1. fails with [`FetchError::NotAuthenticated`] when no session is held,
//! 2. refreshes proactively when the [`TokenClock`] says the access token is
//!    close to expiry,
//! 3. sends the request with a bearer header,
//! 4. on `401`, refreshes once and retries once. A second `401` is returned
//!    as [`FetchError::Status`].
//!
//! Refreshes are single-flight: concurrent callers that saw the same stale
//! access token wait on one refresh instead of each rotating the tokens.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument, warn};

use skypanel_core::{Clock, Session};

use crate::error::FetchError;
use crate::host::http::{HttpRequest, HttpResponse, Method, Transport};
use crate::token::TokenClock;

/// Default service URL.
pub const DEFAULT_SERVICE_URL: &str = "https://bsky.social";

const CREATE_SESSION: &str = "/xrpc/com.atproto.server.createSession";
const REFRESH_SESSION: &str = "/xrpc/com.atproto.server.refreshSession";
const HEALTH: &str = "/xrpc/_health";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    access_jwt: String,
    refresh_jwt: String,
    #[serde(default)]
    did: String,
    #[serde(default)]
    handle: String,
}

#[derive(Deserialize)]
struct XrpcError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Human-readable description of a failed response.
fn describe_failure(response: &HttpResponse) -> String {
    match response.json::<XrpcError>() {
        Ok(XrpcError {
            error: Some(error),
            message,
        }) => match message {
            Some(message) => format!("{} {error}: {message}", response.status),
            None => format!("{} {error}", response.status),
        },
        _ => format!("{} {}", response.status, response.text()),
    }
}

// ============================================================================
// Session Client
// ============================================================================

/// Authenticated client for one account on one service.
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    service_url: String,
    session: watch::Sender<Option<Session>>,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("service_url", &self.service_url)
            .field("session", &*self.session.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    /// Creates an unauthenticated client for `service_url`.
    pub fn new(
        service_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let service_url = service_url.into().trim_end_matches('/').to_string();
        let (session, _) = watch::channel(None);
        Self {
            transport,
            clock,
            service_url,
            session,
            refresh_lock: Mutex::new(()),
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Base URL requests are issued against.
    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    /// Returns true if a session with an access token is held.
    pub fn is_authenticated(&self) -> bool {
        self.session
            .borrow()
            .as_ref()
            .is_some_and(Session::is_authenticated)
    }

    /// DID of the authenticated account.
    pub fn did(&self) -> Option<String> {
        self.session.borrow().as_ref().map(|s| s.did.clone())
    }

    /// Handle of the authenticated account.
    pub fn handle(&self) -> Option<String> {
        self.session.borrow().as_ref().map(|s| s.handle.clone())
    }

    /// Observes every session change (login, refresh, logout).
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.service_url, path)
    }

    fn build_session(&self, response: SessionResponse, previous: Option<&Session>) -> Session {
        let clock = TokenClock::from_token(&response.access_jwt, self.clock.now());
        let keep = |fresh: String, old: Option<&String>| {
            if fresh.is_empty() {
                old.cloned().unwrap_or_default()
            } else {
                fresh
            }
        };
        Session {
            did: keep(response.did, previous.map(|s| &s.did)),
            handle: keep(response.handle, previous.map(|s| &s.handle)),
            access_token: response.access_jwt,
            refresh_token: response.refresh_jwt,
            expires_at: clock.expires_at(),
            issued_at: clock.issued_at(),
            service_url: self.service_url.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Login / Logout
    // ------------------------------------------------------------------------

    /// Exchanges credentials for a session.
    #[instrument(skip(self, password), fields(identifier = %identifier))]
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Session, FetchError> {
        if identifier.trim().is_empty() {
            return Err(FetchError::InvalidArgument("identifier is required".into()));
        }
        if password.is_empty() {
            return Err(FetchError::InvalidArgument("password is required".into()));
        }

        let body = serde_json::to_vec(&CreateSessionRequest {
            identifier: identifier.trim(),
            password,
        })
        .map_err(|e| FetchError::InvalidArgument(e.to_string()))?;

        let request = HttpRequest::post(self.url(CREATE_SESSION)).json_body(body);
        let response = self.transport.send(request).await?;

        if !response.is_success() {
            warn!(status = response.status, "Credential exchange rejected");
            return Err(FetchError::AuthenticationFailed(describe_failure(
                &response,
            )));
        }

        let parsed: SessionResponse = response.json().map_err(|e| {
            FetchError::AuthenticationFailed(format!("malformed session response: {e}"))
        })?;
        if parsed.access_jwt.is_empty() || parsed.refresh_jwt.is_empty() {
            return Err(FetchError::AuthenticationFailed(
                "session response is missing tokens".into(),
            ));
        }

        let session = self.build_session(parsed, None);
        if session.expires_at.is_none() {
            debug!("Access token expiry unknown; proactive refresh disabled");
        }
        info!(handle = %session.handle, did = %session.did, "Authenticated");

        self.session.send_replace(Some(session.clone()));
        Ok(session)
    }

    /// Adopts previously persisted tokens.
    ///
    /// Expiry is re-derived from the access token; whatever `expires_at` the
    /// caller supplied is ignored.
    pub fn restore(&self, mut session: Session) -> Result<(), FetchError> {
        if !session.is_authenticated() || session.refresh_token.is_empty() {
            return Err(FetchError::InvalidArgument(
                "session is missing tokens".into(),
            ));
        }
        let clock = TokenClock::from_token(&session.access_token, self.clock.now());
        session.expires_at = clock.expires_at();
        session.issued_at = clock.issued_at();
        session.service_url.clone_from(&self.service_url);

        debug!(handle = %session.handle, "Restored session");
        self.session.send_replace(Some(session));
        Ok(())
    }

    /// Clears every session field. Returns true if a session was held.
    pub fn logout(&self) -> bool {
        let previous = self.session.send_replace(None);
        if previous.is_some() {
            info!("Logged out");
        }
        previous.is_some()
    }

    /// Releases the session; same as [`Self::logout`].
    pub fn close(&self) {
        self.logout();
    }

    // ------------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------------

    /// Exchanges the refresh token for new tokens.
    ///
    /// On failure the previous session is left in place.
    pub async fn refresh(&self) -> Result<(), FetchError> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.session().ok_or(FetchError::NotAuthenticated)?;
        self.refresh_locked(&current).await.map(|_| ())
    }

    /// Refreshes unless someone else already replaced `observed`'s tokens.
    ///
    /// With `force == false` the refresh only happens if the token clock
    /// still asks for it once the lock is held.
    async fn refresh_from(&self, observed: &Session, force: bool) -> Result<Session, FetchError> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.session().ok_or(FetchError::NotAuthenticated)?;

        if current.access_token != observed.access_token {
            debug!("Session already refreshed by another caller");
            return Ok(current);
        }
        if !force && !TokenClock::for_session(&current).should_refresh(self.clock.now()) {
            return Ok(current);
        }

        self.refresh_locked(&current).await
    }

    #[instrument(skip_all, fields(handle = %current.handle))]
    async fn refresh_locked(&self, current: &Session) -> Result<Session, FetchError> {
        let request = HttpRequest::post(self.url(REFRESH_SESSION)).bearer(&current.refresh_token);

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| FetchError::RefreshFailed(e.to_string()))?;

        if !response.is_success() {
            warn!(status = response.status, "Refresh rejected");
            return Err(FetchError::RefreshFailed(describe_failure(&response)));
        }

        let parsed: SessionResponse = response
            .json()
            .map_err(|e| FetchError::RefreshFailed(format!("malformed refresh response: {e}")))?;
        if parsed.access_jwt.is_empty() || parsed.refresh_jwt.is_empty() {
            return Err(FetchError::RefreshFailed(
                "refresh response is missing tokens".into(),
            ));
        }

        let refreshed = self.build_session(parsed, Some(current));

        // A logout while the refresh was in flight wins.
        let replaced = self.session.send_if_modified(|slot| match slot {
            Some(existing) if existing.refresh_token == current.refresh_token => {
                *slot = Some(refreshed.clone());
                true
            }
            _ => false,
        });
        if !replaced {
            return Err(FetchError::NotAuthenticated);
        }

        info!(expires_at = ?refreshed.expires_at, "Session refreshed");
        Ok(refreshed)
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Issues an authenticated request against `path` (relative to the service URL).
    ///
    /// Any status other than a repeated `401` is returned as a response; the
    /// caller decides what a non-2xx status means.
    #[instrument(skip(self, body, headers), fields(method = %method, path = %path))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, FetchError> {
        let mut session = self.session().ok_or(FetchError::NotAuthenticated)?;

        if TokenClock::for_session(&session).should_refresh(self.clock.now()) {
            debug!("Access token near expiry, refreshing before request");
            session = self.refresh_from(&session, false).await?;
        }

        let response = self.send_with(&session, method, path, body, headers).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        debug!("Received 401, refreshing and retrying once");
        let session = self.refresh_from(&session, true).await?;
        let retry = self.send_with(&session, method, path, body, headers).await?;

        if retry.is_unauthorized() {
            warn!("Request still unauthorized after refresh");
            return Err(FetchError::Status {
                status: retry.status,
                body: retry.text(),
            });
        }
        Ok(retry)
    }

    /// Authenticated GET.
    pub async fn get(&self, path: &str) -> Result<HttpResponse, FetchError> {
        self.request(Method::Get, path, None, &[]).await
    }

    async fn send_with(
        &self,
        session: &Session,
        method: Method,
        path: &str,
        body: Option<&[u8]>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, FetchError> {
        let mut request = HttpRequest::new(method, self.url(path)).bearer(&session.access_token);
        if let Some(body) = body {
            request = request.json_body(body.to_vec());
        }
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        Ok(self.transport.send(request).await?)
    }

    /// Unauthenticated liveness check.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), FetchError> {
        let response = self.transport.send(HttpRequest::get(self.url(HEALTH))).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(FetchError::Status {
                status: response.status,
                body: response.text(),
            })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use async_trait::async_trait;
    use skypanel_core::SystemClock;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        requests: StdMutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            self.requests.lock().unwrap().push(request);
            Ok(HttpResponse::new(200, "{}"))
        }
    }

    fn restored(client: &SessionClient) {
        client
            .restore(Session {
                access_token: "a".into(),
                refresh_token: "r".into(),
                expires_at: None,
                issued_at: None,
                did: "did:plc:me".into(),
                handle: "me.test".into(),
                service_url: String::new(),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_request_without_session() {
        let client = SessionClient::new(
            DEFAULT_SERVICE_URL,
            Arc::new(Recorder::default()),
            Arc::new(SystemClock),
        );
        let err = client.get("/xrpc/x").await.unwrap_err();
        assert!(matches!(err, FetchError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_request_sets_headers_and_url() {
        let recorder = Arc::new(Recorder::default());
        let client = SessionClient::new(
            "https://pds.example/",
            recorder.clone(),
            Arc::new(SystemClock),
        );
        restored(&client);

        client
            .request(Method::Post, "/xrpc/y", Some(b"{}"), &[("X-Trace", "1")])
            .await
            .unwrap();

        let requests = recorder.requests.lock().unwrap();
        let req = &requests[0];
        assert_eq!(req.url, "https://pds.example/xrpc/y");
        assert_eq!(req.header_value("Authorization"), Some("Bearer a"));
        assert_eq!(req.header_value("content-type"), Some("application/json"));
        assert_eq!(req.header_value("x-trace"), Some("1"));
    }

    #[test]
    fn test_restore_and_logout() {
        let client = SessionClient::new(
            DEFAULT_SERVICE_URL,
            Arc::new(Recorder::default()),
            Arc::new(SystemClock),
        );
        let mut changes = client.subscribe();
        restored(&client);

        assert!(client.is_authenticated());
        assert_eq!(client.handle().as_deref(), Some("me.test"));
        assert_eq!(
            client.session().unwrap().service_url,
            DEFAULT_SERVICE_URL
        );
        assert!(changes.has_changed().unwrap());
        changes.mark_unchanged();

        assert!(client.logout());
        assert!(!client.is_authenticated());
        assert!(client.session().is_none());
        assert!(changes.has_changed().unwrap());
        assert!(!client.logout());
    }

    #[test]
    fn test_restore_rejects_empty_tokens() {
        let client = SessionClient::new(
            DEFAULT_SERVICE_URL,
            Arc::new(Recorder::default()),
            Arc::new(SystemClock),
        );
        let result = client.restore(Session {
            access_token: String::new(),
            refresh_token: "r".into(),
            expires_at: None,
            issued_at: None,
            did: String::new(),
            handle: String::new(),
            service_url: String::new(),
        });
        assert!(matches!(result, Err(FetchError::InvalidArgument(_))));
    }

    #[test]
    fn test_describe_failure_prefers_xrpc_error() {
        let response = HttpResponse::new(
            401,
            r#"{"error":"AuthenticationRequired","message":"Invalid identifier or password"}"#,
        );
        assert_eq!(
            describe_failure(&response),
            "401 AuthenticationRequired: Invalid identifier or password"
        );
        assert_eq!(
            describe_failure(&HttpResponse::new(502, "bad gateway")),
            "502 bad gateway"
        );
    }
}
