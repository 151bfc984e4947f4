//! Shared command context: settings, saved session, API client, cache.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, warn};

use skypanel_core::{Clock, Session, SystemClock};
use skypanel_fetch::{BlueskyApi, HttpClient, SessionClient};
use skypanel_store::{SessionStore, Settings, TtlCache, default_cache_db_path};

/// Returned when a command needs a session and none is saved.
#[derive(Debug)]
pub struct NotLoggedIn;

impl fmt::Display for NotLoggedIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("not authenticated: run 'skycli login' first")
    }
}

impl std::error::Error for NotLoggedIn {}

/// Everything a command needs to talk to the service.
pub struct App {
    pub settings: Settings,
    pub clock: Arc<dyn Clock>,
    pub client: Arc<SessionClient>,
    pub store: SessionStore,
    changes: watch::Receiver<Option<Session>>,
}

impl App {
    /// Loads settings and builds an unauthenticated client for `service_url`.
    pub async fn new(service_url: Option<&str>) -> Result<Self> {
        let settings = Settings::load_or_default().await;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let transport = HttpClient::with_timeout(settings.request_timeout())
            .context("failed to build HTTP client")?;
        let client = Arc::new(SessionClient::new(
            service_url.unwrap_or(&settings.service_url),
            Arc::new(transport),
            Arc::clone(&clock),
        ));
        let changes = client.subscribe();
        let store = SessionStore::with_defaults().with_clock(Arc::clone(&clock));

        Ok(Self {
            settings,
            clock,
            client,
            store,
            changes,
        })
    }

    /// Builds a client from the saved session, failing with [`NotLoggedIn`] if none.
    pub async fn authenticated() -> Result<Self> {
        let store = SessionStore::with_defaults();
        let saved = store
            .load()
            .await
            .context("failed to read saved session")?
            .ok_or(NotLoggedIn)?;

        let mut app = Self::new(Some(&saved.service_url)).await?;
        app.client
            .restore(saved)
            .context("saved session is unusable")?;
        // Only changes after the restore need persisting.
        app.changes = app.client.subscribe();
        app.store = store.with_clock(Arc::clone(&app.clock));
        Ok(app)
    }

    /// Typed API over the session client.
    pub fn api(&self) -> BlueskyApi {
        BlueskyApi::new(Arc::clone(&self.client))
    }

    /// Opens the activity cache with the configured TTL.
    pub fn open_cache(&self) -> Result<TtlCache> {
        let path = default_cache_db_path();
        let cache = TtlCache::open(&path, Arc::clone(&self.clock))
            .with_context(|| format!("failed to open cache at {}", path.display()))?;
        Ok(cache.with_ttl(self.settings.cache_ttl()))
    }

    /// Saves tokens rotated during the command, if any.
    pub async fn persist_rotated_tokens(&mut self) {
        if !self.changes.has_changed().unwrap_or(false) {
            return;
        }
        let current = self.changes.borrow_and_update().clone();
        match current {
            Some(session) => match self.store.update_tokens(&session).await {
                Ok(()) => debug!("Persisted refreshed tokens"),
                Err(e) => warn!(error = %e, "Failed to persist refreshed tokens"),
            },
            None => debug!("Session ended during command"),
        }
    }
}
