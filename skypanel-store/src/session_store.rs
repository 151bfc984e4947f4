//! Session persistence across runs.
//!
//! Tokens go to the keychain; the non-secret metadata (DID, handle, service
//! URL) goes to a JSON file. A session is only restored when both halves
//! are present.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use skypanel_core::{Clock, Session, SystemClock};
use skypanel_fetch::host::keychain::{accounts, services};
use skypanel_fetch::{KeychainApi, SystemKeychain};

use crate::error::StoreError;
use crate::persistence::{default_session_path, load_json, remove_file_if_exists, save_json};

/// Non-secret half of a saved session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionMetadata {
    did: String,
    handle: String,
    service_url: String,
    saved_at: DateTime<Utc>,
}

/// Saves and restores sessions.
pub struct SessionStore {
    keychain: Arc<dyn KeychainApi>,
    metadata_path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("metadata_path", &self.metadata_path)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Creates a store over the given keychain and metadata file.
    pub fn new(keychain: Arc<dyn KeychainApi>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            keychain,
            metadata_path: metadata_path.into(),
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Stamps saved metadata with `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Creates a store using the system keychain and the default metadata path.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(SystemKeychain::new()), default_session_path())
    }

    /// Path of the metadata file.
    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Persists `session`, replacing anything saved before.
    pub async fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.write_tokens(session).await?;

        let metadata = SessionMetadata {
            did: session.did.clone(),
            handle: session.handle.clone(),
            service_url: session.service_url.clone(),
            saved_at: self.clock.now(),
        };
        save_json(&self.metadata_path, &metadata).await?;

        info!(handle = %session.handle, "Session saved");
        Ok(())
    }

    /// Writes only the tokens, leaving metadata alone.
    ///
    /// Used after a refresh, when the account has not changed.
    pub async fn update_tokens(&self, session: &Session) -> Result<(), StoreError> {
        self.write_tokens(session).await?;
        debug!(handle = %session.handle, "Session tokens updated");
        Ok(())
    }

    async fn write_tokens(&self, session: &Session) -> Result<(), StoreError> {
        self.keychain
            .set(services::SESSION, accounts::ACCESS_TOKEN, &session.access_token)
            .await?;
        self.keychain
            .set(services::SESSION, accounts::REFRESH_TOKEN, &session.refresh_token)
            .await?;
        Ok(())
    }

    /// Loads the saved session, if both metadata and tokens are present.
    ///
    /// Expiry fields are left empty; the session client re-derives them from
    /// the access token on restore.
    pub async fn load(&self) -> Result<Option<Session>, StoreError> {
        let metadata: SessionMetadata = match load_json(&self.metadata_path).await {
            Ok(metadata) => metadata,
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.metadata_path.display(), "No saved session");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let access = self
            .keychain
            .get(services::SESSION, accounts::ACCESS_TOKEN)
            .await?;
        let refresh = self
            .keychain
            .get(services::SESSION, accounts::REFRESH_TOKEN)
            .await?;

        let (Some(access_token), Some(refresh_token)) = (access, refresh) else {
            warn!(handle = %metadata.handle, "Session metadata found but tokens are missing");
            return Ok(None);
        };

        Ok(Some(Session {
            access_token,
            refresh_token,
            expires_at: None,
            issued_at: None,
            did: metadata.did,
            handle: metadata.handle,
            service_url: metadata.service_url,
        }))
    }

    /// Removes tokens and metadata. Returns true if metadata existed.
    pub async fn clear(&self) -> Result<bool, StoreError> {
        self.keychain
            .delete(services::SESSION, accounts::ACCESS_TOKEN)
            .await?;
        self.keychain
            .delete(services::SESSION, accounts::REFRESH_TOKEN)
            .await?;
        let removed = remove_file_if_exists(&self.metadata_path).await?;
        info!("Session cleared");
        Ok(removed)
    }

    /// Returns true if a complete session is saved.
    pub async fn has_session(&self) -> bool {
        matches!(self.load().await, Ok(Some(_)))
    }
}
