//! Authenticated session state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tokens and account metadata held by an authenticated client.
///
/// `expires_at` and `issued_at` are decoded from the access token; either is
/// `None` when the token did not carry the claim.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Short-lived bearer token.
    pub access_token: String,
    /// Long-lived token used to mint new access tokens.
    pub refresh_token: String,
    /// When the access token expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// When the access token was issued.
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
    /// Decentralized identifier of the account.
    pub did: String,
    /// Handle of the account.
    pub handle: String,
    /// Base URL of the service that issued the tokens.
    pub service_url: String,
}

impl Session {
    /// Returns true if the session carries an access token.
    pub fn is_authenticated(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Returns true if `now` is at or past the known expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

// Tokens never reach logs through Debug.
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("issued_at", &self.issued_at)
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("service_url", &self.service_url)
            .finish()
    }
}
