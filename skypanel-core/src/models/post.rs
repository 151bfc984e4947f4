//! Posts and profiles as returned by the remote service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;

// ============================================================================
// Timestamps
// ============================================================================

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

// ============================================================================
// Profile
// ============================================================================

/// Public profile view of an account.
///
/// Follower listings return a partial view (counts are usually absent), so
/// everything except `did` and `handle` is optional.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Decentralized identifier.
    pub did: String,
    /// Handle.
    pub handle: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Profile bio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Number of followers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers_count: Option<u64>,
    /// Number of accounts followed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follows_count: Option<u64>,
    /// Number of posts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posts_count: Option<u64>,
    /// Account creation time, as sent by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last indexing time, as sent by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<String>,
}

impl Profile {
    /// Returns the display name, falling back to the handle.
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.handle)
    }
}

// ============================================================================
// Post
// ============================================================================

/// A post from an author feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Record URI.
    pub uri: String,
    /// Content hash.
    #[serde(default)]
    pub cid: String,
    /// Author profile view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Profile>,
    /// Raw record body.
    #[serde(default)]
    pub record: serde_json::Value,
    /// Number of replies.
    #[serde(default)]
    pub reply_count: u64,
    /// Number of reposts.
    #[serde(default)]
    pub repost_count: u64,
    /// Number of likes.
    #[serde(default)]
    pub like_count: u64,
    /// Number of quotes.
    #[serde(default)]
    pub quote_count: u64,
    /// When the server indexed the post, as sent by the server.
    ///
    /// Missing, null or non-string values decode as an empty string so one
    /// bad item does not reject the whole page.
    #[serde(default, deserialize_with = "lenient_string")]
    pub indexed_at: String,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        _ => Ok(String::new()),
    }
}

impl Post {
    /// Parses `indexed_at`; `None` when the server sent something malformed.
    pub fn indexed_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.indexed_at).ok()
    }

    /// The post's text, or `""` when the record carries none.
    pub fn text(&self) -> &str {
        self.record
            .get("text")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
    }
}
