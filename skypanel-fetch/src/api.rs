//! Typed bindings for the read-only XRPC endpoints.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::form_urlencoded;

use skypanel_core::{Identity, Post, PostSource, Profile, ProfileSource};

use crate::error::FetchError;
use crate::rate::{LAST_POST_SAMPLE, latest_post_time};
use crate::session::SessionClient;

/// Page size used when the caller passes zero.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Largest page the service accepts.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Clamps a page size into `1..=100`, mapping zero to the default.
pub fn clamp_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_PAGE_LIMIT
    } else {
        limit.min(MAX_PAGE_LIMIT)
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// One item of a feed: a post plus optional repost/reply context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// The post.
    pub post: Post,
    /// Why the post appears (e.g. a repost).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<serde_json::Value>,
    /// Thread context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<serde_json::Value>,
}

/// A page of feed items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedPage {
    /// Cursor for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Items, most recent first.
    #[serde(default)]
    pub feed: Vec<FeedItem>,
}

/// A page of followers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowersPage {
    /// The account whose followers are listed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Profile>,
    /// Cursor for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Followers.
    #[serde(default)]
    pub followers: Vec<Profile>,
}

/// A page of followed accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowsPage {
    /// The account whose follows are listed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Profile>,
    /// Cursor for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Followed accounts.
    #[serde(default)]
    pub follows: Vec<Profile>,
}

/// A page of actor search results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSearchPage {
    /// Cursor for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Matching actors.
    #[serde(default)]
    pub actors: Vec<Profile>,
}

/// A page of post search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSearchPage {
    /// Cursor for the next page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Estimated total hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hits_total: Option<u64>,
    /// Matching posts.
    #[serde(default)]
    pub posts: Vec<Post>,
}

// ============================================================================
// Query Builder
// ============================================================================

struct Query(form_urlencoded::Serializer<'static, String>);

impl Query {
    fn new() -> Self {
        Self(form_urlencoded::Serializer::new(String::new()))
    }

    fn pair(mut self, key: &str, value: &str) -> Self {
        self.0.append_pair(key, value);
        self
    }

    fn cursor(self, cursor: Option<&str>) -> Self {
        match cursor.filter(|c| !c.is_empty()) {
            Some(c) => self.pair("cursor", c),
            None => self,
        }
    }

    fn path(mut self, method: &str) -> String {
        format!("/xrpc/{method}?{}", self.0.finish())
    }
}

// ============================================================================
// API
// ============================================================================

/// Read endpoints of the social service, issued through a [`SessionClient`].
#[derive(Debug, Clone)]
pub struct BlueskyApi {
    client: Arc<SessionClient>,
}

impl BlueskyApi {
    /// Wraps a session client.
    pub fn new(client: Arc<SessionClient>) -> Self {
        Self { client }
    }

    /// The underlying session client.
    pub fn client(&self) -> &Arc<SessionClient> {
        &self.client
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let response = self.client.get(path).await?;
        if !response.is_success() {
            return Err(FetchError::Status {
                status: response.status,
                body: response.text(),
            });
        }
        response
            .json()
            .map_err(|e| FetchError::MalformedResponse(e.to_string()))
    }

    /// Posts by `actor`, most recent first.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn get_author_feed(
        &self,
        actor: &Identity,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<FeedPage, FetchError> {
        let path = Query::new()
            .pair("actor", actor.as_str())
            .pair("limit", &clamp_limit(limit).to_string())
            .cursor(cursor)
            .path("app.bsky.feed.getAuthorFeed");
        self.get_json(&path).await
    }

    /// The authenticated account's home timeline.
    #[instrument(skip(self))]
    pub async fn get_timeline(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<FeedPage, FetchError> {
        let path = Query::new()
            .pair("limit", &clamp_limit(limit).to_string())
            .cursor(cursor)
            .path("app.bsky.feed.getTimeline");
        self.get_json(&path).await
    }

    /// Full profile for `actor`.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn get_profile(&self, actor: &Identity) -> Result<Profile, FetchError> {
        let path = Query::new()
            .pair("actor", actor.as_str())
            .path("app.bsky.actor.getProfile");
        self.get_json(&path).await
    }

    /// One page of accounts following `actor`.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn get_followers(
        &self,
        actor: &Identity,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<FollowersPage, FetchError> {
        let path = Query::new()
            .pair("actor", actor.as_str())
            .pair("limit", &clamp_limit(limit).to_string())
            .cursor(cursor)
            .path("app.bsky.graph.getFollowers");
        self.get_json(&path).await
    }

    /// One page of accounts `actor` follows.
    #[instrument(skip(self), fields(actor = %actor))]
    pub async fn get_follows(
        &self,
        actor: &Identity,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<FollowsPage, FetchError> {
        let path = Query::new()
            .pair("actor", actor.as_str())
            .pair("limit", &clamp_limit(limit).to_string())
            .cursor(cursor)
            .path("app.bsky.graph.getFollows");
        self.get_json(&path).await
    }

    /// Searches actors by name or handle.
    #[instrument(skip(self))]
    pub async fn search_actors(
        &self,
        query: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ActorSearchPage, FetchError> {
        if query.trim().is_empty() {
            return Err(FetchError::InvalidArgument("query is required".into()));
        }
        let path = Query::new()
            .pair("q", query.trim())
            .pair("limit", &clamp_limit(limit).to_string())
            .cursor(cursor)
            .path("app.bsky.actor.searchActors");
        self.get_json(&path).await
    }

    /// Searches posts by text.
    #[instrument(skip(self))]
    pub async fn search_posts(
        &self,
        query: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<PostSearchPage, FetchError> {
        if query.trim().is_empty() {
            return Err(FetchError::InvalidArgument("query is required".into()));
        }
        let path = Query::new()
            .pair("q", query.trim())
            .pair("limit", &clamp_limit(limit).to_string())
            .cursor(cursor)
            .path("app.bsky.feed.searchPosts");
        self.get_json(&path).await
    }

    /// Timestamp of `actor`'s most recent post.
    ///
    /// Looks at a small sample and takes the first parseable timestamp; `None`
    /// when the account never posted or every sampled timestamp is malformed.
    pub async fn get_last_post_date(
        &self,
        actor: &Identity,
    ) -> Result<Option<DateTime<Utc>>, FetchError> {
        let page = self.get_author_feed(actor, LAST_POST_SAMPLE, None).await?;
        let posts: Vec<Post> = page.feed.into_iter().map(|item| item.post).collect();
        Ok(latest_post_time(&posts))
    }

    /// Walks follower pages until exhausted or `max` accounts are collected.
    pub async fn all_followers(
        &self,
        actor: &Identity,
        max: Option<usize>,
    ) -> Result<Vec<Profile>, FetchError> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .get_followers(actor, MAX_PAGE_LIMIT, cursor.as_deref())
                .await?;
            out.extend(page.followers);
            if max.is_some_and(|m| out.len() >= m) {
                break;
            }
            match page.cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        if let Some(max) = max {
            out.truncate(max);
        }
        debug!(actor = %actor, count = out.len(), "Collected followers");
        Ok(out)
    }

    /// Walks follows pages until exhausted or `max` accounts are collected.
    pub async fn all_follows(
        &self,
        actor: &Identity,
        max: Option<usize>,
    ) -> Result<Vec<Profile>, FetchError> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .get_follows(actor, MAX_PAGE_LIMIT, cursor.as_deref())
                .await?;
            out.extend(page.follows);
            if max.is_some_and(|m| out.len() >= m) {
                break;
            }
            match page.cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        if let Some(max) = max {
            out.truncate(max);
        }
        debug!(actor = %actor, count = out.len(), "Collected follows");
        Ok(out)
    }
}

// ============================================================================
// Collaborator Traits
// ============================================================================

impl PostSource for BlueskyApi {
    type Error = FetchError;

    async fn fetch_recent_posts(
        &self,
        identity: &Identity,
        limit: usize,
    ) -> Result<Vec<Post>, FetchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let page = self.get_author_feed(identity, limit, None).await?;
        Ok(page.feed.into_iter().map(|item| item.post).collect())
    }
}

impl ProfileSource for BlueskyApi {
    type Error = FetchError;

    async fn fetch_profile(&self, identity: &Identity) -> Result<Profile, FetchError> {
        self.get_profile(identity).await
    }
}
