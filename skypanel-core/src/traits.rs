//! Collaborator traits.
//!
//! The activity computations only need two capabilities from the remote
//! service: listing an account's recent posts and fetching its profile.
//! The network layer implements these; tests substitute in-memory sources.

use std::future::Future;

use crate::models::{Identity, Post, Profile};

/// Lists an account's most recent posts.
pub trait PostSource: Send + Sync {
    /// Error produced when the listing fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetches up to `limit` posts for `identity`, most recent first.
    fn fetch_recent_posts(
        &self,
        identity: &Identity,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Post>, Self::Error>> + Send;
}

/// Fetches a full profile for an account.
pub trait ProfileSource: Send + Sync {
    /// Error produced when the lookup fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetches the profile for `identity`.
    fn fetch_profile(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<Profile, Self::Error>> + Send;
}
