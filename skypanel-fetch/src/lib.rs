// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `SkyPanel` Fetch
//!
//! Network side of `SkyPanel`: authenticated requests, token refresh,
//! bounded fan-out, and post-rate sampling.
//!
//! ## Host APIs
//!
//! - [`host::http`] - [`Transport`] seam and the reqwest-backed [`HttpClient`]
//! - [`host::keychain`] - Secure credential storage (system keychain)
//!
//! ## Session
//!
//! - [`token::TokenClock`] - Decides when an access token needs refreshing
//! - [`session::SessionClient`] - Authenticated requests with single-flight refresh
//! - [`api::BlueskyApi`] - Typed read endpoints
//!
//! ## Activity
//!
//! - [`batch::Batcher`] - Per-identity fan-out under a concurrency ceiling
//! - [`rate::PostRateEngine`] - Posts-per-day over a lookback window
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use skypanel_core::SystemClock;
//! use skypanel_fetch::{BlueskyApi, HttpClient, SessionClient};
//!
//! let client = Arc::new(SessionClient::new(
//!     "https://bsky.social",
//!     Arc::new(HttpClient::new()?),
//!     Arc::new(SystemClock),
//! ));
//! client.authenticate("alice.bsky.social", "app-password").await?;
//!
//! let api = BlueskyApi::new(client);
//! let followers = api.all_followers(&"alice.bsky.social".parse()?, None).await?;
//! ```

pub mod api;
pub mod batch;
pub mod error;
pub mod host;
pub mod rate;
pub mod session;
pub mod token;

// Errors
pub use error::{FetchError, HttpError, KeychainError};

// Host APIs
pub use host::{
    http::{HttpClient, HttpRequest, HttpResponse, Method, Transport},
    keychain::{KeychainApi, MemoryKeychain, SystemKeychain},
};

// Session
pub use api::{
    ActorSearchPage, BlueskyApi, FeedItem, FeedPage, FollowersPage, FollowsPage, PostSearchPage,
    clamp_limit,
};
pub use session::{DEFAULT_SERVICE_URL, SessionClient};
pub use token::{TokenClaims, TokenClock, decode_claims, decode_expiry};

// Activity
pub use batch::{Batcher, DEFAULT_CONCURRENCY, ProgressFn};
pub use rate::{
    DEFAULT_LOOKBACK_DAYS, DEFAULT_SAMPLE_SIZE, LAST_POST_SAMPLE, PostRateEngine,
    latest_post_time, rate_from_posts,
};

// Cancellation tokens are part of the Batcher API.
pub use tokio_util::sync::CancellationToken;
