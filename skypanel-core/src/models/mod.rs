//! Domain models for `SkyPanel`.
//!
//! ## Submodules
//!
//! - [`identity`] - Account identifiers (handles and DIDs)
//! - [`session`] - Authenticated session state
//! - [`post`] - Posts, profiles, and timestamp parsing
//! - [`rate`] - Activity metrics derived from posts
//! - [`cache`] - TTL-stamped cache entries

mod cache;
mod identity;
mod post;
mod rate;
mod session;

pub use cache::{
    Activity, ActivityCacheEntry, CacheEntry, DEFAULT_TTL_HOURS, PostRate, PostRateCacheEntry,
    default_ttl,
};
pub use identity::Identity;
pub use post::{Post, Profile, parse_timestamp};
pub use rate::{ActivitySample, PostRateSample};
pub use session::Session;
