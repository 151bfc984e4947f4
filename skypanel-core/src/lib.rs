// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `SkyPanel` Core
//!
//! Core types, models, and traits shared by every `SkyPanel` crate.
//!
//! This crate holds no I/O. It provides:
//!
//! - Domain models (identities, sessions, posts, profiles)
//! - Activity metrics (post rates, last-activity samples)
//! - Cache entry shapes with their TTL lifecycle
//! - The [`Clock`] abstraction used wherever "now" matters
//! - Collaborator traits implemented by the network layer
//!
//! ## Key Types
//!
//! ### Accounts
//! - [`Identity`] - A handle or DID naming one remote account
//! - [`Session`] - Tokens and account metadata for an authenticated client
//! - [`Profile`] - Public profile view of an account
//!
//! ### Activity
//! - [`Post`] - A post as returned by feed endpoints
//! - [`PostRateSample`] - Normalized posts-per-day over a lookback window
//! - [`ActivitySample`] - Last post timestamp for an account
//!
//! ### Caching
//! - [`CacheEntry`] - Identity-keyed payload with `fetched_at` / `expires_at`
//! - [`PostRate`] / [`Activity`] - The two cached payload shapes

pub mod clock;
pub mod error;
pub mod models;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CoreError;

pub use models::{
    // Accounts
    Identity,
    Profile,
    Session,
    // Activity
    ActivitySample,
    Post,
    PostRateSample,
    parse_timestamp,
    // Caching
    Activity,
    ActivityCacheEntry,
    CacheEntry,
    DEFAULT_TTL_HOURS,
    PostRate,
    PostRateCacheEntry,
    default_ttl,
};

pub use traits::{PostSource, ProfileSource};
