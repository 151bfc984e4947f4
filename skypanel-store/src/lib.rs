// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `SkyPanel` Store
//!
//! Local state for `SkyPanel`.
//!
//! - [`TtlCache`] - SQLite cache of post rates and last-activity dates
//! - [`SessionStore`] - Session tokens in the keychain, metadata on disk
//! - [`Settings`] - User tunables
//! - [`ActivityAnalyzer`] - Read-through cache in front of the batch fetchers
//!
//! ## Storage Locations
//!
//! - Settings: `~/.config/skypanel/settings.json`
//! - Session metadata: `~/.config/skypanel/session.json`
//! - Cache: `~/.cache/skypanel/cache.db`

pub mod analyzer;
pub mod cache;
pub mod error;
pub mod persistence;
pub mod session_store;
pub mod settings;

pub use analyzer::ActivityAnalyzer;
pub use cache::{CachePayload, TtlCache};
pub use error::StoreError;
pub use persistence::{
    default_cache_db_path, default_cache_dir, default_config_dir, default_session_path,
    default_settings_path,
};
pub use session_store::SessionStore;
pub use settings::Settings;
