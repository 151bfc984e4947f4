//! User settings.
//!
//! Stored as JSON in the config directory. Every field has a default, so a
//! partial or missing file still yields usable settings.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::persistence::{default_settings_path, load_json, load_json_or_default, save_json};

/// Tunables for fetching, caching and activity classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Service base URL used for login.
    pub service_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Fan-out ceiling for per-identity fetches.
    pub concurrency: usize,
    /// Cache entry lifetime in hours.
    pub cache_ttl_hours: u32,
    /// Posts sampled per account when computing a rate.
    pub sample_size: usize,
    /// Lookback window in days for post rates.
    pub lookback_days: u32,
    /// Posts per day at or below which an account counts as quiet.
    pub quiet_threshold: f64,
    /// Days without a post after which an account counts as inactive.
    pub inactive_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_url: skypanel_fetch::DEFAULT_SERVICE_URL.to_string(),
            request_timeout_secs: 30,
            concurrency: skypanel_fetch::DEFAULT_CONCURRENCY,
            cache_ttl_hours: 24,
            sample_size: skypanel_fetch::DEFAULT_SAMPLE_SIZE,
            lookback_days: skypanel_fetch::DEFAULT_LOOKBACK_DAYS,
            quiet_threshold: 1.0,
            inactive_days: 60,
        }
    }
}

impl Settings {
    /// Loads settings from `path`. Missing files are an error.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let settings: Self = load_json(path).await?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from the default path, falling back to defaults.
    pub async fn load_or_default() -> Self {
        let path = default_settings_path();
        let settings: Self = load_json_or_default(&path).await;
        if let Err(e) = settings.validate() {
            tracing::warn!(error = %e, "Invalid settings, using defaults");
            return Self::default();
        }
        debug!(path = %path.display(), "Settings loaded");
        settings
    }

    /// Saves settings to `path`.
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        self.validate()?;
        save_json(path, self).await
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.service_url.trim().is_empty() {
            return Err(StoreError::Config("serviceUrl must not be empty".into()));
        }
        if self.concurrency == 0 {
            return Err(StoreError::Config("concurrency must be at least 1".into()));
        }
        if self.lookback_days == 0 {
            return Err(StoreError::Config("lookbackDays must be at least 1".into()));
        }
        if !self.quiet_threshold.is_finite() || self.quiet_threshold < 0.0 {
            return Err(StoreError::Config(
                "quietThreshold must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    /// Cache TTL as a duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::hours(i64::from(self.cache_ttl_hours))
    }

    /// Request timeout as a std duration.
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
