//! TTL-stamped cache entries.
//!
//! A [`CacheEntry`] pairs an identity with a payload and the window during
//! which it may be served. Two payload shapes exist: [`PostRate`] and
//! [`Activity`]. Both share the same lifecycle: stamped on write, served
//! while `expires_at > now`, overwritten in place on recomputation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{ActivitySample, Identity, PostRateSample};

/// Default cache lifetime in hours.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Default cache lifetime.
pub fn default_ttl() -> Duration {
    Duration::hours(DEFAULT_TTL_HOURS)
}

// ============================================================================
// Cache Entry
// ============================================================================

/// A cached payload keyed by identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<P> {
    /// Cache key.
    pub identity: Identity,
    /// Cached value.
    pub payload: P,
    /// When the payload was computed. Defaults to the write time.
    pub fetched_at: Option<DateTime<Utc>>,
    /// When the entry stops being served. Defaults to `fetched_at + ttl`.
    pub expires_at: Option<DateTime<Utc>>,
}

impl<P> CacheEntry<P> {
    /// Creates an unstamped entry.
    pub fn new(identity: Identity, payload: P) -> Self {
        Self {
            identity,
            payload,
            fetched_at: None,
            expires_at: None,
        }
    }

    /// Fills in missing timestamps.
    #[must_use]
    pub fn stamped(mut self, now: DateTime<Utc>, ttl: Duration) -> Self {
        let fetched_at = *self.fetched_at.get_or_insert(now);
        self.expires_at.get_or_insert(fetched_at + ttl);
        self
    }

    /// Returns true if the entry is still served at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp > now)
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Cached post-rate measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRate {
    /// Posts per day over the lookback window.
    pub posts_per_day: f64,
    /// Most recent post.
    pub last_post_at: Option<DateTime<Utc>>,
    /// Number of posts sampled.
    pub sample_size: usize,
}

/// Cached last-activity timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Most recent post, absent if the account never posted.
    pub last_post_at: Option<DateTime<Utc>>,
}

/// Cached post rate.
pub type PostRateCacheEntry = CacheEntry<PostRate>;

/// Cached last activity.
pub type ActivityCacheEntry = CacheEntry<Activity>;

impl From<&PostRateSample> for PostRateCacheEntry {
    fn from(sample: &PostRateSample) -> Self {
        CacheEntry::new(
            sample.identity.clone(),
            PostRate {
                posts_per_day: sample.posts_per_day,
                last_post_at: sample.last_post_at,
                sample_size: sample.sample_size,
            },
        )
    }
}

impl From<PostRateCacheEntry> for PostRateSample {
    fn from(entry: PostRateCacheEntry) -> Self {
        Self {
            identity: entry.identity,
            posts_per_day: entry.payload.posts_per_day,
            last_post_at: entry.payload.last_post_at,
            sample_size: entry.payload.sample_size,
        }
    }
}

impl From<&ActivitySample> for ActivityCacheEntry {
    fn from(sample: &ActivitySample) -> Self {
        CacheEntry::new(
            sample.identity.clone(),
            Activity {
                last_post_at: sample.last_post_at,
            },
        )
    }
}

impl From<ActivityCacheEntry> for ActivitySample {
    fn from(entry: ActivityCacheEntry) -> Self {
        Self {
            identity: entry.identity,
            last_post_at: entry.payload.last_post_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stamped_defaults() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let entry = CacheEntry::new(
            Identity::new("a.test").unwrap(),
            Activity { last_post_at: None },
        )
        .stamped(now, default_ttl());

        assert_eq!(entry.fetched_at, Some(now));
        assert_eq!(entry.expires_at, Some(now + Duration::hours(24)));
        assert!(entry.is_fresh(now));
        assert!(!entry.is_fresh(now + Duration::hours(24)));
    }

    #[test]
    fn test_stamped_keeps_explicit_values() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let fetched = now - Duration::hours(2);
        let mut entry = CacheEntry::new(
            Identity::new("a.test").unwrap(),
            Activity { last_post_at: None },
        );
        entry.fetched_at = Some(fetched);
        let entry = entry.stamped(now, Duration::hours(1));

        assert_eq!(entry.fetched_at, Some(fetched));
        assert_eq!(entry.expires_at, Some(fetched + Duration::hours(1)));
        assert!(!entry.is_fresh(now));
    }

    #[test]
    fn test_unstamped_entry_is_not_fresh() {
        let entry = CacheEntry::new(
            Identity::new("a.test").unwrap(),
            Activity { last_post_at: None },
        );
        assert!(!entry.is_fresh(Utc::now()));
    }
}
