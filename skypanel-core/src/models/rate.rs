//! Activity metrics derived from an account's posts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::Identity;

// ============================================================================
// Post Rate
// ============================================================================

/// Posting frequency for one account over a lookback window.
///
/// `posts_per_day == 0.0` with `sample_size == 0` means no posts were
/// observed at all. A zero rate with a nonzero sample means the account has
/// posts, just none inside the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRateSample {
    /// The account measured.
    pub identity: Identity,
    /// Posts inside the window divided by the window length in days.
    pub posts_per_day: f64,
    /// Timestamp of the most recent post, if any.
    pub last_post_at: Option<DateTime<Utc>>,
    /// Number of posts fetched.
    pub sample_size: usize,
}

impl PostRateSample {
    /// Sample for an account with no posts.
    pub fn empty(identity: Identity) -> Self {
        Self {
            identity,
            posts_per_day: 0.0,
            last_post_at: None,
            sample_size: 0,
        }
    }

    /// Returns true if any posts were observed.
    pub fn has_posts(&self) -> bool {
        self.sample_size > 0
    }

    /// Returns true if the rate is at or below `threshold` posts per day.
    pub fn is_quiet(&self, threshold: f64) -> bool {
        self.posts_per_day <= threshold
    }
}

// ============================================================================
// Last Activity
// ============================================================================

/// When an account last posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySample {
    /// The account measured.
    pub identity: Identity,
    /// Timestamp of the most recent post, if any.
    pub last_post_at: Option<DateTime<Utc>>,
}

impl ActivitySample {
    /// Returns true if the account has ever posted.
    pub fn has_posted(&self) -> bool {
        self.last_post_at.is_some()
    }

    /// Whole days between the last post and `now`.
    pub fn days_since_post(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_post_at.map(|at| (now - at).num_days())
    }

    /// Returns true if the account has not posted within `days` days.
    ///
    /// Accounts that never posted are inactive.
    pub fn is_inactive(&self, days: u32, now: DateTime<Utc>) -> bool {
        match self.last_post_at {
            None => true,
            Some(at) => now - at > Duration::days(i64::from(days)),
        }
    }
}

impl From<&PostRateSample> for ActivitySample {
    fn from(sample: &PostRateSample) -> Self {
        Self {
            identity: sample.identity.clone(),
            last_post_at: sample.last_post_at,
        }
    }
}
