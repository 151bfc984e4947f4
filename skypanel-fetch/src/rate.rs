//! Posting-rate sampling.
//!
//! The rate is the number of posts strictly inside the lookback window
//! divided by the nominal window length, not by the span the sample happens
//! to cover. Sparse posters are therefore under-estimated rather than
//! over-estimated.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument, trace};

use skypanel_core::{Clock, Identity, Post, PostRateSample, PostSource};

/// Default number of posts sampled per account.
pub const DEFAULT_SAMPLE_SIZE: usize = 30;

/// Default lookback window in days.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

/// Posts fetched when looking for an account's most recent activity.
pub const LAST_POST_SAMPLE: usize = 5;

/// First parseable timestamp among posts ordered most recent first.
pub fn latest_post_time(posts: &[Post]) -> Option<DateTime<Utc>> {
    posts.iter().find_map(Post::indexed_time)
}

/// Derives a rate from posts ordered most recent first.
///
/// Posts with malformed timestamps are skipped. `last_post_at` is the first
/// parseable timestamp. A zero-day window is treated as one day; a window
/// reaching past the earliest representable instant covers every post.
#[allow(clippy::cast_precision_loss)]
pub fn rate_from_posts(
    identity: Identity,
    posts: &[Post],
    lookback_days: u32,
    now: DateTime<Utc>,
) -> PostRateSample {
    if posts.is_empty() {
        return PostRateSample::empty(identity);
    }

    let days = lookback_days.max(1);
    let cutoff = Duration::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut last_post_at = None;
    let mut within_window = 0usize;
    for post in posts {
        let Some(at) = post.indexed_time() else {
            trace!(uri = %post.uri, indexed_at = %post.indexed_at, "Skipping post with malformed timestamp");
            continue;
        };
        last_post_at.get_or_insert(at);
        if at > cutoff {
            within_window += 1;
        }
    }

    PostRateSample {
        identity,
        posts_per_day: within_window as f64 / f64::from(days),
        last_post_at,
        sample_size: posts.len(),
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Samples recent posts for an account and derives its posting rate.
pub struct PostRateEngine<S> {
    source: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for PostRateEngine<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S> std::fmt::Debug for PostRateEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostRateEngine")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<S: PostSource> PostRateEngine<S> {
    /// Creates an engine over `source`.
    pub fn new(source: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { source, clock }
    }

    /// The post source.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Fetches up to `sample_size` posts and computes the rate over `lookback_days`.
    ///
    /// A zero sample size yields an empty sample without touching the source.
    #[instrument(skip_all, fields(identity = %identity, sample_size = sample_size, lookback_days = lookback_days))]
    pub async fn compute_rate(
        &self,
        identity: &Identity,
        sample_size: usize,
        lookback_days: u32,
    ) -> Result<PostRateSample, S::Error> {
        if sample_size == 0 {
            return Ok(PostRateSample::empty(identity.clone()));
        }
        let posts = self.source.fetch_recent_posts(identity, sample_size).await?;
        let sample = rate_from_posts(identity.clone(), &posts, lookback_days, self.clock.now());
        debug!(
            posts_per_day = sample.posts_per_day,
            sample_size = sample.sample_size,
            "Computed post rate"
        );
        Ok(sample)
    }
}

// ============================================================================
// Tests
// ============================================================================
