//! Cache-aware activity analysis.
//!
//! [`ActivityAnalyzer`] answers "how active is each of these accounts" for a
//! list of identities. It serves what it can from the [`TtlCache`], fans out
//! over the misses with a [`Batcher`], and writes the fresh results back. A
//! failing cache degrades to a full fetch; it never fails the analysis.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use skypanel_core::{
    Activity, ActivityCacheEntry, ActivitySample, CacheEntry, Identity, PostRate, PostRateCacheEntry,
    PostRateSample, PostSource,
};
use skypanel_fetch::{
    Batcher, DEFAULT_LOOKBACK_DAYS, DEFAULT_SAMPLE_SIZE, PostRateEngine, ProgressFn,
};

use crate::cache::{CachePayload, TtlCache};

/// Computes post rates and last-activity dates with read-through caching.
pub struct ActivityAnalyzer<S> {
    engine: PostRateEngine<S>,
    cache: Option<TtlCache>,
    batcher: Batcher,
    sample_size: usize,
    lookback_days: u32,
}

impl<S> std::fmt::Debug for ActivityAnalyzer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityAnalyzer")
            .field("cache", &self.cache)
            .field("batcher", &self.batcher)
            .field("sample_size", &self.sample_size)
            .field("lookback_days", &self.lookback_days)
            .finish_non_exhaustive()
    }
}

impl<S: PostSource + 'static> ActivityAnalyzer<S> {
    /// Creates an uncached analyzer.
    pub fn new(engine: PostRateEngine<S>, batcher: Batcher) -> Self {
        Self {
            engine,
            cache: None,
            batcher,
            sample_size: DEFAULT_SAMPLE_SIZE,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }

    /// Enables read-through caching.
    #[must_use]
    pub fn with_cache(mut self, cache: TtlCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Overrides how many posts are sampled and how far back the rate looks.
    #[must_use]
    pub fn with_sampling(mut self, sample_size: usize, lookback_days: u32) -> Self {
        self.sample_size = sample_size;
        self.lookback_days = lookback_days;
        self
    }

    /// The batcher used for fan-out.
    pub fn batcher(&self) -> &Batcher {
        &self.batcher
    }

    /// Post rates for `identities`. Identities whose fetch failed are omitted.
    pub async fn post_rates(
        &self,
        identities: &[Identity],
        progress: Option<ProgressFn>,
    ) -> HashMap<Identity, PostRateSample> {
        let (mut results, misses) = self.cached::<PostRate, PostRateSample>(identities).await;
        if misses.is_empty() {
            return results;
        }

        let fetched = self
            .batcher
            .batch_post_rates(
                &self.engine,
                &misses,
                self.sample_size,
                self.lookback_days,
                progress,
            )
            .await;

        let entries: Vec<PostRateCacheEntry> = fetched.values().map(CacheEntry::from).collect();
        self.store(entries).await;

        results.extend(fetched);
        results
    }

    /// Last post dates for `identities`. Identities whose fetch failed are omitted.
    pub async fn last_activity(&self, identities: &[Identity]) -> HashMap<Identity, ActivitySample> {
        let (mut results, misses) = self.cached::<Activity, ActivitySample>(identities).await;
        if misses.is_empty() {
            return results;
        }

        let fetched = self
            .batcher
            .batch_last_post_dates(Arc::clone(self.engine.source()), &misses)
            .await;

        let entries: Vec<ActivityCacheEntry> = fetched.values().map(CacheEntry::from).collect();
        self.store(entries).await;

        results.extend(fetched);
        results
    }

    /// Splits `identities` into cached results and misses.
    async fn cached<P, T>(&self, identities: &[Identity]) -> (HashMap<Identity, T>, Vec<Identity>)
    where
        P: CachePayload,
        T: From<CacheEntry<P>>,
    {
        let Some(cache) = &self.cache else {
            return (HashMap::new(), identities.to_vec());
        };

        let hits = match cache.get_many::<P>(identities).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(table = P::TABLE, error = %e, "Cache read failed, fetching everything");
                HashMap::new()
            }
        };

        let misses: Vec<Identity> = identities
            .iter()
            .filter(|id| !hits.contains_key(*id))
            .cloned()
            .collect();
        info!(
            table = P::TABLE,
            hits = hits.len(),
            misses = misses.len(),
            "Activity cache lookup"
        );

        let results = hits
            .into_iter()
            .map(|(id, entry)| (id, T::from(entry)))
            .collect();
        (results, misses)
    }

    async fn store<P: CachePayload>(&self, entries: Vec<CacheEntry<P>>) {
        let Some(cache) = &self.cache else {
            return;
        };
        if entries.is_empty() {
            return;
        }
        match cache.put_many(entries).await {
            Ok(count) => debug!(table = P::TABLE, count, "Cached fresh results"),
            Err(e) => warn!(table = P::TABLE, error = %e, "Cache write failed"),
        }
    }
}
