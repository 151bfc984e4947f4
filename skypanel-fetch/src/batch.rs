//! Bounded-concurrency fan-out across identities.
//!
//! [`Batcher::run_bounded`] runs one operation per identity, at most
//! `concurrency` at a time, and merges successes into a map. Failures are
//! logged and omitted; callers compare the map against their input when they
//! need to know which identities failed.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use skypanel_core::{ActivitySample, Identity, PostSource, PostRateSample, Profile, ProfileSource};

use crate::rate::{LAST_POST_SAMPLE, PostRateEngine, latest_post_time};

/// Default number of concurrent operations.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Progress callback: `(completed, total)`.
///
/// Invocations are serialized, so `completed` is strictly increasing.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

// ============================================================================
// Batcher
// ============================================================================

/// Runs per-identity operations under a concurrency ceiling.
#[derive(Debug, Clone)]
pub struct Batcher {
    concurrency: usize,
    cancel: CancellationToken,
}

impl Default for Batcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl Batcher {
    /// Creates a batcher. A ceiling of zero is treated as one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops scheduling new work once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The concurrency ceiling.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// The cancellation token observed by this batcher.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs `op` once per distinct identity and collects the successes.
    ///
    /// `progress` fires after every completion, success or failure. After
    /// cancellation no new operation starts, in-flight operations are
    /// dropped, and whatever finished before is returned.
    #[instrument(skip_all, fields(total = identities.len(), concurrency = self.concurrency))]
    pub async fn run_bounded<T, E, F, Fut>(
        &self,
        identities: &[Identity],
        op: F,
        progress: Option<ProgressFn>,
    ) -> HashMap<Identity, T>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(Identity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut seen = HashSet::with_capacity(identities.len());
        let unique: Vec<Identity> = identities
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
        let total = unique.len();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let results = Arc::new(Mutex::new(HashMap::with_capacity(total)));
        let completed = Arc::new(Mutex::new(0usize));
        let op = Arc::new(op);
        let mut tasks = JoinSet::new();

        for identity in unique {
            let permit = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("Batch cancelled, no further work scheduled");
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let op = Arc::clone(&op);
            let results = Arc::clone(&results);
            let completed = Arc::clone(&completed);
            let progress = progress.clone();
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    outcome = op(identity.clone()) => outcome,
                };

                match outcome {
                    Ok(value) => {
                        results.lock().await.insert(identity, value);
                    }
                    Err(e) => debug!(identity = %identity, error = %e, "Batch operation failed"),
                }

                if let Some(progress) = progress {
                    let mut done = completed.lock().await;
                    *done += 1;
                    progress(*done, total);
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Batch worker did not complete");
            }
        }

        let mut results = results.lock().await;
        debug!(succeeded = results.len(), total, "Batch finished");
        std::mem::take(&mut *results)
    }

    // ------------------------------------------------------------------------
    // Batch Operations
    // ------------------------------------------------------------------------

    /// Fetches profiles for every identity.
    pub async fn batch_profiles<S>(
        &self,
        source: Arc<S>,
        identities: &[Identity],
    ) -> HashMap<Identity, Profile>
    where
        S: ProfileSource + 'static,
    {
        self.run_bounded(
            identities,
            move |identity| {
                let source = Arc::clone(&source);
                async move { source.fetch_profile(&identity).await }
            },
            None,
        )
        .await
    }

    /// Fetches the most recent post date for every identity.
    pub async fn batch_last_post_dates<S>(
        &self,
        source: Arc<S>,
        identities: &[Identity],
    ) -> HashMap<Identity, ActivitySample>
    where
        S: PostSource + 'static,
    {
        self.run_bounded(
            identities,
            move |identity| {
                let source = Arc::clone(&source);
                async move {
                    let posts = source
                        .fetch_recent_posts(&identity, LAST_POST_SAMPLE)
                        .await?;
                    let last_post_at = latest_post_time(&posts);
                    Ok::<_, S::Error>(ActivitySample {
                        identity,
                        last_post_at,
                    })
                }
            },
            None,
        )
        .await
    }

    /// Computes post rates for every identity.
    pub async fn batch_post_rates<S>(
        &self,
        engine: &PostRateEngine<S>,
        identities: &[Identity],
        sample_size: usize,
        lookback_days: u32,
        progress: Option<ProgressFn>,
    ) -> HashMap<Identity, PostRateSample>
    where
        S: PostSource + 'static,
    {
        let engine = engine.clone();
        self.run_bounded(
            identities,
            move |identity| {
                let engine = engine.clone();
                async move {
                    engine
                        .compute_rate(&identity, sample_size, lookback_days)
                        .await
                }
            },
            progress,
        )
        .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ids(n: usize) -> Vec<Identity> {
        (0..n)
            .map(|i| Identity::new(format!("user{i}.test")).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_ceiling() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let batcher = Batcher::new(3);
        let op = {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            move |identity: Identity| {
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(identity.to_string())
                }
            }
        };

        let results = batcher.run_bounded(&ids(20), op, None).await;
        assert_eq!(results.len(), 20);
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        assert!(max_seen.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_partial_failure_is_silent() {
        let batcher = Batcher::new(4);
        let input = ids(10);
        let results = batcher
            .run_bounded(
                &input,
                |identity: Identity| async move {
                    let n: usize = identity.as_str()[4..identity.as_str().len() - 5]
                        .parse()
                        .unwrap();
                    if n % 2 == 0 {
                        Ok(n)
                    } else {
                        Err(format!("odd {n}"))
                    }
                },
                None,
            )
            .await;

        assert_eq!(results.len(), 5);
        for (identity, n) in &results {
            assert_eq!(n % 2, 0);
            assert!(input.contains(identity));
        }
    }

    #[tokio::test]
    async fn test_progress_counts_every_completion() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let progress: ProgressFn = {
            let calls = Arc::clone(&calls);
            Arc::new(move |done, total| calls.lock().unwrap().push((done, total)))
        };

        let batcher = Batcher::new(2);
        batcher
            .run_bounded(
                &ids(6),
                |identity: Identity| async move {
                    if identity.as_str().starts_with("user0") {
                        Err("boom")
                    } else {
                        Ok(())
                    }
                },
                Some(progress),
            )
            .await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 6);
        let done: Vec<usize> = calls.iter().map(|(d, _)| *d).collect();
        assert_eq!(done, vec![1, 2, 3, 4, 5, 6]);
        assert!(calls.iter().all(|(_, total)| *total == 6));
    }

    #[tokio::test]
    async fn test_duplicates_run_once_and_zero_concurrency() {
        let count = Arc::new(AtomicUsize::new(0));
        let batcher = Batcher::new(0);
        assert_eq!(batcher.concurrency(), 1);

        let mut input = ids(3);
        input.extend(ids(3));
        let op = {
            let count = Arc::clone(&count);
            move |_: Identity| {
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                }
            }
        };

        let results = batcher.run_bounded(&input, op, None).await;
        assert_eq!(results.len(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_returns_empty() {
        let token = CancellationToken::new();
        token.cancel();
        let batcher = Batcher::new(2).with_cancellation(token);

        let results = batcher
            .run_bounded(&ids(5), |_: Identity| async { Ok::<_, String>(1) }, None)
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_keeps_partial_results() {
        let token = CancellationToken::new();
        let batcher = Batcher::new(1).with_cancellation(token.clone());
        let started = Arc::new(AtomicUsize::new(0));

        let op = {
            let token = token.clone();
            let started = Arc::clone(&started);
            move |_: Identity| {
                let token = token.clone();
                let started = Arc::clone(&started);
                async move {
                    let n = started.fetch_add(1, Ordering::SeqCst);
                    if n == 2 {
                        token.cancel();
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    Ok::<_, String>(n)
                }
            }
        };

        let results = batcher.run_bounded(&ids(10), op, None).await;
        assert_eq!(results.len(), 2);
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }
}
