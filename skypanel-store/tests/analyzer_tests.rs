//! Read-through caching in front of the batch fetchers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use skypanel_core::{Activity, Identity, ManualClock, Post, PostRate, PostSource};
use skypanel_fetch::{Batcher, PostRateEngine};
use skypanel_store::{ActivityAnalyzer, TtlCache};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn id(name: &str) -> Identity {
    Identity::new(name).unwrap()
}

fn post(at: DateTime<Utc>) -> Post {
    Post {
        uri: "at://did:plc:x/app.bsky.feed.post/1".to_string(),
        cid: String::new(),
        author: None,
        record: serde_json::Value::Null,
        reply_count: 0,
        repost_count: 0,
        like_count: 0,
        quote_count: 0,
        indexed_at: at.to_rfc3339(),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown account")]
struct Unknown;

/// Serves canned feeds and counts fetches.
struct Feeds {
    posts: HashMap<String, Vec<Post>>,
    calls: AtomicUsize,
}

impl Feeds {
    fn new() -> Self {
        let daily: Vec<Post> = (0..10).map(|d| post(t0() - Duration::days(d))).collect();
        Self {
            posts: HashMap::from([
                ("busy.test".to_string(), daily),
                ("silent.test".to_string(), Vec::new()),
            ]),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PostSource for Feeds {
    type Error = Unknown;

    async fn fetch_recent_posts(&self, identity: &Identity, limit: usize) -> Result<Vec<Post>, Unknown> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.posts
            .get(identity.as_str())
            .map(|p| p.iter().take(limit).cloned().collect())
            .ok_or(Unknown)
    }
}

fn analyzer(feeds: &Arc<Feeds>, cache: Option<TtlCache>) -> ActivityAnalyzer<Feeds> {
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = PostRateEngine::new(Arc::clone(feeds), clock);
    let analyzer = ActivityAnalyzer::new(engine, Batcher::new(4)).with_sampling(30, 10);
    match cache {
        Some(cache) => analyzer.with_cache(cache),
        None => analyzer,
    }
}

#[tokio::test]
async fn test_second_run_served_from_cache() {
    let feeds = Arc::new(Feeds::new());
    let cache = TtlCache::open_in_memory(Arc::new(ManualClock::new(t0()))).unwrap();
    let analyzer = analyzer(&feeds, Some(cache.clone()));
    let ids = vec![id("busy.test"), id("silent.test"), id("ghost.test")];

    let first = analyzer.post_rates(&ids, None).await;
    assert_eq!(first.len(), 2);
    assert!((first[&id("busy.test")].posts_per_day - 1.0).abs() < f64::EPSILON);
    assert_eq!(first[&id("silent.test")].sample_size, 0);
    assert_eq!(feeds.calls(), 3);
    assert_eq!(cache.len::<PostRate>().await.unwrap(), 2);

    let second = analyzer.post_rates(&ids, None).await;
    assert_eq!(second, first);
    // Only the failed identity is fetched again.
    assert_eq!(feeds.calls(), 4);
}

#[tokio::test]
async fn test_expired_cache_refetches() {
    let feeds = Arc::new(Feeds::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let cache = TtlCache::open_in_memory(clock.clone()).unwrap();
    let analyzer = analyzer(&feeds, Some(cache));
    let ids = vec![id("busy.test")];

    analyzer.post_rates(&ids, None).await;
    clock.advance(Duration::hours(25));
    analyzer.post_rates(&ids, None).await;

    assert_eq!(feeds.calls(), 2);
}

#[tokio::test]
async fn test_last_activity_cached_separately() {
    let feeds = Arc::new(Feeds::new());
    let cache = TtlCache::open_in_memory(Arc::new(ManualClock::new(t0()))).unwrap();
    let analyzer = analyzer(&feeds, Some(cache.clone()));
    let ids = vec![id("busy.test"), id("silent.test")];

    let activity = analyzer.last_activity(&ids).await;
    assert_eq!(activity[&id("busy.test")].last_post_at, Some(t0()));
    assert!(!activity[&id("silent.test")].has_posted());
    assert_eq!(cache.len::<Activity>().await.unwrap(), 2);
    assert!(cache.is_empty::<PostRate>().await.unwrap());

    let again = analyzer.last_activity(&ids).await;
    assert_eq!(again, activity);
    assert_eq!(feeds.calls(), 2);
}

#[tokio::test]
async fn test_without_cache_always_fetches() {
    let feeds = Arc::new(Feeds::new());
    let analyzer = analyzer(&feeds, None);
    let ids = vec![id("busy.test")];

    analyzer.post_rates(&ids, None).await;
    analyzer.post_rates(&ids, None).await;
    assert_eq!(feeds.calls(), 2);
}
