//! TTL cache behavior against a real SQLite database.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use skypanel_core::{
    Activity, ActivityCacheEntry, CacheEntry, Identity, ManualClock, PostRate, PostRateCacheEntry,
};
use skypanel_store::TtlCache;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn id(name: &str) -> Identity {
    Identity::new(name).unwrap()
}

fn rate(name: &str, posts_per_day: f64) -> PostRateCacheEntry {
    CacheEntry::new(
        id(name),
        PostRate {
            posts_per_day,
            last_post_at: Some(t0() - Duration::hours(5)),
            sample_size: 30,
        },
    )
}

fn cache() -> (TtlCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let cache = TtlCache::open_in_memory(clock.clone()).unwrap();
    (cache, clock)
}

#[tokio::test]
async fn test_put_then_get_roundtrip() {
    let (cache, _) = cache();

    let stored = cache.put(rate("alice.test", 2.5)).await.unwrap();
    assert_eq!(stored.fetched_at, Some(t0()));
    assert_eq!(stored.expires_at, Some(t0() + Duration::hours(24)));

    let loaded = cache.get::<PostRate>(&id("alice.test")).await.unwrap().unwrap();
    assert_eq!(loaded, stored);
}

#[tokio::test]
async fn test_missing_is_none() {
    let (cache, _) = cache();
    assert!(cache.get::<PostRate>(&id("nobody.test")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_entry_is_not_served() {
    let (cache, clock) = cache();
    cache.put(rate("alice.test", 1.0)).await.unwrap();

    clock.advance(Duration::hours(23));
    assert!(cache.get::<PostRate>(&id("alice.test")).await.unwrap().is_some());

    // Served strictly before expiry.
    clock.advance(Duration::hours(1));
    assert!(cache.get::<PostRate>(&id("alice.test")).await.unwrap().is_none());

    // Expired rows still occupy storage until swept.
    assert_eq!(cache.len::<PostRate>().await.unwrap(), 1);
}

#[tokio::test]
async fn test_upsert_keeps_one_row() {
    let (cache, clock) = cache();
    cache.put(rate("alice.test", 1.0)).await.unwrap();

    clock.advance(Duration::hours(2));
    cache.put(rate("alice.test", 4.0)).await.unwrap();

    assert_eq!(cache.len::<PostRate>().await.unwrap(), 1);
    let loaded = cache.get::<PostRate>(&id("alice.test")).await.unwrap().unwrap();
    assert!((loaded.payload.posts_per_day - 4.0).abs() < f64::EPSILON);
    assert_eq!(loaded.fetched_at, Some(t0() + Duration::hours(2)));
}

#[tokio::test]
async fn test_explicit_timestamps_are_kept() {
    let (cache, _) = cache();
    let mut entry = rate("alice.test", 1.0);
    entry.fetched_at = Some(t0() - Duration::hours(1));
    entry.expires_at = Some(t0() + Duration::minutes(10));

    let stored = cache.put(entry).await.unwrap();
    assert_eq!(stored.fetched_at, Some(t0() - Duration::hours(1)));
    assert_eq!(stored.expires_at, Some(t0() + Duration::minutes(10)));
}

#[tokio::test]
async fn test_custom_ttl() {
    let clock = Arc::new(ManualClock::new(t0()));
    let cache = TtlCache::open_in_memory(clock.clone())
        .unwrap()
        .with_ttl(Duration::hours(1));

    let stored = cache.put(rate("alice.test", 1.0)).await.unwrap();
    assert_eq!(stored.expires_at, Some(t0() + Duration::hours(1)));
}

#[tokio::test]
async fn test_put_many_and_get_many() {
    let (cache, _) = cache();
    let entries: Vec<_> = (0..5)
        .map(|i| rate(&format!("user{i}.test"), f64::from(i)))
        .collect();
    assert_eq!(cache.put_many(entries).await.unwrap(), 5);

    let wanted = vec![id("user1.test"), id("user3.test"), id("stranger.test")];
    let found = cache.get_many::<PostRate>(&wanted).await.unwrap();

    assert_eq!(found.len(), 2);
    assert!((found[&id("user3.test")].payload.posts_per_day - 3.0).abs() < f64::EPSILON);
    assert!(!found.contains_key(&id("stranger.test")));
}

#[tokio::test]
async fn test_get_many_spans_chunks() {
    let (cache, _) = cache();
    let entries: Vec<_> = (0..1_200)
        .map(|i| rate(&format!("user{i}.test"), 1.0))
        .collect();
    cache.put_many(entries).await.unwrap();

    let wanted: Vec<_> = (0..1_200).map(|i| id(&format!("user{i}.test"))).collect();
    let found = cache.get_many::<PostRate>(&wanted).await.unwrap();
    assert_eq!(found.len(), 1_200);
}

#[tokio::test]
async fn test_sweep_removes_only_expired() {
    let (cache, clock) = cache();
    cache.put(rate("old.test", 1.0)).await.unwrap();

    clock.advance(Duration::hours(12));
    cache.put(rate("new.test", 1.0)).await.unwrap();

    clock.advance(Duration::hours(13));
    assert_eq!(cache.sweep_expired::<PostRate>().await.unwrap(), 1);
    assert_eq!(cache.len::<PostRate>().await.unwrap(), 1);
    assert!(cache.get::<PostRate>(&id("new.test")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_tables_are_independent() {
    let (cache, _) = cache();
    cache.put(rate("alice.test", 1.0)).await.unwrap();
    let activity: ActivityCacheEntry = CacheEntry::new(id("alice.test"), Activity { last_post_at: None });
    cache.put(activity).await.unwrap();

    assert_eq!(cache.clear::<PostRate>().await.unwrap(), 1);
    let still = cache.get::<Activity>(&id("alice.test")).await.unwrap().unwrap();
    assert_eq!(still.payload.last_post_at, None);
}

#[tokio::test]
async fn test_delete_and_clear_all() {
    let (cache, _) = cache();
    cache.put(rate("alice.test", 1.0)).await.unwrap();
    cache.put(rate("bob.test", 1.0)).await.unwrap();

    assert!(cache.delete::<PostRate>(&id("alice.test")).await.unwrap());
    assert!(!cache.delete::<PostRate>(&id("alice.test")).await.unwrap());
    assert_eq!(cache.clear_all().await.unwrap(), 1);
    assert!(cache.is_empty::<PostRate>().await.unwrap());
}

#[tokio::test]
async fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let clock = Arc::new(ManualClock::new(t0()));

    {
        let cache = TtlCache::open(&path, clock.clone()).unwrap();
        cache.put(rate("alice.test", 3.0)).await.unwrap();
    }

    let cache = TtlCache::open(&path, clock).unwrap();
    let loaded = cache.get::<PostRate>(&id("alice.test")).await.unwrap().unwrap();
    assert!((loaded.payload.posts_per_day - 3.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_put_many_rolls_back_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let clock = Arc::new(ManualClock::new(t0()));
    let cache = TtlCache::open(&path, clock).unwrap();
    cache.put(rate("alice.test", 1.0)).await.unwrap();

    {
        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute_batch(
            "CREATE TRIGGER reject_bad BEFORE INSERT ON cached_post_rates \
             WHEN NEW.actor_did = 'bad.test' \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
    }

    let batch = vec![
        rate("alice.test", 9.0),
        rate("good.test", 2.0),
        rate("bad.test", 3.0),
    ];
    assert!(cache.put_many(batch).await.is_err());

    assert_eq!(cache.len::<PostRate>().await.unwrap(), 1);
    assert!(cache.get::<PostRate>(&id("good.test")).await.unwrap().is_none());
    let alice = cache.get::<PostRate>(&id("alice.test")).await.unwrap().unwrap();
    assert!((alice.payload.posts_per_day - 1.0).abs() < f64::EPSILON);
}
