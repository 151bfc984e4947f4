//! SQLite-backed TTL cache for per-identity activity results.
//!
//! Each payload type owns one table keyed by identity. Rows carry
//! `fetched_at` and `expires_at` as Unix milliseconds; reads ignore rows whose
//! `expires_at` is not after now, so a missing and an expired entry look the
//! same to callers. Writes upsert in place.
//!
//! Uses `rusqlite` wrapped in an `Arc<Mutex<Connection>>`. All blocking calls
//! run on the blocking pool via `tokio::task::spawn_blocking`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, instrument};

use skypanel_core::{Activity, CacheEntry, Clock, Identity, PostRate, default_ttl};

use crate::error::StoreError;

/// Identities per `IN (...)` query; keeps well under SQLite's parameter limit.
const LOOKUP_CHUNK: usize = 500;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cached_post_rates (
    actor_did       TEXT PRIMARY KEY,
    posts_per_day   REAL NOT NULL,
    last_post_date  INTEGER,
    sample_size     INTEGER NOT NULL,
    fetched_at      INTEGER NOT NULL,
    expires_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cached_post_rates_expires ON cached_post_rates(expires_at);

CREATE TABLE IF NOT EXISTS cached_activity (
    actor_did       TEXT PRIMARY KEY,
    last_post_date  INTEGER,
    fetched_at      INTEGER NOT NULL,
    expires_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cached_activity_expires ON cached_activity(expires_at);
";

// ---------------------------------------------------------------------------
// Timestamp conversions
// ---------------------------------------------------------------------------

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn opt_from_millis(idx: usize, ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(|ms| from_millis(idx, ms)).transpose()
}

fn opt_millis_value(at: Option<DateTime<Utc>>) -> Value {
    at.map_or(Value::Null, |at| Value::Integer(to_millis(at)))
}

// ---------------------------------------------------------------------------
// Payload mapping
// ---------------------------------------------------------------------------

/// A payload shape stored in its own cache table.
pub trait CachePayload: Clone + Send + Sync + 'static {
    /// Table name.
    const TABLE: &'static str;

    /// Payload column names, in the order of [`Self::to_values`].
    const COLUMNS: &'static [&'static str];

    /// Column values for an insert.
    fn to_values(&self) -> Vec<Value>;

    /// Reads the payload from `row`, starting at column `offset`.
    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self>;
}

impl CachePayload for PostRate {
    const TABLE: &'static str = "cached_post_rates";
    const COLUMNS: &'static [&'static str] = &["posts_per_day", "last_post_date", "sample_size"];

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Real(self.posts_per_day),
            opt_millis_value(self.last_post_at),
            Value::Integer(i64::try_from(self.sample_size).unwrap_or(i64::MAX)),
        ]
    }

    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        let sample_size: i64 = row.get(offset + 2)?;
        Ok(Self {
            posts_per_day: row.get(offset)?,
            last_post_at: opt_from_millis(offset + 1, row.get(offset + 1)?)?,
            sample_size: usize::try_from(sample_size)
                .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(offset + 2, sample_size))?,
        })
    }
}

impl CachePayload for Activity {
    const TABLE: &'static str = "cached_activity";
    const COLUMNS: &'static [&'static str] = &["last_post_date"];

    fn to_values(&self) -> Vec<Value> {
        vec![opt_millis_value(self.last_post_at)]
    }

    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            last_post_at: opt_from_millis(offset, row.get(offset)?)?,
        })
    }
}

// ---------------------------------------------------------------------------
// SQL builders
// ---------------------------------------------------------------------------

fn select_sql<P: CachePayload>(filter: &str) -> String {
    format!(
        "SELECT actor_did, fetched_at, expires_at, {} FROM {} WHERE {filter}",
        P::COLUMNS.join(", "),
        P::TABLE
    )
}

fn upsert_sql<P: CachePayload>() -> String {
    let columns: Vec<&str> = std::iter::once("actor_did")
        .chain(P::COLUMNS.iter().copied())
        .chain(["fetched_at", "expires_at"])
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> = columns[1..]
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(actor_did) DO UPDATE SET {}",
        P::TABLE,
        columns.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

fn entry_from_row<P: CachePayload>(row: &Row<'_>) -> rusqlite::Result<(String, CacheEntry<P>)> {
    let key: String = row.get(0)?;
    let identity = Identity::new(&key).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let entry = CacheEntry {
        identity,
        payload: P::from_row(row, 3)?,
        fetched_at: Some(from_millis(1, row.get(1)?)?),
        expires_at: Some(from_millis(2, row.get(2)?)?),
    };
    Ok((key, entry))
}

fn entry_values<P: CachePayload>(entry: &CacheEntry<P>) -> Vec<Value> {
    let mut values = Vec::with_capacity(P::COLUMNS.len() + 3);
    values.push(Value::Text(entry.identity.as_str().to_string()));
    values.extend(entry.payload.to_values());
    values.push(opt_millis_value(entry.fetched_at));
    values.push(opt_millis_value(entry.expires_at));
    values
}

// ---------------------------------------------------------------------------
// TtlCache
// ---------------------------------------------------------------------------

/// Persistent identity-keyed cache with per-entry expiry.
#[derive(Clone)]
pub struct TtlCache {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TtlCache {
    /// Opens (or creates) the cache database at `path` and applies the schema.
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "Opening cache database");
        Self::from_connection(Connection::open(path)?, clock)
    }

    /// Opens an in-memory cache (data is lost when dropped).
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, clock)
    }

    fn from_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
            ttl: default_ttl(),
        })
    }

    /// Overrides the TTL applied to entries written without `expires_at`.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The TTL applied to unstamped entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn with_conn<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await?
    }

    // --- Reads -------------------------------------------------------------

    /// Returns the unexpired entry for `identity`, if any.
    #[instrument(skip_all, fields(table = P::TABLE, identity = %identity))]
    pub async fn get<P: CachePayload>(
        &self,
        identity: &Identity,
    ) -> Result<Option<CacheEntry<P>>, StoreError> {
        let key = identity.as_str().to_string();
        let now = to_millis(self.clock.now());

        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    &select_sql::<P>("actor_did = ?1 AND expires_at > ?2"),
                    params![key, now],
                    entry_from_row::<P>,
                )
                .optional()?;
            Ok(found.map(|(_, entry)| entry))
        })
        .await
    }

    /// Returns unexpired entries for the given identities, omitting the rest.
    #[instrument(skip_all, fields(table = P::TABLE, requested = identities.len()))]
    pub async fn get_many<P: CachePayload>(
        &self,
        identities: &[Identity],
    ) -> Result<HashMap<Identity, CacheEntry<P>>, StoreError> {
        if identities.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = identities.iter().map(|i| i.as_str().to_string()).collect();
        let now = to_millis(self.clock.now());

        let found = self
            .with_conn(move |conn| {
                let mut found = HashMap::new();
                for chunk in keys.chunks(LOOKUP_CHUNK) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    let sql = select_sql::<P>(&format!(
                        "actor_did IN ({placeholders}) AND expires_at > ?"
                    ));
                    let params = chunk
                        .iter()
                        .map(|k| Value::Text(k.clone()))
                        .chain(std::iter::once(Value::Integer(now)));

                    let mut stmt = conn.prepare_cached(&sql)?;
                    let rows = stmt.query_map(params_from_iter(params), entry_from_row::<P>)?;
                    for row in rows {
                        let (_, entry) = row?;
                        found.insert(entry.identity.clone(), entry);
                    }
                }
                Ok(found)
            })
            .await?;

        debug!(hits = found.len(), "Cache lookup");
        Ok(found)
    }

    /// Number of stored rows for `P`, expired rows included.
    pub async fn len<P: CachePayload>(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", P::TABLE), [], |row| {
                    row.get(0)
                })?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
    }

    /// Returns true if no rows are stored for `P`.
    pub async fn is_empty<P: CachePayload>(&self) -> Result<bool, StoreError> {
        Ok(self.len::<P>().await? == 0)
    }

    // --- Writes ------------------------------------------------------------

    /// Upserts one entry, stamping missing timestamps. Returns the stored entry.
    #[instrument(skip_all, fields(table = P::TABLE, identity = %entry.identity))]
    pub async fn put<P: CachePayload>(
        &self,
        entry: CacheEntry<P>,
    ) -> Result<CacheEntry<P>, StoreError> {
        let entry = entry.stamped(self.clock.now(), self.ttl);
        let values = entry_values(&entry);

        self.with_conn(move |conn| {
            conn.execute(&upsert_sql::<P>(), params_from_iter(values))?;
            Ok(())
        })
        .await?;

        Ok(entry)
    }

    /// Upserts all entries in one transaction; either every row is written or none is.
    #[instrument(skip_all, fields(table = P::TABLE, count = entries.len()))]
    pub async fn put_many<P: CachePayload>(
        &self,
        entries: Vec<CacheEntry<P>>,
    ) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let now = self.clock.now();
        let rows: Vec<Vec<Value>> = entries
            .into_iter()
            .map(|e| entry_values(&e.stamped(now, self.ttl)))
            .collect();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&upsert_sql::<P>())?;
                for values in &rows {
                    stmt.execute(params_from_iter(values.iter()))?;
                }
            }
            tx.commit()?;
            debug!(count = rows.len(), "Cache batch written");
            Ok(rows.len())
        })
        .await
    }

    /// Deletes the entry for `identity`. Returns true if a row was removed.
    pub async fn delete<P: CachePayload>(&self, identity: &Identity) -> Result<bool, StoreError> {
        let key = identity.as_str().to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                &format!("DELETE FROM {} WHERE actor_did = ?1", P::TABLE),
                params![key],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    /// Deletes every row for `P`. Returns the number removed.
    pub async fn clear<P: CachePayload>(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| Ok(conn.execute(&format!("DELETE FROM {}", P::TABLE), [])?))
            .await
    }

    // --- Maintenance -------------------------------------------------------

    /// Deletes rows with `expires_at < now`. Returns the number removed.
    #[instrument(skip(self), fields(table = P::TABLE))]
    pub async fn sweep_expired<P: CachePayload>(&self) -> Result<usize, StoreError> {
        let now = to_millis(self.clock.now());
        let removed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    &format!("DELETE FROM {} WHERE expires_at < ?1", P::TABLE),
                    params![now],
                )?)
            })
            .await?;
        debug!(removed, "Swept expired cache entries");
        Ok(removed)
    }

    /// Sweeps both payload tables.
    pub async fn sweep_all_expired(&self) -> Result<usize, StoreError> {
        Ok(self.sweep_expired::<PostRate>().await? + self.sweep_expired::<Activity>().await?)
    }

    /// Clears both payload tables.
    pub async fn clear_all(&self) -> Result<usize, StoreError> {
        Ok(self.clear::<PostRate>().await? + self.clear::<Activity>().await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
