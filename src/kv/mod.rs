//! Persistent byte-keyed key-value storage on SQLite.
//!
//! One table holds every entry; logical isolation comes from namespace
//! prefixes, not separate databases. Two configurations share the
//! implementation: a *store* whose entries never expire by default, and a
//! *cache* that stamps a default TTL on every put unless the caller
//! supplies an explicit expiry.

mod cleanup;

pub use cleanup::{run_cleanup, spawn_cleanup_scheduler};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Default time-to-live for cache entries: 1 hour.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
pub enum KvError {
    Database(sqlx::Error),
}

impl std::fmt::Display for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvError::Database(e) => write!(f, "kv database error: {e}"),
        }
    }
}

impl std::error::Error for KvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KvError::Database(e) => Some(e),
        }
    }
}

impl From<sqlx::Error> for KvError {
    fn from(e: sqlx::Error) -> Self {
        KvError::Database(e)
    }
}

/// Seconds since the Unix epoch.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// A handle onto the key-value database, scoped to a namespace prefix.
///
/// Cloning is cheap (the pool is shared). `namespace` returns a view that
/// transparently prefixes `segment + ":"` to every operation, including
/// prefix listing; namespaces compose.
#[derive(Clone)]
pub struct Kv {
    pool: SqlitePool,
    prefix: Vec<u8>,
    default_ttl: Option<Duration>,
}

impl Kv {
    /// Open or create a permanent store at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, KvError> {
        Self::open_inner(path, None).await
    }

    /// Open or create a cache with the given default per-entry TTL.
    pub async fn open_cache(path: &str, default_ttl: Duration) -> Result<Self, KvError> {
        Self::open_inner(path, Some(default_ttl)).await
    }

    async fn open_inner(path: &str, default_ttl: Option<Duration>) -> Result<Self, KvError> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        // An in-memory database exists per connection, so the pool must
        // not open a second one.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect(&url)
            .await?;

        let kv = Self {
            pool,
            prefix: Vec::new(),
            default_ttl,
        };
        kv.migrate().await?;
        kv.cleanup_expired().await?;
        Ok(kv)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, KvError> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), KvError> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), KvError> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(&self, version: i32, queries: &[&'static str]) -> Result<(), KvError> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), KvError> {
        self.run_migration(
            1,
            &[
                "CREATE TABLE kv (
                    key BLOB PRIMARY KEY,
                    value BLOB NOT NULL,
                    expires_at INTEGER
                )",
                "CREATE INDEX idx_kv_expires_at ON kv(expires_at)",
            ],
        )
        .await
    }

    /// A view of this database under an additional namespace segment.
    pub fn namespace(&self, segment: &str) -> Kv {
        let mut prefix = self.prefix.clone();
        prefix.extend_from_slice(segment.as_bytes());
        prefix.push(b':');
        Kv {
            pool: self.pool.clone(),
            prefix,
            default_ttl: self.default_ttl,
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = self.prefix.clone();
        full.extend_from_slice(key);
        full
    }

    /// Get a value. Expired entries are invisible.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT value FROM kv WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(self.full_key(key))
        .bind(now_unix())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    /// Upsert a value, applying this handle's default TTL when it has one.
    pub async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        let expires_at = self.default_ttl.map(|ttl| now_unix() + ttl.as_secs() as i64);
        self.put_raw(key, value, expires_at).await
    }

    /// Upsert a value with an explicit absolute expiry (unix seconds).
    /// `None` stores a permanent entry, overriding any default TTL.
    pub async fn put_with_expiry(
        &self,
        key: &[u8],
        value: &[u8],
        expires_at: Option<i64>,
    ) -> Result<(), KvError> {
        self.put_raw(key, value, expires_at).await
    }

    async fn put_raw(
        &self,
        key: &[u8],
        value: &[u8],
        expires_at: Option<i64>,
    ) -> Result<(), KvError> {
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(self.full_key(key))
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a key. Deleting a missing key is not an error.
    pub async fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(self.full_key(key))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// List all non-expired keys with the given byte prefix, namespace
    /// prefix stripped. Order is unspecified.
    pub async fn list(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, KvError> {
        let lower = self.full_key(prefix);
        let rows: Vec<(Vec<u8>,)> = match prefix_upper_bound(&lower) {
            Some(upper) => {
                sqlx::query_as(
                    "SELECT key FROM kv WHERE key >= ? AND key < ?
                     AND (expires_at IS NULL OR expires_at > ?)",
                )
                .bind(lower.clone())
                .bind(upper)
                .bind(now_unix())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT key FROM kv WHERE key >= ?
                     AND (expires_at IS NULL OR expires_at > ?)",
                )
                .bind(lower.clone())
                .bind(now_unix())
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows
            .into_iter()
            .map(|(key,)| key[self.prefix.len()..].to_vec())
            .collect())
    }

    /// Remove entries whose expiry has passed. Returns the number removed.
    pub async fn cleanup_expired(&self) -> Result<u64, KvError> {
        let result =
            sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(now_unix())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

/// The smallest byte string greater than every string with `prefix` as a
/// prefix, or `None` when no such bound exists (all bytes are 0xFF).
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(&last) = upper.last() {
        if last < 0xFF {
            *upper.last_mut().unwrap() = last + 1;
            return Some(upper);
        }
        upper.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip() {
        let kv = Kv::open(":memory:").await.unwrap();
        kv.put(b"k", b"v").await.unwrap();
        assert_eq!(kv.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let kv = Kv::open(":memory:").await.unwrap();
        assert_eq!(kv.get(b"nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_key_and_binary_value() {
        let kv = Kv::open(":memory:").await.unwrap();
        kv.put(b"", b"\x00mid\x00nul").await.unwrap();
        assert_eq!(kv.get(b"").await.unwrap(), Some(b"\x00mid\x00nul".to_vec()));
    }

    #[tokio::test]
    async fn put_overwrites() {
        let kv = Kv::open(":memory:").await.unwrap();
        kv.put(b"k", b"one").await.unwrap();
        kv.put(b"k", b"two").await.unwrap();
        assert_eq!(kv.get(b"k").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_is_invisible() {
        let kv = Kv::open(":memory:").await.unwrap();
        kv.put_with_expiry(b"k", b"v", Some(now_unix() - 10))
            .await
            .unwrap();
        assert_eq!(kv.get(b"k").await.unwrap(), None);
        assert!(kv.list(b"").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn future_expiry_is_visible() {
        let kv = Kv::open(":memory:").await.unwrap();
        kv.put_with_expiry(b"k", b"v", Some(now_unix() + 3600))
            .await
            .unwrap();
        assert_eq!(kv.get(b"k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let kv = Kv::open(":memory:").await.unwrap();
        kv.put(b"k", b"v").await.unwrap();
        kv.delete(b"k").await.unwrap();
        kv.delete(b"k").await.unwrap();
        assert_eq!(kv.get(b"k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_by_prefix() {
        let kv = Kv::open(":memory:").await.unwrap();
        kv.put(b"p:a", b"1").await.unwrap();
        kv.put(b"p:b", b"2").await.unwrap();
        kv.put(b"q:c", b"3").await.unwrap();

        let mut keys = kv.list(b"p:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![b"p:a".to_vec(), b"p:b".to_vec()]);
    }

    #[tokio::test]
    async fn list_prefix_with_high_bytes() {
        let kv = Kv::open(":memory:").await.unwrap();
        kv.put(b"\xff\xffx", b"1").await.unwrap();
        kv.put(b"\xfe", b"2").await.unwrap();

        let keys = kv.list(b"\xff\xff").await.unwrap();
        assert_eq!(keys, vec![b"\xff\xffx".to_vec()]);
    }

    #[tokio::test]
    async fn namespace_isolates_and_strips_prefix() {
        let kv = Kv::open(":memory:").await.unwrap();
        let a = kv.namespace("a");
        let b = kv.namespace("b");

        a.put(b"x", b"from-a").await.unwrap();
        assert_eq!(b.get(b"x").await.unwrap(), None);
        assert_eq!(a.get(b"x").await.unwrap(), Some(b"from-a".to_vec()));

        assert_eq!(a.list(b"").await.unwrap(), vec![b"x".to_vec()]);
        assert!(b.list(b"").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn namespaces_compose() {
        let kv = Kv::open(":memory:").await.unwrap();
        let inner = kv.namespace("a").namespace("b");
        inner.put(b"k", b"v").await.unwrap();

        // Visible from the root under the composed prefix.
        assert_eq!(kv.get(b"a:b:k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(inner.list(b"").await.unwrap(), vec![b"k".to_vec()]);
    }

    #[tokio::test]
    async fn cache_default_ttl_is_applied() {
        let kv = Kv::open_cache(":memory:", Duration::from_secs(0)).await.unwrap();
        kv.put(b"k", b"v").await.unwrap();
        // TTL of zero expires immediately.
        assert_eq!(kv.get(b"k").await.unwrap(), None);

        // An explicit permanent put overrides the default.
        kv.put_with_expiry(b"k2", b"v", None).await.unwrap();
        assert_eq!(kv.get(b"k2").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired() {
        let kv = Kv::open(":memory:").await.unwrap();
        kv.put_with_expiry(b"old", b"1", Some(now_unix() - 5))
            .await
            .unwrap();
        kv.put(b"keep", b"2").await.unwrap();

        let removed = kv.cleanup_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(kv.get(b"keep").await.unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn upper_bound_increments_last_byte() {
        assert_eq!(prefix_upper_bound(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_upper_bound(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_upper_bound(b"\xff\xff"), None);
    }
}
