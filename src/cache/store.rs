//! SQLite-backed persistence for attachment fingerprints.
//!
//! [`ReuploadCache`] owns the `attachments` table mapping a content hash to
//! the external host's identifier and deletion token. All statements run on
//! tokio-rusqlite's background thread, so writes for one database are
//! serialized and `store` is atomic per hash.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::common::{CacheError, CacheResult};

/// File created inside the configured cache directory.
pub const DATABASE_FILE: &str = "reupload.sqlite3";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS attachments (
    hash TEXT PRIMARY KEY NOT NULL,
    host_id TEXT NOT NULL,
    deletion_token TEXT NOT NULL,
    first_seen INTEGER NOT NULL
)";

/// One cached upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub hash: String,
    pub host_id: String,
    pub deletion_token: String,
    pub first_seen: DateTime<Utc>,
}

/// Persistent content hash -> external upload mapping.
#[derive(Clone)]
pub struct ReuploadCache {
    conn: Connection,
}

impl ReuploadCache {
    /// Open (creating if needed) the cache inside directory `dir`, capped at
    /// roughly `max_size` bytes.
    pub async fn open(dir: impl AsRef<Path>, max_size: u64) -> CacheResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| CacheError::OpenFailed {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;

        let path = dir.join(DATABASE_FILE);
        let conn = Connection::open(&path)
            .await
            .map_err(|e| CacheError::OpenFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        let cache = Self { conn };
        let pages = cache.initialize(max_size).await?;
        info!(
            "Re-upload cache opened at {} (limit {} pages)",
            path.display(),
            pages
        );
        Ok(cache)
    }

    /// Open a throwaway cache that lives only as long as the process.
    #[cfg(test)]
    pub async fn open_in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| CacheError::OpenFailed {
                path: ":memory:".to_string(),
                message: e.to_string(),
            })?;
        let cache = Self { conn };
        cache.initialize(0).await?;
        Ok(cache)
    }

    /// Create the schema and apply the size cap. Returns the page limit.
    async fn initialize(&self, max_size: u64) -> CacheResult<i64> {
        self.call(move |conn| {
            conn.execute_batch(SCHEMA)?;
            if max_size == 0 {
                return conn.pragma_query_value(None, "max_page_count", |row| row.get(0));
            }
            let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
            let pages = (max_size as i64 / page_size.max(1)).max(1);
            conn.pragma_update_and_check(None, "max_page_count", pages, |row| row.get(0))
        })
        .await
    }

    /// Run `f` on the database thread.
    async fn call<T, F>(&self, f: F) -> CacheResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn.call(f).await.map_err(CacheError::from)
    }

    /// Look up the entry for `hash`.
    pub async fn lookup(&self, hash: &str) -> CacheResult<Option<CacheEntry>> {
        let hash = hash.to_string();
        self.call(move |conn| select(conn, &hash)).await
    }

    /// Insert an entry unless one already exists for `hash`.
    ///
    /// First writer wins: the returned entry is whatever is persisted after
    /// the call, which may carry another caller's host ID.
    pub async fn store(
        &self,
        hash: &str,
        host_id: &str,
        deletion_token: &str,
    ) -> CacheResult<CacheEntry> {
        let hash = hash.to_string();
        let host_id = host_id.to_string();
        let deletion_token = deletion_token.to_string();
        let now = Utc::now().timestamp();

        let entry = self
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO attachments (hash, host_id, deletion_token, first_seen) \
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![hash, host_id, deletion_token, now],
                )?;
                if inserted == 0 {
                    debug!("Attachment {} already cached, keeping first upload", hash);
                }
                select(conn, &hash)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
            })
            .await?;
        Ok(entry)
    }

    /// Drop the entry for `hash` so the next relay uploads again.
    ///
    /// Returns true if an entry was removed.
    pub async fn invalidate(&self, hash: &str) -> CacheResult<bool> {
        let hash = hash.to_string();
        let removed = self
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM attachments WHERE hash = ?1",
                    rusqlite::params![hash],
                )
            })
            .await?;
        Ok(removed > 0)
    }

    /// Remove every entry. Returns how many were removed.
    pub async fn purge(&self) -> CacheResult<usize> {
        let removed = self
            .call(|conn| conn.execute("DELETE FROM attachments", []))
            .await?;
        info!("Purged {} re-upload cache entries", removed);
        Ok(removed)
    }

    pub async fn len(&self) -> CacheResult<usize> {
        let count: i64 = self
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM attachments", [], |row| row.get(0)))
            .await?;
        Ok(count as usize)
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Close the database, flushing pending writes.
    pub async fn close(self) -> CacheResult<()> {
        self.conn.close().await.map_err(|e| CacheError::QueryFailed {
            message: e.to_string(),
        })
    }
}

fn select(conn: &rusqlite::Connection, hash: &str) -> rusqlite::Result<Option<CacheEntry>> {
    conn.query_row(
        "SELECT hash, host_id, deletion_token, first_seen FROM attachments WHERE hash = ?1",
        rusqlite::params![hash],
        |row| {
            let first_seen: i64 = row.get(3)?;
            Ok(CacheEntry {
                hash: row.get(0)?,
                host_id: row.get(1)?,
                deletion_token: row.get(2)?,
                first_seen: DateTime::from_timestamp(first_seen, 0).unwrap_or_default(),
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_missing() {
        let cache = ReuploadCache::open_in_memory().await.unwrap();
        assert!(cache.lookup("nope").await.unwrap().is_none());
        assert!(cache.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let cache = ReuploadCache::open_in_memory().await.unwrap();
        let stored = cache.store("abc", "img1", "del1").await.unwrap();
        assert_eq!(stored.host_id, "img1");
        assert_eq!(stored.deletion_token, "del1");

        let found = cache.lookup("abc").await.unwrap().unwrap();
        assert_eq!(found, stored);
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let cache = ReuploadCache::open_in_memory().await.unwrap();
        cache.store("abc", "img1", "del1").await.unwrap();
        let second = cache.store("abc", "img2", "del2").await.unwrap();

        assert_eq!(second.host_id, "img1");
        assert_eq!(second.deletion_token, "del1");
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_stores_persist_one_entry() {
        let cache = ReuploadCache::open_in_memory().await.unwrap();
        let (a, b) = tokio::join!(
            cache.store("same", "from-a", "token-a"),
            cache.store("same", "from-b", "token-b"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a, b);
        assert_eq!(cache.len().await.unwrap(), 1);
        assert_eq!(cache.lookup("same").await.unwrap().unwrap(), a);
    }

    #[tokio::test]
    async fn test_invalidate_allows_new_upload() {
        let cache = ReuploadCache::open_in_memory().await.unwrap();
        cache.store("abc", "img1", "del1").await.unwrap();

        assert!(cache.invalidate("abc").await.unwrap());
        assert!(!cache.invalidate("abc").await.unwrap());
        assert!(cache.lookup("abc").await.unwrap().is_none());

        let fresh = cache.store("abc", "img2", "del2").await.unwrap();
        assert_eq!(fresh.host_id, "img2");
    }

    #[tokio::test]
    async fn test_purge() {
        let cache = ReuploadCache::open_in_memory().await.unwrap();
        cache.store("a", "1", "x").await.unwrap();
        cache.store("b", "2", "y").await.unwrap();

        assert_eq!(cache.purge().await.unwrap(), 2);
        assert!(cache.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache");

        let cache = ReuploadCache::open(&path, 1024 * 1024).await.unwrap();
        cache.store("abc", "img1", "del1").await.unwrap();
        cache.close().await.unwrap();

        let reopened = ReuploadCache::open(&path, 1024 * 1024).await.unwrap();
        let entry = reopened.lookup("abc").await.unwrap().unwrap();
        assert_eq!(entry.host_id, "img1");
        assert!(path.join(DATABASE_FILE).exists());
    }

    #[tokio::test]
    async fn test_size_cap_rejects_growth() {
        let dir = tempfile::tempdir().unwrap();
        // A handful of pages: the schema fits, a flood of entries does not.
        let cache = ReuploadCache::open(dir.path(), 16 * 1024).await.unwrap();

        let mut failed = false;
        for i in 0..2000 {
            let token = "t".repeat(200);
            if cache.store(&format!("hash-{}", i), "id", &token).await.is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
    }
}
