use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::schema::Database;
use super::types::{CacheEntry, FeedItem};

/// Prefix shared by every per-source cache document.
pub const CACHE_KEY_PREFIX: &str = "feed-cache:";

/// Cache key for a source. The raw URL string is the canonical key; no
/// trailing-slash or query normalization is applied.
pub fn cache_key(source_url: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{source_url}")
}

/// On-disk shape written for a cache row.
#[derive(Serialize)]
struct CacheRecordRef<'a> {
    timestamp: i64,
    data: &'a [FeedItem],
}

/// On-disk shape read back for a cache row.
#[derive(Deserialize)]
struct CacheRecord {
    timestamp: i64,
    data: Vec<FeedItem>,
}

/// Read-through snapshot store keyed by feed source URL.
///
/// Entries only appear after a successful fetch (`put`) and are replaced as
/// whole units, so a reader never observes a half-written entry. Handles are
/// cheap to clone and share the underlying [`Database`].
#[derive(Clone)]
pub struct FeedCache {
    db: Database,
}

impl FeedCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Look up the snapshot for a source.
    ///
    /// A row that no longer deserializes is treated as absent, which sends the
    /// aggregator down the fetch path and overwrites it.
    pub async fn get(&self, source_url: &str) -> Result<Option<CacheEntry>> {
        let record: Option<CacheRecord> = self.db.load_document(&cache_key(source_url)).await?;

        Ok(record.map(|r| CacheEntry {
            source_url: source_url.to_string(),
            timestamp: r.timestamp,
            items: r.data,
        }))
    }

    /// Overwrite the snapshot for a source, stamped with the current time.
    ///
    /// Returns the timestamp that was written.
    pub async fn put(&self, source_url: &str, items: &[FeedItem]) -> Result<i64> {
        let timestamp = Utc::now().timestamp_millis();
        self.write(source_url, timestamp, items).await?;
        tracing::debug!(url = %source_url, items = items.len(), "Cached feed snapshot");
        Ok(timestamp)
    }

    /// Store a complete entry with its own timestamp (restoring a snapshot).
    pub async fn put_entry(&self, entry: &CacheEntry) -> Result<()> {
        self.write(&entry.source_url, entry.timestamp, &entry.items)
            .await
    }

    /// Drop the snapshot for a source, forcing the next lookup to fetch.
    ///
    /// Returns whether an entry existed.
    pub async fn invalidate(&self, source_url: &str) -> Result<bool> {
        self.db.delete_document(&cache_key(source_url)).await
    }

    /// Source URLs that currently have a snapshot, ordered by URL.
    pub async fn cached_sources(&self) -> Result<Vec<String>> {
        let keys = self.db.document_keys(CACHE_KEY_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(CACHE_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    /// Delete every cached snapshot. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for url in self.cached_sources().await? {
            if self.invalidate(&url).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete snapshots for sources no longer configured on any page.
    ///
    /// Returns the number removed.
    pub async fn prune(&self, keep: &HashSet<&str>) -> Result<usize> {
        let mut removed = 0;
        for url in self.cached_sources().await? {
            if !keep.contains(url.as_str()) && self.invalidate(&url).await? {
                tracing::debug!(url = %url, "Pruned cache entry for removed source");
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn write(&self, source_url: &str, timestamp: i64, items: &[FeedItem]) -> Result<()> {
        let record = CacheRecordRef {
            timestamp,
            data: items,
        };
        self.db
            .store_document(&cache_key(source_url), &record)
            .await
    }
}
