use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of startpage appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and SQLITE_CANTOPEN all surface as one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Feed Pages
// ============================================================================

/// A user-defined grouping of feed sources displayed together.
///
/// Persisted as one element of the `feed-pages-config` document. Older
/// documents carry a `data` array per page; it is ignored on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub id: String,
    pub name: String,
    pub order: u32,
    /// Absolute http(s) URLs, unique within the page, in insertion order.
    #[serde(default)]
    pub feed_sources: Vec<String>,
}

impl FeedPage {
    pub fn new(id: impl Into<String>, name: impl Into<String>, order: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            order,
            feed_sources: Vec::new(),
        }
    }
}

// ============================================================================
// Feed Items
// ============================================================================

/// A single post parsed from an RSS/Atom source.
///
/// Identity is `id`: two items with the same id are the same logical post
/// regardless of which fetch produced them. Items are replaced wholesale on
/// re-fetch and never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    /// Display name of the originating feed (feed-level title).
    pub source: String,
    pub published: DateTime<Utc>,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

// ============================================================================
// Feed Cache
// ============================================================================

/// Default freshness window for cached feed snapshots (30 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(1_800_000);

/// Timestamped snapshot of one source's parsed items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub source_url: String,
    /// Epoch milliseconds of the fetch that produced `items`.
    pub timestamp: i64,
    pub items: Vec<FeedItem>,
}

impl CacheEntry {
    /// Whether this entry is still within `ttl` of the current time.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.is_fresh_at(Utc::now().timestamp_millis(), ttl)
    }

    /// Freshness check against an explicit clock reading: `now - timestamp <= ttl`.
    pub fn is_fresh_at(&self, now_ms: i64, ttl: Duration) -> bool {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.timestamp) <= ttl_ms
    }

    /// Age of the snapshot in milliseconds, clamped at zero for clock skew.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp).max(0)
    }
}

// ============================================================================
// User State
// ============================================================================

/// Read/favorite/hidden item ids and display settings.
///
/// Persisted as the `newsfeed-settings` document with id arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserState {
    pub read: BTreeSet<String>,
    pub favorites: BTreeSet<String>,
    pub hidden: BTreeSet<String>,
    pub theme: String,
}

/// Theme used when no settings have been saved.
pub const DEFAULT_THEME: &str = "dark";

impl Default for UserState {
    fn default() -> Self {
        Self {
            read: BTreeSet::new(),
            favorites: BTreeSet::new(),
            hidden: BTreeSet::new(),
            theme: DEFAULT_THEME.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_at(timestamp: i64) -> CacheEntry {
        CacheEntry {
            source_url: "https://example.com/feed.xml".to_string(),
            timestamp,
            items: Vec::new(),
        }
    }

    #[test]
    fn test_entry_past_ttl_is_expired() {
        let now = 1_700_000_000_000;
        let entry = entry_at(now - 1_801_000);
        assert!(!entry.is_fresh_at(now, DEFAULT_CACHE_TTL));
    }

    #[test]
    fn test_recent_entry_is_fresh() {
        let now = 1_700_000_000_000;
        let entry = entry_at(now - 1_000);
        assert!(entry.is_fresh_at(now, DEFAULT_CACHE_TTL));
    }

    #[test]
    fn test_entry_exactly_at_ttl_is_fresh() {
        let now = 1_700_000_000_000;
        let entry = entry_at(now - 1_800_000);
        assert!(entry.is_fresh_at(now, DEFAULT_CACHE_TTL));
    }

    #[test]
    fn test_is_fresh_uses_wall_clock() {
        let entry = entry_at(Utc::now().timestamp_millis());
        assert!(entry.is_fresh(DEFAULT_CACHE_TTL));
        assert!(!entry_at(0).is_fresh(DEFAULT_CACHE_TTL));
    }

    #[test]
    fn test_feed_page_ignores_legacy_data_field() {
        let json = r#"{"id":"feeds","name":"Feeds","order":0,"feedSources":[],"data":[]}"#;
        let page: FeedPage = serde_json::from_str(json).unwrap();
        assert_eq!(page, FeedPage::new("feeds", "Feeds", 0));
    }

    #[test]
    fn test_feed_page_serializes_camel_case() {
        let mut page = FeedPage::new("tech", "Tech", 1);
        page.feed_sources.push("https://example.com/feed.xml".to_string());
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["feedSources"][0], "https://example.com/feed.xml");
    }

    #[test]
    fn test_user_state_partial_document_uses_defaults() {
        let state: UserState = serde_json::from_str(r#"{"read":["a","b"]}"#).unwrap();
        assert_eq!(state.read.len(), 2);
        assert!(state.favorites.is_empty());
        assert_eq!(state.theme, "dark");
    }

    #[test]
    fn test_user_state_round_trip() {
        let json = r#"{"read":["item1","item2"],"favorites":["item1"],"hidden":[],"theme":"dark"}"#;
        let state: UserState = serde_json::from_str(json).unwrap();
        let back: serde_json::Value = serde_json::to_value(&state).unwrap();
        let original: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(back, original);
    }
}
