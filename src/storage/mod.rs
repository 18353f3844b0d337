//! Durable client-side storage.
//!
//! Every persisted record is a JSON document in one SQLite table, keyed by
//! name: the page configuration, the user settings, the widgets and one
//! snapshot per feed source. All records are absence-tolerant: a missing or
//! unparseable document reads as `None` and callers substitute defaults.

mod documents;
mod feed_cache;
mod schema;
mod types;

pub use feed_cache::{cache_key, FeedCache, CACHE_KEY_PREFIX};
pub use schema::Database;
pub use types::{
    CacheEntry, DatabaseError, FeedItem, FeedPage, UserState, DEFAULT_CACHE_TTL, DEFAULT_THEME,
};

/// Ordered list of [`FeedPage`].
pub const PAGES_KEY: &str = "feed-pages-config";
/// The [`UserState`] document.
pub const SETTINGS_KEY: &str = "newsfeed-settings";
/// Ordered list of widgets.
pub const WIDGETS_KEY: &str = "widgets-data";
