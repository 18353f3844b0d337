//! Read/favorite/hidden item state and the selected theme.
//!
//! The state lives in memory and is flushed to the `newsfeed-settings`
//! document after every mutation that actually changes it.
use anyhow::Result;

use crate::storage::{Database, UserState, DEFAULT_THEME, SETTINGS_KEY};

/// In-memory [`UserState`] backed by the document store.
pub struct UserStateStore {
    db: Database,
    state: UserState,
}

impl UserStateStore {
    /// Load saved state; absent or malformed settings yield defaults.
    pub async fn load(db: Database) -> Result<Self> {
        Self::load_with_theme(db, DEFAULT_THEME).await
    }

    /// Like [`load`](Self::load), but a profile without saved settings starts
    /// with `default_theme` (the configured theme) instead of the built-in one.
    pub async fn load_with_theme(db: Database, default_theme: &str) -> Result<Self> {
        let state = db
            .load_document::<UserState>(SETTINGS_KEY)
            .await?
            .unwrap_or_else(|| UserState {
                theme: default_theme.to_string(),
                ..UserState::default()
            });
        Ok(Self { db, state })
    }

    pub fn state(&self) -> &UserState {
        &self.state
    }

    pub fn is_read(&self, item_id: &str) -> bool {
        self.state.read.contains(item_id)
    }

    pub fn is_favorite(&self, item_id: &str) -> bool {
        self.state.favorites.contains(item_id)
    }

    pub fn is_hidden(&self, item_id: &str) -> bool {
        self.state.hidden.contains(item_id)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Mark an item read. Returns whether it was unread before.
    pub async fn mark_read(&mut self, item_id: &str) -> Result<bool> {
        let changed = self.state.read.insert(item_id.to_string());
        self.flush_if(changed).await?;
        Ok(changed)
    }

    /// Forget every read mark. Returns how many were cleared.
    pub async fn clear_read(&mut self) -> Result<usize> {
        let cleared = std::mem::take(&mut self.state.read).len();
        self.flush_if(cleared > 0).await?;
        Ok(cleared)
    }

    /// Flip favorite membership and return the new membership.
    pub async fn toggle_favorite(&mut self, item_id: &str) -> Result<bool> {
        let now_favorite = if self.state.favorites.remove(item_id) {
            false
        } else {
            self.state.favorites.insert(item_id.to_string());
            true
        };
        self.flush_if(true).await?;
        Ok(now_favorite)
    }

    /// Hide an item from every view. Returns whether it was visible before.
    pub async fn hide(&mut self, item_id: &str) -> Result<bool> {
        let changed = self.state.hidden.insert(item_id.to_string());
        self.flush_if(changed).await?;
        Ok(changed)
    }

    pub async fn unhide(&mut self, item_id: &str) -> Result<bool> {
        let changed = self.state.hidden.remove(item_id);
        self.flush_if(changed).await?;
        Ok(changed)
    }

    pub async fn clear_hidden(&mut self) -> Result<usize> {
        let cleared = std::mem::take(&mut self.state.hidden).len();
        self.flush_if(cleared > 0).await?;
        Ok(cleared)
    }

    /// Set the theme name. Returns whether it changed.
    pub async fn set_theme(&mut self, theme: &str) -> Result<bool> {
        let theme = theme.trim();
        let changed = !theme.is_empty() && self.state.theme != theme;
        if changed {
            self.state.theme = theme.to_string();
        }
        self.flush_if(changed).await?;
        Ok(changed)
    }

    async fn flush_if(&self, changed: bool) -> Result<()> {
        if !changed {
            return Ok(());
        }
        self.db.store_document(SETTINGS_KEY, &self.state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn store() -> (Database, UserStateStore) {
        let db = Database::open(":memory:").await.unwrap();
        let store = UserStateStore::load(db.clone()).await.unwrap();
        (db, store)
    }

    async fn updated_at(db: &Database) -> Option<i64> {
        sqlx::query_scalar("SELECT updated_at FROM documents WHERE key = ?")
            .bind(SETTINGS_KEY)
            .fetch_optional(&db.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_defaults_when_absent() {
        let (_db, store) = store().await;
        assert_eq!(store.state(), &UserState::default());
        assert_eq!(store.state().theme, "dark");
    }

    #[tokio::test]
    async fn test_configured_theme_only_without_saved_settings() {
        let db = Database::open(":memory:").await.unwrap();
        let store = UserStateStore::load_with_theme(db.clone(), "light").await.unwrap();
        assert_eq!(store.state().theme, "light");

        let mut store = store;
        store.set_theme("solarized").await.unwrap();
        let reloaded = UserStateStore::load_with_theme(db, "light").await.unwrap();
        assert_eq!(reloaded.state().theme, "solarized");
    }

    #[tokio::test]
    async fn test_defaults_when_malformed() {
        let db = Database::open(":memory:").await.unwrap();
        db.put_document(SETTINGS_KEY, "{\"read\": 12").await.unwrap();

        let store = UserStateStore::load(db).await.unwrap();
        assert_eq!(store.state(), &UserState::default());
    }

    #[tokio::test]
    async fn test_mark_read_persists() {
        let (db, mut store) = store().await;
        assert!(store.mark_read("a").await.unwrap());
        assert!(!store.mark_read("a").await.unwrap());
        assert!(store.is_read("a"));

        let reloaded = UserStateStore::load(db).await.unwrap();
        assert!(reloaded.is_read("a"));
    }

    #[tokio::test]
    async fn test_toggle_favorite_returns_membership() {
        let (db, mut store) = store().await;
        assert!(store.toggle_favorite("a").await.unwrap());
        assert!(store.is_favorite("a"));
        assert!(!store.toggle_favorite("a").await.unwrap());
        assert!(!store.is_favorite("a"));

        let reloaded = UserStateStore::load(db).await.unwrap();
        assert!(reloaded.state().favorites.is_empty());
    }

    #[tokio::test]
    async fn test_hide_unhide_and_clear() {
        let (db, mut store) = store().await;
        store.hide("a").await.unwrap();
        store.hide("b").await.unwrap();
        assert!(store.unhide("a").await.unwrap());
        assert!(!store.unhide("a").await.unwrap());
        assert!(store.is_hidden("b"));

        assert_eq!(store.clear_hidden().await.unwrap(), 1);
        let reloaded = UserStateStore::load(db).await.unwrap();
        assert!(reloaded.state().hidden.is_empty());
    }

    #[tokio::test]
    async fn test_clear_read() {
        let (_db, mut store) = store().await;
        store.mark_read("a").await.unwrap();
        store.mark_read("b").await.unwrap();
        assert_eq!(store.clear_read().await.unwrap(), 2);
        assert_eq!(store.clear_read().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_theme() {
        let (db, mut store) = store().await;
        assert!(!store.set_theme("dark").await.unwrap());
        assert!(!store.set_theme("  ").await.unwrap());
        assert!(store.set_theme("light").await.unwrap());

        let reloaded = UserStateStore::load(db).await.unwrap();
        assert_eq!(reloaded.state().theme, "light");
    }

    #[tokio::test]
    async fn test_unchanged_state_does_no_io() {
        let (db, mut store) = store().await;
        store.mark_read("a").await.unwrap();
        let first = updated_at(&db).await;

        db.delete_document(SETTINGS_KEY).await.unwrap();
        store.mark_read("a").await.unwrap();
        store.unhide("missing").await.unwrap();
        store.set_theme("dark").await.unwrap();

        assert!(first.is_some());
        assert_eq!(updated_at(&db).await, None);
    }

    #[tokio::test]
    async fn test_persisted_as_arrays() {
        let (db, mut store) = store().await;
        store.mark_read("b").await.unwrap();
        store.mark_read("a").await.unwrap();

        let raw = db.get_document(SETTINGS_KEY).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["read"], serde_json::json!(["a", "b"]));
        assert_eq!(value["favorites"], serde_json::json!([]));
        assert_eq!(value["theme"], "dark");
    }
}
