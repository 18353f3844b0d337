use anyhow::Result;
use reqwest::redirect::Policy;

use crate::config::Config;
use crate::feed::{FeedAggregator, FeedFetcher, FeedView, PageFeed, ViewFilter};
use crate::registry::{FeedSourceRegistry, RegistryError, SourceAdded};
use crate::storage::{
    Database, FeedCache, FeedItem, FeedPage, PAGES_KEY, SETTINGS_KEY, WIDGETS_KEY,
};
use crate::user_state::UserStateStore;
use crate::widgets::{WidgetBody, WidgetStore};

// ============================================================================
// HTTP Client Configuration
// ============================================================================

/// Create a custom redirect policy with loop detection and limited hops.
///
/// - Limits redirects to 3 hops maximum
/// - Detects redirect loops (same URL appearing twice in chain)
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Shared HTTP client for feed fetching.
pub fn build_http_client(config: &Config) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .redirect(create_redirect_policy())
        .user_agent(concat!("startpage/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .tcp_keepalive(std::time::Duration::from_secs(60))
        .timeout(config.fetcher_options().timeout)
        .build()?;
    Ok(client)
}

// ============================================================================
// App
// ============================================================================

/// Start-page state: pages, user state, widgets and the feed pipeline.
///
/// Every mutation that changes persisted state writes the matching document
/// before returning; a no-op mutation does no I/O.
pub struct App {
    db: Database,
    config: Config,
    registry: FeedSourceRegistry,
    user_state: UserStateStore,
    widgets: WidgetStore,
    aggregator: FeedAggregator,
}

impl App {
    /// Load persisted state and build the feed pipeline from `config`.
    pub async fn new(db: Database, config: Config) -> Result<Self> {
        let client = build_http_client(&config)?;
        Self::with_client(db, config, client).await
    }

    pub async fn with_client(db: Database, config: Config, client: reqwest::Client) -> Result<Self> {
        let registry = FeedSourceRegistry::load(&db).await?;
        let user_state = UserStateStore::load_with_theme(db.clone(), &config.theme).await?;
        let widgets = WidgetStore::load(&db).await?;

        let fetcher = FeedFetcher::new(client, config.fetcher_options());
        let aggregator = FeedAggregator::new(FeedCache::new(db.clone()), fetcher)
            .with_ttl(config.cache_ttl())
            .with_max_concurrent(config.fetch_concurrency());

        tracing::debug!(
            pages = registry.len(),
            widgets = widgets.widgets().len(),
            "Loaded start page state"
        );

        Ok(Self {
            db,
            config,
            registry,
            user_state,
            widgets,
            aggregator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &FeedSourceRegistry {
        &self.registry
    }

    pub fn aggregator(&self) -> &FeedAggregator {
        &self.aggregator
    }

    pub fn user_state(&self) -> &UserStateStore {
        &self.user_state
    }

    /// User state mutations persist themselves.
    pub fn user_state_mut(&mut self) -> &mut UserStateStore {
        &mut self.user_state
    }

    pub fn widgets(&self) -> &WidgetStore {
        &self.widgets
    }

    // ========================================================================
    // Pages and Sources
    // ========================================================================

    pub async fn add_page(&mut self, name: &str) -> Result<FeedPage> {
        let page = self.registry.add_page(name)?.clone();
        self.save_registry().await?;
        Ok(page)
    }

    /// Remove a page and drop cache entries no remaining page uses.
    pub async fn remove_page(&mut self, page_id: &str) -> Result<bool> {
        if !self.registry.remove_page(page_id) {
            return Ok(false);
        }
        self.save_registry().await?;
        self.prune_cache().await;
        Ok(true)
    }

    pub async fn rename_page(&mut self, page_id: &str, name: &str) -> Result<bool> {
        let changed = self.registry.rename_page(page_id, name)?;
        if changed {
            self.save_registry().await?;
        }
        Ok(changed)
    }

    pub async fn reorder_pages<S: AsRef<str>>(&mut self, new_order: &[S]) -> Result<bool> {
        let changed = self.registry.reorder_pages(new_order)?;
        if changed {
            self.save_registry().await?;
        }
        Ok(changed)
    }

    pub async fn add_source(&mut self, page_id: &str, url: &str) -> Result<SourceAdded> {
        let added = self.registry.add_source(page_id, url)?;
        if added == SourceAdded::Added {
            self.save_registry().await?;
        }
        Ok(added)
    }

    pub async fn remove_source(&mut self, page_id: &str, url: &str) -> Result<bool> {
        let removed = self.registry.remove_source(page_id, url)?;
        if removed {
            self.save_registry().await?;
            self.prune_cache().await;
        }
        Ok(removed)
    }

    async fn save_registry(&self) -> Result<()> {
        self.registry.save(&self.db).await
    }

    async fn prune_cache(&self) {
        let keep = self.registry.all_sources();
        if let Err(e) = self.aggregator.cache().prune(&keep).await {
            tracing::warn!(error = %e, "Failed to prune feed cache");
        }
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    fn page_or_err(&self, page_id: &str) -> Result<&FeedPage, RegistryError> {
        self.registry
            .page(page_id)
            .ok_or_else(|| RegistryError::PageNotFound(page_id.to_string()))
    }

    /// Aggregate a page, bypassing the cache when `refresh` is set.
    pub async fn page_feed(&self, page_id: &str, refresh: bool) -> Result<PageFeed> {
        let page = self.page_or_err(page_id)?;
        Ok(if refresh {
            self.aggregator.refresh(page).await
        } else {
            self.aggregator.aggregate(page).await
        })
    }

    /// Re-aggregate a page only if some source is missing or stale.
    pub async fn refresh_if_stale(&self, page_id: &str) -> Result<Option<PageFeed>> {
        let page = self.page_or_err(page_id)?;
        Ok(self.aggregator.refresh_if_stale(page).await)
    }

    /// Displayed items of an aggregated page under the current user state.
    pub fn view<'a>(&self, feed: &'a PageFeed, filter: &ViewFilter) -> Vec<&'a FeedItem> {
        FeedView::apply(&feed.items, filter, self.user_state.state())
    }

    // ========================================================================
    // Widgets
    // ========================================================================

    pub async fn add_widget(&mut self, title: &str, body: WidgetBody) -> Result<String> {
        let id = self.widgets.add(title, body)?.id.clone();
        self.widgets.save(&self.db).await?;
        Ok(id)
    }

    pub async fn remove_widget(&mut self, id: &str) -> Result<bool> {
        let removed = self.widgets.remove(id);
        if removed {
            self.widgets.save(&self.db).await?;
        }
        Ok(removed)
    }

    pub async fn rename_widget(&mut self, id: &str, title: &str) -> Result<bool> {
        let changed = self.widgets.rename(id, title)?;
        if changed {
            self.widgets.save(&self.db).await?;
        }
        Ok(changed)
    }

    pub async fn move_widget(&mut self, from: usize, to: usize) -> Result<bool> {
        let changed = self.widgets.move_widget(from, to)?;
        if changed {
            self.widgets.save(&self.db).await?;
        }
        Ok(changed)
    }

    /// Exportable widget JSON, without transient readings.
    pub fn export_widgets(&self) -> Result<String> {
        self.widgets.export_json()
    }

    // ========================================================================
    // Reset
    // ========================================================================

    /// Delete every persisted document and return to a fresh profile.
    pub async fn reset(&mut self) -> Result<()> {
        for key in [PAGES_KEY, SETTINGS_KEY, WIDGETS_KEY] {
            self.db.delete_document(key).await?;
        }
        let cleared = self.aggregator.cache().clear().await?;

        self.registry = FeedSourceRegistry::with_default_page();
        self.user_state =
            UserStateStore::load_with_theme(self.db.clone(), &self.config.theme).await?;
        self.widgets = WidgetStore::default();

        tracing::info!(cached_sources = cleared, "Reset start page data");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_app() -> (Database, App) {
        let db = Database::open(":memory:").await.unwrap();
        let app = App::new(db.clone(), Config::default()).await.unwrap();
        (db, app)
    }

    #[tokio::test]
    async fn test_fresh_profile_has_default_page() {
        let (db, app) = test_app().await;
        assert_eq!(app.registry().pages().len(), 1);
        assert_eq!(app.registry().pages()[0].id, "feeds");
        assert!(app.widgets().widgets().is_empty());
        // Synthesized, not yet written.
        assert!(db.get_document(PAGES_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registry_changes_persist() {
        let (db, mut app) = test_app().await;
        let page = app.add_page("Tech").await.unwrap();
        app.add_source(&page.id, "https://example.com/feed.xml")
            .await
            .unwrap();

        let reloaded = App::new(db, Config::default()).await.unwrap();
        assert_eq!(reloaded.registry(), app.registry());
    }

    #[tokio::test]
    async fn test_no_write_when_unchanged() {
        let (db, mut app) = test_app().await;
        app.add_source("feeds", "https://example.com/feed.xml")
            .await
            .unwrap();
        db.delete_document(PAGES_KEY).await.unwrap();

        let added = app
            .add_source("feeds", "https://example.com/feed.xml")
            .await
            .unwrap();
        assert_eq!(added, SourceAdded::Duplicate);
        assert!(!app.remove_source("feeds", "https://other.com/feed").await.unwrap());
        assert!(!app.rename_page("feeds", "Feeds").await.unwrap());
        assert!(!app.reorder_pages(&["feeds"]).await.unwrap());

        assert!(db.get_document(PAGES_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_mutation_surfaces_error() {
        let (_db, mut app) = test_app().await;
        let err = app.add_source("feeds", "ftp://example.com").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::InvalidUrl { .. })
        ));

        let err = app.page_feed("missing", false).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::PageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_removing_last_use_of_source_prunes_cache() {
        let (_db, mut app) = test_app().await;
        let url = "https://example.com/feed.xml";
        let tech = app.add_page("Tech").await.unwrap();
        app.add_source("feeds", url).await.unwrap();
        app.add_source(&tech.id, url).await.unwrap();
        app.aggregator().cache().put(url, &[]).await.unwrap();

        app.remove_source("feeds", url).await.unwrap();
        assert!(app.aggregator().cache().get(url).await.unwrap().is_some());

        app.remove_page(&tech.id).await.unwrap();
        assert!(app.aggregator().cache().get(url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let (db, mut app) = test_app().await;
        let url = "https://example.com/feed.xml";
        app.add_page("Tech").await.unwrap();
        app.add_source("feeds", url).await.unwrap();
        app.user_state_mut().toggle_favorite("a").await.unwrap();
        app.user_state_mut().set_theme("light").await.unwrap();
        app.add_widget("Notes", WidgetBody::Notes { notes: "hi".to_string() })
            .await
            .unwrap();
        app.aggregator().cache().put(url, &[]).await.unwrap();

        app.reset().await.unwrap();

        for key in [PAGES_KEY, SETTINGS_KEY, WIDGETS_KEY] {
            assert!(db.get_document(key).await.unwrap().is_none(), "{key} survived");
        }
        assert!(app.aggregator().cache().get(url).await.unwrap().is_none());
        assert_eq!(app.registry(), &FeedSourceRegistry::with_default_page());
        assert!(app.user_state().state().favorites.is_empty());
        assert_eq!(app.user_state().state().theme, app.config().theme);
        assert!(app.widgets().widgets().is_empty());

        let reloaded = App::new(db, Config::default()).await.unwrap();
        assert_eq!(reloaded.registry().len(), 1);
        assert!(reloaded.widgets().widgets().is_empty());
    }

    #[tokio::test]
    async fn test_widgets_persist() {
        let (db, mut app) = test_app().await;
        let id = app
            .add_widget("Notes", WidgetBody::Notes { notes: "hi".to_string() })
            .await
            .unwrap();
        assert!(app.rename_widget(&id, "Scratch").await.unwrap());

        let reloaded = App::new(db.clone(), Config::default()).await.unwrap();
        assert_eq!(reloaded.widgets().get(&id).unwrap().title, "Scratch");

        assert!(app.remove_widget(&id).await.unwrap());
        let raw = db.get_document(WIDGETS_KEY).await.unwrap().unwrap();
        assert_eq!(raw, "[]");
    }
}
