//! Ordered feed pages and their source lists.
//!
//! The registry is plain data plus validation. Mutations report whether they
//! changed anything so the caller can persist only real changes; loading and
//! saving go through the `feed-pages-config` document.
use std::collections::HashSet;

use anyhow::Result;
use thiserror::Error;

use crate::storage::{Database, FeedPage, PAGES_KEY};
use crate::util::{validate_feed_url, UrlValidationError};

/// Most pages a profile may have.
pub const MAX_PAGES: usize = 10;

/// Id of the page synthesized when no configuration exists.
pub const DEFAULT_PAGE_ID: &str = "feeds";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid feed URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: UrlValidationError,
    },

    #[error("Page limit reached ({} pages)", MAX_PAGES)]
    LimitExceeded,

    #[error("Reorder must list every existing page exactly once")]
    InvalidReorder,

    #[error("No page with id '{0}'")]
    PageNotFound(String),

    #[error("Page name cannot be empty")]
    EmptyName,
}

/// Outcome of [`FeedSourceRegistry::add_source`].
///
/// A duplicate is not an error: the call is a no-op and the caller decides
/// whether to mention it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAdded {
    Added,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSourceRegistry {
    pages: Vec<FeedPage>,
}

impl Default for FeedSourceRegistry {
    fn default() -> Self {
        Self::with_default_page()
    }
}

impl FeedSourceRegistry {
    /// Registry holding only the default `feeds` page.
    pub fn with_default_page() -> Self {
        Self {
            pages: vec![FeedPage::new(DEFAULT_PAGE_ID, "Feeds", 0)],
        }
    }

    /// Build from persisted pages, keeping them sorted by `order`.
    ///
    /// Duplicate sources inside a page and pages past [`MAX_PAGES`] are
    /// dropped; an empty list falls back to the default page.
    pub fn from_pages(mut pages: Vec<FeedPage>) -> Self {
        if pages.is_empty() {
            return Self::with_default_page();
        }

        pages.sort_by_key(|p| p.order);

        let mut ids = HashSet::new();
        pages.retain(|p| ids.insert(p.id.clone()));
        if pages.len() > MAX_PAGES {
            tracing::warn!(pages = pages.len(), max = MAX_PAGES, "Too many feed pages, truncating");
            pages.truncate(MAX_PAGES);
        }

        for page in &mut pages {
            let mut seen = HashSet::new();
            page.feed_sources.retain(|url| seen.insert(url.clone()));
        }

        Self { pages }
    }

    /// Load the page configuration; absent or malformed → default page.
    pub async fn load(db: &Database) -> Result<Self> {
        let pages: Option<Vec<FeedPage>> = db.load_document(PAGES_KEY).await?;
        Ok(match pages {
            Some(pages) => Self::from_pages(pages),
            None => {
                tracing::debug!("No feed page configuration, using default page");
                Self::with_default_page()
            }
        })
    }

    pub async fn save(&self, db: &Database) -> Result<()> {
        db.store_document(PAGES_KEY, &self.pages).await
    }

    /// Pages ordered by `order`.
    pub fn pages(&self) -> &[FeedPage] {
        &self.pages
    }

    pub fn page(&self, page_id: &str) -> Option<&FeedPage> {
        self.pages.iter().find(|p| p.id == page_id)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Every source URL across all pages.
    pub fn all_sources(&self) -> HashSet<&str> {
        self.pages
            .iter()
            .flat_map(|p| p.feed_sources.iter().map(String::as_str))
            .collect()
    }

    /// Append a new page after the current last one.
    pub fn add_page(&mut self, name: &str) -> Result<&FeedPage, RegistryError> {
        if self.pages.len() >= MAX_PAGES {
            return Err(RegistryError::LimitExceeded);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let order = self.pages.iter().map(|p| p.order + 1).max().unwrap_or(0);
        let id = self.next_page_id();
        self.pages.push(FeedPage::new(id, name, order));

        let page = &self.pages[self.pages.len() - 1];
        tracing::info!(page = %page.id, name = %page.name, "Added feed page");
        Ok(page)
    }

    /// Remove a page. Returns whether it existed.
    pub fn remove_page(&mut self, page_id: &str) -> bool {
        let before = self.pages.len();
        self.pages.retain(|p| p.id != page_id);
        before != self.pages.len()
    }

    /// Rename a page. Returns whether the name changed.
    pub fn rename_page(&mut self, page_id: &str, name: &str) -> Result<bool, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let page = self.page_mut(page_id)?;
        if page.name == name {
            return Ok(false);
        }
        page.name = name.to_string();
        Ok(true)
    }

    /// Append a source to a page unless it is already there.
    pub fn add_source(&mut self, page_id: &str, url: &str) -> Result<SourceAdded, RegistryError> {
        let url = url.trim();
        validate_feed_url(url).map_err(|source| RegistryError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        let page = self.page_mut(page_id)?;
        if page.feed_sources.iter().any(|existing| existing == url) {
            tracing::debug!(page = %page_id, url = %url, "Source already on page, ignoring");
            return Ok(SourceAdded::Duplicate);
        }

        page.feed_sources.push(url.to_string());
        Ok(SourceAdded::Added)
    }

    /// Remove a source from a page. Returns whether it was present.
    pub fn remove_source(&mut self, page_id: &str, url: &str) -> Result<bool, RegistryError> {
        let page = self.page_mut(page_id)?;
        let before = page.feed_sources.len();
        page.feed_sources.retain(|existing| existing != url);
        Ok(before != page.feed_sources.len())
    }

    /// Reassign page order to match `new_order`, which must be a permutation
    /// of the existing ids. Returns whether anything moved.
    pub fn reorder_pages<S: AsRef<str>>(&mut self, new_order: &[S]) -> Result<bool, RegistryError> {
        if new_order.len() != self.pages.len() {
            return Err(RegistryError::InvalidReorder);
        }
        let requested: HashSet<&str> = new_order.iter().map(AsRef::as_ref).collect();
        if requested.len() != new_order.len()
            || !self.pages.iter().all(|p| requested.contains(p.id.as_str()))
        {
            return Err(RegistryError::InvalidReorder);
        }

        let mut changed = false;
        for (position, id) in new_order.iter().enumerate() {
            let order = position as u32;
            if let Some(page) = self.pages.iter_mut().find(|p| p.id == id.as_ref()) {
                if page.order != order {
                    page.order = order;
                    changed = true;
                }
            }
        }
        self.pages.sort_by_key(|p| p.order);
        Ok(changed)
    }

    fn page_mut(&mut self, page_id: &str) -> Result<&mut FeedPage, RegistryError> {
        self.pages
            .iter_mut()
            .find(|p| p.id == page_id)
            .ok_or_else(|| RegistryError::PageNotFound(page_id.to_string()))
    }

    fn next_page_id(&self) -> String {
        (self.pages.len() + 1..)
            .map(|n| format!("page-{n}"))
            .find(|id| self.page(id).is_none())
            .unwrap_or_default()
    }
}
