use std::collections::HashSet;

use crate::storage::{FeedItem, UserState};

/// Source selector value meaning "no source filter".
pub const ALL_SOURCES: &str = "all";

/// What the user chose to look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewFilter {
    /// Display name of one source, or `None` / [`ALL_SOURCES`] for every source.
    pub source: Option<String>,
    pub favorites_only: bool,
}

impl ViewFilter {
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn favorites_only(mut self, favorites_only: bool) -> Self {
        self.favorites_only = favorites_only;
        self
    }

    fn source_filter(&self) -> Option<&str> {
        self.source.as_deref().filter(|s| *s != ALL_SOURCES)
    }
}

/// Read-only projection of an aggregated feed through the user's state.
pub struct FeedView;

impl FeedView {
    /// Filter `items` for display, preserving their order.
    ///
    /// Evaluated as hidden → source → favorites; the filters compose by AND.
    pub fn apply<'a>(
        items: &'a [FeedItem],
        filter: &ViewFilter,
        state: &UserState,
    ) -> Vec<&'a FeedItem> {
        let source = filter.source_filter();

        items
            .iter()
            .filter(|item| !state.hidden.contains(&item.id))
            .filter(|item| source.map_or(true, |s| item.source == s))
            .filter(|item| !filter.favorites_only || state.favorites.contains(&item.id))
            .collect()
    }

    /// Distinct source names in first-seen order, for the source selector.
    pub fn sources(items: &[FeedItem]) -> Vec<&str> {
        let mut seen = HashSet::new();
        items
            .iter()
            .map(|item| item.source.as_str())
            .filter(|source| seen.insert(*source))
            .collect()
    }

    /// Visible items not yet marked read.
    pub fn unread_count(items: &[FeedItem], state: &UserState) -> usize {
        items
            .iter()
            .filter(|item| !state.hidden.contains(&item.id) && !state.read.contains(&item.id))
            .count()
    }
}
