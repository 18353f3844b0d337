use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::feed::fetcher::{ErrorKind, FeedFetcher};
use crate::storage::{CacheEntry, FeedCache, FeedItem, FeedPage, DEFAULT_CACHE_TTL};

const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Where a source's contribution to the page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrigin {
    /// Fresh cache entry; no network request was made.
    Cache,
    /// Fetched from the network and written back to the cache.
    Network,
    /// Fetch failed; an expired cache entry was served instead.
    StaleCache,
    /// Fetch failed and nothing was cached; the source contributed no items.
    None,
}

/// Per-source outcome of one aggregation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source_url: String,
    pub origin: ItemOrigin,
    pub item_count: usize,
    /// Epoch ms of the snapshot the items came from, if any.
    pub fetched_at: Option<i64>,
}

/// A source that could not be refreshed.
///
/// Never aborts the page: the source falls back to stale cache
/// (`served_stale`) or contributes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceError {
    pub source_url: String,
    pub kind: ErrorKind,
    pub message: String,
    pub served_stale: bool,
}

/// Materialized feed for one page: deduplicated, newest first, plus the
/// per-source diagnostics gathered while building it.
#[derive(Debug, Clone, Serialize)]
pub struct PageFeed {
    pub page_id: String,
    pub items: Vec<FeedItem>,
    pub errors: Vec<SourceError>,
    pub sources: Vec<SourceReport>,
}

impl PageFeed {
    /// True when every source resolved without a fetch error.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of sources answered from cache without touching the network.
    pub fn cache_hits(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.origin == ItemOrigin::Cache)
            .count()
    }

    /// Sources currently showing expired data after a failed refresh.
    pub fn stale_sources(&self) -> impl Iterator<Item = &str> {
        self.errors
            .iter()
            .filter(|e| e.served_stale)
            .map(|e| e.source_url.as_str())
    }
}

/// Result of consulting the cache before deciding whether to fetch.
#[derive(Debug)]
enum CacheLookup {
    Fresh(CacheEntry),
    Stale(CacheEntry),
    Miss,
}

struct Resolved {
    report: SourceReport,
    items: Vec<FeedItem>,
    error: Option<SourceError>,
}

/// Builds a page's feed from its sources, reusing cached snapshots while
/// they are fresh.
///
/// Each source is resolved independently (cache hit, fetch, or stale
/// fallback) and concurrently; merging only starts once every source has
/// settled.
#[derive(Clone)]
pub struct FeedAggregator {
    cache: FeedCache,
    fetcher: FeedFetcher,
    ttl: Duration,
    max_concurrent: usize,
}

impl FeedAggregator {
    pub fn new(cache: FeedCache, fetcher: FeedFetcher) -> Self {
        Self {
            cache,
            fetcher,
            ttl: DEFAULT_CACHE_TTL,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }

    /// Produce the page's feed, fetching only sources without a fresh snapshot.
    ///
    /// Never fails: per-source problems are reported in [`PageFeed::errors`]
    /// alongside whatever items could be gathered.
    pub async fn aggregate(&self, page: &FeedPage) -> PageFeed {
        // `buffered` keeps results in source order, which deduplication relies on.
        let resolved: Vec<Resolved> = stream::iter(page.feed_sources.iter())
            .map(|url| self.resolve_source(url))
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let mut per_source = Vec::with_capacity(resolved.len());
        let mut errors = Vec::new();
        let mut sources = Vec::with_capacity(resolved.len());
        for r in resolved {
            per_source.push(r.items);
            errors.extend(r.error);
            sources.push(r.report);
        }

        let items = merge_items(per_source);

        tracing::debug!(
            page = %page.id,
            sources = sources.len(),
            items = items.len(),
            failed = errors.len(),
            "Aggregated page"
        );

        PageFeed {
            page_id: page.id.clone(),
            items,
            errors,
            sources,
        }
    }

    /// Manual refresh: drop every source's snapshot, then aggregate.
    pub async fn refresh(&self, page: &FeedPage) -> PageFeed {
        for url in &page.feed_sources {
            if let Err(e) = self.cache.invalidate(url).await {
                tracing::warn!(url = %url, error = %e, "Failed to invalidate cache entry");
            }
        }
        tracing::info!(page = %page.id, sources = page.feed_sources.len(), "Manual refresh");
        self.aggregate(page).await
    }

    /// Background refresh: re-aggregate only when some source is missing
    /// from the cache or past its TTL.
    pub async fn refresh_if_stale(&self, page: &FeedPage) -> Option<PageFeed> {
        if self.needs_refresh(page).await {
            Some(self.aggregate(page).await)
        } else {
            tracing::debug!(page = %page.id, "All sources fresh, skipping refresh");
            None
        }
    }

    /// Whether any source of the page lacks a fresh snapshot.
    pub async fn needs_refresh(&self, page: &FeedPage) -> bool {
        for url in &page.feed_sources {
            if !matches!(self.lookup(url).await, CacheLookup::Fresh(_)) {
                return true;
            }
        }
        false
    }

    async fn lookup(&self, url: &str) -> CacheLookup {
        match self.cache.get(url).await {
            Ok(Some(entry)) if entry.is_fresh(self.ttl) => CacheLookup::Fresh(entry),
            Ok(Some(entry)) => CacheLookup::Stale(entry),
            Ok(None) => CacheLookup::Miss,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cache read failed, treating as miss");
                CacheLookup::Miss
            }
        }
    }

    async fn resolve_source(&self, url: &str) -> Resolved {
        let stale = match self.lookup(url).await {
            CacheLookup::Fresh(entry) => {
                tracing::debug!(url = %url, items = entry.items.len(), "Cache hit");
                return Resolved {
                    report: SourceReport {
                        source_url: url.to_string(),
                        origin: ItemOrigin::Cache,
                        item_count: entry.items.len(),
                        fetched_at: Some(entry.timestamp),
                    },
                    items: entry.items,
                    error: None,
                };
            }
            CacheLookup::Stale(entry) => Some(entry),
            CacheLookup::Miss => None,
        };

        match self.fetcher.fetch(url).await {
            Ok(items) => {
                let fetched_at = match self.cache.put(url, &items).await {
                    Ok(timestamp) => timestamp,
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Failed to write cache entry");
                        Utc::now().timestamp_millis()
                    }
                };
                Resolved {
                    report: SourceReport {
                        source_url: url.to_string(),
                        origin: ItemOrigin::Network,
                        item_count: items.len(),
                        fetched_at: Some(fetched_at),
                    },
                    items,
                    error: None,
                }
            }
            Err(e) => {
                let served_stale = stale.is_some();
                let error = SourceError {
                    source_url: url.to_string(),
                    kind: e.kind(),
                    message: e.to_string(),
                    served_stale,
                };

                match stale {
                    Some(entry) => {
                        tracing::warn!(
                            url = %url,
                            error = %e,
                            age_ms = entry.age_ms(Utc::now().timestamp_millis()),
                            "Fetch failed, serving stale cache"
                        );
                        Resolved {
                            report: SourceReport {
                                source_url: url.to_string(),
                                origin: ItemOrigin::StaleCache,
                                item_count: entry.items.len(),
                                fetched_at: Some(entry.timestamp),
                            },
                            items: entry.items,
                            error: Some(error),
                        }
                    }
                    None => {
                        tracing::warn!(url = %url, error = %e, "Fetch failed, no cached data");
                        Resolved {
                            report: SourceReport {
                                source_url: url.to_string(),
                                origin: ItemOrigin::None,
                                item_count: 0,
                                fetched_at: None,
                            },
                            items: Vec::new(),
                            error: Some(error),
                        }
                    }
                }
            }
        }
    }
}

/// Merge per-source item lists (in source order) into one page feed.
pub fn merge_items<I>(per_source: I) -> Vec<FeedItem>
where
    I: IntoIterator<Item = Vec<FeedItem>>,
{
    let pooled: Vec<FeedItem> = per_source.into_iter().flatten().collect();
    let mut items = dedup_by_id(pooled);
    sort_newest_first(&mut items);
    items
}

/// Keep the first occurrence of every id, preserving relative order.
pub fn dedup_by_id(items: Vec<FeedItem>) -> Vec<FeedItem> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
}

/// Newest first; equal timestamps keep their relative order (stable sort).
pub fn sort_newest_first(items: &mut [FeedItem]) {
    items.sort_by(|a, b| b.published.cmp(&a.published));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn item(id: &str, published: DateTime<Utc>) -> FeedItem {
        FeedItem {
            id: id.to_string(),
            title: format!("Post {id}"),
            source: "Source".to_string(),
            published,
            link: format!("https://example.com/{id}"),
            summary: None,
        }
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 10, 0, 0).unwrap()
    }

    fn ids(items: &[FeedItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let mut dup = item("1", day(1));
        dup.title = "Post 1 Duplicate".to_string();
        let items = vec![item("1", day(1)), item("2", day(1)), dup, item("3", day(1))];

        let deduped = dedup_by_id(items);
        assert_eq!(ids(&deduped), vec!["1", "2", "3"]);
        assert_eq!(deduped[0].title, "Post 1");
    }

    #[test]
    fn test_sort_newest_first() {
        let mut items = vec![item("middle", day(15)), item("newest", day(16)), item("oldest", day(14))];
        sort_newest_first(&mut items);
        assert_eq!(ids(&items), vec!["newest", "middle", "oldest"]);
    }

    #[test]
    fn test_sort_ties_keep_source_order() {
        let mut items = vec![item("a", day(2)), item("b", day(1)), item("c", day(2))];
        sort_newest_first(&mut items);
        assert_eq!(ids(&items), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_merge_prefers_earlier_source() {
        let first = vec![item("shared", day(3)), item("x", day(1))];
        let mut cross_post = item("shared", day(5));
        cross_post.source = "Other".to_string();
        let second = vec![cross_post, item("y", day(2))];

        let merged = merge_items(vec![first, second]);
        assert_eq!(ids(&merged), vec!["shared", "y", "x"]);
        assert_eq!(merged[0].source, "Source");
        assert_eq!(merged[0].published, day(3));
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_items(Vec::<Vec<FeedItem>>::new()).is_empty());
    }

    fn arb_items() -> impl Strategy<Value = Vec<FeedItem>> {
        prop::collection::vec((0u8..8, 1u32..28), 0..40).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(id, d)| item(&id.to_string(), day(d)))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_dedup_one_per_id_first_wins(items in arb_items()) {
            let deduped = dedup_by_id(items.clone());

            let distinct: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
            prop_assert_eq!(deduped.len(), distinct.len());

            for kept in &deduped {
                let first = items.iter().find(|i| i.id == kept.id).unwrap();
                prop_assert_eq!(kept, first);
            }
        }

        #[test]
        fn prop_merge_is_sorted_descending(items in arb_items()) {
            let merged = merge_items(vec![items]);
            for pair in merged.windows(2) {
                prop_assert!(pair[0].published >= pair[1].published);
            }
        }
    }
}
