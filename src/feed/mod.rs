//! Feed pipeline: parsing, fetching, aggregation and filtering.
//!
//! - **Parsing**: Convert RSS/Atom XML into normalized [`FeedItem`](crate::storage::FeedItem)s
//! - **Fetching**: HTTP retrieval with retry, timeout and size limits
//! - **Aggregation**: cache-or-fetch per source, then merge, dedup and sort a page
//! - **Viewing**: hidden/source/favorite filtering over an aggregated page
//!
//! # Example
//!
//! ```ignore
//! use startpage::feed::{FeedAggregator, FeedFetcher, FeedView, ViewFilter};
//!
//! let aggregator = FeedAggregator::new(cache, fetcher);
//! let page_feed = aggregator.aggregate(&page).await;
//! let visible = FeedView::apply(&page_feed.items, &ViewFilter::default(), &state);
//! ```

mod aggregator;
mod fetcher;
mod parser;
mod view;

pub use aggregator::{
    dedup_by_id, merge_items, sort_newest_first, FeedAggregator, ItemOrigin, PageFeed,
    SourceError, SourceReport,
};
pub use fetcher::{ErrorKind, FeedFetcher, FetchError, FetcherOptions};
pub use parser::{parse_feed, ParseResult};
pub use view::{FeedView, ViewFilter, ALL_SOURCES};
