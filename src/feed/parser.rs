use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Link};
use feed_rs::parser::{self, ParseFeedError};
use sha2::{Digest, Sha256};
use url::Url;

use crate::storage::FeedItem;
use crate::util::display_domain;

/// Items parsed from one feed document.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub items: Vec<FeedItem>,
    /// Entries dropped for lacking a usable link or any date.
    pub skipped: usize,
}

/// Parse an RSS/Atom/JSON feed body into normalized items.
///
/// `source_url` resolves relative entry links and supplies a display name
/// when the feed has no title. Every item gets the feed-level title as its
/// `source`.
pub fn parse_feed(bytes: &[u8], source_url: &str) -> Result<ParseResult, ParseFeedError> {
    // feed-rs would otherwise fill missing ids from link and title, which
    // changes the id whenever a title is edited.
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)?;

    let source = feed
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| display_domain(source_url))
        .unwrap_or_else(|| source_url.to_string());
    let feed_date = feed.updated.or(feed.published);
    let base = Url::parse(source_url).ok();

    let mut skipped = 0;
    let mut items = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        match normalize_entry(entry, &source, feed_date, base.as_ref()) {
            Some(item) => items.push(item),
            None => skipped += 1,
        }
    }

    Ok(ParseResult { items, skipped })
}

fn normalize_entry(
    entry: Entry,
    source: &str,
    feed_date: Option<DateTime<Utc>>,
    base: Option<&Url>,
) -> Option<FeedItem> {
    let link = pick_link(&entry.links).and_then(|href| resolve_link(href, base))?;
    let published = entry.published.or(entry.updated).or(feed_date)?;

    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let id = derive_id(&entry.id, &link, &title);

    Some(FeedItem {
        id,
        title,
        source: source.to_string(),
        published,
        link,
        summary,
    })
}

/// Prefer the entry's alternate (permalink) link over enclosures and replies.
fn pick_link(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.trim())
        .filter(|href| !href.is_empty())
}

/// Absolute http(s) link for `href`; other schemes are rejected.
fn resolve_link(href: &str, base: Option<&Url>) -> Option<String> {
    let url = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(href).ok()?,
        Err(_) => return None,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Stable item id: the entry GUID when present, else a hash of the link.
///
/// Repeated fetches of an unchanged entry must produce the same id so that
/// deduplication and read state survive cache refreshes.
fn derive_id(guid: &str, link: &str, title: &str) -> String {
    let trimmed = guid.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    let input = if link.is_empty() { title } else { link };
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example Blog</title>
    <link>https://example.com</link>
    <item>
        <guid>post-1</guid>
        <title>First</title>
        <link>https://example.com/1</link>
        <pubDate>Mon, 15 Jan 2024 10:00:00 GMT</pubDate>
        <description>Hello</description>
    </item>
    <item>
        <title>No guid</title>
        <link>https://example.com/2</link>
        <pubDate>Tue, 16 Jan 2024 10:00:00 GMT</pubDate>
    </item>
</channel></rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
    <title>Atom Site</title>
    <id>urn:uuid:feed</id>
    <updated>2024-01-16T10:00:00Z</updated>
    <entry>
        <id>urn:uuid:entry-1</id>
        <title>Relative</title>
        <link rel="alternate" href="/posts/1"/>
        <updated>2024-01-14T10:00:00Z</updated>
        <summary>Atom summary</summary>
    </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items() {
        let result = parse_feed(RSS.as_bytes(), "https://example.com/feed.xml").unwrap();
        assert_eq!(result.skipped, 0);
        assert_eq!(result.items.len(), 2);

        let first = &result.items[0];
        assert_eq!(first.id, "post-1");
        assert_eq!(first.title, "First");
        assert_eq!(first.source, "Example Blog");
        assert_eq!(first.link, "https://example.com/1");
        assert_eq!(
            first.published,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
        );
        assert_eq!(first.summary.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_source_comes_from_feed_title_for_every_item() {
        let result = parse_feed(RSS.as_bytes(), "https://example.com/feed.xml").unwrap();
        assert!(result.items.iter().all(|i| i.source == "Example Blog"));
    }

    #[test]
    fn test_ids_are_stable_across_parses() {
        let a = parse_feed(RSS.as_bytes(), "https://example.com/feed.xml").unwrap();
        let b = parse_feed(RSS.as_bytes(), "https://example.com/feed.xml").unwrap();
        let ids_a: Vec<_> = a.items.iter().map(|i| i.id.clone()).collect();
        let ids_b: Vec<_> = b.items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
        assert!(!ids_a[1].is_empty());
    }

    #[test]
    fn test_parse_atom_resolves_relative_links() {
        let result = parse_feed(ATOM.as_bytes(), "https://atom.example.org/feed").unwrap();
        assert_eq!(result.items.len(), 1);

        let item = &result.items[0];
        assert_eq!(item.id, "urn:uuid:entry-1");
        assert_eq!(item.source, "Atom Site");
        assert_eq!(item.link, "https://atom.example.org/posts/1");
        assert_eq!(
            item.published,
            Utc.with_ymd_and_hms(2024, 1, 14, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_untitled_feed_uses_domain() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><link>https://www.news.example.com/1</link>
    <pubDate>Mon, 15 Jan 2024 10:00:00 GMT</pubDate></item>
</channel></rss>"#;
        let result = parse_feed(rss.as_bytes(), "https://www.news.example.com/rss").unwrap();
        assert_eq!(result.items[0].source, "news.example.com");
        assert_eq!(result.items[0].title, "Untitled");
    }

    #[test]
    fn test_entries_without_link_or_date_are_skipped() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Sparse</title>
    <item><guid>no-link</guid><title>No link</title>
    <pubDate>Mon, 15 Jan 2024 10:00:00 GMT</pubDate></item>
    <item><guid>no-date</guid><title>No date</title><link>https://example.com/x</link></item>
    <item><guid>ok</guid><title>Ok</title><link>https://example.com/ok</link>
    <pubDate>Mon, 15 Jan 2024 10:00:00 GMT</pubDate></item>
</channel></rss>"#;
        let result = parse_feed(rss.as_bytes(), "https://example.com/rss").unwrap();
        assert_eq!(result.skipped, 2);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].id, "ok");
    }

    fn guidless(title: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example Blog</title>
    <item>
        <title>{title}</title>
        <link>https://example.com/2</link>
        <pubDate>Tue, 16 Jan 2024 10:00:00 GMT</pubDate>
    </item>
</channel></rss>"#
        )
    }

    #[test]
    fn test_guidless_id_is_link_hash_and_survives_title_edit() {
        let before = parse_feed(guidless("No guid").as_bytes(), "https://example.com/rss").unwrap();
        let after =
            parse_feed(guidless("Edited title").as_bytes(), "https://example.com/rss").unwrap();

        let expected = format!("{:x}", Sha256::digest(b"https://example.com/2"));
        assert_eq!(before.items[0].id, expected);
        assert_eq!(after.items[0].id, expected);
        assert_eq!(after.items[0].title, "Edited title");
    }

    #[test]
    fn test_non_http_links_are_skipped() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Hostile</title>
    <item><guid>js</guid><title>Script</title><link>javascript:alert(1)</link>
    <pubDate>Mon, 15 Jan 2024 10:00:00 GMT</pubDate></item>
    <item><guid>data</guid><title>Data</title><link>data:text/html,hi</link>
    <pubDate>Mon, 15 Jan 2024 10:00:00 GMT</pubDate></item>
    <item><guid>ok</guid><title>Ok</title><link>https://example.com/ok</link>
    <pubDate>Mon, 15 Jan 2024 10:00:00 GMT</pubDate></item>
</channel></rss>"#;
        let result = parse_feed(rss.as_bytes(), "https://example.com/rss").unwrap();
        assert_eq!(result.skipped, 2);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].link, "https://example.com/ok");
    }

    #[test]
    fn test_resolve_link_schemes() {
        let base = Url::parse("https://example.com/feed").unwrap();
        assert_eq!(
            resolve_link("/a", Some(&base)).as_deref(),
            Some("https://example.com/a")
        );
        assert_eq!(resolve_link("javascript:void(0)", Some(&base)), None);
        assert_eq!(resolve_link("ftp://example.com/x", None), None);
        assert_eq!(resolve_link("/a", None), None);
    }

    #[test]
    fn test_malformed_xml_is_error() {
        assert!(parse_feed(b"<not valid xml", "https://example.com/rss").is_err());
    }

    #[test]
    fn test_derive_id_prefers_guid() {
        assert_eq!(derive_id("  guid-1 ", "https://example.com/1", "T"), "guid-1");
        assert_eq!(
            derive_id("", "https://example.com/1", "T"),
            derive_id("", "https://example.com/1", "Other title")
        );
        assert_ne!(
            derive_id("", "https://example.com/1", "T"),
            derive_id("", "https://example.com/2", "T")
        );
    }
}
