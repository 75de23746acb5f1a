//! Listing entries to enriched news items.

use crate::extract::PageExtractor;
use crate::models::{NewsItem, RawListingItem};
use tracing::{debug, instrument};

/// Expand the first `max_items` listing entries into [`NewsItem`]s.
///
/// Entries are processed in listing order, one page render at a time. An
/// entry whose page cannot be extracted is still emitted, with an empty
/// `full_content`. Entries past the cap are neither rendered nor returned.
#[instrument(
    level = "info",
    skip_all,
    fields(%subject, listed = listing.len(), max_items = max_items)
)]
pub async fn format_news(
    listing: &[RawListingItem],
    subject: &str,
    max_items: usize,
    extractor: &dyn PageExtractor,
) -> Vec<NewsItem> {
    let mut formatted = Vec::with_capacity(listing.len().min(max_items));

    for raw in listing.iter().take(max_items) {
        let full_content = extractor.extract(&raw.url).await;
        if full_content.is_empty() {
            debug!(url = %raw.url, "No full content; keeping listing fields only");
        }
        formatted.push(NewsItem::from_listing(raw, subject, full_content));
    }

    debug!(
        formatted = formatted.len(),
        with_content = formatted.iter().filter(|n| n.has_full_content()).count(),
        "Formatted news items"
    );
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Votes;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Records every URL it is asked for; fails for URLs containing "broken".
    #[derive(Default)]
    struct RecordingExtractor {
        seen: Mutex<Vec<String>>,
        always_fail: bool,
    }

    #[async_trait]
    impl PageExtractor for RecordingExtractor {
        async fn extract(&self, url: &str) -> String {
            self.seen.lock().unwrap().push(url.to_string());
            if self.always_fail || url.contains("broken") {
                String::new()
            } else {
                format!("content of {url}")
            }
        }

        async fn cleanup(&self) {}
    }

    fn listing(n: usize) -> Vec<RawListingItem> {
        (0..n)
            .map(|i| RawListingItem {
                title: format!("Item {i}"),
                url: format!("https://news.example/{i}"),
                published_at: Utc.with_ymd_and_hms(2024, 1, 1, i as u32, 0, 0).unwrap(),
                metadata: None,
                votes: Votes {
                    positive: i as u64,
                    liked: 1,
                    ..Votes::default()
                },
            })
            .collect()
    }

    #[tokio::test]
    async fn test_emits_min_of_listing_and_cap_in_order() {
        for (len, cap) in [(0, 5), (3, 5), (5, 5), (7, 5), (4, 0)] {
            let extractor = RecordingExtractor::default();
            let items = format_news(&listing(len), "SOL", cap, &extractor).await;

            assert_eq!(items.len(), len.min(cap), "len={len} cap={cap}");
            for (i, item) in items.iter().enumerate() {
                assert_eq!(item.url, format!("https://news.example/{i}"));
                assert_eq!(item.relevance, i as u64);
                assert_eq!(item.subject, "SOL");
            }
        }
    }

    #[tokio::test]
    async fn test_cap_of_one_only_renders_first_item() {
        let extractor = RecordingExtractor::default();
        let items = format_news(&listing(3), "SOL", 1, &extractor).await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Item 0");
        assert_eq!(
            *extractor.seen.lock().unwrap(),
            vec!["https://news.example/0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failed_extraction_degrades_instead_of_dropping() {
        let extractor = RecordingExtractor {
            always_fail: true,
            ..RecordingExtractor::default()
        };
        let items = format_news(&listing(4), "ETH", 10, &extractor).await;

        assert_eq!(items.len(), 4);
        assert!(items.iter().all(|i| i.full_content.is_empty()));
    }

    #[tokio::test]
    async fn test_mixed_extraction_results_keep_listing_fields() {
        let mut raw = listing(2);
        raw[0].url = "https://news.example/broken".to_string();
        let extractor = RecordingExtractor::default();
        let items = format_news(&raw, "SOL", 5, &extractor).await;

        assert_eq!(items[0].full_content, "");
        assert_eq!(items[0].title, "Item 0");
        assert_eq!(items[1].full_content, "content of https://news.example/1");
    }
}
