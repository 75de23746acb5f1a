//! Data models for listing entries, enriched news items and stored records.
//!
//! This module defines the core data structures used throughout the pipeline:
//! - [`ListingResponse`] / [`RawListingItem`]: the listing API's JSON, read-only
//! - [`NewsItem`]: one listing entry enriched with the text of its linked page
//! - [`MemoryRecord`]: the shape persisted into a room of the memory store
//!
//! Stored records use camelCase field names so downstream consumers reading
//! the memory store see the same schema as the agent runtime writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;
use uuid::Uuid;

/// One page of the listing API response.
///
/// `next` is the pagination cursor; the pipeline always reads page one and
/// never follows it. Entries that fail to decode are dropped one by one, so a
/// single malformed entry never costs the rest of the page.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListingResponse {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default, deserialize_with = "lenient_entries")]
    pub results: Option<Vec<RawListingItem>>,
}

/// A single published item as the listing API reports it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawListingItem {
    /// Empty when the API sends no title or `null`; the sink rejects it.
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<ListingMetadata>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub votes: Votes,
}

impl RawListingItem {
    /// The free-text description, or an empty string when the API sent none.
    pub fn description(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.description.as_deref())
            .unwrap_or_default()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_entries<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<RawListingItem>>, D::Error> {
    let Some(entries) = Option::<Vec<serde_json::Value>>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let decoded = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed listing entry");
                None
            }
        })
        .collect();
    Ok(Some(decoded))
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListingMetadata {
    #[serde(default)]
    pub description: Option<String>,
}

/// Engagement counters. Any counter the API omits is zero.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Votes {
    pub positive: u64,
    pub negative: u64,
    pub important: u64,
    pub liked: u64,
    pub disliked: u64,
    pub lol: u64,
    pub toxic: u64,
    pub saved: u64,
    pub comments: u64,
}

/// A listing entry enriched with its page text. The unit of record.
///
/// `url` is the identity key. `full_content` is empty when extraction failed
/// or the page had nothing renderable; that is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub description: String,
    pub url: String,
    pub published: DateTime<Utc>,
    pub relevance: u64,
    pub likes: u64,
    pub subject: String,
    pub full_content: String,
}

impl NewsItem {
    /// Build the base fields from a listing entry, before extraction.
    pub fn from_listing(raw: &RawListingItem, subject: &str, full_content: String) -> Self {
        Self {
            title: raw.title.clone(),
            description: raw.description().to_string(),
            url: raw.url.clone(),
            published: raw.published_at,
            relevance: raw.votes.positive,
            likes: raw.votes.liked,
            subject: subject.to_string(),
            full_content,
        }
    }

    /// Title, description and page text joined into the single text field
    /// that gets stored and embedded.
    pub fn combined_text(&self) -> String {
        format!(
            "{}\n\n{}\n\n{}",
            self.title, self.description, self.full_content
        )
    }

    pub fn has_full_content(&self) -> bool {
        !self.full_content.is_empty()
    }
}

/// A persisted news memory.
///
/// `id` is derived from the item URL, so writing the same URL again replaces
/// the record instead of adding one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub agent_id: Uuid,
    pub room_id: Uuid,
    pub content: MemoryContent,
    pub embedding: Vec<f32>,
    pub unique: bool,
    /// Publish time of the item, milliseconds since the Unix epoch.
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryContent {
    pub text: String,
    pub url: String,
    pub source: String,
    pub metadata: MemoryMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetadata {
    pub relevance: u64,
    pub likes: u64,
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING_JSON: &str = r#"{
        "count": 2,
        "next": "https://cryptopanic.com/api/pro/v1/posts/?page=2",
        "results": [
            {
                "kind": "news",
                "title": "Solana hits new high",
                "url": "https://cryptopanic.com/news/1/solana-hits-new-high",
                "published_at": "2024-01-02T00:00:00Z",
                "metadata": { "description": "SOL rallies." },
                "votes": { "positive": 7, "liked": 3, "important": 1, "saved": 2 }
            },
            {
                "title": "No metadata here",
                "url": "https://cryptopanic.com/news/2/no-metadata",
                "published_at": "2024-01-01T00:00:00Z"
            }
        ]
    }"#;

    #[test]
    fn test_listing_deserialization() {
        let listing: ListingResponse = serde_json::from_str(LISTING_JSON).unwrap();
        assert_eq!(listing.count, 2);
        let results = listing.results.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].votes.positive, 7);
        assert_eq!(results[0].votes.negative, 0);
        assert_eq!(results[0].description(), "SOL rallies.");
        assert_eq!(results[1].description(), "");
        assert_eq!(results[1].votes.liked, 0);
    }

    #[test]
    fn test_null_title_and_bad_entries_do_not_sink_the_page() {
        let json = r#"{
            "count": 3,
            "results": [
                { "title": null, "url": "https://news.example/untitled",
                  "published_at": "2024-01-01T00:00:00Z" },
                { "title": "No date", "url": "https://news.example/undated" },
                { "title": "Fine", "url": "https://news.example/fine",
                  "published_at": "2024-01-02T00:00:00Z", "votes": null }
            ]
        }"#;
        let listing: ListingResponse = serde_json::from_str(json).unwrap();
        let results = listing.results.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "");
        assert_eq!(results[1].title, "Fine");
        assert_eq!(results[1].votes.positive, 0);
    }

    #[test]
    fn test_null_title_decodes_as_empty() {
        let json = r#"{ "results": [ { "title": null, "url": "https://news.example/u",
            "published_at": "2024-01-01T00:00:00Z" } ] }"#;
        let listing: ListingResponse = serde_json::from_str(json).unwrap();
        let results = listing.results.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "");
        assert_eq!(results[0].url, "https://news.example/u");
    }

    #[test]
    fn test_listing_without_results() {
        let listing: ListingResponse = serde_json::from_str(r#"{"count": 0}"#).unwrap();
        assert!(listing.results.is_none());
        assert!(listing.next.is_none());
    }

    #[test]
    fn test_news_item_from_listing() {
        let listing: ListingResponse = serde_json::from_str(LISTING_JSON).unwrap();
        let raw = &listing.results.unwrap()[0];
        let item = NewsItem::from_listing(raw, "SOL", "Body text".to_string());

        assert_eq!(item.title, "Solana hits new high");
        assert_eq!(item.description, "SOL rallies.");
        assert_eq!(item.relevance, 7);
        assert_eq!(item.likes, 3);
        assert_eq!(item.subject, "SOL");
        assert!(item.has_full_content());
        assert_eq!(
            item.combined_text(),
            "Solana hits new high\n\nSOL rallies.\n\nBody text"
        );
    }

    #[test]
    fn test_memory_record_uses_camel_case() {
        let record = MemoryRecord {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            agent_id: Uuid::nil(),
            room_id: Uuid::nil(),
            content: MemoryContent {
                text: "t".to_string(),
                url: "https://example.com".to_string(),
                source: "cryptopanic".to_string(),
                metadata: MemoryMetadata {
                    relevance: 1,
                    likes: 2,
                    subject: "SOL".to_string(),
                },
            },
            embedding: vec![0.0; 3],
            unique: true,
            created_at: 1_704_067_200_000,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"roomId\""));
        assert!(json.contains("\"createdAt\":1704067200000"));
    }
}
