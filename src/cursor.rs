//! The "last processed" watermark.
//!
//! The watermark is one global timestamp kept in a small key/value cache so
//! it survives restarts. The poller reads it at the start of a cycle and
//! writes the newest published time of the cycle's batch at the end.

use crate::error::CacheError;
use crate::models::NewsItem;
use crate::utils::{read_json_opt, write_json_atomic};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub const WATERMARK_KEY: &str = "news/last_processed_timestamp";

/// Durable string-keyed value cache.
#[async_trait]
pub trait WatermarkCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError>;
}

/// Cache kept in one JSON object file, rewritten atomically on every set.
pub struct FileCache {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, Value>, CacheError> {
        Ok(read_json_opt(&self.path).await?.unwrap_or_default())
    }
}

#[async_trait]
impl WatermarkCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        let _guard = self.lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(key.to_string(), value);
        write_json_atomic(&self.path, &all).await?;
        Ok(())
    }
}

/// Process-local cache.
#[derive(Default)]
pub struct MemoryCache {
    values: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl WatermarkCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), CacheError> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Typed view of the watermark, stored as epoch milliseconds.
#[derive(Clone)]
pub struct Cursor {
    cache: Arc<dyn WatermarkCache>,
}

impl Cursor {
    pub fn new(cache: Arc<dyn WatermarkCache>) -> Self {
        Self { cache }
    }

    pub async fn load(&self) -> Result<Option<DateTime<Utc>>, CacheError> {
        let Some(value) = self.cache.get(WATERMARK_KEY).await? else {
            return Ok(None);
        };
        value
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(Some)
            .ok_or(CacheError::InvalidWatermark(value))
    }

    pub async fn store(&self, watermark: DateTime<Utc>) -> Result<(), CacheError> {
        debug!(%watermark, "Storing watermark");
        self.cache
            .set(WATERMARK_KEY, Value::from(watermark.timestamp_millis()))
            .await
    }
}

/// Watermark after processing `batch`: the newest published time in it, or
/// `prior` unchanged when the batch is empty.
pub fn advance_watermark(
    prior: Option<DateTime<Utc>>,
    batch: &[NewsItem],
) -> Option<DateTime<Utc>> {
    batch.iter().map(|item| item.published).max().or(prior)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(day: u32) -> NewsItem {
        NewsItem {
            title: format!("day {day}"),
            description: String::new(),
            url: format!("https://news.example/{day}"),
            published: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            relevance: 0,
            likes: 0,
            subject: "SOL".to_string(),
            full_content: String::new(),
        }
    }

    #[test]
    fn test_advance_watermark_takes_batch_max() {
        let prior = Some(Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap());
        let batch = vec![item(2), item(5), item(1)];
        assert_eq!(advance_watermark(prior, &batch), Some(batch[1].published));
    }

    #[test]
    fn test_advance_watermark_empty_batch_keeps_prior() {
        let prior = Some(Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap());
        assert_eq!(advance_watermark(prior, &[]), prior);
        assert_eq!(advance_watermark(None, &[]), None);
    }

    #[tokio::test]
    async fn test_cursor_roundtrip_in_memory() {
        let cursor = Cursor::new(Arc::new(MemoryCache::default()));
        assert_eq!(cursor.load().await.unwrap(), None);

        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        cursor.store(ts).await.unwrap();
        assert_eq!(cursor.load().await.unwrap(), Some(ts));
    }

    #[tokio::test]
    async fn test_cursor_rejects_garbage() {
        let cache = Arc::new(MemoryCache::default());
        cache.set(WATERMARK_KEY, Value::from("yesterday")).await.unwrap();
        let cursor = Cursor::new(cache);
        assert!(matches!(
            cursor.load().await,
            Err(CacheError::InvalidWatermark(_))
        ));
    }

    #[tokio::test]
    async fn test_file_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        {
            let cache = FileCache::new(&path);
            cache.set("other", Value::from(1)).await.unwrap();
            Cursor::new(Arc::new(cache)).store(ts).await.unwrap();
        }

        let reopened = Arc::new(FileCache::new(&path));
        assert_eq!(reopened.get("other").await.unwrap(), Some(Value::from(1)));
        assert_eq!(Cursor::new(reopened).load().await.unwrap(), Some(ts));
        assert_eq!(ts.timestamp_millis(), 1_704_153_600_000);
    }
}
