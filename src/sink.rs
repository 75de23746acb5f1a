//! Persistence of news items as memories.
//!
//! Each [`NewsItem`] becomes one [`MemoryRecord`] in a room of the memory
//! store. Record ids are derived from the item URL and room ids from the room
//! key, so re-ingesting an item overwrites its record in place. Records are
//! keyed by id alone: an item seen under another room moves to that room.
//!
//! # On-disk layout ([`FileMemoryStore`])
//!
//! ```text
//! data_dir/
//! ├── rooms/
//! │   └── <room id>/
//! │       ├── room.json
//! │       └── participants.json
//! └── memories/
//!     └── <record id>.json
//! ```

use crate::error::SinkError;
use crate::models::{MemoryContent, MemoryMetadata, MemoryRecord, NewsItem};
use crate::utils::{ensure_writable_dir, read_json_opt, stable_id, write_json_atomic};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

pub const DEFAULT_ROOM_KEY: &str = "news-room";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Durable store of rooms, participants and memories.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn ensure_room_exists(&self, room_id: Uuid) -> Result<(), SinkError>;
    async fn ensure_participant_in_room(
        &self,
        agent_id: Uuid,
        room_id: Uuid,
    ) -> Result<(), SinkError>;
    /// Create the record, or overwrite the existing record with the same id.
    async fn create_memory(&self, record: MemoryRecord) -> Result<(), SinkError>;
}

/// Text to vector hook applied to every stored record.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, SinkError>;
}

/// Placeholder embedder producing all-zero vectors of a fixed width.
#[derive(Debug, Clone, Copy)]
pub struct ZeroEmbedder {
    pub dimensions: usize,
}

impl Default for ZeroEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

#[async_trait]
impl Embedder for ZeroEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, SinkError> {
        Ok(vec![0.0; self.dimensions])
    }
}

/// Resolve a room key template for `subject`. `{subject}` is substituted.
pub fn room_key_for(template: &str, subject: &str) -> String {
    template.replace("{subject}", subject)
}

/// Writes news items into the memory store.
#[derive(Clone)]
pub struct NewsSink {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn Embedder>,
    agent_id: Uuid,
    source_tag: String,
}

impl NewsSink {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn Embedder>,
        agent_name: &str,
        source_tag: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            agent_id: stable_id(agent_name),
            source_tag: source_tag.into(),
        }
    }

    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    /// Persist `item` into the room named `room_key`. Returns the record id.
    #[instrument(level = "info", skip_all, fields(url = %item.url, %room_key))]
    pub async fn persist(&self, item: &NewsItem, room_key: &str) -> Result<Uuid, SinkError> {
        if item.title.trim().is_empty() {
            return Err(SinkError::MissingTitle(item.url.clone()));
        }

        let room_id = stable_id(room_key);
        self.store.ensure_room_exists(room_id).await?;
        self.store
            .ensure_participant_in_room(self.agent_id, room_id)
            .await?;

        let text = item.combined_text();
        let embedding = self.embedder.embed(&text).await?;

        let record = MemoryRecord {
            id: stable_id(&item.url),
            user_id: self.agent_id,
            agent_id: self.agent_id,
            room_id,
            content: MemoryContent {
                text,
                url: item.url.clone(),
                source: self.source_tag.clone(),
                metadata: MemoryMetadata {
                    relevance: item.relevance,
                    likes: item.likes,
                    subject: item.subject.clone(),
                },
            },
            embedding,
            unique: true,
            created_at: item.published.timestamp_millis(),
        };
        let id = record.id;
        self.store.create_memory(record).await?;
        debug!(%id, "Stored news memory");
        Ok(id)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomFile {
    id: Uuid,
    created_at: i64,
}

/// Memory store backed by one JSON file per record.
pub struct FileMemoryStore {
    rooms: PathBuf,
    memories: PathBuf,
    lock: Mutex<()>,
}

impl FileMemoryStore {
    /// Open (and create if needed) a store under `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self, SinkError> {
        let rooms = data_dir.join("rooms");
        let memories = data_dir.join("memories");
        ensure_writable_dir(&rooms).await?;
        ensure_writable_dir(&memories).await?;
        Ok(Self {
            rooms,
            memories,
            lock: Mutex::new(()),
        })
    }

    fn room_dir(&self, room_id: Uuid) -> PathBuf {
        self.rooms.join(room_id.to_string())
    }

    pub fn memory_path(&self, id: Uuid) -> PathBuf {
        self.memories.join(format!("{id}.json"))
    }

    pub async fn read_memory(&self, id: Uuid) -> Result<Option<MemoryRecord>, SinkError> {
        Ok(read_json_opt(&self.memory_path(id)).await?)
    }
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn ensure_room_exists(&self, room_id: Uuid) -> Result<(), SinkError> {
        let _guard = self.lock.lock().await;
        let path = self.room_dir(room_id).join("room.json");
        if read_json_opt::<RoomFile>(&path).await?.is_none() {
            let room = RoomFile {
                id: room_id,
                created_at: chrono::Utc::now().timestamp_millis(),
            };
            write_json_atomic(&path, &room).await?;
            debug!(%room_id, "Created room");
        }
        Ok(())
    }

    async fn ensure_participant_in_room(
        &self,
        agent_id: Uuid,
        room_id: Uuid,
    ) -> Result<(), SinkError> {
        let _guard = self.lock.lock().await;
        let path = self.room_dir(room_id).join("participants.json");
        let mut participants: BTreeSet<Uuid> =
            read_json_opt(&path).await?.unwrap_or_default();
        if participants.insert(agent_id) {
            write_json_atomic(&path, &participants).await?;
        }
        Ok(())
    }

    async fn create_memory(&self, record: MemoryRecord) -> Result<(), SinkError> {
        let _guard = self.lock.lock().await;
        write_json_atomic(&self.memory_path(record.id), &record).await?;
        Ok(())
    }
}

/// Map-backed store for tests and throwaway runs.
#[derive(Default)]
pub struct InMemoryStore {
    rooms: Mutex<HashMap<Uuid, BTreeSet<Uuid>>>,
    memories: Mutex<HashMap<Uuid, MemoryRecord>>,
}

impl InMemoryStore {
    pub async fn memory(&self, id: Uuid) -> Option<MemoryRecord> {
        self.memories.lock().await.get(&id).cloned()
    }

    pub async fn memories(&self) -> Vec<MemoryRecord> {
        let mut all: Vec<_> = self.memories.lock().await.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        all
    }

    pub async fn memory_count(&self) -> usize {
        self.memories.lock().await.len()
    }

    pub async fn participants(&self, room_id: Uuid) -> Vec<Uuid> {
        self.rooms
            .lock()
            .await
            .get(&room_id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn ensure_room_exists(&self, room_id: Uuid) -> Result<(), SinkError> {
        self.rooms.lock().await.entry(room_id).or_default();
        Ok(())
    }

    async fn ensure_participant_in_room(
        &self,
        agent_id: Uuid,
        room_id: Uuid,
    ) -> Result<(), SinkError> {
        self.rooms
            .lock()
            .await
            .entry(room_id)
            .or_default()
            .insert(agent_id);
        Ok(())
    }

    async fn create_memory(&self, record: MemoryRecord) -> Result<(), SinkError> {
        self.memories.lock().await.insert(record.id, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn item(url: &str, content: &str) -> NewsItem {
        NewsItem {
            title: "Solana hits new high".to_string(),
            description: "SOL rallies.".to_string(),
            url: url.to_string(),
            published: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            relevance: 7,
            likes: 3,
            subject: "SOL".to_string(),
            full_content: content.to_string(),
        }
    }

    fn sink(store: Arc<dyn MemoryStore>) -> NewsSink {
        NewsSink::new(
            store,
            Arc::new(ZeroEmbedder::default()),
            "news-agent",
            "cryptopanic",
        )
    }

    #[test]
    fn test_room_key_substitution() {
        assert_eq!(room_key_for(DEFAULT_ROOM_KEY, "SOL"), "news-room");
        assert_eq!(room_key_for("news-{subject}", "ETH"), "news-ETH");
    }

    #[tokio::test]
    async fn test_persist_builds_record() {
        let store = Arc::new(InMemoryStore::default());
        let sink = sink(store.clone());

        let id = sink
            .persist(&item("https://news.example/a", "Body"), "news-room")
            .await
            .unwrap();
        assert_eq!(id, stable_id("https://news.example/a"));

        let record = store.memory(id).await.unwrap();
        assert_eq!(record.room_id, stable_id("news-room"));
        assert_eq!(record.agent_id, sink.agent_id());
        assert_eq!(record.content.text, "Solana hits new high\n\nSOL rallies.\n\nBody");
        assert_eq!(record.content.source, "cryptopanic");
        assert_eq!(record.content.metadata.relevance, 7);
        assert_eq!(record.content.metadata.likes, 3);
        assert_eq!(record.embedding.len(), DEFAULT_EMBEDDING_DIMENSIONS);
        assert!(record.unique);
        assert_eq!(record.created_at, 1_704_153_600_000);
        assert_eq!(store.participants(record.room_id).await, vec![sink.agent_id()]);
    }

    #[tokio::test]
    async fn test_same_url_overwrites_with_latest_content() {
        let store = Arc::new(InMemoryStore::default());
        let sink = sink(store.clone());
        let url = "https://news.example/a";

        let first = sink.persist(&item(url, "old"), "news-room").await.unwrap();
        let second = sink.persist(&item(url, "new"), "news-room").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.memory_count().await, 1);
        assert!(store.memory(first).await.unwrap().content.text.ends_with("new"));
    }

    #[tokio::test]
    async fn test_missing_title_is_rejected() {
        let store = Arc::new(InMemoryStore::default());
        let sink = sink(store.clone());
        let mut untitled = item("https://news.example/untitled", "");
        untitled.title = "  ".to_string();

        let result = sink.persist(&untitled, "news-room").await;
        assert!(matches!(
            result,
            Err(SinkError::MissingTitle(url)) if url.ends_with("untitled")
        ));
        assert_eq!(store.memory_count().await, 0);
    }

    #[tokio::test]
    async fn test_file_store_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileMemoryStore::open(dir.path()).await.unwrap());
        let sink = sink(store.clone());
        let url = "https://news.example/a";
        let room_dir = dir.path().join("rooms").join(stable_id("news-room").to_string());

        let id = sink.persist(&item(url, "old"), "news-room").await.unwrap();
        sink.persist(&item(url, "new"), "news-room").await.unwrap();

        let memories = std::fs::read_dir(dir.path().join("memories")).unwrap().count();
        assert_eq!(memories, 1);
        assert!(room_dir.join("room.json").exists());

        let record = store.read_memory(id).await.unwrap().unwrap();
        assert!(record.content.text.ends_with("new"));

        let participants: Vec<Uuid> =
            serde_json::from_slice(&std::fs::read(room_dir.join("participants.json")).unwrap())
                .unwrap();
        assert_eq!(participants, vec![sink.agent_id()]);
    }

    #[tokio::test]
    async fn test_one_record_per_url_across_rooms() {
        let dir = tempfile::tempdir().unwrap();
        let file_store = Arc::new(FileMemoryStore::open(dir.path()).await.unwrap());
        let memory_store = Arc::new(InMemoryStore::default());
        let url = "https://news.example/shared";

        let stores: [Arc<dyn MemoryStore>; 2] = [file_store.clone(), memory_store.clone()];
        for store in stores {
            let sink = sink(store);
            let mut shared = item(url, "");
            for subject in ["SOL", "ETH"] {
                shared.subject = subject.to_string();
                let room_key = room_key_for("news-{subject}", subject);
                sink.persist(&shared, &room_key).await.unwrap();
            }
        }

        let memories = std::fs::read_dir(dir.path().join("memories")).unwrap().count();
        assert_eq!(memories, 1);
        let on_disk = file_store.read_memory(stable_id(url)).await.unwrap().unwrap();
        assert_eq!(on_disk.room_id, stable_id("news-ETH"));

        assert_eq!(memory_store.memory_count().await, 1);
        let in_memory = memory_store.memory(stable_id(url)).await.unwrap();
        assert_eq!(in_memory.room_id, on_disk.room_id);
        assert_eq!(in_memory.content.metadata.subject, "ETH");
    }
}
