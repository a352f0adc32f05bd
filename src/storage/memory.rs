//! 프로세스 메모리 저장소

use super::{RoomStorage, StorageError, StorageProvider};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Value>,
    alarm: Option<u64>,
}

/// 메모리 저장소. 방이 내려가도 provider가 들고 있으면 상태가 유지된다.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 키 목록 (테스트 확인용)
    pub async fn keys(&self) -> Vec<String> {
        self.inner.lock().await.entries.keys().cloned().collect()
    }
}

#[async_trait]
impl RoomStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.inner.lock().await.entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.inner
            .lock()
            .await
            .entries
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        for key in keys {
            inner.entries.remove(key);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<BTreeMap<String, Value>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn set_alarm(&self, at_ms: u64) -> Result<(), StorageError> {
        self.inner.lock().await.alarm = Some(at_ms);
        Ok(())
    }

    async fn get_alarm(&self) -> Result<Option<u64>, StorageError> {
        Ok(self.inner.lock().await.alarm)
    }

    async fn delete_alarm(&self) -> Result<(), StorageError> {
        self.inner.lock().await.alarm = None;
        Ok(())
    }
}

/// 방마다 하나의 `MemoryStorage`를 유지
#[derive(Default)]
pub struct MemoryStorageProvider {
    rooms: DashMap<String, Arc<MemoryStorage>>,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }
}

impl StorageProvider for MemoryStorageProvider {
    fn open(&self, room_id: &str) -> Result<Arc<dyn RoomStorage>, StorageError> {
        let storage: Arc<dyn RoomStorage> = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(MemoryStorage::new()))
            .clone();
        Ok(storage)
    }

    fn release(&self, room_id: &str) {
        self.rooms.remove(room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_prefix_list_and_bulk_delete() {
        // given
        let storage = MemoryStorage::new();
        storage.put("meta", json!({"liveIndex": 0})).await.unwrap();
        storage.put("song:0", json!({"title": "a"})).await.unwrap();
        storage.put("song:1", json!({"title": "b"})).await.unwrap();

        // when
        let songs = storage.list("song:").await.unwrap();

        // then
        assert_eq!(songs.len(), 2);
        assert!(!songs.contains_key("meta"));

        storage
            .delete(&["song:0".to_string(), "song:9".to_string()])
            .await
            .unwrap();
        assert_eq!(storage.keys().await, vec!["meta", "song:1"]);
    }

    #[tokio::test]
    async fn test_single_alarm_slot_is_replaced() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_alarm().await.unwrap(), None);

        storage.set_alarm(1_000).await.unwrap();
        storage.set_alarm(2_000).await.unwrap();
        assert_eq!(storage.get_alarm().await.unwrap(), Some(2_000));

        storage.delete_alarm().await.unwrap();
        assert_eq!(storage.get_alarm().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_provider_returns_same_namespace_per_room() {
        let provider = MemoryStorageProvider::new();
        let first = provider.open("room-a").unwrap();
        first.put("meta", json!(1)).await.unwrap();

        let again = provider.open("room-a").unwrap();
        assert_eq!(again.get("meta").await.unwrap(), Some(json!(1)));

        let other = provider.open("room-b").unwrap();
        assert_eq!(other.get("meta").await.unwrap(), None);
    }
}
