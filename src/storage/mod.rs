//! 방 단위 영속 저장소
//!
//! 각 방은 독립된 키-값 네임스페이스와 단일 알람 슬롯을 가진다.
//! 코디네이터는 이 trait에만 의존하고, 실제 백엔드는 설정에 따라 고른다.

pub mod file;
pub mod memory;

pub use file::{FileStorage, FileStorageProvider};
pub use memory::{MemoryStorage, MemoryStorageProvider};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// 저장소 오류
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("value for key '{key}' is {size} bytes, over the {limit} byte limit")]
    ValueTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },
}

/// 방 하나의 저장소
#[async_trait]
pub trait RoomStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// 없는 키는 무시
    async fn delete(&self, keys: &[String]) -> Result<(), StorageError>;

    /// prefix로 시작하는 모든 키 (순서는 보장하지 않는 것으로 간주)
    async fn list(&self, prefix: &str) -> Result<BTreeMap<String, Value>, StorageError>;

    /// 알람 예약 (unix ms). 기존 예약은 교체된다.
    async fn set_alarm(&self, at_ms: u64) -> Result<(), StorageError>;

    async fn get_alarm(&self) -> Result<Option<u64>, StorageError>;

    async fn delete_alarm(&self) -> Result<(), StorageError>;
}

/// 방 ID로 저장소 네임스페이스를 연다
pub trait StorageProvider: Send + Sync {
    fn open(&self, room_id: &str) -> Result<Arc<dyn RoomStorage>, StorageError>;

    /// 비어 있는 방의 네임스페이스를 버린다. 디스크 백엔드는 그대로 둔다.
    fn release(&self, _room_id: &str) {}
}

/// 방 ID 검증 (파일 경로로도 쓰이므로 제한적으로 허용)
pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty()
        && room_id.len() <= 64
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
