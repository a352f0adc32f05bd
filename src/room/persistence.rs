//! 세션 상태의 샤딩 저장
//!
//! 셋리스트 전체를 한 값으로 저장하면 차트가 길어질 때 키당 크기 제한을 넘을 수 있으므로
//! 곡마다 `song:<i>` 키로 나눠 저장한다.
//!
//! | 키 | 값 |
//! |---|---|
//! | `meta` | `{sessionCode, liveIndex, leaderId}` |
//! | `setlist-info` | `{id, name, songCount}` |
//! | `song:<i>` | 곡 하나 |
//! | `disconnectedLeader` | `{id, name, disconnectedAt}` (유예 기간 중에만) |

use crate::protocol::{Setlist, Song};
use crate::storage::{RoomStorage, StorageError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const META_KEY: &str = "meta";
pub const SETLIST_INFO_KEY: &str = "setlist-info";
pub const DISCONNECTED_LEADER_KEY: &str = "disconnectedLeader";
pub const SONG_KEY_PREFIX: &str = "song:";

/// 값 하나의 최대 직렬화 크기
pub const MAX_VALUE_BYTES: usize = 128 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMeta {
    pub session_code: String,
    pub live_index: usize,
    pub leader_id: Option<String>,
    /// 재시작 후 리더 복귀를 이름으로 받기 위해 함께 저장
    #[serde(default)]
    pub leader_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetlistInfo {
    pub id: String,
    pub name: String,
    pub song_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectedLeader {
    pub id: String,
    pub name: String,
    pub disconnected_at: u64,
}

pub fn song_key(index: usize) -> String {
    format!("{}{}", SONG_KEY_PREFIX, index)
}

/// `song:<i>`의 숫자 부분. 사전순 정렬이면 `song:10`이 `song:2` 앞에 온다.
fn song_index(key: &str) -> Option<usize> {
    key.strip_prefix(SONG_KEY_PREFIX)?.parse().ok()
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<Value, StorageError> {
    let value = serde_json::to_value(value)?;
    let size = serde_json::to_vec(&value)?.len();
    if size > MAX_VALUE_BYTES {
        return Err(StorageError::ValueTooLarge {
            key: key.to_string(),
            size,
            limit: MAX_VALUE_BYTES,
        });
    }
    Ok(value)
}

/// 방 저장소 위의 타입 있는 접근 계층
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn RoomStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn RoomStorage>) -> Self {
        Self { storage }
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.storage.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = encode(key, value)?;
        self.storage.put(key, value).await
    }

    pub async fn load_meta(&self) -> Result<Option<StoredMeta>, StorageError> {
        self.get(META_KEY).await
    }

    pub async fn save_meta(&self, meta: &StoredMeta) -> Result<(), StorageError> {
        self.put(META_KEY, meta).await
    }

    pub async fn load_setlist_info(&self) -> Result<Option<SetlistInfo>, StorageError> {
        self.get(SETLIST_INFO_KEY).await
    }

    /// 셋리스트 교체: 기존 `song:*` 삭제 → `setlist-info` 기록 → 새 곡 기록.
    ///
    /// 모든 값을 먼저 인코딩해 보고, 크기 제한에 걸리면 아무것도 지우지 않는다.
    pub async fn persist_setlist(
        &self,
        previous_count: usize,
        setlist: &Setlist,
    ) -> Result<SetlistInfo, StorageError> {
        let info = SetlistInfo {
            id: setlist.id.clone(),
            name: setlist.name.clone(),
            song_count: setlist.songs.len(),
        };
        let info_value = encode(SETLIST_INFO_KEY, &info)?;
        let song_values = setlist
            .songs
            .iter()
            .enumerate()
            .map(|(i, song)| encode(&song_key(i), song))
            .collect::<Result<Vec<_>, _>>()?;

        let mut stale: Vec<String> = (0..previous_count).map(song_key).collect();
        for key in self.storage.list(SONG_KEY_PREFIX).await?.into_keys() {
            if !stale.contains(&key) {
                stale.push(key);
            }
        }
        if !stale.is_empty() {
            self.storage.delete(&stale).await?;
        }

        self.storage.put(SETLIST_INFO_KEY, info_value).await?;
        for (i, value) in song_values.into_iter().enumerate() {
            self.storage.put(&song_key(i), value).await?;
        }

        Ok(info)
    }

    /// `song:*`를 숫자 순으로 모아 셋리스트를 재조립한다
    pub async fn full_setlist(&self, info: &SetlistInfo) -> Result<Setlist, StorageError> {
        let mut indexed = Vec::new();
        for (key, value) in self.storage.list(SONG_KEY_PREFIX).await? {
            match song_index(&key) {
                Some(index) => indexed.push((index, serde_json::from_value::<Song>(value)?)),
                None => tracing::warn!(key = %key, "Ignoring song shard with non-numeric key"),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);

        Ok(Setlist {
            id: info.id.clone(),
            name: info.name.clone(),
            songs: indexed.into_iter().map(|(_, song)| song).collect(),
        })
    }

    pub async fn song(&self, index: usize) -> Result<Option<Song>, StorageError> {
        self.get(&song_key(index)).await
    }

    pub async fn load_disconnected_leader(
        &self,
    ) -> Result<Option<DisconnectedLeader>, StorageError> {
        self.get(DISCONNECTED_LEADER_KEY).await
    }

    pub async fn save_disconnected_leader(
        &self,
        record: &DisconnectedLeader,
    ) -> Result<(), StorageError> {
        self.put(DISCONNECTED_LEADER_KEY, record).await
    }

    pub async fn clear_disconnected_leader(&self) -> Result<(), StorageError> {
        self.storage
            .delete(&[DISCONNECTED_LEADER_KEY.to_string()])
            .await
    }

    pub async fn alarm(&self) -> Result<Option<u64>, StorageError> {
        self.storage.get_alarm().await
    }

    pub async fn schedule_alarm(&self, at_ms: u64) -> Result<(), StorageError> {
        self.storage.set_alarm(at_ms).await
    }

    pub async fn cancel_alarm(&self) -> Result<(), StorageError> {
        self.storage.delete_alarm().await
    }
}
