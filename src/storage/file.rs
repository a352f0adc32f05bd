//! 파일 기반 영속 저장소
//!
//! 방마다 디렉터리 하나, 키마다 JSON 파일 하나. 알람은 `alarm.at` 파일에 둔다.
//! 프로세스가 재시작되어도 그대로 이어서 읽을 수 있다.

use super::{RoomStorage, StorageError, StorageProvider};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const VALUE_EXT: &str = ".json";
const ALARM_FILE: &str = "alarm.at";

pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", encode_key(key), VALUE_EXT))
    }

    /// 임시 파일에 쓰고 rename 해서 반쯤 쓰인 파일이 남지 않게 한다
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// 키의 영숫자/`-`/`_` 외 바이트를 `%XX`로 인코딩
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_optional(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl RoomStorage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        match read_optional(&self.value_path(key)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&value)?;
        self.write_atomic(&self.value_path(key), &bytes).await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            remove_optional(&self.value_path(key)).await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<BTreeMap<String, Value>, StorageError> {
        let mut result = BTreeMap::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(result),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(key) = name.strip_suffix(VALUE_EXT).and_then(decode_key) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let bytes = fs::read(entry.path()).await?;
            result.insert(key, serde_json::from_slice(&bytes)?);
        }

        Ok(result)
    }

    async fn set_alarm(&self, at_ms: u64) -> Result<(), StorageError> {
        self.write_atomic(&self.dir.join(ALARM_FILE), at_ms.to_string().as_bytes())
            .await
    }

    async fn get_alarm(&self) -> Result<Option<u64>, StorageError> {
        let Some(bytes) = read_optional(&self.dir.join(ALARM_FILE)).await? else {
            return Ok(None);
        };
        // 손상된 알람 파일은 예약 없음으로 취급
        Ok(String::from_utf8_lossy(&bytes).trim().parse().ok())
    }

    async fn delete_alarm(&self) -> Result<(), StorageError> {
        remove_optional(&self.dir.join(ALARM_FILE)).await
    }
}

/// `<root>/<room_id>/` 아래에 방별 저장소를 만든다
pub struct FileStorageProvider {
    root: PathBuf,
}

impl FileStorageProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StorageProvider for FileStorageProvider {
    fn open(&self, room_id: &str) -> Result<Arc<dyn RoomStorage>, StorageError> {
        Ok(Arc::new(FileStorage::new(self.root.join(room_id))))
    }
}
