//! 애플리케이션 상태 관리

use crate::config::Config;
use crate::room::{now_ms, spawn_room, RoomCommand};
use crate::storage::{FileStorageProvider, MemoryStorageProvider, StorageError, StorageProvider};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// 전역 애플리케이션 상태
pub struct AppState {
    /// 메모리에 올라와 있는 방 (room_id -> RoomHandle)
    pub rooms: DashMap<String, RoomHandle>,
    pub storage: Arc<dyn StorageProvider>,
    /// 설정
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let storage: Arc<dyn StorageProvider> = match &config.storage_dir {
            Some(dir) => Arc::new(FileStorageProvider::new(dir.clone())),
            None => Arc::new(MemoryStorageProvider::new()),
        };
        Self::with_storage(config, storage)
    }

    pub fn with_storage(config: Config, storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            rooms: DashMap::new(),
            storage,
            config: Arc::new(config),
        }
    }

    fn spawn(&self, room_id: &str) -> Result<RoomHandle, StorageError> {
        let storage = self.storage.open(room_id)?;
        let dormant = Arc::new(AtomicBool::new(false));
        let sender = spawn_room(
            room_id.to_string(),
            storage,
            self.config.room.settings(),
            dormant.clone(),
        );
        tracing::info!(room_id = %room_id, "Room activated");
        Ok(RoomHandle::new(room_id, sender, dormant))
    }

    /// 방 핸들을 가져오거나, 없으면 저장소에서 재개한다.
    /// `attach`면 조회와 같은 락 안에서 연결 수를 올려 청소와 겹치지 않게 한다.
    fn get_or_spawn(&self, room_id: &str, attach: bool) -> Result<RoomHandle, StorageError> {
        let handle = match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_closed() {
                    entry.insert(self.spawn(room_id)?);
                }
                entry.get().clone()
            }
            Entry::Vacant(entry) => entry.insert(self.spawn(room_id)?).clone(),
        };

        if attach {
            handle.connections.fetch_add(1, Ordering::SeqCst);
        }
        handle.touch();
        Ok(handle)
    }

    pub fn room(&self, room_id: &str) -> Result<RoomHandle, StorageError> {
        self.get_or_spawn(room_id, false)
    }

    /// WebSocket 세션용: 연결 하나로 집계된다
    pub fn attach(&self, room_id: &str) -> Result<RoomHandle, StorageError> {
        self.get_or_spawn(room_id, true)
    }

    pub fn detach(&self, handle: &RoomHandle) {
        handle.connections.fetch_sub(1, Ordering::SeqCst);
        handle.touch();
    }
}

/// 방 액터로 가는 핸들
#[derive(Clone)]
pub struct RoomHandle {
    pub id: String,
    sender: UnboundedSender<RoomCommand>,
    connections: Arc<AtomicUsize>,
    last_active_ms: Arc<AtomicU64>,
    /// 액터가 기록하는 "비어 있음" 상태
    dormant: Arc<AtomicBool>,
}

impl RoomHandle {
    fn new(id: &str, sender: UnboundedSender<RoomCommand>, dormant: Arc<AtomicBool>) -> Self {
        Self {
            id: id.to_string(),
            sender,
            connections: Arc::new(AtomicUsize::new(0)),
            last_active_ms: Arc::new(AtomicU64::new(now_ms())),
            dormant,
        }
    }

    /// 액터가 이미 끝났으면 false
    pub fn send(&self, command: RoomCommand) -> bool {
        self.touch();
        self.sender.send(command).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn is_dormant(&self) -> bool {
        self.dormant.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.last_active_ms.store(now_ms(), Ordering::SeqCst);
    }

    fn idle_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_active_ms.load(Ordering::SeqCst))
    }
}

/// 연결이 없고 오래 쉰 방을 메모리에서 내린다.
/// 상태와 예약된 알람은 저장소에 남아 다음 접속 때 재개된다.
/// 참가자도 리더도 알람도 없는 방은 저장소 네임스페이스까지 놓아준다.
pub fn evict_idle_rooms(state: &AppState) {
    let timeout_ms = state.config.room.idle_timeout_ms;
    let now = now_ms();
    let mut evicted = 0;

    state.rooms.retain(|room_id, handle| {
        if handle.is_closed() {
            evicted += 1;
            return false;
        }
        let idle = handle.idle_ms(now);
        if handle.connections() == 0 && idle > timeout_ms {
            // 같은 샤드 락 안이라 그 사이 같은 방이 다시 열리지 않는다
            if handle.is_dormant() {
                state.storage.release(room_id);
            }
            tracing::info!(room_id = %room_id, idle_ms = idle, released = handle.is_dormant(), "Evicted idle room");
            evicted += 1;
            false
        } else {
            true
        }
    });

    if evicted > 0 {
        tracing::info!(evicted_rooms = evicted, "Room sweep completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_timeout(idle_timeout_ms: u64) -> AppState {
        let mut config = Config::default();
        config.room.idle_timeout_ms = idle_timeout_ms;
        AppState::new(config)
    }

    #[tokio::test]
    async fn test_same_room_reuses_handle() {
        let state = state_with_timeout(60_000);

        let first = state.attach("jam").unwrap();
        let second = state.room("jam").unwrap();

        assert_eq!(state.rooms.len(), 1);
        assert_eq!(first.connections(), 1);
        assert_eq!(second.connections(), 1);
    }

    #[tokio::test]
    async fn test_sweep_keeps_attached_rooms() {
        // given
        let state = state_with_timeout(0);
        let busy = state.attach("busy").unwrap();
        state.room("quiet").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // when
        evict_idle_rooms(&state);

        // then
        assert!(state.rooms.contains_key("busy"));
        assert!(!state.rooms.contains_key("quiet"));

        state.detach(&busy);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        evict_idle_rooms(&state);
        assert!(state.rooms.is_empty());
    }

    async fn info(handle: &RoomHandle) -> crate::protocol::SessionInfo {
        let (reply, rx) = tokio::sync::oneshot::channel();
        assert!(handle.send(RoomCommand::Info { reply }));
        rx.await.unwrap().unwrap()
    }

    fn state_with_provider(provider: Arc<MemoryStorageProvider>) -> AppState {
        let mut config = Config::default();
        config.room.idle_timeout_ms = 0;
        AppState::with_storage(config, provider)
    }

    #[tokio::test]
    async fn test_evicted_room_resumes_from_storage() {
        // given: 리더가 끊겨 유예 중인 방
        let provider = Arc::new(MemoryStorageProvider::new());
        let state = state_with_provider(provider.clone());
        let handle = state.attach("again").unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        handle.send(RoomCommand::Connect {
            conn_id: "a".to_string(),
            sender: tx,
        });
        handle.send(RoomCommand::Message {
            conn_id: "a".to_string(),
            text: r#"{"type":"join","name":"Ana","role":"leader"}"#.to_string(),
        });
        handle.send(RoomCommand::Disconnect {
            conn_id: "a".to_string(),
        });
        let before = info(&handle).await;
        state.detach(&handle);
        drop(handle);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // when
        evict_idle_rooms(&state);

        // then
        assert!(state.rooms.is_empty());
        assert!(provider.contains("again"));
        let after = info(&state.room("again").unwrap()).await;
        assert_eq!(after.session_code, before.session_code);
    }

    #[tokio::test]
    async fn test_sweep_releases_storage_of_empty_rooms() {
        // given: 조회만 된 방
        let provider = Arc::new(MemoryStorageProvider::new());
        let state = state_with_provider(provider.clone());
        let handle = state.room("landing").unwrap();
        info(&handle).await;
        assert!(handle.is_dormant());
        drop(handle);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // when
        evict_idle_rooms(&state);

        // then
        assert!(state.rooms.is_empty());
        assert!(!provider.contains("landing"));
    }
}
