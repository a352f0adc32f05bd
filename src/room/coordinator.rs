//! 방 코디네이터: 세션 상태의 유일한 소유자
//!
//! 참가자 목록, 리더, 라이브 곡 위치, 셋리스트, 리더 유예 타이머를 관리한다.
//! 모든 이벤트는 방 액터가 하나씩 순서대로 넘겨주므로 내부에 락이 없다.
//! 의미 있는 상태 전이는 핸들러 안에서 바로 저장소에 기록된다.

use super::default_setlist::default_setlist;
use super::error::SessionError;
use super::hub::ConnectionHub;
use super::now_ms;
use super::persistence::{DisconnectedLeader, SessionStore, SetlistInfo, StoredMeta};
use crate::protocol::{
    generate_session_code, ClientMessage, ServerMessage, SessionInfo, SessionState, SessionUser,
    Setlist, UserRole,
};
use crate::storage::{RoomStorage, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// 리더 연결이 끊긴 뒤 후임을 세우기까지의 기본 대기 시간
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// 방 동작 설정
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub grace_period: Duration,
}

impl RoomSettings {
    /// 클라이언트에 알리는 유예 시간 (초 단위 올림)
    pub fn grace_seconds(&self) -> u64 {
        self.grace_period.as_millis().div_ceil(1000) as u64
    }
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

pub struct RoomCoordinator {
    room_id: String,
    settings: RoomSettings,
    store: SessionStore,
    hub: ConnectionHub,

    session_code: String,
    live_index: usize,
    leader_id: Option<String>,
    setlist_info: SetlistInfo,
    /// 참가 순서대로 유지 (승계 동률 처리에 사용)
    users: Vec<SessionUser>,
    pending_leader_disconnect: Option<String>,
    /// 저장소 알람의 메모리 사본
    alarm_at: Option<u64>,
}

impl RoomCoordinator {
    /// 시작/재개: 저장된 상태를 읽고, 없으면 새 방으로 초기화한다
    pub async fn load(
        room_id: impl Into<String>,
        storage: Arc<dyn RoomStorage>,
        settings: RoomSettings,
    ) -> Result<Self, StorageError> {
        let room_id = room_id.into();
        let store = SessionStore::new(storage);

        let meta = store.load_meta().await?;
        let mut needs_meta = meta.is_none();
        let (session_code, mut live_index, mut leader_id, leader_name) = match meta {
            Some(meta) => (
                meta.session_code,
                meta.live_index,
                meta.leader_id,
                meta.leader_name,
            ),
            None => (generate_session_code(), 0, None, None),
        };

        let setlist_info = match store.load_setlist_info().await? {
            Some(info) => info,
            None => {
                let info = store.persist_setlist(0, &default_setlist()).await?;
                tracing::info!(room_id = %room_id, songs = info.song_count, "Seeded default setlist");
                needs_meta = true;
                info
            }
        };

        if setlist_info.song_count > 0 && live_index >= setlist_info.song_count {
            live_index = 0;
            needs_meta = true;
        }

        let mut pending_leader_disconnect =
            store.load_disconnected_leader().await?.map(|d| d.id);
        let mut alarm_at = store.alarm().await?;

        // 재시작 전의 연결은 모두 사라졌다. 끊김 기록 없이 남은 리더는 지금 끊긴 것으로 본다.
        if pending_leader_disconnect.is_none() {
            if let Some(stale) = leader_id.clone() {
                match leader_name {
                    Some(name) => {
                        let now = now_ms();
                        store
                            .save_disconnected_leader(&DisconnectedLeader {
                                id: stale.clone(),
                                name: name.clone(),
                                disconnected_at: now,
                            })
                            .await?;
                        tracing::info!(room_id = %room_id, leader_id = %stale, name = %name, "Leader connection lost across restart, grace period started");
                        pending_leader_disconnect = Some(stale);
                        alarm_at = None;
                    }
                    None => {
                        tracing::warn!(room_id = %room_id, leader_id = %stale, "Dropping leader with no recorded name");
                        leader_id = None;
                        needs_meta = true;
                    }
                }
            }
        }

        // 끊김 기록은 있는데 알람이 없으면 유예 기간을 새로 잡는다
        if pending_leader_disconnect.is_some() && alarm_at.is_none() {
            let fire_at = now_ms() + settings.grace_period.as_millis() as u64;
            store.schedule_alarm(fire_at).await?;
            alarm_at = Some(fire_at);
        }

        let coordinator = Self {
            room_id,
            settings,
            store,
            hub: ConnectionHub::new(),
            session_code,
            live_index,
            leader_id,
            setlist_info,
            users: Vec::new(),
            pending_leader_disconnect,
            alarm_at,
        };

        if needs_meta {
            coordinator.persist_meta().await?;
        }

        tracing::info!(
            room_id = %coordinator.room_id,
            session_code = %coordinator.session_code,
            live_index = coordinator.live_index,
            pending_leader = ?coordinator.pending_leader_disconnect,
            "Room loaded"
        );

        Ok(coordinator)
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn session_code(&self) -> &str {
        &self.session_code
    }

    pub fn live_index(&self) -> usize {
        self.live_index
    }

    pub fn leader_id(&self) -> Option<&str> {
        self.leader_id.as_deref()
    }

    pub fn users(&self) -> &[SessionUser] {
        &self.users
    }

    pub fn user(&self, conn_id: &str) -> Option<&SessionUser> {
        self.users.iter().find(|u| u.id == conn_id)
    }

    fn user_mut(&mut self, conn_id: &str) -> Option<&mut SessionUser> {
        self.users.iter_mut().find(|u| u.id == conn_id)
    }

    pub fn pending_leader_disconnect(&self) -> Option<&str> {
        self.pending_leader_disconnect.as_deref()
    }

    /// 다음 유예 만료 시각 (unix ms)
    pub fn scheduled_alarm(&self) -> Option<u64> {
        self.alarm_at
    }

    pub fn connection_count(&self) -> usize {
        self.hub.len()
    }

    /// 참가자, 리더, 예약된 알람이 모두 없는 상태
    pub fn is_dormant(&self) -> bool {
        self.users.is_empty()
            && self.leader_id.is_none()
            && self.pending_leader_disconnect.is_none()
            && self.alarm_at.is_none()
    }

    async fn persist_meta(&self) -> Result<(), StorageError> {
        self.store
            .save_meta(&StoredMeta {
                session_code: self.session_code.clone(),
                live_index: self.live_index,
                leader_id: self.leader_id.clone(),
                leader_name: self
                    .leader_id
                    .as_deref()
                    .and_then(|id| self.user(id))
                    .map(|u| u.name.clone()),
            })
            .await
    }

    pub async fn full_setlist(&self) -> Result<Setlist, StorageError> {
        self.store.full_setlist(&self.setlist_info).await
    }

    pub async fn snapshot(&self) -> Result<SessionState, StorageError> {
        Ok(SessionState {
            session_code: self.session_code.clone(),
            setlist: self.full_setlist().await?,
            live_index: self.live_index,
            leader_id: self.leader_id.clone(),
            users: self.users.clone(),
        })
    }

    // --- 연결 이벤트 ---

    /// 새 연결: 등록 후 현재 상태를 바로 보낸다 (join 전 화면용)
    pub async fn connect(
        &mut self,
        conn_id: &str,
        sender: UnboundedSender<ServerMessage>,
    ) -> Result<(), StorageError> {
        self.hub.register(conn_id, sender);
        tracing::debug!(room_id = %self.room_id, conn_id = %conn_id, "Connection opened");

        let state = self.snapshot().await?;
        self.hub.send(conn_id, ServerMessage::State { state });
        Ok(())
    }

    /// 연결 종료. 리더였다면 유예 기간을 시작한다.
    pub async fn disconnect(&mut self, conn_id: &str) -> Result<(), StorageError> {
        self.hub.unregister(conn_id);

        let Some(pos) = self.users.iter().position(|u| u.id == conn_id) else {
            tracing::debug!(room_id = %self.room_id, conn_id = %conn_id, "Connection closed before join");
            return Ok(());
        };
        let user = self.users.remove(pos);

        if self.leader_id.as_deref() == Some(conn_id) {
            let now = now_ms();
            self.pending_leader_disconnect = Some(conn_id.to_string());
            self.store
                .save_disconnected_leader(&DisconnectedLeader {
                    id: conn_id.to_string(),
                    name: user.name.clone(),
                    disconnected_at: now,
                })
                .await?;

            let fire_at = now + self.settings.grace_period.as_millis() as u64;
            self.store.schedule_alarm(fire_at).await?;
            self.alarm_at = Some(fire_at);

            self.hub.broadcast(
                ServerMessage::LeaderDisconnected {
                    grace_seconds: self.settings.grace_seconds(),
                },
                &[],
            );

            tracing::info!(
                room_id = %self.room_id,
                conn_id = %conn_id,
                name = %user.name,
                grace_ms = self.settings.grace_period.as_millis() as u64,
                "Leader disconnected, grace period started"
            );
        }

        self.hub.broadcast(
            ServerMessage::UserLeft {
                user_id: conn_id.to_string(),
            },
            &[],
        );
        self.persist_meta().await?;

        tracing::info!(
            room_id = %self.room_id,
            conn_id = %conn_id,
            remaining = self.users.len(),
            "User left"
        );
        Ok(())
    }

    /// 유예 기간 만료. 그 사이 복귀가 없었다면 가장 먼저 들어온 사용자를 리더로 세운다.
    pub async fn on_alarm(&mut self) -> Result<(), StorageError> {
        self.alarm_at = None;
        self.store.cancel_alarm().await?;

        if self.pending_leader_disconnect.take().is_none() {
            return Ok(());
        }
        self.store.clear_disconnected_leader().await?;

        // min_by_key는 동률이면 앞선 원소(먼저 목록에 들어온 사용자)를 고른다
        let successor = self
            .users
            .iter()
            .min_by_key(|u| u.joined_at)
            .map(|u| (u.id.clone(), u.name.clone()));

        match successor {
            Some((id, name)) => {
                for user in &mut self.users {
                    user.role = if user.id == id {
                        UserRole::Leader
                    } else {
                        UserRole::Follower
                    };
                }
                self.leader_id = Some(id.clone());
                self.hub.broadcast(
                    ServerMessage::LeaderChanged {
                        leader_id: id.clone(),
                        leader_name: name.clone(),
                    },
                    &[],
                );
                tracing::info!(room_id = %self.room_id, leader_id = %id, name = %name, "Grace period expired, successor promoted");
            }
            None => {
                self.leader_id = None;
                tracing::info!(room_id = %self.room_id, "Grace period expired, room has no leader");
            }
        }

        self.persist_meta().await
    }

    /// 수신 텍스트 처리. 거부 사유는 보낸 연결에게만 `error`로 알린다.
    pub async fn handle_message(&mut self, conn_id: &str, text: &str) {
        let result = match ClientMessage::decode(text) {
            Ok(message) => self.dispatch(conn_id, message).await,
            Err(e) => Err(e.into()),
        };

        if let Err(err) = result {
            match &err {
                SessionError::Storage(e) => {
                    tracing::error!(room_id = %self.room_id, conn_id = %conn_id, error = %e, "Storage failure while handling message")
                }
                other => {
                    tracing::debug!(room_id = %self.room_id, conn_id = %conn_id, reason = %other, "Command rejected")
                }
            }
            self.hub.send(
                conn_id,
                ServerMessage::Error {
                    message: err.to_string(),
                    code: Some(err.code().to_string()),
                },
            );
        }
    }

    async fn dispatch(&mut self, conn_id: &str, message: ClientMessage) -> Result<(), SessionError> {
        match message {
            ClientMessage::Join {
                name,
                role,
                reconnecting,
            } => {
                self.handle_join(conn_id, name, role, reconnecting.unwrap_or(false))
                    .await
            }
            ClientMessage::SetSong { index } => self.handle_set_song(conn_id, index).await,
            ClientMessage::Browse { index } => {
                self.handle_browse(conn_id, index);
                Ok(())
            }
            ClientMessage::GoLive => {
                self.handle_go_live(conn_id);
                Ok(())
            }
            ClientMessage::RequestState => {
                let state = self.snapshot().await?;
                self.hub.send(conn_id, ServerMessage::State { state });
                Ok(())
            }
            ClientMessage::SetSetlist { setlist } => {
                self.handle_set_setlist(conn_id, setlist).await
            }
            ClientMessage::TransferLead { user_id } => {
                self.handle_transfer_lead(conn_id, &user_id).await
            }
        }
    }

    // --- 핸들러 ---

    async fn handle_join(
        &mut self,
        conn_id: &str,
        name: String,
        requested: UserRole,
        reconnecting: bool,
    ) -> Result<(), SessionError> {
        let disconnected = self.store.load_disconnected_leader().await?;
        let reclaiming = disconnected.as_ref().is_some_and(|d| d.name == name);

        let role = if reclaiming {
            self.store.cancel_alarm().await?;
            self.alarm_at = None;
            self.store.clear_disconnected_leader().await?;
            self.pending_leader_disconnect = None;

            // 유예 중 이미 승계된 리더가 있으면 강등
            if let Some(current) = self.leader_id.clone().filter(|id| id != conn_id) {
                if let Some(user) = self.user_mut(&current) {
                    user.role = UserRole::Follower;
                }
            }
            UserRole::Leader
        } else if self.leader_id.as_deref() == Some(conn_id) {
            // 같은 연결의 재참가는 리더 자리를 유지
            UserRole::Leader
        } else if requested == UserRole::Leader && self.leader_id.is_some() {
            UserRole::Follower
        } else {
            requested
        };

        let user = SessionUser {
            id: conn_id.to_string(),
            name,
            role,
            is_live: true,
            current_index: self.live_index as i64,
            joined_at: now_ms(),
        };

        match self.user_mut(conn_id) {
            Some(existing) => *existing = user.clone(),
            None => self.users.push(user.clone()),
        }
        if role == UserRole::Leader {
            self.leader_id = Some(conn_id.to_string());
        }

        tracing::info!(
            room_id = %self.room_id,
            conn_id = %conn_id,
            name = %user.name,
            role = ?role,
            requested = ?requested,
            reconnecting = reconnecting,
            reclaimed = reclaiming,
            "User joined"
        );

        self.hub
            .broadcast(ServerMessage::UserJoined { user: user.clone() }, &[conn_id]);

        if reclaiming {
            self.hub.broadcast(
                ServerMessage::LeaderChanged {
                    leader_id: conn_id.to_string(),
                    leader_name: user.name.clone(),
                },
                &[],
            );
        }

        let state = self.snapshot().await?;
        self.hub.send(conn_id, ServerMessage::State { state });

        self.persist_meta().await?;
        Ok(())
    }

    async fn handle_set_song(&mut self, conn_id: &str, index: i64) -> Result<(), SessionError> {
        if self.leader_id.as_deref() != Some(conn_id) {
            return Err(SessionError::NotLeaderSetSong);
        }
        let index = usize::try_from(index)
            .ok()
            .filter(|i| *i < self.setlist_info.song_count)
            .ok_or(SessionError::SongIndexOutOfRange)?;

        self.live_index = index;
        let live = index as i64;
        for user in &mut self.users {
            // 라이브 중인 사용자는 리더를 따라가고, 둘러보는 사용자는 위치를 유지한다
            if user.id == conn_id || user.is_live {
                user.current_index = live;
            }
            user.is_live = user.current_index == live;
        }

        self.hub.broadcast(
            ServerMessage::SongChanged {
                index,
                leader_id: conn_id.to_string(),
            },
            &[],
        );
        tracing::info!(room_id = %self.room_id, index = index, "Live song changed");

        self.persist_meta().await?;
        Ok(())
    }

    fn handle_browse(&mut self, conn_id: &str, index: i64) {
        let live = self.live_index as i64;
        let Some(user) = self.user_mut(conn_id) else {
            return;
        };
        user.current_index = index;
        user.is_live = index == live;
        let user = user.clone();

        self.hub.broadcast(ServerMessage::UserUpdated { user }, &[]);
    }

    fn handle_go_live(&mut self, conn_id: &str) {
        let live = self.live_index as i64;
        let Some(user) = self.user_mut(conn_id) else {
            return;
        };
        user.current_index = live;
        user.is_live = true;
        let user = user.clone();

        self.hub.broadcast(ServerMessage::UserUpdated { user }, &[]);
    }

    async fn handle_set_setlist(
        &mut self,
        conn_id: &str,
        setlist: Setlist,
    ) -> Result<(), SessionError> {
        if self.leader_id.as_deref() != Some(conn_id) {
            return Err(SessionError::NotLeaderSetSetlist);
        }

        self.setlist_info = self
            .store
            .persist_setlist(self.setlist_info.song_count, &setlist)
            .await
            .map_err(|e| match e {
                StorageError::ValueTooLarge { .. } => SessionError::SetlistTooLarge,
                other => other.into(),
            })?;
        self.live_index = 0;

        for user in &mut self.users {
            user.current_index = 0;
            user.is_live = true;
        }

        tracing::info!(
            room_id = %self.room_id,
            setlist_id = %self.setlist_info.id,
            songs = self.setlist_info.song_count,
            "Setlist replaced"
        );

        let state = self.snapshot().await?;
        self.hub.broadcast(ServerMessage::State { state }, &[]);
        self.persist_meta().await?;
        Ok(())
    }

    async fn handle_transfer_lead(
        &mut self,
        conn_id: &str,
        target_id: &str,
    ) -> Result<(), SessionError> {
        if self.leader_id.as_deref() != Some(conn_id) {
            return Err(SessionError::NotLeaderTransfer);
        }
        let target_name = self
            .user(target_id)
            .map(|u| u.name.clone())
            .ok_or(SessionError::UserNotFound)?;

        if let Some(old) = self.user_mut(conn_id) {
            old.role = UserRole::Follower;
        }
        if let Some(new) = self.user_mut(target_id) {
            new.role = UserRole::Leader;
        }
        self.leader_id = Some(target_id.to_string());

        self.hub.broadcast(
            ServerMessage::LeaderChanged {
                leader_id: target_id.to_string(),
                leader_name: target_name,
            },
            &[],
        );
        tracing::info!(room_id = %self.room_id, from = %conn_id, to = %target_id, "Leadership transferred");

        self.persist_meta().await?;
        Ok(())
    }

    /// HTTP 세션 정보
    pub async fn session_info(&self) -> Result<SessionInfo, StorageError> {
        let current_song = self.store.song(self.live_index).await?.map(|s| s.title);
        Ok(SessionInfo {
            session_code: self.session_code.clone(),
            room_id: self.room_id.clone(),
            song_count: self.setlist_info.song_count,
            setlist_name: self.setlist_info.name.clone(),
            user_count: self.users.len(),
            current_song,
        })
    }
}
