//! 방 액터: 한 방의 이벤트를 한 번에 하나씩 끝까지 처리한다
//!
//! 연결 열림/닫힘, 수신 메시지, 유예 알람이 모두 이 루프 하나를 거치므로
//! 코디네이터 상태가 중간에 섞여 보이는 일이 없다.

use super::coordinator::{RoomCoordinator, RoomSettings};
use super::now_ms;
use crate::protocol::{ServerMessage, SessionInfo};
use crate::storage::{RoomStorage, StorageError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;

/// 방 액터로 보내는 명령
#[derive(Debug)]
pub enum RoomCommand {
    Connect {
        conn_id: String,
        sender: UnboundedSender<ServerMessage>,
    },
    Message {
        conn_id: String,
        text: String,
    },
    Disconnect {
        conn_id: String,
    },
    Info {
        reply: oneshot::Sender<Result<SessionInfo, StorageError>>,
    },
}

/// 방 액터를 띄우고 명령 채널을 돌려준다.
/// 모든 송신자가 drop되면 액터도 끝난다.
///
/// `dormant`에는 매 이벤트 처리 뒤 방이 비어 있는지(참가자, 리더, 알람 모두 없음)가 기록된다.
pub fn spawn_room(
    room_id: String,
    storage: Arc<dyn RoomStorage>,
    settings: RoomSettings,
    dormant: Arc<AtomicBool>,
) -> UnboundedSender<RoomCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_room(room_id, storage, settings, dormant, rx));
    tx
}

async fn run_room(
    room_id: String,
    storage: Arc<dyn RoomStorage>,
    settings: RoomSettings,
    dormant: Arc<AtomicBool>,
    mut rx: UnboundedReceiver<RoomCommand>,
) {
    let mut coordinator = match RoomCoordinator::load(room_id.clone(), storage, settings).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "Failed to load room");
            return;
        }
    };

    loop {
        dormant.store(coordinator.is_dormant(), Ordering::SeqCst);

        // 알람은 매 이벤트 후 다시 계산: 복귀하면 취소되고, 새 끊김이면 교체된다
        let alarm = coordinator.scheduled_alarm();

        // 이미 지난 알람은 대기 중인 명령보다 먼저 처리한다
        if alarm.is_some_and(|at_ms| at_ms <= now_ms()) {
            if let Err(e) = coordinator.on_alarm().await {
                tracing::error!(room_id = %room_id, error = %e, "Grace period alarm failed");
            }
            continue;
        }

        tokio::select! {
            biased;
            _ = sleep_until_alarm(alarm) => {
                if let Err(e) = coordinator.on_alarm().await {
                    tracing::error!(room_id = %room_id, error = %e, "Grace period alarm failed");
                }
            }
            command = rx.recv() => match command {
                Some(command) => handle_command(&mut coordinator, command).await,
                None => break,
            },
        }
    }

    tracing::info!(room_id = %room_id, "Room actor stopped");
}

async fn handle_command(coordinator: &mut RoomCoordinator, command: RoomCommand) {
    match command {
        RoomCommand::Connect { conn_id, sender } => {
            if let Err(e) = coordinator.connect(&conn_id, sender).await {
                tracing::error!(room_id = %coordinator.room_id(), conn_id = %conn_id, error = %e, "Failed to send initial state");
            }
        }
        RoomCommand::Message { conn_id, text } => {
            coordinator.handle_message(&conn_id, &text).await;
        }
        RoomCommand::Disconnect { conn_id } => {
            if let Err(e) = coordinator.disconnect(&conn_id).await {
                tracing::error!(room_id = %coordinator.room_id(), conn_id = %conn_id, error = %e, "Failed to persist disconnect");
            }
        }
        RoomCommand::Info { reply } => {
            let _ = reply.send(coordinator.session_info().await);
        }
    }
}

async fn sleep_until_alarm(alarm: Option<u64>) {
    match alarm {
        Some(at_ms) => {
            let delay = at_ms.saturating_sub(now_ms());
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UserRole;
    use crate::storage::MemoryStorage;

    async fn recv_until<F>(rx: &mut UnboundedReceiver<ServerMessage>, mut pred: F) -> ServerMessage
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let msg = rx.recv().await.expect("channel closed");
                if pred(&msg) {
                    return msg;
                }
            }
        })
        .await
        .expect("timed out waiting for message")
    }

    fn join(name: &str, role: &str) -> String {
        format!(r#"{{"type":"join","name":"{}","role":"{}"}}"#, name, role)
    }

    #[tokio::test]
    async fn test_grace_alarm_promotes_successor() {
        // given: 유예 기간을 짧게 잡은 방에 리더 A, 팔로워 B
        let storage = Arc::new(MemoryStorage::new());
        let room = spawn_room(
            "actor-test".to_string(),
            storage.clone(),
            RoomSettings {
                grace_period: Duration::from_millis(100),
            },
            Arc::new(AtomicBool::new(false)),
        );
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        room.send(RoomCommand::Connect { conn_id: "a".into(), sender: tx_a }).unwrap();
        room.send(RoomCommand::Message { conn_id: "a".into(), text: join("Ana", "leader") }).unwrap();
        room.send(RoomCommand::Connect { conn_id: "b".into(), sender: tx_b }).unwrap();
        room.send(RoomCommand::Message { conn_id: "b".into(), text: join("Ben", "follower") }).unwrap();
        recv_until(&mut rx_a, |m| matches!(m, ServerMessage::UserJoined { .. })).await;
        drop(rx_a);

        // when: 리더가 끊긴다
        room.send(RoomCommand::Disconnect { conn_id: "a".into() }).unwrap();

        // then: 유예 안내 후, 알람이 울리면 B가 리더가 된다
        let notice = recv_until(&mut rx_b, |m| matches!(m, ServerMessage::LeaderDisconnected { .. })).await;
        assert_eq!(notice, ServerMessage::LeaderDisconnected { grace_seconds: 1 });

        let changed = recv_until(&mut rx_b, |m| matches!(m, ServerMessage::LeaderChanged { .. })).await;
        assert_eq!(
            changed,
            ServerMessage::LeaderChanged {
                leader_id: "b".to_string(),
                leader_name: "Ben".to_string(),
            }
        );
        assert_eq!(storage.get_alarm().await.unwrap(), None);

        let (reply_tx, reply_rx) = oneshot::channel();
        room.send(RoomCommand::Info { reply: reply_tx }).unwrap();
        let info = reply_rx.await.unwrap().unwrap();
        assert_eq!(info.user_count, 1);
    }

    #[tokio::test]
    async fn test_past_due_alarm_fires_after_resume() {
        // given: 이전 프로세스가 남긴 리더 끊김 기록과 지난 알람
        let storage = Arc::new(MemoryStorage::new());
        {
            let mut coordinator =
                RoomCoordinator::load("resume", storage.clone(), RoomSettings::default())
                    .await
                    .unwrap();
            let (tx, _rx) = mpsc::unbounded_channel();
            coordinator.connect("a", tx).await.unwrap();
            coordinator.handle_message("a", &join("Ana", "leader")).await;
            coordinator.disconnect("a").await.unwrap();
        }
        storage.set_alarm(1).await.unwrap();

        // when: 방이 다시 뜬다
        let room = spawn_room(
            "resume".to_string(),
            storage.clone(),
            RoomSettings::default(),
            Arc::new(AtomicBool::new(false)),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        room.send(RoomCommand::Connect { conn_id: "c".into(), sender: tx }).unwrap();
        recv_until(&mut rx, |m| matches!(m, ServerMessage::State { .. })).await;

        // then: 알람이 처리되어 리더가 비고, 새 리더 요청이 받아들여진다
        room.send(RoomCommand::Message { conn_id: "c".into(), text: join("Cal", "leader") }).unwrap();
        let state = recv_until(&mut rx, |m| matches!(m, ServerMessage::State { .. })).await;
        match state {
            ServerMessage::State { state } => {
                assert_eq!(state.leader_id.as_deref(), Some("c"));
                assert_eq!(state.users[0].role, UserRole::Leader);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(storage.get_alarm().await.unwrap(), None);
    }

    /// 이전 프로세스에서 리더 Ana가 끊기고 유예가 이미 끝난 저장소
    async fn expired_grace_storage(room_id: &str) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        let mut coordinator =
            RoomCoordinator::load(room_id, storage.clone(), RoomSettings::default())
                .await
                .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        coordinator.connect("a", tx).await.unwrap();
        coordinator.handle_message("a", &join("Ana", "leader")).await;
        coordinator.disconnect("a").await.unwrap();
        storage.set_alarm(1).await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_expired_grace_wins_over_queued_reclaim() {
        // given: 액터가 뜨기 전에 같은 이름의 참가 요청이 이미 쌓여 있다
        let storage = expired_grace_storage("late-reclaim").await;
        let (room, rx_commands) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        room.send(RoomCommand::Connect { conn_id: "a2".into(), sender: tx }).unwrap();
        room.send(RoomCommand::Message { conn_id: "a2".into(), text: join("Ana", "follower") }).unwrap();

        // when
        tokio::spawn(run_room(
            "late-reclaim".to_string(),
            storage.clone(),
            RoomSettings::default(),
            Arc::new(AtomicBool::new(false)),
            rx_commands,
        ));

        // then: 유예가 먼저 만료되어 복귀로 인정되지 않는다
        recv_until(&mut rx, |m| matches!(m, ServerMessage::State { .. })).await;
        let state = recv_until(&mut rx, |m| matches!(m, ServerMessage::State { .. })).await;
        match state {
            ServerMessage::State { state } => {
                assert_eq!(state.leader_id, None);
                assert_eq!(state.users.len(), 1);
                assert_eq!(state.users[0].role, UserRole::Follower);
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(storage.get_alarm().await.unwrap(), None);
        assert_eq!(storage.get("disconnectedLeader").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dormant_flag_tracks_room_activity() {
        // given
        let dormant = Arc::new(AtomicBool::new(false));
        let room = spawn_room(
            "quiet".to_string(),
            Arc::new(MemoryStorage::new()),
            RoomSettings::default(),
            dormant.clone(),
        );
        let (reply, done) = oneshot::channel();
        room.send(RoomCommand::Info { reply }).unwrap();
        done.await.unwrap().unwrap();
        assert!(dormant.load(Ordering::SeqCst));

        let (tx, mut rx) = mpsc::unbounded_channel();
        room.send(RoomCommand::Connect { conn_id: "a".into(), sender: tx }).unwrap();
        room.send(RoomCommand::Message { conn_id: "a".into(), text: join("Ana", "leader") }).unwrap();
        recv_until(&mut rx, |m| matches!(m, ServerMessage::State { state } if !state.users.is_empty())).await;

        // when: 처리가 끝난 뒤 한 번 더 왕복해 플래그 갱신을 기다린다
        let (reply, done) = oneshot::channel();
        room.send(RoomCommand::Info { reply }).unwrap();
        done.await.unwrap().unwrap();

        // then
        assert!(!dormant.load(Ordering::SeqCst));
    }
}
