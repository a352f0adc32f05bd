//! WebSocket 연결 핸들러

use crate::protocol::ServerMessage;
use crate::room::RoomCommand;
use crate::state::AppState;
use crate::storage::is_valid_room_id;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !is_valid_room_id(&room_id) {
        return (StatusCode::BAD_REQUEST, "Invalid room id").into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id))
}

/// 소켓 하나의 수명: 방에 연결 → 수신 중계 → 종료 알림
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, room_id: String) {
    let room = match state.attach(&room_id) {
        Ok(room) => room,
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "Failed to open room storage");
            return;
        }
    };

    let conn_id = Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // 송신 태스크
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to serialize server message"),
            }
        }
    });

    tracing::info!(room_id = %room_id, conn_id = %conn_id, "New connection established");

    let connected = room.send(RoomCommand::Connect {
        conn_id: conn_id.clone(),
        sender: tx,
    });

    if connected {
        // 수신 처리
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let delivered = room.send(RoomCommand::Message {
                        conn_id: conn_id.clone(),
                        text,
                    });
                    if !delivered {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(_) => break,
                _ => {}
            }
        }

        room.send(RoomCommand::Disconnect {
            conn_id: conn_id.clone(),
        });
    } else {
        tracing::warn!(room_id = %room_id, conn_id = %conn_id, "Room is not running, dropping connection");
    }

    // 연결 해제
    state.detach(&room);
    send_task.abort();
    tracing::info!(room_id = %room_id, conn_id = %conn_id, "Connection closed");
}
