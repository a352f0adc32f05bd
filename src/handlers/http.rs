//! HTTP 엔드포인트

use crate::protocol::SessionInfo;
use crate::room::RoomCommand;
use crate::state::AppState;
use crate::storage::is_valid_room_id;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, Json},
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

pub async fn index_handler() -> Html<&'static str> {
    Html("<h1>JamSync Session Server</h1><p>WebSocket endpoint: /rooms/{room_id}/ws</p>")
}

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "server": "jamsync-session-rs",
        "timestamp": SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }))
}

/// 세션 정보 (QR 코드 랜딩용). GET 외의 메서드는 라우터가 405로 거절한다.
pub async fn session_info_handler(
    Path(room_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionInfo>, StatusCode> {
    if !is_valid_room_id(&room_id) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let room = state.room(&room_id).map_err(|e| {
        tracing::error!(room_id = %room_id, error = %e, "Failed to open room storage");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let (reply, rx) = oneshot::channel();
    if !room.send(RoomCommand::Info { reply }) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    match rx.await {
        Ok(Ok(info)) => Ok(Json(info)),
        Ok(Err(e)) => {
            tracing::error!(room_id = %room_id, error = %e, "Failed to read session info");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}
