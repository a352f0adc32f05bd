//! 클라이언트-서버 메시지 프로토콜 정의

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 곡 (코드 차트 포함)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub key: String,
    pub tempo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// 코드 차트 원문
    pub chart: String,
}

/// 셋리스트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setlist {
    pub id: String,
    pub name: String,
    pub songs: Vec<Song>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Leader,
    Follower,
}

/// 세션 참가자
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    /// 연결 ID
    pub id: String,
    pub name: String,
    pub role: UserRole,
    /// 리더의 현재 곡을 보고 있는지 여부
    pub is_live: bool,
    /// 실제로 보고 있는 곡 인덱스
    pub current_index: i64,
    /// 참가 시각 (unix ms), 리더 승계 순서 결정에 사용
    pub joined_at: u64,
}

/// 전체 세션 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_code: String,
    pub setlist: Setlist,
    pub live_index: usize,
    pub leader_id: Option<String>,
    pub users: Vec<SessionUser>,
}

/// 클라이언트 → 서버 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join {
        name: String,
        role: UserRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reconnecting: Option<bool>,
    },
    SetSong {
        index: i64,
    },
    Browse {
        index: i64,
    },
    GoLive,
    RequestState,
    SetSetlist {
        setlist: Setlist,
    },
    TransferLead {
        user_id: String,
    },
}

/// `type` 태그로 허용되는 값
const CLIENT_MESSAGE_TYPES: &[&str] = &[
    "join",
    "set-song",
    "browse",
    "go-live",
    "request-state",
    "set-setlist",
    "transfer-lead",
];

/// 수신 메시지 해석 실패
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Invalid message format")]
    Malformed,
    #[error("Unknown message type")]
    UnknownType,
}

impl ClientMessage {
    /// 텍스트 프레임을 해석한다.
    ///
    /// JSON 자체가 깨졌거나 필드가 맞지 않으면 `Malformed`,
    /// `type`이 알 수 없는 값이면 `UnknownType`.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| DecodeError::Malformed)?;

        let known = value
            .get("type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| CLIENT_MESSAGE_TYPES.contains(&t));
        if !known {
            return Err(DecodeError::UnknownType);
        }

        serde_json::from_value(value).map_err(|_| DecodeError::Malformed)
    }
}

/// 서버 → 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    State {
        state: SessionState,
    },
    SongChanged {
        index: usize,
        leader_id: String,
    },
    UserJoined {
        user: SessionUser,
    },
    UserLeft {
        user_id: String,
    },
    UserUpdated {
        user: SessionUser,
    },
    LeaderChanged {
        leader_id: String,
        leader_name: String,
    },
    LeaderDisconnected {
        grace_seconds: u64,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

/// HTTP 세션 정보 응답 (QR 랜딩용)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_code: String,
    pub room_id: String,
    pub song_count: usize,
    pub setlist_name: String,
    pub user_count: usize,
    pub current_song: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_join_with_optional_flag() {
        let msg = ClientMessage::decode(r#"{"type":"join","name":"Ana","role":"leader"}"#).unwrap();
        match msg {
            ClientMessage::Join {
                name,
                role,
                reconnecting,
            } => {
                assert_eq!(name, "Ana");
                assert_eq!(role, UserRole::Leader);
                assert_eq!(reconnecting, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_decode_camel_case_fields() {
        let msg = ClientMessage::decode(r#"{"type":"transfer-lead","userId":"abc"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::TransferLead { user_id } if user_id == "abc"));
    }

    #[test]
    fn test_decode_rejects_broken_json() {
        assert_eq!(
            ClientMessage::decode("{not json").unwrap_err(),
            DecodeError::Malformed
        );
    }

    #[test]
    fn test_decode_unknown_or_missing_type() {
        assert_eq!(
            ClientMessage::decode(r#"{"type":"dance"}"#).unwrap_err(),
            DecodeError::UnknownType
        );
        assert_eq!(
            ClientMessage::decode(r#"{"index":3}"#).unwrap_err(),
            DecodeError::UnknownType
        );
    }

    #[test]
    fn test_decode_known_type_with_bad_fields() {
        assert_eq!(
            ClientMessage::decode(r#"{"type":"set-song","index":"two"}"#).unwrap_err(),
            DecodeError::Malformed
        );
    }

    #[test]
    fn test_server_message_wire_shape() {
        let msg = ServerMessage::SongChanged {
            index: 2,
            leader_id: "a".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "song-changed", "index": 2, "leaderId": "a"})
        );

        let err = ServerMessage::Error {
            message: "Song index out of range".to_string(),
            code: None,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "error", "message": "Song index out of range"})
        );
    }

    #[test]
    fn test_session_info_serializes_missing_song_as_null() {
        let info = SessionInfo {
            session_code: "groove-007".to_string(),
            room_id: "main".to_string(),
            song_count: 0,
            setlist_name: "Empty".to_string(),
            user_count: 0,
            current_song: None,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["currentSong"], serde_json::Value::Null);
        assert_eq!(json["roomId"], "main");
    }
}
