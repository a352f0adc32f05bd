//! 세션 명령 거부 사유

use crate::protocol::DecodeError;
use crate::storage::StorageError;
use thiserror::Error;

/// 명령 처리 실패. `Display`가 곧 클라이언트에게 보내는 메시지다.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid message format")]
    InvalidMessage,
    #[error("Unknown message type")]
    UnknownMessageType,
    #[error("Only the leader can change the live song")]
    NotLeaderSetSong,
    #[error("Only the leader can change the setlist")]
    NotLeaderSetSetlist,
    #[error("Only the current leader can transfer leadership")]
    NotLeaderTransfer,
    #[error("Song index out of range")]
    SongIndexOutOfRange,
    #[error("User not found")]
    UserNotFound,
    #[error("Setlist entry exceeds the storage size limit")]
    SetlistTooLarge,
    #[error("Internal storage error")]
    Storage(#[from] StorageError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::InvalidMessage => "INVALID_MESSAGE",
            SessionError::UnknownMessageType => "UNKNOWN_MESSAGE_TYPE",
            SessionError::NotLeaderSetSong
            | SessionError::NotLeaderSetSetlist
            | SessionError::NotLeaderTransfer => "NOT_LEADER",
            SessionError::SongIndexOutOfRange => "INDEX_OUT_OF_RANGE",
            SessionError::UserNotFound => "USER_NOT_FOUND",
            SessionError::SetlistTooLarge => "SETLIST_TOO_LARGE",
            SessionError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<DecodeError> for SessionError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Malformed => SessionError::InvalidMessage,
            DecodeError::UnknownType => SessionError::UnknownMessageType,
        }
    }
}
