//! 방 단위 세션 조율

pub mod actor;
pub mod coordinator;
pub mod default_setlist;
pub mod error;
pub mod hub;
pub mod persistence;

pub use actor::{spawn_room, RoomCommand};
pub use coordinator::{RoomCoordinator, RoomSettings, DEFAULT_GRACE_PERIOD};
pub use error::SessionError;

use std::time::{SystemTime, UNIX_EPOCH};

/// 현재 시각 (unix ms)
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
