//! JamSync 세션 서버
//!
//! 리허설 세션에서 리더가 고른 곡 위치를 모든 참가자에게 동기화한다.
//! 방마다 하나의 코디네이터가 상태를 소유하고, 리더가 끊기면 유예 기간 뒤 승계한다.

pub mod config;
pub mod handlers;
pub mod protocol;
pub mod room;
pub mod state;
pub mod storage;

pub use handlers::router;
