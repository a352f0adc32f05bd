//! 환경 변수 기반 설정 관리

use crate::room::{RoomSettings, DEFAULT_GRACE_PERIOD};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 서버 설정
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub room: RoomConfig,
    /// 설정되지 않으면 메모리 저장소를 쓴다
    pub storage_dir: Option<PathBuf>,
    pub log_level: String,
}

/// 방 설정
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub leader_grace_secs: u64,
    /// 연결이 없는 방을 내리기까지의 시간
    pub idle_timeout_ms: u64,
    pub sweep_interval_secs: u64,
}

impl RoomConfig {
    pub fn settings(&self) -> RoomSettings {
        RoomSettings {
            grace_period: Duration::from_secs(self.leader_grace_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1999,
            host: "0.0.0.0".to_string(),
            room: RoomConfig {
                leader_grace_secs: DEFAULT_GRACE_PERIOD.as_secs(),
                idle_timeout_ms: 300_000,
                sweep_interval_secs: 60,
            },
            storage_dir: None,
            log_level: "info".to_string(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// 환경 변수에서 설정 로드 (`.env` 파일이 있으면 먼저 읽는다)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Self {
            port: env_or("PORT", defaults.port),
            host: env::var("HOST").unwrap_or(defaults.host),
            room: RoomConfig {
                leader_grace_secs: env_or("LEADER_GRACE_SECONDS", defaults.room.leader_grace_secs),
                idle_timeout_ms: env_or("ROOM_IDLE_TIMEOUT", defaults.room.idle_timeout_ms),
                sweep_interval_secs: env_or(
                    "ROOM_SWEEP_INTERVAL",
                    defaults.room.sweep_interval_secs,
                ),
            },
            storage_dir: env::var("STORAGE_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }
}
