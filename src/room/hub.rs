//! 방의 연결 목록과 메시지 전송

use crate::protocol::ServerMessage;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

/// 연결 ID → 송신 채널
#[derive(Default)]
pub struct ConnectionHub {
    senders: HashMap<String, UnboundedSender<ServerMessage>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, conn_id: &str, sender: UnboundedSender<ServerMessage>) {
        self.senders.insert(conn_id.to_string(), sender);
    }

    pub fn unregister(&mut self, conn_id: &str) {
        self.senders.remove(conn_id);
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// 특정 연결에게 전송
    pub fn send(&self, conn_id: &str, message: ServerMessage) {
        if let Some(sender) = self.senders.get(conn_id) {
            if sender.send(message).is_err() {
                tracing::debug!(conn_id = %conn_id, "Send to closed connection dropped");
            }
        }
    }

    /// `exclude`를 제외한 모든 연결에게 전송. 일부 실패는 무시한다.
    pub fn broadcast(&self, message: ServerMessage, exclude: &[&str]) {
        for (conn_id, sender) in &self.senders {
            if exclude.contains(&conn_id.as_str()) {
                continue;
            }
            if sender.send(message.clone()).is_err() {
                tracing::debug!(conn_id = %conn_id, "Broadcast to closed connection dropped");
            }
        }
    }
}
