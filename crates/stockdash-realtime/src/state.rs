//! 연결 상태 관리.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use stockdash_core::message::Envelope;

/// 연결 상태.
///
/// 전이는 전송 계층의 수명 주기 이벤트와 명시적인 connect/disconnect
/// 호출로만 발생합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// 연결 시도 중
    Connecting,
    /// 연결됨
    Connected,
    /// 연결 없음
    Disconnected,
    /// 에러 발생
    Error,
}

impl ConnectionState {
    /// 연결이 활성 상태인지 확인.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// 연결이 열려 있거나 열리는 중인지 확인.
    ///
    /// 이 상태에서의 `connect()` 호출은 무시됩니다.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// 연결 관리자의 내부 상태.
#[derive(Debug)]
pub(crate) struct InternalState {
    /// 현재 연결 상태
    pub state: ConnectionState,
    /// 재연결 시도 횟수 (연결 성공 시 0으로 초기화)
    pub reconnect_attempts: u32,
    /// 재연결 타이머 중복 방지 플래그
    pub is_reconnecting: bool,
    /// 가장 최근에 수신한 메시지
    pub last_message: Option<Envelope>,
    /// 마지막 연결 성공 시각
    pub last_connected: Option<Instant>,
}

impl Default for InternalState {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            is_reconnecting: false,
            last_message: None,
            last_connected: None,
        }
    }
}

impl InternalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 연결 성공 처리. 재연결 카운터와 가드를 초기화합니다.
    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.is_reconnecting = false;
        self.last_connected = Some(Instant::now());
    }

    /// 연결 종료 처리.
    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// 에러 처리. close 이벤트에 의한 전이를 막지 않습니다.
    pub fn mark_error(&mut self) {
        self.state = ConnectionState::Error;
    }

    /// 수신 메시지를 기록합니다.
    pub fn record_message(&mut self, envelope: Envelope) {
        self.last_message = Some(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use stockdash_core::message::Topic;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_state_checks() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());

        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Connected.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(!ConnectionState::Error.is_active());
    }

    #[test]
    fn test_internal_state_transitions() {
        let mut state = InternalState::new();
        assert_eq!(state.state, ConnectionState::Disconnected);

        state.reconnect_attempts = 3;
        state.is_reconnecting = true;
        state.mark_connected();
        assert_eq!(state.state, ConnectionState::Connected);
        assert_eq!(state.reconnect_attempts, 0);
        assert!(!state.is_reconnecting);
        assert!(state.last_connected.is_some());

        state.mark_error();
        assert_eq!(state.state, ConnectionState::Error);

        state.mark_disconnected();
        assert_eq!(state.state, ConnectionState::Disconnected);
    }

    #[test]
    fn test_record_message() {
        let mut state = InternalState::new();
        assert!(state.last_message.is_none());

        state.record_message(Envelope::new(Topic::Notification, Value::Null));
        assert_eq!(
            state.last_message.as_ref().map(|m| m.topic.clone()),
            Some(Topic::Notification)
        );
    }
}
