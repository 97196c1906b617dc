//! 실시간 동기화 계층의 에러 타입.
//!
//! 이 모듈은 동기화 계층 전반에서 사용되는 에러 타입을 정의합니다.

use thiserror::Error;

/// 실시간 동기화 에러.
#[derive(Debug, Error)]
pub enum SyncError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 연결 에러
    #[error("연결 에러: {0}")]
    Connection(String),

    /// 연결되지 않은 상태에서의 전송 시도
    #[error("연결되지 않음")]
    NotConnected,

    /// 마스터 탭이 아닌 탭의 전송 시도
    #[error("마스터 탭이 아님")]
    NotMaster,

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 탭 간 중계 에러
    #[error("중계 에러: {0}")]
    Relay(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 동기화 작업을 위한 Result 타입.
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// 재시도 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Connection(_) | SyncError::NotConnected)
    }

    /// 정책에 의한 거부인지 확인합니다.
    ///
    /// 정책 거부는 버그가 아니라 설계된 동작입니다 (예: follower 탭의 send).
    pub fn is_policy_rejection(&self) -> bool {
        matches!(self, SyncError::NotMaster)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}
