//! # StockDash Core
//!
//! 실시간 주식 대시보드의 핵심 도메인 타입을 제공합니다.
//!
//! 이 크레이트는 실시간 동기화 계층 전반에서 사용되는 기본 타입을 제공합니다:
//! - 메시지 envelope 및 토픽별 payload 타입
//! - 설정 관리
//! - 에러 타입
//! - 로깅 인프라

pub mod config;
pub mod error;
pub mod logging;
pub mod message;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use message::*;
