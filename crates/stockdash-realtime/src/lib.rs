//! # StockDash Realtime
//!
//! 대시보드의 실시간 동기화 계층.
//!
//! 브라우저 세션당 하나의 WebSocket 연결을 유지하고, 수신 메시지를 토픽별
//! 구독자에게 분배하며, 여러 탭이 하나의 연결을 공유하도록 조정합니다.
//!
//! # 구성 요소
//!
//! - [`ConnectionManager`] - 단일 전송 연결의 수명 주기, 하트비트,
//!   지수 백오프 재연결
//! - [`TopicRegistry`] - 토픽별 구독 콜백 fan-out
//! - [`TabCoordinator`] - 탭 간 마스터 선출 및 수신 메시지 중계
//! - [`hooks`] - 토픽 하나를 구독해 최신 payload를 보관하는 소비자 훅
//!
//! # 메시지 흐름
//!
//! ```text
//! transport frame
//!   → ConnectionManager (파싱, pong 제거, 최근 메시지 기록)
//!   → TopicRegistry.dispatch (마스터 탭 로컬 구독자)
//!   → RelayBus (형제 탭으로 중계)
//!   → 형제 탭의 TopicRegistry.dispatch
//! ```
//!
//! 송신은 마스터 탭의 연결을 통해서만 가능하며, follower 탭의 send는
//! 로컬에서 거부됩니다.

pub mod connection;
pub mod hooks;
pub mod registry;
pub mod state;
pub mod tabs;

pub use connection::ConnectionManager;
pub use hooks::{NotificationFeed, PriceWatcher, TopicWatcher};
pub use registry::{SubscriptionHandle, TopicRegistry};
pub use state::ConnectionState;
pub use tabs::{MasterSlot, MemorySlot, RelayBus, RelayFrame, TabCoordinator, TabId};
