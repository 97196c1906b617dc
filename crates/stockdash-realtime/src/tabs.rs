//! 탭 간 연결 조정.
//!
//! origin당 정확히 하나의 탭만 실제 WebSocket 연결을 보유하도록
//! 보장합니다. 마스터 탭은 수신 메시지를 브로드캐스트 채널로 중계하고,
//! follower 탭은 중계된 메시지를 자신의 로컬 레지스트리에 전달합니다 —
//! 그래서 follower도 소켓 없이 실시간 데이터를 관찰할 수 있습니다.
//!
//! 마스터 선출은 공유 슬롯의 점유 여부 확인뿐입니다. 슬롯에 liveness
//! lease가 없으므로 unload 핸들러 없이 죽은 마스터는 슬롯을 점유한 채로
//! 남습니다 — 알려진 제약이며 여기서 고치지 않습니다.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stockdash_core::config::RealtimeConfig;
use stockdash_core::error::{SyncError, SyncResult};
use stockdash_core::message::Envelope;

use crate::connection::{ConnectionManager, RelayContext};
use crate::registry::TopicRegistry;

/// 탭 세션마다 한 번 생성되는 식별자.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabId(String);

impl TabId {
    /// 새 탭 ID 생성.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 마스터 선출에 사용하는 탭 간 공유 슬롯.
///
/// 키 단위 쓰기가 원자적이어야 합니다. 브라우저의 storage 프리미티브처럼
/// 동기 API입니다.
pub trait MasterSlot: Send + Sync {
    /// 슬롯이 비어 있으면 자신의 ID를 기록하고 true를 반환합니다.
    /// 이미 자신이 보유 중이면 true, 다른 탭이 보유 중이면 false.
    fn try_claim(&self, id: &TabId) -> bool;

    /// 자신이 보유한 경우에만 슬롯을 비웁니다.
    fn release(&self, id: &TabId);

    /// 현재 보유자의 ID.
    fn holder(&self) -> Option<String>;
}

/// 프로세스 내 공유 슬롯 구현.
///
/// 같은 프로세스의 탭(클라이언트 인스턴스)들이 `Arc`로 공유합니다.
#[derive(Default)]
pub struct MemorySlot {
    holder: Mutex<Option<String>>,
}

impl MemorySlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl MasterSlot for MemorySlot {
    fn try_claim(&self, id: &TabId) -> bool {
        let mut holder = self.holder.lock().unwrap_or_else(PoisonError::into_inner);
        match holder.as_deref() {
            None => {
                *holder = Some(id.as_str().to_string());
                true
            }
            Some(current) => current == id.as_str(),
        }
    }

    fn release(&self, id: &TabId) {
        let mut holder = self.holder.lock().unwrap_or_else(PoisonError::into_inner);
        if holder.as_deref() == Some(id.as_str()) {
            *holder = None;
        }
    }

    fn holder(&self) -> Option<String> {
        self.holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// 탭 간 중계 프레임.
#[derive(Debug, Clone)]
pub enum RelayFrame {
    /// 마스터가 수신한 메시지의 중계
    Message {
        /// 송신 탭의 ID
        origin: String,
        /// 중계되는 메시지
        envelope: Envelope,
    },
    /// 마스터 탭 종료 알림
    MasterClosing {
        /// 종료하는 마스터의 ID
        origin: String,
    },
}

/// 탭 간 브로드캐스트 채널.
#[derive(Clone)]
pub struct RelayBus {
    tx: broadcast::Sender<RelayFrame>,
}

impl RelayBus {
    /// 새 브로드캐스트 채널 생성.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// 프레임을 모든 탭에 게시합니다. 수신자 수를 반환합니다.
    ///
    /// 수신자가 없어도 에러가 아닙니다.
    pub fn publish(&self, frame: RelayFrame) -> usize {
        self.tx.send(frame).unwrap_or(0)
    }

    /// 수신기를 생성합니다.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayFrame> {
        self.tx.subscribe()
    }
}

impl Default for RelayBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// 탭 조정자.
///
/// 시작 시 공유 슬롯으로 마스터를 결정하고, 마스터만 연결 관리자를
/// 보유합니다. 모든 탭은 중계 수신 태스크를 실행해 다른 탭이 보낸
/// 메시지를 로컬 레지스트리에 전달합니다.
pub struct TabCoordinator {
    id: TabId,
    is_master: bool,
    registry: TopicRegistry,
    manager: Option<ConnectionManager>,
    slot: Arc<dyn MasterSlot>,
    bus: Option<RelayBus>,
    relay_task: Option<JoinHandle<()>>,
}

impl TabCoordinator {
    /// 탭 조정자를 시작합니다.
    ///
    /// `bus`가 None이면 탭 조정이 불가능하므로 모든 탭이 독립 마스터로
    /// 동작합니다 — 중복 연결이 생기지만 명시적인 fallback 정책입니다.
    pub async fn start(
        config: RealtimeConfig,
        slot: Arc<dyn MasterSlot>,
        bus: Option<RelayBus>,
    ) -> Self {
        let id = TabId::generate();
        let registry = TopicRegistry::new();

        let is_master = match &bus {
            Some(_) => slot.try_claim(&id),
            None => {
                warn!(
                    tab = %id,
                    "브로드캐스트 채널 없음: 탭이 독립 마스터로 동작 (fallback)"
                );
                true
            }
        };

        let auto_connect = config.auto_connect;
        let manager = if is_master {
            let relay = bus.as_ref().map(|b| RelayContext {
                bus: b.clone(),
                origin: id.as_str().to_string(),
            });
            Some(ConnectionManager::with_relay(config, registry.clone(), relay))
        } else {
            None
        };

        if let Some(manager) = &manager {
            if auto_connect {
                manager.connect().await;
            }
        }

        let relay_task = bus.as_ref().map(|b| {
            let rx = b.subscribe();
            tokio::spawn(relay_loop(rx, id.clone(), registry.clone()))
        });

        info!(tab = %id, master = is_master, "tab coordinator 시작");

        Self {
            id,
            is_master,
            registry,
            manager,
            slot,
            bus,
            relay_task,
        }
    }

    /// 이 탭의 ID.
    pub fn id(&self) -> &TabId {
        &self.id
    }

    /// 마스터 탭 여부.
    pub fn is_master(&self) -> bool {
        self.is_master
    }

    /// 이 탭의 로컬 토픽 레지스트리.
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// 연결 관리자 (마스터 탭에만 존재).
    pub fn manager(&self) -> Option<&ConnectionManager> {
        self.manager.as_ref()
    }

    /// 메시지를 전송합니다.
    ///
    /// follower 탭의 전송은 로컬에서 거부됩니다 — 두 탭이 독립 연결로
    /// 동시에 송신하는 일은 없어야 합니다.
    pub async fn send(&self, envelope: Envelope) -> SyncResult<()> {
        let Some(manager) = &self.manager else {
            warn!(tab = %self.id, topic = %envelope.topic, "follower 탭의 send 거부");
            return Err(SyncError::NotMaster);
        };
        manager.send(envelope).await
    }

    /// 연결을 시작합니다 (마스터 탭 전용).
    pub async fn connect(&self) -> SyncResult<()> {
        let Some(manager) = &self.manager else {
            return Err(SyncError::NotMaster);
        };
        manager.connect().await;
        Ok(())
    }

    /// 탭을 종료합니다.
    ///
    /// 마스터였다면 슬롯을 해제하고 종료 알림을 게시합니다. 생존한 탭이
    /// 자동으로 승격되지는 않습니다 — 자신의 시작 시점 점검으로만
    /// 마스터가 될 수 있습니다.
    pub async fn shutdown(&mut self) {
        if let Some(manager) = &self.manager {
            manager.disconnect().await;
        }

        if self.is_master {
            self.slot.release(&self.id);
            if let Some(bus) = &self.bus {
                bus.publish(RelayFrame::MasterClosing {
                    origin: self.id.as_str().to_string(),
                });
            }
        }

        if let Some(task) = self.relay_task.take() {
            task.abort();
        }

        info!(tab = %self.id, master = self.is_master, "tab coordinator 종료");
    }
}

/// 중계 수신 루프.
///
/// 다른 탭이 게시한 메시지를 로컬 레지스트리에 전달합니다. 자신이 게시한
/// 프레임은 건너뜁니다 — 마스터는 이미 로컬 dispatch를 마쳤습니다.
async fn relay_loop(
    mut rx: broadcast::Receiver<RelayFrame>,
    id: TabId,
    registry: TopicRegistry,
) {
    loop {
        match rx.recv().await {
            Ok(RelayFrame::Message { origin, envelope }) => {
                if origin != id.as_str() {
                    registry.dispatch(&envelope);
                }
            }
            Ok(RelayFrame::MasterClosing { origin }) => {
                if origin != id.as_str() {
                    info!(master = %origin, "마스터 탭 종료 알림 수신");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "relay 채널 지연");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("relay 채널 닫힘");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use stockdash_core::message::Topic;

    fn offline_config() -> RealtimeConfig {
        RealtimeConfig {
            auto_connect: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_memory_slot_claim_semantics() {
        let slot = MemorySlot::new();
        let first = TabId::generate();
        let second = TabId::generate();

        assert!(slot.try_claim(&first));
        // 같은 탭의 재점유는 성공
        assert!(slot.try_claim(&first));
        // 다른 탭은 실패
        assert!(!slot.try_claim(&second));
        assert_eq!(slot.holder(), Some(first.as_str().to_string()));

        // 보유자가 아닌 탭의 release는 무시됨
        slot.release(&second);
        assert!(slot.holder().is_some());

        slot.release(&first);
        assert!(slot.holder().is_none());
        assert!(slot.try_claim(&second));
    }

    #[test]
    fn test_relay_bus_publish_without_receivers() {
        let bus = RelayBus::new(16);
        let delivered = bus.publish(RelayFrame::MasterClosing {
            origin: "tab-1".to_string(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_first_tab_becomes_master() {
        let slot = MemorySlot::new();
        let bus = RelayBus::new(16);

        let master =
            TabCoordinator::start(offline_config(), slot.clone(), Some(bus.clone())).await;
        let follower = TabCoordinator::start(offline_config(), slot, Some(bus)).await;

        assert!(master.is_master());
        assert!(master.manager().is_some());
        assert!(!follower.is_master());
        assert!(follower.manager().is_none());
    }

    #[tokio::test]
    async fn test_follower_send_rejected() {
        let slot = MemorySlot::new();
        let bus = RelayBus::new(16);

        let _master =
            TabCoordinator::start(offline_config(), slot.clone(), Some(bus.clone())).await;
        let follower = TabCoordinator::start(offline_config(), slot, Some(bus)).await;

        let result = follower.send(Envelope::ping()).await;
        assert!(matches!(result, Err(SyncError::NotMaster)));
    }

    #[tokio::test]
    async fn test_no_bus_fallback_every_tab_is_master() {
        let slot = MemorySlot::new();

        let first = TabCoordinator::start(offline_config(), slot.clone(), None).await;
        let second = TabCoordinator::start(offline_config(), slot, None).await;

        assert!(first.is_master());
        assert!(second.is_master());
    }

    #[tokio::test]
    async fn test_relayed_message_reaches_follower_registry() {
        let slot = MemorySlot::new();
        let bus = RelayBus::new(16);

        let master =
            TabCoordinator::start(offline_config(), slot.clone(), Some(bus.clone())).await;
        let follower = TabCoordinator::start(offline_config(), slot, Some(bus.clone())).await;

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);
        let _sub = follower
            .registry()
            .subscribe(Topic::PriceUpdate, move |_| {
                received_clone.fetch_add(1, Ordering::SeqCst);
            });

        // 마스터가 수신한 메시지를 중계한 것처럼 게시
        bus.publish(RelayFrame::Message {
            origin: master.id().as_str().to_string(),
            envelope: Envelope::new(Topic::PriceUpdate, json!({"symbol": "7203", "price": 3100})),
        });

        // 중계 태스크가 처리할 시간
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_slot() {
        let slot = MemorySlot::new();
        let bus = RelayBus::new(16);

        let mut master =
            TabCoordinator::start(offline_config(), slot.clone(), Some(bus.clone())).await;
        assert!(slot.holder().is_some());

        master.shutdown().await;
        assert!(slot.holder().is_none());

        // 다음 탭은 시작 시점 점검으로 마스터가 될 수 있음
        let next = TabCoordinator::start(offline_config(), slot, Some(bus)).await;
        assert!(next.is_master());
    }
}
