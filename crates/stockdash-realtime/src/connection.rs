//! WebSocket 연결 관리자.
//!
//! 브라우저 세션당 최대 하나의 전송 연결을 유지하고, 하트비트와 지수
//! 백오프 재연결로 장애에서 복구합니다. 전송 실패는 내부에서 흡수되어
//! [`ConnectionState`]로만 관찰됩니다 — 구독자에게 예외가 전파되지
//! 않습니다.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stockdash_core::config::RealtimeConfig;
use stockdash_core::error::{SyncError, SyncResult};
use stockdash_core::message::{Envelope, Topic};

use crate::registry::TopicRegistry;
use crate::state::{ConnectionState, InternalState};
use crate::tabs::{RelayBus, RelayFrame};

/// 마스터 탭이 수신 메시지를 형제 탭으로 중계할 때 사용하는 컨텍스트.
#[derive(Clone)]
pub(crate) struct RelayContext {
    /// 탭 간 브로드캐스트 채널
    pub bus: RelayBus,
    /// 이 탭의 식별자 (수신 측에서 자기 프레임을 거르는 데 사용)
    pub origin: String,
}

/// 활성 세션의 통신 채널.
///
/// 세션이 없으면 두 필드 모두 None입니다. send는 이 채널의 존재 여부로
/// 연결 유무를 판단합니다.
#[derive(Default)]
struct SessionHandles {
    send_tx: Option<mpsc::Sender<Envelope>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

struct Shared {
    config: RealtimeConfig,
    state: RwLock<InternalState>,
    registry: TopicRegistry,
    relay: Option<RelayContext>,
    session: Mutex<SessionHandles>,
    /// 대기 중인 재연결 타이머의 취소 토큰. disconnect가 교체합니다.
    reconnect_cancel: Mutex<CancellationToken>,
}

/// WebSocket 연결 관리자.
///
/// clone해도 같은 연결을 공유합니다. 필요한 구성 요소에 주입해서
/// 사용합니다 — 전역 접근이 아니라 명시적 소유입니다.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// 새 연결 관리자 생성.
    pub fn new(config: RealtimeConfig, registry: TopicRegistry) -> Self {
        Self::with_relay(config, registry, None)
    }

    /// 탭 간 중계 컨텍스트를 포함한 연결 관리자 생성 (마스터 탭용).
    pub(crate) fn with_relay(
        config: RealtimeConfig,
        registry: TopicRegistry,
        relay: Option<RelayContext>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(InternalState::new()),
                registry,
                relay,
                session: Mutex::new(SessionHandles::default()),
                reconnect_cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// 현재 연결 상태.
    pub async fn status(&self) -> ConnectionState {
        self.shared.state.read().await.state
    }

    /// 연결 여부.
    pub async fn is_connected(&self) -> bool {
        self.shared.state.read().await.state.is_connected()
    }

    /// 재연결 시도 횟수.
    pub async fn reconnect_attempts(&self) -> u32 {
        self.shared.state.read().await.reconnect_attempts
    }

    /// 가장 최근에 수신한 메시지.
    pub async fn last_message(&self) -> Option<Envelope> {
        self.shared.state.read().await.last_message.clone()
    }

    /// 연결을 시작합니다.
    ///
    /// 이미 연결 중이거나 연결되어 있으면 no-op입니다. 연결은 비동기로
    /// 진행되며 호출자는 [`status`](Self::status)를 폴링해 완료를
    /// 확인합니다. 연결 실패는 내부에서 흡수되어 재연결 정책으로
    /// 이어집니다.
    pub async fn connect(&self) {
        // 검사와 전이를 같은 write lock 아래에서 수행한다 — 동시 connect가
        // 둘 다 guard를 통과해 세션을 두 개 띄우는 일이 없어야 한다
        {
            let mut state = self.shared.state.write().await;
            if state.state.is_active() {
                debug!(state = %state.state, "connect 무시: 연결이 이미 활성 상태");
                return;
            }
            state.state = ConnectionState::Connecting;
        }

        // 수동 connect는 대기 중인 재연결 타이머를 대체한다
        self.cancel_pending_reconnect().await;

        tokio::spawn(run_session(Arc::clone(&self.shared)));
    }

    /// 연결을 종료합니다.
    ///
    /// 대기 중인 재연결 타이머를 취소하고 전송을 닫습니다. 이 경로는
    /// 재연결 정책을 발동시키지 않습니다.
    pub async fn disconnect(&self) {
        self.cancel_pending_reconnect().await;

        let shutdown = self.shared.session.lock().await.shutdown_tx.take();
        match shutdown {
            Some(tx) => {
                let _ = tx.send(()).await;
            }
            None => {
                self.shared.state.write().await.mark_disconnected();
            }
        }

        info!("realtime 연결 종료 (manual disconnect)");
    }

    /// 메시지를 전송합니다.
    ///
    /// 연결이 없으면 [`SyncError::NotConnected`]를 반환합니다 — panic하지
    /// 않습니다. 표시 여부는 호출자가 결정합니다.
    pub async fn send(&self, envelope: Envelope) -> SyncResult<()> {
        let tx = self.shared.session.lock().await.send_tx.clone();
        let Some(tx) = tx else {
            warn!(topic = %envelope.topic, "send 실패: 연결 없음");
            return Err(SyncError::NotConnected);
        };

        tx.send(envelope).await.map_err(|_| SyncError::NotConnected)
    }

    /// 대기 중인 재연결 타이머를 취소하고 가드를 초기화합니다.
    async fn cancel_pending_reconnect(&self) {
        {
            let mut guard = self.shared.reconnect_cancel.lock().await;
            guard.cancel();
            *guard = CancellationToken::new();
        }
        self.shared.state.write().await.is_reconnecting = false;
    }
}

/// 연결 세션 태스크.
///
/// 전송 연결을 열고 종료될 때까지 수신/송신/하트비트를 처리합니다.
/// 비정상 종료 시 재연결을 예약합니다.
///
/// `schedule_reconnect`와 상호 재귀하므로 boxed future를 반환합니다 —
/// opaque future로는 타입이 순환해서 컴파일되지 않습니다.
fn run_session(shared: Arc<Shared>) -> BoxFuture<'static, ()> {
    run_session_inner(shared).boxed()
}

async fn run_session_inner(shared: Arc<Shared>) {
    let url = shared.config.websocket_url();

    let ws = match timeout(shared.config.connect_timeout(), connect_async(&url)).await {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(e)) => {
            error!(error = %e, url = %url, "WebSocket 연결 실패");
            shared.state.write().await.mark_error();
            schedule_reconnect(shared).await;
            return;
        }
        Err(_) => {
            error!(
                url = %url,
                timeout_ms = shared.config.connect_timeout_ms,
                "WebSocket 연결 타임아웃"
            );
            shared.state.write().await.mark_error();
            schedule_reconnect(shared).await;
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Envelope>(shared.config.send_buffer);
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    {
        let mut session = shared.session.lock().await;
        session.send_tx = Some(send_tx);
        session.shutdown_tx = Some(shutdown_tx);
    }

    shared.state.write().await.mark_connected();
    info!(url = %url, "WebSocket connected");

    // 첫 ping은 연결 직후가 아니라 한 간격 뒤에 보낸다
    let heartbeat_period = shared.config.heartbeat_interval();
    let mut heartbeat = interval_at(Instant::now() + heartbeat_period, heartbeat_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut clean_close = false;

    loop {
        tokio::select! {
            // 명시적 disconnect
            _ = shutdown_rx.recv() => {
                debug!("shutdown signal 수신");
                let _ = sink.close().await;
                clean_close = true;
                break;
            }

            // 송신 메시지
            Some(envelope) = send_rx.recv() => {
                match envelope.to_json() {
                    Ok(json) => {
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            error!(error = %e, "메시지 전송 실패");
                        }
                    }
                    Err(e) => error!(error = %e, "메시지 직렬화 실패"),
                }
            }

            // 수신 프레임
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&shared, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        warn!("서버에서 연결 종료");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket 수신 에러");
                        shared.state.write().await.mark_error();
                        break;
                    }
                    None => {
                        warn!("WebSocket 스트림 종료");
                        break;
                    }
                }
            }

            // 하트비트
            _ = heartbeat.tick() => {
                match Envelope::ping().to_json() {
                    Ok(json) => {
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            error!(error = %e, "heartbeat ping 전송 실패");
                            break;
                        }
                        debug!("heartbeat ping 전송");
                    }
                    Err(e) => error!(error = %e, "heartbeat 직렬화 실패"),
                }
            }
        }
    }

    // 세션 정리
    {
        let mut session = shared.session.lock().await;
        session.send_tx = None;
        session.shutdown_tx = None;
    }
    shared.state.write().await.mark_disconnected();

    if clean_close {
        info!("WebSocket disconnected (clean)");
    } else {
        warn!("비정상 종료, 재연결 예약");
        schedule_reconnect(shared).await;
    }
}

/// 수신 텍스트 프레임 처리.
///
/// 잘못된 JSON은 로그만 남기고 버립니다 — 연결 상태나 다른 메시지에
/// 영향을 주지 않습니다. pong은 하트비트 응답이므로 구독자에게 전달하지
/// 않습니다.
async fn handle_frame(shared: &Arc<Shared>, text: &str) {
    let envelope = match Envelope::from_json(text) {
        Ok(env) => env,
        Err(e) => {
            warn!(error = %e, "잘못된 프레임 무시");
            return;
        }
    };

    if envelope.topic == Topic::Pong {
        debug!("pong 수신");
        return;
    }

    shared.state.write().await.record_message(envelope.clone());

    if let Some(relay) = &shared.relay {
        relay.bus.publish(RelayFrame::Message {
            origin: relay.origin.clone(),
            envelope: envelope.clone(),
        });
    }

    shared.registry.dispatch(&envelope);
}

/// 재연결 예약.
///
/// `min(base * 2^attempts, cap)` 지연 후 새 세션을 시작합니다. 타이머는
/// 한 번에 하나만 대기할 수 있고, 시도 횟수가 상한에 도달하면 자동
/// 재연결을 중단합니다 — 이후에는 수동 `connect()`만 가능합니다.
async fn schedule_reconnect(shared: Arc<Shared>) {
    let delay = {
        let mut state = shared.state.write().await;
        if state.is_reconnecting {
            debug!("재연결 타이머가 이미 대기 중");
            return;
        }
        if !shared.config.should_reconnect(state.reconnect_attempts) {
            warn!(
                attempts = state.reconnect_attempts,
                max = shared.config.max_reconnect_attempts,
                "최대 재연결 시도 횟수 초과, 자동 재연결 중단"
            );
            return;
        }

        let delay = shared.config.reconnect_delay(state.reconnect_attempts);
        state.reconnect_attempts += 1;
        state.is_reconnecting = true;

        info!(
            attempt = state.reconnect_attempts,
            max = shared.config.max_reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "재연결 예약"
        );
        delay
    };

    let cancel = shared.reconnect_cancel.lock().await.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("재연결 타이머 취소됨");
            }
            _ = tokio::time::sleep(delay) => {
                {
                    let mut state = shared.state.write().await;
                    state.is_reconnecting = false;
                    state.state = ConnectionState::Connecting;
                }
                run_session(shared).await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manager_initial_state() {
        let manager = ConnectionManager::new(RealtimeConfig::default(), TopicRegistry::new());

        assert_eq!(manager.status().await, ConnectionState::Disconnected);
        assert!(!manager.is_connected().await);
        assert_eq!(manager.reconnect_attempts().await, 0);
        assert!(manager.last_message().await.is_none());
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let manager = ConnectionManager::new(RealtimeConfig::default(), TopicRegistry::new());

        let result = manager.send(Envelope::ping()).await;
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let manager = ConnectionManager::new(RealtimeConfig::default(), TopicRegistry::new());

        manager.disconnect().await;
        assert_eq!(manager.status().await, ConnectionState::Disconnected);
    }
}
