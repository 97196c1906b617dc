//! 소비자 훅.
//!
//! 토픽 하나를 구독해서 최신 payload를 보관하는 얇은 어댑터입니다. UI
//! 구성 요소는 레지스트리에 직접 콜백을 등록하는 대신 훅을 들고 최신
//! 값을 읽거나 변경을 await합니다. 훅을 drop하면 구독도 함께 해제됩니다.
//!
//! payload 역직렬화 실패는 로그만 남기고 값을 갱신하지 않습니다 —
//! 잘못된 메시지 하나가 훅을 죽이지 않습니다.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::warn;

use stockdash_core::message::{Envelope, NotificationData, PriceUpdateData, Topic};

use crate::registry::{SubscriptionHandle, TopicRegistry};

/// 토픽 하나의 최신 payload를 보관하는 훅.
///
/// dispatch 스레드에서 payload를 역직렬화해 watch 채널로 게시합니다.
pub struct TopicWatcher<T> {
    rx: watch::Receiver<Option<T>>,
    _subscription: SubscriptionHandle,
}

impl<T> TopicWatcher<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// 토픽을 구독하는 훅을 생성합니다.
    pub fn attach(registry: &TopicRegistry, topic: Topic) -> Self {
        Self::attach_filtered(registry, topic, |_| true)
    }

    /// 필터를 통과한 payload만 보관하는 훅을 생성합니다.
    pub fn attach_filtered(
        registry: &TopicRegistry,
        topic: Topic,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        let (tx, rx) = watch::channel(None);

        let subscription = registry.subscribe(topic, move |envelope: &Envelope| {
            match envelope.decode::<T>() {
                Ok(data) => {
                    if filter(&data) {
                        let _ = tx.send(Some(data));
                    }
                }
                Err(e) => {
                    warn!(topic = %envelope.topic, error = %e, "payload 역직렬화 실패");
                }
            }
        });

        Self {
            rx,
            _subscription: subscription,
        }
    }

    /// 가장 최근 payload. 아직 수신한 메시지가 없으면 None.
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// watch 수신기. select!에 조합할 때 사용합니다.
    pub fn receiver(&self) -> watch::Receiver<Option<T>> {
        self.rx.clone()
    }

    /// 다음 갱신을 기다립니다.
    pub async fn changed(&mut self) -> Option<T> {
        if self.rx.changed().await.is_err() {
            return None;
        }
        self.rx.borrow().clone()
    }
}

/// 특정 종목의 최신 시세를 보관하는 훅.
pub struct PriceWatcher {
    inner: TopicWatcher<PriceUpdateData>,
    symbol: String,
}

impl PriceWatcher {
    /// 종목 하나의 시세를 구독합니다.
    pub fn attach(registry: &TopicRegistry, symbol: impl Into<String>) -> Self {
        let symbol = symbol.into();
        let wanted = symbol.clone();
        let inner = TopicWatcher::attach_filtered(
            registry,
            Topic::PriceUpdate,
            move |data: &PriceUpdateData| data.symbol == wanted,
        );
        Self { inner, symbol }
    }

    /// 감시 중인 종목 코드.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// 가장 최근 시세.
    pub fn latest(&self) -> Option<PriceUpdateData> {
        self.inner.latest()
    }

    /// 다음 시세 갱신을 기다립니다.
    pub async fn changed(&mut self) -> Option<PriceUpdateData> {
        self.inner.changed().await
    }
}

/// 최근 알림을 보관하는 훅.
///
/// 고정 용량의 ring buffer로, 가득 차면 가장 오래된 알림부터 버립니다.
pub struct NotificationFeed {
    entries: Arc<Mutex<VecDeque<NotificationData>>>,
    capacity: usize,
    _subscription: SubscriptionHandle,
}

impl NotificationFeed {
    /// 알림 토픽을 구독하는 피드를 생성합니다.
    pub fn attach(registry: &TopicRegistry, capacity: usize) -> Self {
        let entries: Arc<Mutex<VecDeque<NotificationData>>> =
            Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));

        let entries_clone = Arc::clone(&entries);
        let subscription = registry.subscribe(Topic::Notification, move |envelope: &Envelope| {
            let data = match envelope.decode::<NotificationData>() {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "알림 payload 역직렬화 실패");
                    return;
                }
            };

            let mut entries = entries_clone
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if entries.len() == capacity {
                entries.pop_front();
            }
            entries.push_back(data);
        });

        Self {
            entries,
            capacity,
            _subscription: subscription,
        }
    }

    /// 최근 알림 목록 (최신순).
    pub fn recent(&self) -> Vec<NotificationData> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    /// 보관 중인 알림 수.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 피드 용량.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
