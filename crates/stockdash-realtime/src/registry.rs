//! 토픽 기반 메시지 dispatch.
//!
//! 토픽별 구독 콜백을 관리하고 수신 메시지를 fan-out합니다. 레지스트리는
//! 탭마다 하나씩 존재합니다 — follower 탭도 중계된 메시지를 로컬 구독자에게
//! 전달해야 하기 때문입니다.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use stockdash_core::message::{Envelope, Topic};
use tracing::{debug, warn};

/// 구독 콜백.
pub type TopicCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    topics: RwLock<HashMap<Topic, HashMap<u64, TopicCallback>>>,
    next_id: AtomicU64,
}

/// 토픽 구독 레지스트리.
///
/// clone해도 같은 레지스트리를 공유합니다.
#[derive(Clone, Default)]
pub struct TopicRegistry {
    inner: Arc<RegistryInner>,
}

impl TopicRegistry {
    /// 새 레지스트리 생성.
    pub fn new() -> Self {
        Self::default()
    }

    /// 토픽에 콜백을 등록합니다.
    ///
    /// 반환된 핸들을 drop하거나 [`SubscriptionHandle::unsubscribe`]를
    /// 호출하면 정확히 이 콜백만 제거됩니다. 같은 콜백을 여러 토픽에
    /// 독립적으로 등록할 수 있습니다.
    pub fn subscribe(
        &self,
        topic: Topic,
        callback: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = self
            .inner
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.clone())
            .or_default()
            .insert(id, Arc::new(callback));

        debug!(topic = %topic, subscription_id = id, "subscribed");

        SubscriptionHandle {
            inner: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// 메시지를 해당 토픽의 모든 구독자에게 전달합니다.
    ///
    /// 구독자가 없는 토픽은 no-op입니다 (정상 동작 — 해당 토픽을 표시하는
    /// UI가 없을 수 있습니다). 콜백에서 panic이 발생해도 같은 dispatch의
    /// 나머지 콜백은 계속 호출됩니다.
    pub fn dispatch(&self, envelope: &Envelope) {
        let callbacks: Vec<TopicCallback> = {
            let topics = self
                .inner
                .topics
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match topics.get(&envelope.topic) {
                Some(set) => set.values().cloned().collect(),
                None => return,
            }
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(envelope))).is_err() {
                warn!(topic = %envelope.topic, "subscriber callback panicked");
            }
        }
    }

    /// 모든 구독을 제거합니다 (teardown용).
    pub fn clear(&self) {
        self.inner
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// 등록된 토픽 수.
    pub fn topic_count(&self) -> usize {
        self.inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 특정 토픽의 구독자 수.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

/// 구독 핸들.
///
/// drop 시 구독이 해제됩니다. 토픽의 마지막 구독이 해제되면 토픽 엔트리
/// 자체가 제거됩니다.
pub struct SubscriptionHandle {
    inner: Weak<RegistryInner>,
    topic: Topic,
    id: u64,
}

impl SubscriptionHandle {
    /// 구독을 명시적으로 해제합니다.
    pub fn unsubscribe(self) {
        // Drop이 실제 해제를 수행
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut topics = inner.topics.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(set) = topics.get_mut(&self.topic) {
                set.remove(&self.id);
                if set.is_empty() {
                    topics.remove(&self.topic);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn price_envelope() -> Envelope {
        Envelope::new(
            Topic::PriceUpdate,
            json!({"symbol": "7203", "price": 3100}),
        )
    }

    #[test]
    fn test_subscribe_and_dispatch() {
        let registry = TopicRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        let _sub = registry.subscribe(Topic::PriceUpdate, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.dispatch(&price_envelope());
        registry.dispatch(&price_envelope());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispatch_without_subscribers_is_noop() {
        let registry = TopicRegistry::new();
        // panic 없이 그냥 지나가야 함
        registry.dispatch(&price_envelope());
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_unsubscribe_removes_callback_and_topic_entry() {
        let registry = TopicRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        let sub = registry.subscribe(Topic::PriceUpdate, move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(registry.subscriber_count(&Topic::PriceUpdate), 1);

        sub.unsubscribe();

        // 마지막 구독 해제 시 토픽 엔트리도 제거됨
        assert_eq!(registry.subscriber_count(&Topic::PriceUpdate), 0);
        assert_eq!(registry.topic_count(), 0);

        registry.dispatch(&price_envelope());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_only_removes_own_callback() {
        let registry = TopicRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let first_clone = Arc::clone(&first);
        let sub1 = registry.subscribe(Topic::PriceUpdate, move |_| {
            first_clone.fetch_add(1, Ordering::SeqCst);
        });
        let second_clone = Arc::clone(&second);
        let _sub2 = registry.subscribe(Topic::PriceUpdate, move |_| {
            second_clone.fetch_add(1, Ordering::SeqCst);
        });

        drop(sub1);
        registry.dispatch(&price_envelope());

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.subscriber_count(&Topic::PriceUpdate), 1);
    }

    #[test]
    fn test_panicking_callback_does_not_block_siblings() {
        let registry = TopicRegistry::new();
        let reached = Arc::new(AtomicUsize::new(0));

        let _sub1 = registry.subscribe(Topic::PriceUpdate, |_| {
            panic!("subscriber bug");
        });
        let reached_clone = Arc::clone(&reached);
        let _sub2 = registry.subscribe(Topic::PriceUpdate, move |_| {
            reached_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.dispatch(&price_envelope());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_callback_on_multiple_topics() {
        let registry = TopicRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let make = |count: &Arc<AtomicUsize>| {
            let count = Arc::clone(count);
            move |_: &Envelope| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        let sub_price = registry.subscribe(Topic::PriceUpdate, make(&count));
        let _sub_notify = registry.subscribe(Topic::Notification, make(&count));

        registry.dispatch(&price_envelope());
        registry.dispatch(&Envelope::new(Topic::Notification, json!({"title": "t"})));
        assert_eq!(count.load(Ordering::SeqCst), 2);

        drop(sub_price);
        registry.dispatch(&price_envelope());
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(registry.subscriber_count(&Topic::Notification), 1);
    }

    #[test]
    fn test_unknown_topic_still_dispatched() {
        let registry = TopicRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        let _sub = registry.subscribe(Topic::Other("fx_rate".to_string()), move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let env = Envelope::from_json(r#"{"type": "fx_rate", "payload": {}}"#).unwrap();
        registry.dispatch(&env);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear() {
        let registry = TopicRegistry::new();
        let _sub1 = registry.subscribe(Topic::PriceUpdate, |_| {});
        let _sub2 = registry.subscribe(Topic::Notification, |_| {});
        assert_eq!(registry.topic_count(), 2);

        registry.clear();
        assert_eq!(registry.topic_count(), 0);
    }
}
