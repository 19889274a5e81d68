//! Event Bus - 동기 이벤트 발행/구독 시스템
//!
//! 이벤트는 발행한 호출 스택 위에서, 등록 순서대로 리스너에게 전달됩니다.

use super::types::{EventType, RuntimeEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

// ============================================================================
// Listener
// ============================================================================

/// 이벤트 리스너 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// 이벤트 리스너 콜백
pub type EventListener = Arc<dyn Fn(&RuntimeEvent) + Send + Sync>;

/// 등록된 리스너 정보
struct RegisteredListener {
    id: ListenerId,
    event_types: Vec<EventType>,
    listener: EventListener,
}

// ============================================================================
// EventBus
// ============================================================================

/// 이벤트 버스 설정
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// 이벤트 히스토리 보관 개수
    pub history_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { history_size: 100 }
    }
}

struct BusInner {
    config: EventBusConfig,
    listeners: RwLock<Vec<RegisteredListener>>,
    listener_counter: AtomicU64,
    history: Mutex<VecDeque<RuntimeEvent>>,
    event_count: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|registered| registered.id != id);
        let removed = listeners.len() != before;

        if removed {
            debug!(listener_id = %id, "Unregistered event listener");
        }
        removed
    }
}

/// 이벤트 버스
///
/// 복제본은 같은 리스너 집합을 공유합니다.
///
/// ```ignore
/// let bus = EventBus::new();
/// let sub = bus.subscribe(&[EventType::ExtensionsChanged], |event| {
///     println!("{}", event.event_type);
/// });
/// bus.publish(RuntimeEvent::new(EventType::ExtensionsChanged));
/// sub.unsubscribe();
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// 기본 설정으로 이벤트 버스 생성
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// 커스텀 설정으로 이벤트 버스 생성
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                history: Mutex::new(VecDeque::with_capacity(config.history_size)),
                config,
                listeners: RwLock::new(Vec::new()),
                listener_counter: AtomicU64::new(0),
                event_count: AtomicU64::new(0),
            }),
        }
    }

    /// 리스너 등록
    ///
    /// 반환된 [`Subscription`]을 버려도 구독은 유지됩니다.
    pub fn subscribe<F>(&self, event_types: &[EventType], listener: F) -> Subscription
    where
        F: Fn(&RuntimeEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.listener_counter.fetch_add(1, Ordering::SeqCst));

        debug!(listener_id = %id, event_types = ?event_types, "Registering event listener");

        self.inner.listeners.write().push(RegisteredListener {
            id,
            event_types: event_types.to_vec(),
            listener: Arc::new(listener),
        });

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// 리스너 해제
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.remove(id)
    }

    /// 이벤트 발행
    ///
    /// 리스너 목록의 스냅샷을 순회하므로, 전달 도중 추가/제거된 리스너가
    /// 현재 전달을 깨뜨리지 않습니다. 리스너 안에서 다시 발행해도 됩니다.
    pub fn publish(&self, event: RuntimeEvent) {
        let event_count = self.inner.event_count.fetch_add(1, Ordering::SeqCst);

        trace!(
            event_id = %event.id,
            event_type = %event.event_type,
            plugin = ?event.plugin_name,
            "Publishing event #{}", event_count + 1
        );

        {
            let mut history = self.inner.history.lock();
            history.push_back(event.clone());
            while history.len() > self.inner.config.history_size {
                history.pop_front();
            }
        }

        let targets: Vec<(ListenerId, EventListener)> = self
            .inner
            .listeners
            .read()
            .iter()
            .filter(|registered| registered.event_types.contains(&event.event_type))
            .map(|registered| (registered.id, Arc::clone(&registered.listener)))
            .collect();

        for (id, listener) in targets {
            trace!(listener_id = %id, event_type = %event.event_type, "Delivering event to listener");
            listener(&event);
        }
    }

    /// 최근 이벤트 히스토리 조회 (최신순)
    pub fn history(&self, limit: Option<usize>) -> Vec<RuntimeEvent> {
        let history = self.inner.history.lock();
        let limit = limit.unwrap_or(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }

    /// 특정 타입의 이벤트 히스토리 조회
    pub fn history_by_type(&self, event_type: EventType) -> Vec<RuntimeEvent> {
        let history = self.inner.history.lock();
        history
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// 등록된 리스너 수
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// 총 발행된 이벤트 수
    pub fn event_count(&self) -> u64 {
        self.inner.event_count.load(Ordering::SeqCst)
    }

    /// 히스토리 클리어
    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listener_count", &self.listener_count())
            .field("event_count", &self.event_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// 구독 핸들
///
/// `unsubscribe`는 몇 번을 호출해도 안전합니다.
pub struct Subscription {
    id: ListenerId,
    bus: Weak<BusInner>,
    active: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// 구독 해제. 실제로 해제했으면 `true`
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        match self.bus.upgrade() {
            Some(bus) => bus.remove(self.id),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// 테스트
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::types::events;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_event_bus_basic() {
        let bus = EventBus::new();
        let count = counter();

        let c = Arc::clone(&count);
        let sub = bus.subscribe(&[EventType::ExtensionsChanged], move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.listener_count(), 1);

        bus.publish(events::extensions_changed());
        bus.publish(events::feature_flags_changed());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(sub.unsubscribe());
        assert_eq!(bus.listener_count(), 0);

        bus.publish(events::extensions_changed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let sub = bus.subscribe(&EventType::ALL, |_| {});

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!bus.unsubscribe(sub.id()));
        assert!(!sub.is_active());
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe(&[EventType::PluginInfoChanged], move |_| order.lock().push(i));
        }

        bus.publish(events::plugin_info_changed("foo"));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_listener_removed_during_dispatch_still_receives_current_event() {
        let bus = EventBus::new();
        let count = counter();
        let second: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&second);
        bus.subscribe(&[EventType::ExtensionsChanged], move |_| {
            if let Some(sub) = slot.lock().as_ref() {
                sub.unsubscribe();
            }
        });

        let c = Arc::clone(&count);
        let sub = bus.subscribe(&[EventType::ExtensionsChanged], move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        *second.lock() = Some(sub);

        bus.publish(events::extensions_changed());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        bus.publish(events::extensions_changed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_added_during_dispatch_waits_for_next_event() {
        let bus = EventBus::new();
        let count = counter();

        let inner_bus = bus.clone();
        let c = Arc::clone(&count);
        bus.subscribe(&[EventType::FeatureFlagsChanged], move |_| {
            let c = Arc::clone(&c);
            inner_bus.subscribe(&[EventType::FeatureFlagsChanged], move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });

        bus.publish(events::feature_flags_changed());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        bus.publish(events::feature_flags_changed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_publish() {
        let bus = EventBus::new();
        let count = counter();

        let inner_bus = bus.clone();
        bus.subscribe(&[EventType::PluginInfoChanged], move |_| {
            inner_bus.publish(events::extensions_changed());
        });
        let c = Arc::clone(&count);
        bus.subscribe(&[EventType::ExtensionsChanged], move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(events::plugin_info_changed("foo"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.event_count(), 2);
    }

    #[test]
    fn test_event_history() {
        let bus = EventBus::with_config(EventBusConfig { history_size: 5 });

        for _ in 0..10 {
            bus.publish(events::extensions_changed());
        }
        bus.publish(events::plugin_info_changed("foo"));

        assert_eq!(bus.history(None).len(), 5);
        assert_eq!(
            bus.history(Some(1))[0].plugin_name.as_deref(),
            Some("foo")
        );
        assert_eq!(bus.history_by_type(EventType::PluginInfoChanged).len(), 1);

        bus.clear_history();
        assert!(bus.history(None).is_empty());
    }

    #[test]
    fn test_subscription_outlives_bus() {
        let sub = {
            let bus = EventBus::new();
            bus.subscribe(&EventType::ALL, |_| {})
        };
        assert!(!sub.unsubscribe());
    }
}
