//! Event System - 이벤트 발행/구독 시스템
//!
//! 플러그인 런타임의 상태 변화를 구독자에게 알립니다.
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        EventBus                              │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │  publish(event)  (동기, 호출 스택 위에서 전달)       │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │         │                                                   │
//! │         ▼                                                   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │  Listener 1  │  │  Listener 2  │  │  Listener N  │      │
//! │  │ (Activation) │  │  (Resolver)  │  │    (Host)    │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 사용법
//!
//! ```ignore
//! use dynplug_foundation::event::{EventBus, EventType, RuntimeEvent};
//!
//! let bus = EventBus::new();
//! let sub = bus.subscribe(&[EventType::PluginInfoChanged], |event| {
//!     println!("changed: {:?}", event.plugin_name);
//! });
//!
//! bus.publish(RuntimeEvent::new(EventType::PluginInfoChanged).with_plugin("foo"));
//! sub.unsubscribe();
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusConfig, EventListener, ListenerId, Subscription};
pub use types::{events, EventId, EventType, RuntimeEvent};
