//! # dynplug-foundation
//!
//! Foundation layer for dynplug:
//! - Error: 레이어 공통 에러 타입
//! - Event: 동기 이벤트 버스 (PluginInfoChanged, ExtensionsChanged, FeatureFlagsChanged)
//! - Config: 런타임 설정 (RuntimeConfig)
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  dynplug-core (Layer2)                                  │
//! │  Registry ─ Resolver ─ CodeRef ─ Activation ─ Store     │
//! │                     │                                   │
//! │                     ▼                                   │
//! │  dynplug-foundation (Layer1)                            │
//! │  EventBus     RuntimeConfig     Error                   │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Event (이벤트 시스템)
// ============================================================================
pub use event::{
    events, EventBus, EventBusConfig, EventId, EventListener, EventType, ListenerId,
    RuntimeEvent, Subscription,
};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{RuntimeConfig, RUNTIME_CONFIG_FILE};
