//! Event Types - 런타임 이벤트 타입 정의
//!
//! 플러그인 레지스트리와 활성화 엔진이 발행하는 이벤트를 정의합니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Event ID
// ============================================================================

/// 이벤트 고유 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    /// 새 이벤트 ID 생성
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Event Type
// ============================================================================

/// 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// 플러그인 레지스트리 항목이 추가/변경됨
    PluginInfoChanged,
    /// 활성 Extension 목록이 실제로 바뀜
    ExtensionsChanged,
    /// 기능 플래그가 바뀜
    FeatureFlagsChanged,
}

impl EventType {
    /// 모든 이벤트 타입
    pub const ALL: [EventType; 3] = [
        EventType::PluginInfoChanged,
        EventType::ExtensionsChanged,
        EventType::FeatureFlagsChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PluginInfoChanged => "plugin_info_changed",
            Self::ExtensionsChanged => "extensions_changed",
            Self::FeatureFlagsChanged => "feature_flags_changed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RuntimeEvent - 핵심 이벤트 타입
// ============================================================================

/// 런타임 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEvent {
    /// 이벤트 ID
    pub id: EventId,

    /// 이벤트 타입
    pub event_type: EventType,

    /// 이벤트를 일으킨 플러그인 (있는 경우)
    pub plugin_name: Option<String>,

    /// 이벤트 발생 시간
    pub timestamp: DateTime<Utc>,
}

impl RuntimeEvent {
    /// 새 이벤트 생성
    pub fn new(event_type: EventType) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            plugin_name: None,
            timestamp: Utc::now(),
        }
    }

    /// 플러그인 이름 설정
    pub fn with_plugin(mut self, plugin_name: impl Into<String>) -> Self {
        self.plugin_name = Some(plugin_name.into());
        self
    }
}

/// 자주 쓰는 이벤트 생성자
pub mod events {
    use super::{EventType, RuntimeEvent};

    pub fn plugin_info_changed(plugin_name: &str) -> RuntimeEvent {
        RuntimeEvent::new(EventType::PluginInfoChanged).with_plugin(plugin_name)
    }

    pub fn extensions_changed() -> RuntimeEvent {
        RuntimeEvent::new(EventType::ExtensionsChanged)
    }

    pub fn feature_flags_changed() -> RuntimeEvent {
        RuntimeEvent::new(EventType::FeatureFlagsChanged)
    }
}
