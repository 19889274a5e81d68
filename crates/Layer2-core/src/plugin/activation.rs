//! Extension Activation - 활성 Extension 집합 계산
//!
//! 플러그인 상태나 기능 플래그가 바뀌면 다시 계산하고,
//! 결과가 실제로 달라졌을 때만 `ExtensionsChanged`를 발행합니다.

use super::extension::Extension;
use super::registry::{PluginInfoEntry, PluginRegistry};
use dynplug_foundation::{events, EventType, Subscription};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// 기능 플래그 맵
pub type FeatureFlags = BTreeMap<String, bool>;

/// 활성 Extension 계산
///
/// Loaded이면서 활성화된 플러그인의 Extension을 레지스트리 순서대로 펼친 뒤
/// 플래그 조건을 통과한 것만 남깁니다.
pub fn compute_active(records: &[PluginInfoEntry], flags: &FeatureFlags) -> Vec<Extension> {
    records
        .iter()
        .filter(|record| record.is_active())
        .flat_map(|record| record.extensions.iter())
        .filter(|extension| extension.is_allowed_by(flags))
        .cloned()
        .collect()
}

/// 부분 플래그 입력을 병합 (불리언이 아닌 값은 버림)
///
/// 병합 결과가 달라졌으면 `true`를 반환합니다.
pub fn merge_flags(current: &mut FeatureFlags, partial: &serde_json::Map<String, Value>) -> bool {
    let mut changed = false;
    for (name, value) in partial {
        let Some(enabled) = value.as_bool() else {
            trace!(flag = %name, "Dropping non-boolean feature flag value");
            continue;
        };
        if current.insert(name.clone(), enabled) != Some(enabled) {
            changed = true;
        }
    }
    changed
}

struct ActivationState {
    registry: Arc<PluginRegistry>,
    flags: RwLock<FeatureFlags>,
    active: Mutex<Vec<Extension>>,
}

impl ActivationState {
    fn recompute(&self) {
        let changed = {
            let mut active = self.active.lock();
            let next = compute_active(&self.registry.entries(), &self.flags.read());
            if *active == next {
                false
            } else {
                debug!(
                    before = active.len(),
                    after = next.len(),
                    "Active extensions changed"
                );
                *active = next;
                true
            }
        };

        if changed {
            self.registry.events().publish(events::extensions_changed());
        }
    }
}

/// 활성화 엔진
pub struct ActivationEngine {
    state: Arc<ActivationState>,
    subscription: Subscription,
}

impl ActivationEngine {
    pub fn new(registry: Arc<PluginRegistry>, initial_flags: FeatureFlags) -> Self {
        let active = compute_active(&registry.entries(), &initial_flags);
        let state = Arc::new(ActivationState {
            registry: Arc::clone(&registry),
            flags: RwLock::new(initial_flags),
            active: Mutex::new(active),
        });

        let weak: Weak<ActivationState> = Arc::downgrade(&state);
        let subscription = registry.events().subscribe(
            &[EventType::PluginInfoChanged, EventType::FeatureFlagsChanged],
            move |_event| {
                if let Some(state) = weak.upgrade() {
                    state.recompute();
                }
            },
        );

        Self {
            state,
            subscription,
        }
    }

    /// 현재 활성 Extension (스냅샷)
    pub fn extensions(&self) -> Vec<Extension> {
        self.state.active.lock().clone()
    }

    /// 현재 기능 플래그 (스냅샷)
    pub fn feature_flags(&self) -> FeatureFlags {
        self.state.flags.read().clone()
    }

    /// 기능 플래그 병합
    ///
    /// 객체가 아닌 입력은 무시합니다. 맵이 바뀌었을 때만 `FeatureFlagsChanged`를 발행합니다.
    pub fn set_feature_flags(&self, partial: &Value) -> bool {
        let Some(partial) = partial.as_object() else {
            warn!("Ignoring feature flags update that is not an object");
            return false;
        };

        let changed = merge_flags(&mut self.state.flags.write(), partial);
        if changed {
            debug!("Feature flags changed");
            self.state
                .registry
                .events()
                .publish(events::feature_flags_changed());
        }
        changed
    }

    /// 단일 플래그 설정
    pub fn set_feature_flag(&self, name: &str, enabled: bool) -> bool {
        let mut partial = serde_json::Map::new();
        partial.insert(name.to_string(), Value::Bool(enabled));
        self.set_feature_flags(&Value::Object(partial))
    }

    /// 강제 재계산
    pub fn refresh(&self) {
        self.state.recompute();
    }
}

impl Drop for ActivationEngine {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
