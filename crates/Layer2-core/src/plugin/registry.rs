//! Plugin Registry - 플러그인 상태 저장소
//!
//! 모든 변경은 동기적이며 락 안에서 원자적으로 수행됩니다.
//! 이벤트는 락을 해제한 뒤 발행합니다.

use super::entry::EntryModule;
use super::extension::Extension;
use super::manifest::PluginManifest;
use super::resolver::DependencyResolution;
use dynplug_foundation::{events, Error, EventBus, Result};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// PluginStatus
// ============================================================================

/// 플러그인 로드 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginStatus {
    /// 로드 중 (의존성 대기 포함)
    Pending,
    /// 로드 완료
    Loaded,
    /// 로드 실패
    Failed,
}

impl PluginStatus {
    /// 더 이상 변하지 않는 상태인지
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Loaded | Self::Failed)
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Loaded => write!(f, "loaded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// PluginInfoEntry
// ============================================================================

/// 플러그인 레코드 (스냅샷)
#[derive(Clone)]
pub struct PluginInfoEntry {
    /// 매니페스트
    pub manifest: PluginManifest,

    /// 현재 상태
    pub status: PluginStatus,

    /// 활성화 여부 (Loaded일 때만 의미 있음)
    pub enabled: bool,

    /// 비활성화 사유
    pub disable_reason: Option<String>,

    /// 디코딩된 Extension (Loaded일 때만 채워짐)
    pub extensions: Vec<Extension>,

    /// 엔트리 모듈 핸들 (Loaded일 때만 존재)
    pub entry: Option<Arc<dyn EntryModule>>,

    /// 호스트가 붙인 데이터
    pub custom_data: Option<Value>,

    /// 실패 메시지 (Failed일 때만 존재)
    pub error_message: Option<String>,

    /// 실패 원인 체인 (Failed일 때만 존재)
    pub error_cause: Option<String>,

    /// 설치 순서
    pub load_order: usize,
}

impl PluginInfoEntry {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Loaded이면서 활성화됨
    pub fn is_active(&self) -> bool {
        self.status == PluginStatus::Loaded && self.enabled
    }
}

impl fmt::Debug for PluginInfoEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInfoEntry")
            .field("name", &self.manifest.name)
            .field("version", &self.manifest.version)
            .field("status", &self.status)
            .field("enabled", &self.enabled)
            .field("disable_reason", &self.disable_reason)
            .field("extensions", &self.extensions.len())
            .field("has_entry", &self.entry.is_some())
            .field("error_message", &self.error_message)
            .field("load_order", &self.load_order)
            .finish()
    }
}

// ============================================================================
// PluginRegistry
// ============================================================================

#[derive(Default)]
struct RegistryState {
    plugins: HashMap<String, PluginInfoEntry>,
    load_counter: usize,
}

impl RegistryState {
    fn get_mut(&mut self, name: &str) -> Result<&mut PluginInfoEntry> {
        self.plugins
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("plugin {name}")))
    }

    fn pending_mut(&mut self, name: &str) -> Result<&mut PluginInfoEntry> {
        let entry = self.get_mut(name)?;
        if entry.status != PluginStatus::Pending {
            return Err(Error::invalid_input(format!(
                "plugin {name} is {} (expected pending)",
                entry.status
            )));
        }
        Ok(entry)
    }
}

/// 플러그인 레지스트리
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
    events: EventBus,
}

impl PluginRegistry {
    /// 새 레지스트리 생성
    pub fn new(events: EventBus) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn notify(&self, name: &str) {
        self.events.publish(events::plugin_info_changed(name));
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Pending 레코드 설치
    ///
    /// 같은 이름의 Loaded/Failed 레코드는 먼저 제거되고 새 레코드는 순서상 맨 뒤로 갑니다.
    pub fn add_pending(&self, manifest: &PluginManifest, custom_data: Option<Value>) -> Result<()> {
        let name = manifest.name.trim();
        if name.is_empty() {
            return Err(Error::invalid_input("plugin name must not be empty"));
        }

        {
            let mut state = self.state.write();
            if let Some(existing) = state.plugins.get(name) {
                if existing.status == PluginStatus::Pending {
                    return Err(Error::invalid_input(format!(
                        "plugin {name} is already pending"
                    )));
                }
                debug!(plugin = %name, status = %existing.status, "Replacing plugin record");
                state.plugins.remove(name);
            }

            state.load_counter += 1;
            let load_order = state.load_counter;
            state.plugins.insert(
                name.to_string(),
                PluginInfoEntry {
                    manifest: manifest.clone(),
                    status: PluginStatus::Pending,
                    enabled: false,
                    disable_reason: None,
                    extensions: vec![],
                    entry: None,
                    custom_data,
                    error_message: None,
                    error_cause: None,
                    load_order,
                },
            );
        }

        debug!(plugin = %name, version = %manifest.version, "Plugin pending");
        self.notify(name);
        Ok(())
    }

    /// Pending -> Loaded (비활성 상태로)
    pub fn mark_loaded(
        &self,
        name: &str,
        entry: Arc<dyn EntryModule>,
        extensions: Vec<Extension>,
    ) -> Result<()> {
        let version = {
            let mut state = self.state.write();
            let record = state.pending_mut(name)?;
            record.status = PluginStatus::Loaded;
            record.enabled = false;
            record.entry = Some(entry);
            record.extensions = extensions;
            record.manifest.version.clone()
        };

        info!(plugin = %name, version = %version, "Plugin loaded");
        self.notify(name);
        Ok(())
    }

    /// Pending -> Failed
    pub fn mark_failed(
        &self,
        name: &str,
        message: impl Into<String>,
        cause: Option<String>,
    ) -> Result<()> {
        let message = message.into();
        {
            let mut state = self.state.write();
            let record = state.pending_mut(name)?;
            record.status = PluginStatus::Failed;
            record.enabled = false;
            record.error_message = Some(message.clone());
            record.error_cause = cause;
        }

        warn!(plugin = %name, error = %message, "Plugin failed to load");
        self.notify(name);
        Ok(())
    }

    /// 활성화/비활성화
    ///
    /// Loaded 상태에서만 유효하며, 값이 바뀌었을 때만 이벤트를 발행합니다.
    /// 실제로 바뀌었으면 `true`를 반환합니다.
    pub fn set_enabled(&self, name: &str, enabled: bool, reason: Option<String>) -> Result<bool> {
        {
            let mut state = self.state.write();
            let record = state.get_mut(name)?;
            if record.status != PluginStatus::Loaded {
                return Err(Error::invalid_input(format!(
                    "plugin {name} is {} and cannot be {}",
                    record.status,
                    if enabled { "enabled" } else { "disabled" }
                )));
            }
            if record.enabled == enabled {
                return Ok(false);
            }
            record.enabled = enabled;
            record.disable_reason = if enabled { None } else { reason };
        }

        info!(plugin = %name, enabled, "Plugin enablement changed");
        self.notify(name);
        Ok(true)
    }

    /// 호스트 데이터 교체
    pub fn set_custom_data(&self, name: &str, value: Option<Value>) -> Result<()> {
        {
            let mut state = self.state.write();
            state.get_mut(name)?.custom_data = value;
        }

        debug!(plugin = %name, "Plugin custom data updated");
        self.notify(name);
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// 모든 레코드 (설치 순서)
    pub fn entries(&self) -> Vec<PluginInfoEntry> {
        let state = self.state.read();
        let mut entries: Vec<_> = state.plugins.values().cloned().collect();
        entries.sort_by_key(|entry| entry.load_order);
        entries
    }

    pub fn get(&self, name: &str) -> Option<PluginInfoEntry> {
        self.state.read().plugins.get(name).cloned()
    }

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.state.read().plugins.get(name).map(|entry| entry.status)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().plugins.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.state.read().plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().plugins.is_empty()
    }

    /// 의존성 해석용 스냅샷 (Pending은 포함하지 않음)
    pub fn resolution_snapshot(&self) -> HashMap<String, DependencyResolution> {
        let state = self.state.read();
        state
            .plugins
            .iter()
            .filter_map(|(name, entry)| {
                let resolution = match entry.status {
                    PluginStatus::Pending => return None,
                    PluginStatus::Failed => DependencyResolution::Failed,
                    PluginStatus::Loaded => match entry.manifest.semver() {
                        Ok(version) => DependencyResolution::Satisfied(version),
                        Err(_) => DependencyResolution::Failed,
                    },
                };
                Some((name.clone(), resolution))
            })
            .collect()
    }

    /// Loaded이면서 활성화된 플러그인의 Extension (설치 순서)
    pub fn enabled_extensions(&self) -> Vec<Extension> {
        self.entries()
            .into_iter()
            .filter(PluginInfoEntry::is_active)
            .flat_map(|entry| entry.extensions)
            .collect()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.len())
            .finish()
    }
}
