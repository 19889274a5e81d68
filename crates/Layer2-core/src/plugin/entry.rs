//! Plugin Entry - 플러그인 모듈 접근 계약
//!
//! 모듈이 "어떻게" 준비되는지는 외부 협력자(`EntryProvider`)의 몫입니다.
//! 런타임은 두 메서드(`init`, `get`) 계약만 알고 있습니다.

use super::manifest::PluginManifest;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// ExportValue / Module
// ============================================================================

/// 모듈이 내보내는 값 (불투명)
///
/// 비교는 인스턴스 동일성 기준입니다.
#[derive(Clone)]
pub struct ExportValue(Arc<dyn Any + Send + Sync>);

impl ExportValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &ExportValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ExportValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl std::fmt::Debug for ExportValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExportValue({:p})", Arc::as_ptr(&self.0))
    }
}

/// 모듈 - 이름 붙은 export 모음
#[derive(Debug, Clone, Default)]
pub struct Module {
    exports: HashMap<String, ExportValue>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// 빌더 패턴: export 추가
    pub fn with_export(mut self, name: impl Into<String>, value: ExportValue) -> Self {
        self.exports.insert(name.into(), value);
        self
    }

    pub fn export(&self, name: &str) -> Option<&ExportValue> {
        self.exports.get(name)
    }

    pub fn export_names(&self) -> Vec<&str> {
        self.exports.keys().map(String::as_str).collect()
    }
}

/// 모듈 팩토리 - 호출할 때마다 모듈을 만들어 반환
pub type ModuleFactory = Arc<dyn Fn() -> Module + Send + Sync>;

// ============================================================================
// SharedScope
// ============================================================================

/// 호스트가 플러그인과 공유하는 모듈 범위 (불투명)
#[derive(Debug, Clone, Default)]
pub struct SharedScope {
    modules: HashMap<String, ExportValue>,
}

impl SharedScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, name: impl Into<String>, value: ExportValue) -> Self {
        self.modules.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ExportValue> {
        self.modules.get(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

// ============================================================================
// EntryModule - 플러그인 엔트리 핸들
// ============================================================================

/// 플러그인 엔트리 모듈 (module federation container 계약)
#[async_trait]
pub trait EntryModule: Send + Sync {
    /// 공유 범위로 초기화
    async fn init(&self, shared_scope: &SharedScope) -> anyhow::Result<()>;

    /// 모듈 팩토리 조회
    async fn get(&self, module_name: &str) -> anyhow::Result<ModuleFactory>;
}

// ============================================================================
// EntryRegistrationPort - 엔트리 등록 포트
// ============================================================================

/// 로더 인스턴스가 소유하는 엔트리 등록 포트
///
/// 전역 콜백 대신, `EntryProvider`에 주입되어 로드된 엔트리를 돌려받습니다.
#[derive(Clone, Default)]
pub struct EntryRegistrationPort {
    registrations: Arc<Mutex<HashMap<String, Arc<dyn EntryModule>>>>,
    expected: Arc<Mutex<HashMap<String, usize>>>,
}

impl EntryRegistrationPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// 엔트리 등록 (플러그인 스크립트가 호출)
    ///
    /// 로드 중이 아닌 플러그인의 등록이나 중복 등록은 무시됩니다.
    pub fn register(&self, plugin_name: &str, entry: Arc<dyn EntryModule>) -> bool {
        if !self.expected.lock().contains_key(plugin_name) {
            warn!(plugin = %plugin_name, "Ignoring entry registration for a plugin that is not loading");
            return false;
        }

        let mut registrations = self.registrations.lock();
        if registrations.contains_key(plugin_name) {
            warn!(plugin = %plugin_name, "Ignoring duplicate entry registration");
            return false;
        }

        debug!(plugin = %plugin_name, "Plugin entry registered");
        registrations.insert(plugin_name.to_string(), entry);
        true
    }

    /// 등록 대기 시작
    pub(crate) fn expect(&self, plugin_name: &str) {
        *self
            .expected
            .lock()
            .entry(plugin_name.to_string())
            .or_insert(0) += 1;
    }

    /// 등록된 엔트리를 꺼내고 대기 해제
    pub(crate) fn take(&self, plugin_name: &str) -> Option<Arc<dyn EntryModule>> {
        {
            let mut expected = self.expected.lock();
            if let Some(count) = expected.get_mut(plugin_name) {
                *count -= 1;
                if *count == 0 {
                    expected.remove(plugin_name);
                }
            }
        }
        self.registrations.lock().remove(plugin_name)
    }

    pub fn is_expecting(&self, plugin_name: &str) -> bool {
        self.expected.lock().contains_key(plugin_name)
    }
}

// ============================================================================
// 협력자 계약
// ============================================================================

/// 엔트리 모듈 공급자
///
/// 구현체는 플러그인 코드를 준비한 뒤 `port.register(name, entry)`를 호출해야 합니다.
/// 등록 없이 성공을 반환하면 프로토콜 위반으로 처리됩니다.
#[async_trait]
pub trait EntryProvider: Send + Sync {
    async fn provide(
        &self,
        manifest: &PluginManifest,
        port: &EntryRegistrationPort,
    ) -> anyhow::Result<()>;
}

/// 매니페스트 공급자 (URL -> 스키마 검증된 JSON)
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<serde_json::Value>;
}

// ============================================================================
// StaticEntryProvider - 메모리 내 엔트리 공급자
// ============================================================================

/// 호스트에 번들된 플러그인용 공급자 (이름 -> 엔트리)
#[derive(Default)]
pub struct StaticEntryProvider {
    entries: Mutex<HashMap<String, Arc<dyn EntryModule>>>,
}

impl StaticEntryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, plugin_name: impl Into<String>, entry: Arc<dyn EntryModule>) -> Self {
        self.insert(plugin_name, entry);
        self
    }

    pub fn insert(&self, plugin_name: impl Into<String>, entry: Arc<dyn EntryModule>) {
        self.entries.lock().insert(plugin_name.into(), entry);
    }
}

#[async_trait]
impl EntryProvider for StaticEntryProvider {
    async fn provide(
        &self,
        manifest: &PluginManifest,
        port: &EntryRegistrationPort,
    ) -> anyhow::Result<()> {
        let entry = self
            .entries
            .lock()
            .get(&manifest.name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no entry module bundled for plugin {}", manifest.name))?;
        port.register(&manifest.name, entry);
        Ok(())
    }
}

// ============================================================================
// StaticEntryModule - 메모리 내 엔트리 모듈
// ============================================================================

/// 모듈 팩토리 맵으로 구성된 엔트리 모듈
#[derive(Default)]
pub struct StaticEntryModule {
    modules: HashMap<String, ModuleFactory>,
    initialized: Mutex<bool>,
}

impl StaticEntryModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// 빌더 패턴: 모듈 추가
    pub fn with_module(mut self, name: impl Into<String>, module: Module) -> Self {
        self.modules
            .insert(name.into(), Arc::new(move || module.clone()));
        self
    }

    /// 빌더 패턴: 팩토리 추가
    pub fn with_factory(mut self, name: impl Into<String>, factory: ModuleFactory) -> Self {
        self.modules.insert(name.into(), factory);
        self
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }
}

#[async_trait]
impl EntryModule for StaticEntryModule {
    async fn init(&self, _shared_scope: &SharedScope) -> anyhow::Result<()> {
        *self.initialized.lock() = true;
        Ok(())
    }

    async fn get(&self, module_name: &str) -> anyhow::Result<ModuleFactory> {
        self.modules
            .get(module_name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("module '{module_name}' does not exist in container"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_value_identity() {
        let a = ExportValue::new(42u32);
        let b = a.clone();
        let c = ExportValue::new(42u32);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.downcast_ref::<u32>(), Some(&42));
        assert!(a.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_port_rejects_unexpected_registration() {
        let port = EntryRegistrationPort::new();
        let entry: Arc<dyn EntryModule> = Arc::new(StaticEntryModule::new());

        assert!(!port.register("foo", Arc::clone(&entry)));

        port.expect("foo");
        assert!(port.register("foo", Arc::clone(&entry)));
        assert!(!port.register("foo", entry));
        assert!(port.take("foo").is_some());
        assert!(!port.is_expecting("foo"));
        assert!(port.take("foo").is_none());
    }

    #[tokio::test]
    async fn test_static_provider_registers_entry() {
        let provider = StaticEntryProvider::new()
            .with_entry("foo", Arc::new(StaticEntryModule::new()));
        let port = EntryRegistrationPort::new();
        let manifest = PluginManifest::new("foo", "1.0.0");

        port.expect("foo");
        provider.provide(&manifest, &port).await.unwrap();
        assert!(port.take("foo").is_some());

        let missing = PluginManifest::new("bar", "1.0.0");
        assert!(provider.provide(&missing, &port).await.is_err());
    }

    #[tokio::test]
    async fn test_static_entry_module() {
        let entry = StaticEntryModule::new().with_module(
            "utils",
            Module::new().with_export("default", ExportValue::new("hello")),
        );

        assert!(!entry.is_initialized());
        entry.init(&SharedScope::new()).await.unwrap();
        assert!(entry.is_initialized());

        let factory = entry.get("utils").await.unwrap();
        let module = factory();
        assert_eq!(
            module.export("default").and_then(|v| v.downcast_ref::<&str>()),
            Some(&"hello")
        );
        assert!(entry.get("missing").await.is_err());
    }
}
