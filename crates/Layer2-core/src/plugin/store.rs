//! Plugin Store - 호스트가 사용하는 플러그인 런타임 진입점
//!
//! 레지스트리, 의존성 해석기, 활성화 엔진, 로더를 하나로 묶습니다.

use super::activation::{ActivationEngine, FeatureFlags};
use super::code_ref;
use super::entry::{EntryProvider, ManifestSource, SharedScope};
use super::error::{CodeRefError, PluginLoadError};
use super::extension::Extension;
use super::loader::PluginLoader;
use super::manifest::{ManifestError, PluginManifest};
use super::registry::{PluginInfoEntry, PluginRegistry};
use super::resolver::{parse_fixed_resolutions, DependencyResolver};
use dynplug_foundation::{
    EventBus, EventBusConfig, EventType, Result, RuntimeConfig, RuntimeEvent, Subscription,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

// ============================================================================
// LoadHandle
// ============================================================================

/// 로드 완료 핸들
///
/// 같은 이름의 진행 중인 로드는 같은 핸들을 공유합니다.
/// 결과는 레지스트리 상태로 확인하며, 핸들 자체는 실패하지 않습니다.
#[derive(Clone)]
pub struct LoadHandle {
    inner: Shared<BoxFuture<'static, ()>>,
}

impl LoadHandle {
    fn from_signal(rx: oneshot::Receiver<()>) -> Self {
        Self {
            inner: async move {
                let _ = rx.await;
            }
            .boxed()
            .shared(),
        }
    }

    /// 이미 완료된 핸들
    pub fn ready() -> Self {
        Self {
            inner: futures::future::ready(()).boxed().shared(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.inner.clone().now_or_never().is_some()
    }
}

impl Future for LoadHandle {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl std::fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

/// 로드가 끝나면 (패닉 포함) in-flight 항목을 지우고 핸들을 완료
struct LoadCompletion {
    name: String,
    in_flight: Arc<Mutex<HashMap<String, LoadHandle>>>,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for LoadCompletion {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.name);
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

// ============================================================================
// PluginStoreBuilder
// ============================================================================

/// [`PluginStore`] 빌더
pub struct PluginStoreBuilder {
    provider: Arc<dyn EntryProvider>,
    manifest_source: Option<Arc<dyn ManifestSource>>,
    shared_scope: SharedScope,
    config: RuntimeConfig,
}

impl PluginStoreBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn manifest_source(mut self, source: Arc<dyn ManifestSource>) -> Self {
        self.manifest_source = Some(source);
        self
    }

    pub fn shared_scope(mut self, shared_scope: SharedScope) -> Self {
        self.shared_scope = shared_scope;
        self
    }

    pub fn auto_enable_on_load(mut self, enabled: bool) -> Self {
        self.config.auto_enable_on_load = enabled;
        self
    }

    pub fn fixed_resolution(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.config
            .fixed_dependency_resolutions
            .insert(name.into(), version.into());
        self
    }

    pub fn build(self) -> PluginStore {
        let events = EventBus::with_config(EventBusConfig {
            history_size: self.config.event_history_size,
        });
        let registry = Arc::new(PluginRegistry::new(events.clone()));

        let fixed = parse_fixed_resolutions(&self.config.fixed_dependency_resolutions);
        let resolver = Arc::new(DependencyResolver::new(Arc::clone(&registry), fixed));

        let activation = ActivationEngine::new(
            Arc::clone(&registry),
            self.config.feature_flags.clone(),
        );

        let loader = PluginLoader::new(Arc::clone(&registry), Arc::clone(&resolver), self.provider)
            .with_shared_scope(self.shared_scope)
            .with_auto_enable(self.config.auto_enable_on_load);

        info!(
            auto_enable = self.config.auto_enable_on_load,
            fixed_resolutions = resolver.fixed_resolutions().len(),
            "Plugin store initialized"
        );

        PluginStore {
            events,
            registry,
            resolver,
            activation,
            loader: Arc::new(loader),
            manifest_source: self.manifest_source,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

// ============================================================================
// PluginStore
// ============================================================================

/// 플러그인 스토어
pub struct PluginStore {
    events: EventBus,
    registry: Arc<PluginRegistry>,
    resolver: Arc<DependencyResolver>,
    activation: ActivationEngine,
    loader: Arc<PluginLoader>,
    manifest_source: Option<Arc<dyn ManifestSource>>,
    in_flight: Arc<Mutex<HashMap<String, LoadHandle>>>,
}

impl PluginStore {
    /// 기본 설정으로 생성
    pub fn new(provider: Arc<dyn EntryProvider>) -> Self {
        Self::builder(provider).build()
    }

    pub fn builder(provider: Arc<dyn EntryProvider>) -> PluginStoreBuilder {
        PluginStoreBuilder {
            provider,
            manifest_source: None,
            shared_scope: SharedScope::new(),
            config: RuntimeConfig::default(),
        }
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// 플러그인 로드 시작
    ///
    /// 이미 Loaded/Failed인 플러그인은 `force_reload`가 아니면 건너뜁니다.
    /// 로드는 현재 tokio 런타임에서 진행되며, 런타임 밖에서 호출하면 Failed로 기록됩니다.
    pub fn load_plugin(&self, manifest: PluginManifest, force_reload: bool) -> LoadHandle {
        self.load_plugin_with_data(manifest, None, force_reload)
    }

    /// 호스트 데이터를 붙여 로드
    pub fn load_plugin_with_data(
        &self,
        mut manifest: PluginManifest,
        custom_data: Option<Value>,
        force_reload: bool,
    ) -> LoadHandle {
        let name = manifest.name.trim().to_string();
        if name.is_empty() {
            error!(version = %manifest.version, "Cannot load a plugin manifest without a name");
            return LoadHandle::ready();
        }
        manifest.name = name.clone();

        let (handle, completion) = match self.begin_load(&name, force_reload) {
            Ok(started) => started,
            Err(existing) => return existing,
        };

        if let Err(e) = self.loader.admit(&manifest, custom_data) {
            warn!(plugin = %name, error = %e, "Could not admit plugin");
            return handle;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(plugin = %name, error = %e, "Plugin load requested outside a tokio runtime");
                self.loader.fail(&name, &PluginLoadError::NoRuntime);
                return handle;
            }
        };

        info!(plugin = %name, version = %manifest.version, "Loading plugin");
        let loader = Arc::clone(&self.loader);
        runtime.spawn(async move {
            let _completion = completion;
            loader.run(manifest).await;
        });

        handle
    }

    /// URL의 매니페스트를 가져와 로드
    ///
    /// 매니페스트에 `baseURL`이 없으면 URL의 디렉터리를 사용합니다.
    /// 가져오기/파싱 실패는 로그로 남기고, JSON에서 이름을 알 수 있으면
    /// 그 플러그인을 Failed로 기록합니다.
    pub async fn load_plugin_from_url(&self, url: &str, force_reload: bool) -> LoadHandle {
        let Some(source) = self.manifest_source.as_ref() else {
            error!(url = %url, "No manifest source configured");
            return LoadHandle::ready();
        };

        let value = match source.fetch(url).await {
            Ok(value) => value,
            Err(e) => {
                let err = ManifestError::Fetch {
                    url: url.to_string(),
                    message: format!("{e:#}"),
                };
                error!(url = %url, error = %err, "Failed to fetch plugin manifest");
                return LoadHandle::ready();
            }
        };

        let recovered_name = value
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let recovered_version = value
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut manifest = match PluginManifest::from_json(value) {
            Ok(manifest) => manifest,
            Err(e) => {
                error!(url = %url, error = %e, "Failed to parse plugin manifest");
                return match recovered_name {
                    Some(name) => {
                        let rejected = PluginManifest::new(name, recovered_version);
                        self.record_rejected(rejected, e, force_reload)
                    }
                    None => LoadHandle::ready(),
                };
            }
        };

        if manifest.base_url.is_none() {
            manifest.base_url = Some(base_url_of(url));
        }

        self.load_plugin(manifest, force_reload)
    }

    /// 로드 전에 거부된 매니페스트를 Failed 레코드로 남김
    fn record_rejected(
        &self,
        manifest: PluginManifest,
        err: ManifestError,
        force_reload: bool,
    ) -> LoadHandle {
        let name = manifest.name.clone();
        let (handle, _completion) = match self.begin_load(&name, force_reload) {
            Ok(started) => started,
            Err(existing) => return existing,
        };

        match self.loader.admit(&manifest, None) {
            Ok(()) => self.loader.fail(&name, &PluginLoadError::from(err)),
            Err(e) => warn!(plugin = %name, error = %e, "Could not admit plugin"),
        }
        handle
    }

    /// in-flight 항목 예약
    ///
    /// 진행 중인 로드가 있거나 이미 처리된 플러그인이면 돌려줄 핸들을 `Err`로 반환합니다.
    fn begin_load(
        &self,
        name: &str,
        force_reload: bool,
    ) -> std::result::Result<(LoadHandle, LoadCompletion), LoadHandle> {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(name) {
            debug!(plugin = %name, "Plugin is already loading");
            return Err(existing.clone());
        }

        if let Some(status) = self.registry.status(name) {
            if status.is_terminal() && !force_reload {
                debug!(plugin = %name, status = %status, "Skipping plugin that was already processed");
                return Err(LoadHandle::ready());
            }
        }

        let (tx, rx) = oneshot::channel();
        let handle = LoadHandle::from_signal(rx);
        in_flight.insert(name.to_string(), handle.clone());

        let completion = LoadCompletion {
            name: name.to_string(),
            in_flight: Arc::clone(&self.in_flight),
            done: Some(tx),
        };
        Ok((handle, completion))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// 모든 플러그인 레코드 (설치 순서)
    pub fn get_plugin_info(&self) -> Vec<PluginInfoEntry> {
        self.registry.entries()
    }

    /// 현재 활성 Extension
    pub fn get_extensions(&self) -> Vec<Extension> {
        self.activation.extensions()
    }

    pub fn get_feature_flags(&self) -> FeatureFlags {
        self.activation.feature_flags()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// 기능 플래그 병합 (불리언이 아닌 값은 무시)
    pub fn set_feature_flags(&self, partial: &Value) -> bool {
        self.activation.set_feature_flags(partial)
    }

    /// 플러그인 활성화 (Loaded가 아닌 이름은 경고 후 건너뜀)
    pub fn enable_plugins<S: AsRef<str>>(&self, names: &[S]) {
        for name in names {
            let name = name.as_ref();
            if let Err(e) = self.registry.set_enabled(name, true, None) {
                warn!(plugin = %name, error = %e, "Cannot enable plugin");
            }
        }
    }

    /// 플러그인 비활성화
    pub fn disable_plugins<S: AsRef<str>>(&self, names: &[S], reason: Option<&str>) {
        for name in names {
            let name = name.as_ref();
            if let Err(e) = self
                .registry
                .set_enabled(name, false, reason.map(str::to_string))
            {
                warn!(plugin = %name, error = %e, "Cannot disable plugin");
            }
        }
    }

    pub fn set_plugin_custom_data(&self, name: &str, value: Option<Value>) -> Result<()> {
        self.registry.set_custom_data(name, value)
    }

    /// Extension의 코드 참조를 모두 해석한 사본
    pub async fn resolve_extension(&self, extension: &Extension) -> (Extension, Vec<CodeRefError>) {
        code_ref::resolve_extension(extension).await
    }

    // ========================================================================
    // Events & Accessors
    // ========================================================================

    /// 이벤트 구독
    pub fn subscribe<F>(&self, event_types: &[EventType], listener: F) -> Subscription
    where
        F: Fn(&RuntimeEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(event_types, listener)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<DependencyResolver> {
        &self.resolver
    }

    /// 진행 중인 로드 수
    pub fn loading_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// 매니페스트 URL의 디렉터리 (끝에 `/` 포함)
fn base_url_of(url: &str) -> String {
    match url.rfind('/') {
        Some(index) => url[..=index].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::entry::{EntryRegistrationPort, StaticEntryModule, StaticEntryProvider};
    use crate::plugin::registry::PluginStatus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MapSource(HashMap<String, Value>);

    #[async_trait]
    impl ManifestSource for MapSource {
        async fn fetch(&self, url: &str) -> anyhow::Result<Value> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 Not Found"))
        }
    }

    fn provider(names: &[&str]) -> Arc<StaticEntryProvider> {
        let provider = StaticEntryProvider::new();
        for name in names {
            provider.insert(*name, Arc::new(StaticEntryModule::new()));
        }
        Arc::new(provider)
    }

    #[test]
    fn test_base_url_of() {
        assert_eq!(
            base_url_of("http://host/plugins/foo/plugin-manifest.json"),
            "http://host/plugins/foo/"
        );
        assert_eq!(base_url_of("manifest.json"), "");
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_handle() {
        let store = PluginStore::new(provider(&["foo"]));
        let manifest = PluginManifest::new("foo", "1.0.0").with_dependency("bar", "*");

        let first = store.load_plugin(manifest.clone(), false);
        let second = store.load_plugin(manifest, true);

        assert_eq!(store.loading_count(), 1);
        assert!(!first.is_done());
        assert!(!second.is_done());
        assert_eq!(
            store.registry().status("foo"),
            Some(PluginStatus::Pending)
        );
    }

    #[tokio::test]
    async fn test_skips_processed_plugins_unless_forced() {
        let store = PluginStore::new(provider(&["foo"]));
        store
            .load_plugin(PluginManifest::new("foo", "1.0.0"), false)
            .await;

        let skipped = store.load_plugin(PluginManifest::new("foo", "2.0.0"), false);
        assert!(skipped.is_done());
        assert_eq!(store.get_plugin_info()[0].version(), "1.0.0");

        store
            .load_plugin(PluginManifest::new("foo", "2.0.0"), true)
            .await;
        assert_eq!(store.get_plugin_info()[0].version(), "2.0.0");
        assert_eq!(store.loading_count(), 0);
    }

    #[tokio::test]
    async fn test_nameless_manifest_is_only_logged() {
        let store = PluginStore::new(provider(&[]));
        let handle = store.load_plugin(PluginManifest::new(" ", "1.0.0"), false);

        assert!(handle.is_done());
        assert!(store.get_plugin_info().is_empty());
    }

    #[tokio::test]
    async fn test_load_from_url() {
        let url = "http://host/plugins/foo/plugin-manifest.json";
        let mut manifests = HashMap::new();
        manifests.insert(url.to_string(), json!({ "name": "foo", "version": "1.0.0" }));

        let store = PluginStore::builder(provider(&["foo"]))
            .manifest_source(Arc::new(MapSource(manifests)))
            .build();

        store.load_plugin_from_url(url, false).await.await;

        let info = store.get_plugin_info();
        assert_eq!(info[0].status, PluginStatus::Loaded);
        assert_eq!(
            info[0].manifest.base_url.as_deref(),
            Some("http://host/plugins/foo/")
        );

        let missing = store
            .load_plugin_from_url("http://host/missing.json", false)
            .await;
        assert!(missing.is_done());
        assert_eq!(store.get_plugin_info().len(), 1);
    }

    #[tokio::test]
    async fn test_load_from_url_without_source() {
        let store = PluginStore::new(provider(&[]));
        let handle = store.load_plugin_from_url("http://host/m.json", false).await;

        assert!(handle.is_done());
        assert!(store.get_plugin_info().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_url_manifest_is_recorded_failed() {
        let named = "http://host/bad/plugin-manifest.json";
        let nameless = "http://host/anon/plugin-manifest.json";
        let mut manifests = HashMap::new();
        manifests.insert(
            named.to_string(),
            json!({ "name": "bad", "version": "1.0.0", "dependencies": ["not", "a", "map"] }),
        );
        manifests.insert(nameless.to_string(), json!({ "version": 3 }));

        let store = PluginStore::builder(provider(&["bad"]))
            .manifest_source(Arc::new(MapSource(manifests)))
            .build();

        store.load_plugin_from_url(named, false).await.await;
        let record = store.registry().get("bad").unwrap();
        assert_eq!(record.status, PluginStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("invalid plugin manifest"));
        assert!(record.error_cause.is_some());
        assert_eq!(store.loading_count(), 0);

        let skipped = store.load_plugin_from_url(named, false).await;
        assert!(skipped.is_done());

        let handle = store.load_plugin_from_url(nameless, false).await;
        assert!(handle.is_done());
        assert_eq!(store.get_plugin_info().len(), 1);
    }

    /// 첫 호출에서만 패닉하는 공급자
    struct FlakyProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EntryProvider for FlakyProvider {
        async fn provide(
            &self,
            manifest: &PluginManifest,
            port: &EntryRegistrationPort,
        ) -> anyhow::Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("entry script crashed");
            }
            port.register(&manifest.name, Arc::new(StaticEntryModule::new()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_panicking_provider_does_not_wedge_plugin() {
        let store = PluginStore::new(Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
        }));

        tokio::time::timeout(
            Duration::from_secs(5),
            store.load_plugin(PluginManifest::new("foo", "1.0.0"), false),
        )
        .await
        .unwrap();

        let record = store.registry().get("foo").unwrap();
        assert_eq!(record.status, PluginStatus::Failed);
        assert!(record.error_cause.unwrap().contains("entry script crashed"));
        assert_eq!(store.loading_count(), 0);

        tokio::time::timeout(
            Duration::from_secs(5),
            store.load_plugin(PluginManifest::new("foo", "1.0.0"), true),
        )
        .await
        .unwrap();
        assert_eq!(store.registry().status("foo"), Some(PluginStatus::Loaded));
    }

    #[test]
    fn test_load_outside_runtime_is_recorded_failed() {
        let store = PluginStore::new(provider(&["foo"]));

        let handle = store.load_plugin(PluginManifest::new("foo", "1.0.0"), false);

        assert!(handle.is_done());
        assert_eq!(store.loading_count(), 0);
        let record = store.registry().get("foo").unwrap();
        assert_eq!(record.status, PluginStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("no tokio runtime available to drive the load")
        );
    }

    #[tokio::test]
    async fn test_enable_skips_unknown_plugins() {
        let store = PluginStore::builder(provider(&["foo"]))
            .auto_enable_on_load(false)
            .build();
        store
            .load_plugin(PluginManifest::new("foo", "1.0.0"), false)
            .await;

        store.enable_plugins(&["missing", "foo"]);
        assert!(store.registry().get("foo").unwrap().enabled);

        store.disable_plugins(&["foo"], Some("maintenance"));
        let record = store.registry().get("foo").unwrap();
        assert!(!record.enabled);
        assert_eq!(record.disable_reason.as_deref(), Some("maintenance"));
    }

    #[tokio::test]
    async fn test_initial_config() {
        let config = RuntimeConfig::new()
            .with_feature_flag("A", true)
            .with_fixed_resolution("platform", "4.15.0")
            .with_fixed_resolution("broken", "latest");
        let store = PluginStore::builder(provider(&[])).config(config).build();

        assert_eq!(store.get_feature_flags().get("A"), Some(&true));
        assert_eq!(store.resolver().fixed_resolutions().len(), 1);
    }
}
