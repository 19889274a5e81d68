//! Plugin Loader - 단일 플러그인 로드 파이프라인
//!
//! ```text
//! validate ─► resolve deps ─► provide entry ─► init(shared scope) ─► decode extensions
//!    │             │                │                  │                    │
//!    └─────────────┴────────────────┴──────────────────┴─► Failed     Loaded ◄┘
//! ```

use super::code_ref::decode;
use super::entry::{EntryModule, EntryProvider, EntryRegistrationPort, SharedScope};
use super::error::{EntryLoadError, PluginLoadError};
use super::extension::Extension;
use super::manifest::PluginManifest;
use super::registry::PluginRegistry;
use super::resolver::DependencyResolver;
use dynplug_foundation::Result;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 플러그인 로더
pub struct PluginLoader {
    registry: Arc<PluginRegistry>,
    resolver: Arc<DependencyResolver>,
    provider: Arc<dyn EntryProvider>,
    port: EntryRegistrationPort,
    shared_scope: SharedScope,
    auto_enable: bool,
}

impl PluginLoader {
    pub fn new(
        registry: Arc<PluginRegistry>,
        resolver: Arc<DependencyResolver>,
        provider: Arc<dyn EntryProvider>,
    ) -> Self {
        Self {
            registry,
            resolver,
            provider,
            port: EntryRegistrationPort::new(),
            shared_scope: SharedScope::new(),
            auto_enable: false,
        }
    }

    pub fn with_shared_scope(mut self, shared_scope: SharedScope) -> Self {
        self.shared_scope = shared_scope;
        self
    }

    pub fn with_auto_enable(mut self, auto_enable: bool) -> Self {
        self.auto_enable = auto_enable;
        self
    }

    /// 이 로더가 엔트리 공급자에 넘기는 등록 포트
    pub fn port(&self) -> &EntryRegistrationPort {
        &self.port
    }

    /// Pending 레코드 설치 (동기)
    pub fn admit(&self, manifest: &PluginManifest, custom_data: Option<Value>) -> Result<()> {
        self.registry.add_pending(manifest, custom_data)
    }

    /// 로드 실행 - 결과는 레지스트리 상태로만 드러남
    ///
    /// 공급자나 엔트리 모듈의 패닉도 Failed로 기록됩니다.
    pub async fn run(&self, manifest: PluginManifest) {
        let name = manifest.name.clone();

        let outcome = match AssertUnwindSafe(self.load(&manifest)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                // 공급자 호출 중 패닉이면 포트 대기가 남아 있음
                self.port.take(&name);
                Err(EntryLoadError::Panicked {
                    plugin: name.clone(),
                    message: panic_message(payload.as_ref()),
                }
                .into())
            }
        };

        match outcome {
            Ok((entry, extensions)) => {
                let count = extensions.len();
                if let Err(e) = self.registry.mark_loaded(&name, entry, extensions) {
                    warn!(plugin = %name, error = %e, "Could not record loaded plugin");
                    return;
                }
                info!(plugin = %name, extensions = count, "Plugin ready");

                if self.auto_enable {
                    if let Err(e) = self.registry.set_enabled(&name, true, None) {
                        warn!(plugin = %name, error = %e, "Could not auto-enable plugin");
                    }
                }
            }
            Err(e) => self.fail(&name, &e),
        }
    }

    /// Pending 레코드를 Failed로 기록
    pub fn fail(&self, name: &str, err: &PluginLoadError) {
        let cause = err.cause_chain();
        error!(plugin = %name, error = %err, cause = %cause, "Plugin load failed");
        if let Err(record_err) = self.registry.mark_failed(name, err.to_string(), Some(cause)) {
            warn!(plugin = %name, error = %record_err, "Could not record failed plugin");
        }
    }

    async fn load(
        &self,
        manifest: &PluginManifest,
    ) -> std::result::Result<(Arc<dyn EntryModule>, Vec<Extension>), PluginLoadError> {
        manifest.validate()?;
        let name = manifest.name.as_str();

        self.resolver.resolve(name, manifest.requirements()?).await?;

        let entry = self.provide_entry(manifest).await?;
        entry
            .init(&self.shared_scope)
            .await
            .map_err(|source| EntryLoadError::Init {
                plugin: name.to_string(),
                source,
            })?;

        let build_hash = manifest
            .build_hash
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let extensions = manifest
            .extensions
            .iter()
            .enumerate()
            .map(|(index, declaration)| Extension {
                extension_type: declaration.extension_type.clone(),
                properties: decode(&declaration.properties, &entry),
                flags: declaration.flags.clone(),
                uid: Extension::make_uid(name, index, &build_hash),
                plugin_name: name.to_string(),
            })
            .collect();

        Ok((entry, extensions))
    }

    /// 공급자 호출 후 포트에 등록된 엔트리 회수
    async fn provide_entry(
        &self,
        manifest: &PluginManifest,
    ) -> std::result::Result<Arc<dyn EntryModule>, EntryLoadError> {
        let name = manifest.name.as_str();
        self.port.expect(name);

        let provided = self.provider.provide(manifest, &self.port).await;
        let registered = self.port.take(name);

        if let Err(source) = provided {
            return Err(EntryLoadError::Provider {
                plugin: name.to_string(),
                source,
            });
        }

        debug!(plugin = %name, "Entry provider completed");
        registered.ok_or_else(|| EntryLoadError::ProtocolViolation(name.to_string()))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::entry::{ExportValue, Module, StaticEntryModule, StaticEntryProvider};
    use crate::plugin::manifest::ExtensionDeclaration;
    use crate::plugin::registry::PluginStatus;
    use async_trait::async_trait;
    use dynplug_foundation::EventBus;
    use serde_json::json;
    use std::collections::BTreeMap;

    /// 등록 없이 성공하는 공급자
    struct SilentProvider;

    #[async_trait]
    impl EntryProvider for SilentProvider {
        async fn provide(
            &self,
            _manifest: &PluginManifest,
            _port: &EntryRegistrationPort,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// 호출 시 패닉하는 공급자
    struct PanickingProvider;

    #[async_trait]
    impl EntryProvider for PanickingProvider {
        async fn provide(
            &self,
            manifest: &PluginManifest,
            _port: &EntryRegistrationPort,
        ) -> anyhow::Result<()> {
            panic!("entry script crashed for {}", manifest.name);
        }
    }

    fn loader(provider: Arc<dyn EntryProvider>) -> (Arc<PluginRegistry>, PluginLoader) {
        let registry = Arc::new(PluginRegistry::new(EventBus::new()));
        let resolver = Arc::new(DependencyResolver::new(
            Arc::clone(&registry),
            BTreeMap::new(),
        ));
        let loader = PluginLoader::new(Arc::clone(&registry), resolver, provider);
        (registry, loader)
    }

    fn bundled(name: &str) -> Arc<StaticEntryProvider> {
        Arc::new(StaticEntryProvider::new().with_entry(
            name,
            Arc::new(StaticEntryModule::new().with_module(
                "Page",
                Module::new().with_export("default", ExportValue::new("page")),
            )),
        ))
    }

    async fn admit_and_run(loader: &PluginLoader, manifest: PluginManifest) {
        loader.admit(&manifest, None).unwrap();
        loader.run(manifest).await;
    }

    #[tokio::test]
    async fn test_loads_and_decodes_extensions() {
        let (registry, loader) = loader(bundled("foo"));
        let manifest = PluginManifest::new("foo", "1.0.0")
            .with_build_hash("abc")
            .with_extension(ExtensionDeclaration::new(
                "app.page",
                json!({ "component": { "ref": "Page" } }),
            ));

        admit_and_run(&loader, manifest).await;

        let record = registry.get("foo").unwrap();
        assert_eq!(record.status, PluginStatus::Loaded);
        assert!(!record.enabled);
        assert_eq!(record.extensions[0].uid, "foo[0]_abc");
        assert_eq!(record.extensions[0].properties.code_ref_count(), 1);
    }

    #[tokio::test]
    async fn test_generated_build_hash_is_shared_within_load() {
        let (registry, loader) = loader(bundled("foo"));
        let manifest = PluginManifest::new("foo", "1.0.0")
            .with_extension(ExtensionDeclaration::new("a", Value::Null))
            .with_extension(ExtensionDeclaration::new("b", Value::Null));

        admit_and_run(&loader, manifest).await;

        let record = registry.get("foo").unwrap();
        let hashes: Vec<_> = record
            .extensions
            .iter()
            .map(|ext| ext.uid.split_once('_').map(|(_, hash)| hash.to_string()))
            .collect();
        assert_eq!(hashes[0], hashes[1]);
        assert!(record.extensions[1].uid.starts_with("foo[1]_"));
    }

    #[tokio::test]
    async fn test_auto_enable() {
        let (registry, loader) = loader(bundled("foo"));
        let loader = loader.with_auto_enable(true);

        admit_and_run(&loader, PluginManifest::new("foo", "1.0.0")).await;

        assert!(registry.get("foo").unwrap().enabled);
    }

    #[tokio::test]
    async fn test_invalid_manifest_fails() {
        let (registry, loader) = loader(bundled("foo"));

        admit_and_run(&loader, PluginManifest::new("foo", "not-semver")).await;

        let record = registry.get("foo").unwrap();
        assert_eq!(record.status, PluginStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("invalid plugin manifest"));
        assert!(record.error_cause.unwrap().contains("not-semver"));
    }

    #[tokio::test]
    async fn test_provider_error_fails() {
        let (registry, loader) = loader(bundled("other"));

        admit_and_run(&loader, PluginManifest::new("foo", "1.0.0")).await;

        let record = registry.get("foo").unwrap();
        assert_eq!(record.status, PluginStatus::Failed);
        assert!(!loader.port().is_expecting("foo"));
    }

    #[tokio::test]
    async fn test_protocol_violation_fails() {
        let (registry, loader) = loader(Arc::new(SilentProvider));

        admit_and_run(&loader, PluginManifest::new("foo", "1.0.0")).await;

        let record = registry.get("foo").unwrap();
        assert_eq!(record.status, PluginStatus::Failed);
        assert!(record
            .error_cause
            .unwrap()
            .contains("without registering an entry"));
    }

    #[tokio::test]
    async fn test_provider_panic_fails() {
        let (registry, loader) = loader(Arc::new(PanickingProvider));

        admit_and_run(&loader, PluginManifest::new("foo", "1.0.0")).await;

        let record = registry.get("foo").unwrap();
        assert_eq!(record.status, PluginStatus::Failed);
        assert!(record
            .error_cause
            .unwrap()
            .contains("entry script crashed for foo"));
        assert!(!loader.port().is_expecting("foo"));
    }
}
