//! dynplug-core: Plugin Runtime Core
//!
//! Layer2 - 플러그인 런타임 레이어
//!
//! # 주요 모듈
//!
//! - `plugin`: 매니페스트, 버전 범위, 레지스트리, 의존성 해석, 코드 참조, 활성화, 스토어
//!
//! # 사용 예시
//!
//! ```ignore
//! use dynplug_core::{PluginManifest, PluginStore, StaticEntryProvider};
//!
//! let store = PluginStore::new(Arc::new(provider));
//!
//! // 로드 (의존성이 충족될 때까지 대기)
//! store.load_plugin(PluginManifest::new("foo", "1.0.0"), false).await;
//!
//! // 활성화 후 Extension 조회
//! store.enable_plugins(&["foo"]);
//! let extensions = store.get_extensions();
//! ```

pub mod plugin;

// Re-exports: Plugin
pub use plugin::{
    ActivationEngine, CodeRef, CodeRefError, DependencyError, DependencyIssue, DependencyResolution,
    DependencyResolver, EntryLoadError, EntryModule, EntryProvider, EntryRegistrationPort,
    ExportValue, Extension, ExtensionDeclaration, ExtensionFlags, FeatureFlags, LoadHandle,
    ManifestError, ManifestSource, Module, ModuleFactory, PluginInfoEntry, PluginLoadError,
    PluginLoader, PluginManifest, PluginRegistry, PluginStatus, PluginStore, PluginStoreBuilder,
    PropertyValue, ResolvedProperties, SharedScope, StaticEntryModule, StaticEntryProvider,
    VersionRange,
};

// Re-exports: Foundation
pub use dynplug_foundation::{
    events, Error, EventBus, EventType, Result, RuntimeConfig, RuntimeEvent, Subscription,
};
