//! # Plugin Runtime
//!
//! 독립적으로 빌드된 플러그인을 받아들이고, 플러그인 간 버전 의존성을 해석하며,
//! Extension 데이터에 포함된 코드 참조를 지연 해석하고, 기능 플래그에 따라
//! 현재 활성 Extension 집합을 계산합니다.
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        PluginStore                          │
//! │  load_plugin ──► PluginLoader                               │
//! │                   │  validate ─► resolve ─► provide ─► init │
//! │                   ▼                                         │
//! │  ┌───────────────────────────┐    ┌──────────────────────┐ │
//! │  │      PluginRegistry       │◄───│  DependencyResolver  │ │
//! │  │  Pending/Loaded/Failed    │    │  (wait graph)        │ │
//! │  └─────────────┬─────────────┘    └──────────────────────┘ │
//! │                │ PluginInfoChanged                          │
//! │                ▼                                            │
//! │  ┌───────────────────────────┐    ┌──────────────────────┐ │
//! │  │     ActivationEngine      │    │  CodeRef (lazy)      │ │
//! │  │  flags ─► active set      │    │  resolve_all         │ │
//! │  └───────────────────────────┘    └──────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 예시
//!
//! ```ignore
//! let provider = Arc::new(StaticEntryProvider::new().with_entry("foo", foo_entry));
//! let store = PluginStore::builder(provider)
//!     .fixed_resolution("@console/pluginAPI", "4.15.0")
//!     .build();
//!
//! store.load_plugin(manifest, false).await;
//! store.enable_plugins(&["foo"]);
//!
//! for extension in store.get_extensions() {
//!     let (resolved, errors) = store.resolve_extension(&extension).await;
//! }
//! ```

mod activation;
mod code_ref;
mod entry;
mod error;
mod extension;
mod loader;
mod manifest;
mod registry;
mod resolver;
mod store;
mod version;

pub use activation::{compute_active, merge_flags, ActivationEngine, FeatureFlags};
pub use code_ref::{
    decode, parse_token, resolve_all, resolve_extension, CodeRef, ResolvedProperties,
    CODE_REF_KEY, DEFAULT_EXPORT,
};
pub use entry::{
    EntryModule, EntryProvider, EntryRegistrationPort, ExportValue, ManifestSource, Module,
    ModuleFactory, SharedScope, StaticEntryModule, StaticEntryProvider,
};
pub use error::{CodeRefError, DependencyError, DependencyIssue, EntryLoadError, PluginLoadError};
pub use extension::{Extension, PropertyValue};
pub use loader::PluginLoader;
pub use manifest::{
    DependencyRequirement, ExtensionDeclaration, ExtensionFlags, ManifestError, PluginManifest,
};
pub use registry::{PluginInfoEntry, PluginRegistry, PluginStatus};
pub use resolver::{
    evaluate, parse_fixed_resolutions, DependencyResolution, DependencyResolver, Evaluation,
};
pub use store::{LoadHandle, PluginStore, PluginStoreBuilder};
pub use version::{RangeParseError, VersionRange};
