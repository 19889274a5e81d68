//! Runtime Config - 플러그인 런타임 설정
//!
//! JSON 또는 TOML 파일에서 로드하며, 여러 소스를 병합할 수 있습니다.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// 설정 파일명 (기본)
pub const RUNTIME_CONFIG_FILE: &str = "dynplug.toml";

/// 플러그인 런타임 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// 로드 직후 플러그인 자동 활성화
    #[serde(default)]
    pub auto_enable_on_load: bool,

    /// 플러그인이 아닌 의존성의 고정 버전 (예: 호스트 플랫폼 버전)
    #[serde(default)]
    pub fixed_dependency_resolutions: BTreeMap<String, String>,

    /// 초기 기능 플래그
    #[serde(default)]
    pub feature_flags: BTreeMap<String, bool>,

    /// 이벤트 히스토리 보관 개수
    #[serde(default = "default_history_size")]
    pub event_history_size: usize,
}

fn default_history_size() -> usize {
    100
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            auto_enable_on_load: false,
            fixed_dependency_resolutions: BTreeMap::new(),
            feature_flags: BTreeMap::new(),
            event_history_size: default_history_size(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// 파일에서 로드 (확장자로 형식 판별: `.json` / `.toml`)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            other => Err(Error::Config(format!(
                "Unsupported config format for {}: {:?}",
                path.display(),
                other
            ))),
        }
    }

    /// 파일이 있으면 로드, 없으면 None
    pub fn load_optional(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    // ========================================================================
    // Merge
    // ========================================================================

    /// 다른 설정과 병합 (other가 우선)
    pub fn merge(&mut self, other: RuntimeConfig) {
        if other.auto_enable_on_load {
            self.auto_enable_on_load = true;
        }
        self.fixed_dependency_resolutions
            .extend(other.fixed_dependency_resolutions);
        self.feature_flags.extend(other.feature_flags);
        if other.event_history_size != default_history_size() {
            self.event_history_size = other.event_history_size;
        }
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_auto_enable(mut self, enabled: bool) -> Self {
        self.auto_enable_on_load = enabled;
        self
    }

    pub fn with_fixed_resolution(
        mut self,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.fixed_dependency_resolutions
            .insert(name.into(), version.into());
        self
    }

    pub fn with_feature_flag(mut self, name: impl Into<String>, value: bool) -> Self {
        self.feature_flags.insert(name.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(!config.auto_enable_on_load);
        assert_eq!(config.event_history_size, 100);
        assert!(config.fixed_dependency_resolutions.is_empty());
    }

    #[test]
    fn test_from_toml() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            autoEnableOnLoad = true

            [fixedDependencyResolutions]
            "@console/pluginAPI" = "4.15.0"

            [featureFlags]
            TELEMETRY = false
            "#,
        )
        .unwrap();

        assert!(config.auto_enable_on_load);
        assert_eq!(
            config.fixed_dependency_resolutions.get("@console/pluginAPI"),
            Some(&"4.15.0".to_string())
        );
        assert_eq!(config.feature_flags.get("TELEMETRY"), Some(&false));
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.json");
        std::fs::write(
            &path,
            r#"{ "fixedDependencyResolutions": { "platform": "1.2.3" }, "eventHistorySize": 10 }"#,
        )
        .unwrap();

        let config = RuntimeConfig::load(&path).unwrap();
        assert_eq!(config.event_history_size, 10);
        assert_eq!(config.fixed_dependency_resolutions.len(), 1);
    }

    #[test]
    fn test_load_optional_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::load_optional(dir.path().join(RUNTIME_CONFIG_FILE)).unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn test_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.yaml");
        std::fs::write(&path, "autoEnableOnLoad: true").unwrap();

        let err = RuntimeConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_merge() {
        let mut base = RuntimeConfig::new()
            .with_fixed_resolution("platform", "1.0.0")
            .with_feature_flag("A", true);
        let other = RuntimeConfig::new()
            .with_auto_enable(true)
            .with_fixed_resolution("platform", "2.0.0")
            .with_feature_flag("B", false);

        base.merge(other);

        assert!(base.auto_enable_on_load);
        assert_eq!(
            base.fixed_dependency_resolutions.get("platform"),
            Some(&"2.0.0".to_string())
        );
        assert_eq!(base.feature_flags.len(), 2);
    }
}
