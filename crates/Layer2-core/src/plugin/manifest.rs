//! Plugin Manifest - 플러그인 메타데이터 정의
//!
//! 스키마 검증은 매니페스트 공급자의 몫이고, 여기서는 런타임이 의존하는
//! 의미적 불변식(이름, semver 버전, 버전 범위)만 검사합니다.

use super::version::VersionRange;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// 매니페스트 에러
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("manifest name must not be empty")]
    EmptyName,

    #[error("manifest version is not valid semver: {0}")]
    InvalidVersion(String),

    #[error("dependency {name} has invalid version range '{range}'")]
    InvalidDependencyRange { name: String, range: String },

    #[error("plugin {0} must not depend on itself")]
    SelfDependency(String),

    #[error("extension #{0} has an empty type")]
    EmptyExtensionType(usize),

    #[error("failed to parse manifest: {0}")]
    Parse(String),

    #[error("failed to fetch manifest from {url}: {message}")]
    Fetch { url: String, message: String },
}

// ============================================================================
// ExtensionDeclaration
// ============================================================================

/// Extension 활성화 조건 플래그
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionFlags {
    /// 모두 `true`여야 하는 플래그
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// 모두 `false`여야 하는 플래그
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disallowed: Vec<String>,
}

impl ExtensionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, flag: impl Into<String>) -> Self {
        self.required.push(flag.into());
        self
    }

    pub fn disallow(mut self, flag: impl Into<String>) -> Self {
        self.disallowed.push(flag.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.disallowed.is_empty()
    }

    /// 플래그 이름을 참조하는지 확인
    pub fn references(&self, flag: &str) -> bool {
        self.required.iter().chain(self.disallowed.iter()).any(|f| f == flag)
    }
}

/// 매니페스트에 선언된 Extension (디코딩 전)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionDeclaration {
    /// Extension 타입 태그 (예: "console.navigation/href")
    #[serde(rename = "type")]
    pub extension_type: String,

    /// 속성 트리 (코드 참조 마커 포함 가능)
    #[serde(default)]
    pub properties: Value,

    /// 활성화 조건
    #[serde(default, skip_serializing_if = "ExtensionFlags::is_empty")]
    pub flags: ExtensionFlags,
}

impl ExtensionDeclaration {
    pub fn new(extension_type: impl Into<String>, properties: Value) -> Self {
        Self {
            extension_type: extension_type.into(),
            properties,
            flags: ExtensionFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: ExtensionFlags) -> Self {
        self.flags = flags;
        self
    }
}

// ============================================================================
// DependencyRequirement
// ============================================================================

/// 파싱된 의존성 요구사항
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRequirement {
    /// 의존하는 플러그인 (또는 고정 해석) 이름
    pub name: String,

    /// 요구 버전 범위
    pub range: VersionRange,

    /// 선택적 의존성 여부
    pub optional: bool,
}

// ============================================================================
// PluginManifest
// ============================================================================

/// 플러그인 매니페스트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// 고유 플러그인 이름
    pub name: String,

    /// 버전 (semver)
    pub version: String,

    /// 필수 의존성 (이름 -> 범위)
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    /// 선택적 의존성 (이름 -> 범위)
    #[serde(default)]
    pub optional_dependencies: BTreeMap<String, String>,

    /// 선언된 Extension 목록
    #[serde(default)]
    pub extensions: Vec<ExtensionDeclaration>,

    /// 빌드 해시 (Extension UID에 사용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_hash: Option<String>,

    /// 플러그인 자산 기준 URL
    #[serde(default, rename = "baseURL", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// 추가 속성 (런타임은 해석하지 않음)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_properties: Option<Value>,
}

impl PluginManifest {
    /// 새 매니페스트 생성
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: BTreeMap::new(),
            optional_dependencies: BTreeMap::new(),
            extensions: vec![],
            build_hash: None,
            base_url: None,
            custom_properties: None,
        }
    }

    /// JSON 값에서 파싱
    pub fn from_json(value: Value) -> Result<Self, ManifestError> {
        serde_json::from_value(value).map_err(|e| ManifestError::Parse(e.to_string()))
    }

    /// 빌더 패턴: 의존성 추가
    pub fn with_dependency(mut self, name: impl Into<String>, range: impl Into<String>) -> Self {
        self.dependencies.insert(name.into(), range.into());
        self
    }

    /// 빌더 패턴: 선택적 의존성 추가
    pub fn with_optional_dependency(
        mut self,
        name: impl Into<String>,
        range: impl Into<String>,
    ) -> Self {
        self.optional_dependencies.insert(name.into(), range.into());
        self
    }

    /// 빌더 패턴: Extension 추가
    pub fn with_extension(mut self, extension: ExtensionDeclaration) -> Self {
        self.extensions.push(extension);
        self
    }

    /// 빌더 패턴: 빌드 해시 설정
    pub fn with_build_hash(mut self, build_hash: impl Into<String>) -> Self {
        self.build_hash = Some(build_hash.into());
        self
    }

    /// 런타임 불변식 검사
    pub fn validate(&self) -> Result<(), ManifestError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ManifestError::EmptyName);
        }

        self.semver()?;
        let requirements = self.requirements()?;

        if requirements.iter().any(|req| req.name == name) {
            return Err(ManifestError::SelfDependency(self.name.clone()));
        }

        for (index, extension) in self.extensions.iter().enumerate() {
            if extension.extension_type.trim().is_empty() {
                return Err(ManifestError::EmptyExtensionType(index));
            }
        }

        Ok(())
    }

    /// 파싱된 semver 버전
    pub fn semver(&self) -> Result<Version, ManifestError> {
        Version::parse(self.version.trim())
            .map_err(|_| ManifestError::InvalidVersion(self.version.clone()))
    }

    /// 필수 + 선택 의존성을 파싱된 요구사항으로 변환
    ///
    /// 같은 이름이 양쪽에 있으면 필수 의존성이 우선합니다.
    pub fn requirements(&self) -> Result<Vec<DependencyRequirement>, ManifestError> {
        let mut requirements = Vec::new();

        for (name, range) in &self.dependencies {
            requirements.push(parse_requirement(name, range, false)?);
        }
        for (name, range) in &self.optional_dependencies {
            if self.dependencies.contains_key(name) {
                continue;
            }
            requirements.push(parse_requirement(name, range, true)?);
        }

        Ok(requirements)
    }
}

fn parse_requirement(
    name: &str,
    range: &str,
    optional: bool,
) -> Result<DependencyRequirement, ManifestError> {
    let parsed = VersionRange::parse(range).map_err(|_| ManifestError::InvalidDependencyRange {
        name: name.to_string(),
        range: range.to_string(),
    })?;

    Ok(DependencyRequirement {
        name: name.to_string(),
        range: parsed,
        optional,
    })
}
