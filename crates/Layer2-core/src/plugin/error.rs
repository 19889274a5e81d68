//! Plugin Errors - 로드 실패와 코드 참조 실패 분류

use super::manifest::ManifestError;
use std::fmt;
use thiserror::Error;

// ============================================================================
// DependencyError
// ============================================================================

/// 의존성 하나의 충족 불가 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyIssue {
    /// 의존 대상 플러그인이 Failed 상태
    Failed { dependency: String },

    /// 해석된 버전이 요구 범위를 만족하지 않음
    VersionMismatch {
        dependency: String,
        required: String,
        found: String,
    },
}

impl DependencyIssue {
    pub fn dependency(&self) -> &str {
        match self {
            Self::Failed { dependency } | Self::VersionMismatch { dependency, .. } => dependency,
        }
    }
}

impl fmt::Display for DependencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { dependency } => write!(f, "{dependency} failed to load"),
            Self::VersionMismatch {
                dependency,
                required,
                found,
            } => write!(f, "{dependency}@{found} does not satisfy '{required}'"),
        }
    }
}

/// 의존성 해석 에러
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("unmet dependencies of {plugin}: {}", join_issues(.issues))]
    Unsatisfiable {
        plugin: String,
        issues: Vec<DependencyIssue>,
    },

    #[error("dependency resolution for {0} was abandoned")]
    Abandoned(String),
}

fn join_issues(issues: &[DependencyIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// EntryLoadError
// ============================================================================

/// 엔트리 모듈 준비 에러
#[derive(Debug, Error)]
pub enum EntryLoadError {
    #[error("entry provider failed for {plugin}")]
    Provider {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("entry provider completed without registering an entry for {0}")]
    ProtocolViolation(String),

    #[error("entry module init failed for {plugin}")]
    Init {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("plugin load panicked for {plugin}: {message}")]
    Panicked { plugin: String, message: String },
}

// ============================================================================
// PluginLoadError
// ============================================================================

/// 플러그인 로드 에러 (Failed 상태의 원인)
#[derive(Debug, Error)]
pub enum PluginLoadError {
    #[error("invalid plugin manifest")]
    Manifest(#[from] ManifestError),

    #[error("plugin dependencies are not satisfied")]
    DependencyUnmet(#[from] DependencyError),

    #[error("failed to load plugin entry module")]
    EntryLoad(#[from] EntryLoadError),

    #[error("no tokio runtime available to drive the load")]
    NoRuntime,
}

impl PluginLoadError {
    /// source 체인 전체를 한 줄로 포맷
    pub fn cause_chain(&self) -> String {
        let mut parts = Vec::new();
        let mut current: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(self);
        while let Some(err) = current {
            parts.push(err.to_string());
            current = err.source();
        }
        parts.join(": ")
    }
}

// ============================================================================
// CodeRefError
// ============================================================================

/// 코드 참조 하나의 해석 에러
#[derive(Debug, Clone, Error)]
pub enum CodeRefError {
    #[error("malformed code reference '{0}'")]
    MalformedToken(String),

    #[error("failed to load module '{module}': {message}")]
    ModuleLoad { module: String, message: String },

    #[error("module '{module}' has no export '{export}'")]
    MissingExport { module: String, export: String },
}
