//! Code Reference - 속성 트리 안의 지연 코드 참조
//!
//! 매니페스트의 `{ "ref": "<module>[.<export>]" }` 마커는 디코딩 시
//! [`CodeRef`] 접근자로 바뀌고, 해석은 실제로 필요할 때 비동기로 수행됩니다.

use super::entry::{EntryModule, ExportValue};
use super::error::CodeRefError;
use super::extension::{Extension, PropertyValue};
use futures::future::join_all;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

/// 마커 키
pub const CODE_REF_KEY: &str = "ref";

/// export 이름 기본값
pub const DEFAULT_EXPORT: &str = "default";

// ============================================================================
// CodeRef
// ============================================================================

struct CodeRefInner {
    token: String,
    entry: Arc<dyn EntryModule>,
    resolved: OnceCell<ExportValue>,
}

/// 디코딩된 코드 참조 접근자
///
/// 성공한 해석 결과는 인스턴스마다 캐시되고, 실패는 캐시되지 않습니다.
#[derive(Clone)]
pub struct CodeRef(Arc<CodeRefInner>);

impl CodeRef {
    pub fn new(token: impl Into<String>, entry: Arc<dyn EntryModule>) -> Self {
        Self(Arc::new(CodeRefInner {
            token: token.into(),
            entry,
            resolved: OnceCell::new(),
        }))
    }

    /// 원본 토큰 (`module.export`)
    pub fn token(&self) -> &str {
        &self.0.token
    }

    pub fn is_resolved(&self) -> bool {
        self.0.resolved.initialized()
    }

    /// 참조 해석
    pub async fn resolve(&self) -> Result<ExportValue, CodeRefError> {
        let inner = &self.0;
        inner
            .resolved
            .get_or_try_init(|| load_export(&inner.token, inner.entry.as_ref()))
            .await
            .cloned()
    }

    pub fn ptr_eq(&self, other: &CodeRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for CodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for CodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeRef")
            .field("token", &self.0.token)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// `module[.export]` 토큰 분해
///
/// 모듈은 첫 `.` 앞부분, export는 나머지 전체입니다.
/// 비어 있거나 공백뿐인 부분만 거부하며, 이름 안의 공백은 그대로 둡니다.
pub fn parse_token(token: &str) -> Result<(&str, &str), CodeRefError> {
    let (module, export) = match token.split_once('.') {
        Some((module, export)) => (module, export),
        None => (token, DEFAULT_EXPORT),
    };

    let malformed = |part: &str| part.trim().is_empty();
    if malformed(module) || malformed(export) {
        return Err(CodeRefError::MalformedToken(token.to_string()));
    }

    Ok((module, export))
}

async fn load_export(token: &str, entry: &dyn EntryModule) -> Result<ExportValue, CodeRefError> {
    let (module, export) = parse_token(token)?;

    let factory = entry
        .get(module)
        .await
        .map_err(|e| CodeRefError::ModuleLoad {
            module: module.to_string(),
            message: format!("{e:#}"),
        })?;

    let loaded = factory();
    let value = loaded
        .export(export)
        .cloned()
        .ok_or_else(|| CodeRefError::MissingExport {
            module: module.to_string(),
            export: export.to_string(),
        })?;

    trace!(module = %module, export = %export, "Code reference resolved");
    Ok(value)
}

// ============================================================================
// decode
// ============================================================================

/// 정확히 `{ "ref": "<string>" }` 형태인지 확인
fn as_marker(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get(CODE_REF_KEY).and_then(Value::as_str),
        _ => None,
    }
}

/// JSON 속성 트리를 디코딩 (마커 -> [`CodeRef`])
pub fn decode(value: &Value, entry: &Arc<dyn EntryModule>) -> PropertyValue {
    if let Some(token) = as_marker(value) {
        return PropertyValue::CodeRef(CodeRef::new(token, Arc::clone(entry)));
    }

    match value {
        Value::Array(items) => {
            PropertyValue::Sequence(items.iter().map(|item| decode(item, entry)).collect())
        }
        Value::Object(map) => PropertyValue::Map(
            map.iter()
                .map(|(key, item)| (key.clone(), decode(item, entry)))
                .collect(),
        ),
        other => PropertyValue::from(other.clone()),
    }
}

// ============================================================================
// resolve_all
// ============================================================================

/// 해석 결과 - 실패한 슬롯은 `Undefined`
#[derive(Debug, Clone)]
pub struct ResolvedProperties {
    pub tree: PropertyValue,
    pub errors: Vec<CodeRefError>,
}

impl ResolvedProperties {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

fn collect_refs(node: &PropertyValue, out: &mut Vec<CodeRef>) {
    match node {
        PropertyValue::CodeRef(code_ref) => out.push(code_ref.clone()),
        PropertyValue::Sequence(items) => items.iter().for_each(|item| collect_refs(item, out)),
        PropertyValue::Map(map) => map.values().for_each(|item| collect_refs(item, out)),
        _ => {}
    }
}

// collect_refs와 같은 순회 순서로 결과를 채움
fn fill_refs(node: &mut PropertyValue, results: &mut impl Iterator<Item = PropertyValue>) {
    match node {
        PropertyValue::CodeRef(_) => {
            if let Some(resolved) = results.next() {
                *node = resolved;
            }
        }
        PropertyValue::Sequence(items) => items.iter_mut().for_each(|item| fill_refs(item, results)),
        PropertyValue::Map(map) => map.values_mut().for_each(|item| fill_refs(item, results)),
        _ => {}
    }
}

/// 트리의 모든 코드 참조를 동시에 해석
///
/// 입력 트리는 변경하지 않으며, 실패해도 에러를 반환하지 않습니다.
pub async fn resolve_all(tree: &PropertyValue) -> ResolvedProperties {
    let mut refs = Vec::new();
    collect_refs(tree, &mut refs);

    let mut resolved_tree = tree.clone();
    if refs.is_empty() {
        return ResolvedProperties {
            tree: resolved_tree,
            errors: vec![],
        };
    }

    let outcomes = join_all(refs.iter().map(CodeRef::resolve)).await;

    let mut errors = Vec::new();
    let values: Vec<PropertyValue> = outcomes
        .into_iter()
        .zip(refs.iter())
        .map(|(outcome, code_ref)| match outcome {
            Ok(value) => PropertyValue::Export(value),
            Err(e) => {
                warn!(token = %code_ref.token(), error = %e, "Failed to resolve code reference");
                errors.push(e);
                PropertyValue::Undefined
            }
        })
        .collect();

    fill_refs(&mut resolved_tree, &mut values.into_iter());
    debug!(
        total = refs.len(),
        failed = errors.len(),
        "Resolved code references"
    );

    ResolvedProperties {
        tree: resolved_tree,
        errors,
    }
}

/// Extension 속성을 해석한 사본 반환
pub async fn resolve_extension(extension: &Extension) -> (Extension, Vec<CodeRefError>) {
    let ResolvedProperties { tree, errors } = resolve_all(&extension.properties).await;
    let mut resolved = extension.clone();
    resolved.properties = tree;
    (resolved, errors)
}
