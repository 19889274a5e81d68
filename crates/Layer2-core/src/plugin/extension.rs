//! Extension - 디코딩된 Extension과 속성 트리

use super::code_ref::CodeRef;
use super::entry::ExportValue;
use super::manifest::ExtensionFlags;
use serde_json::{Number, Value};
use std::collections::BTreeMap;

// ============================================================================
// PropertyValue
// ============================================================================

/// Extension 속성 트리 (태그 값)
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Sequence(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
    /// 디코딩된 코드 참조 (아직 해석 전)
    CodeRef(CodeRef),
    /// 해석된 export 값
    Export(ExportValue),
    /// 해석 실패 슬롯
    Undefined,
}

impl PropertyValue {
    /// 맵 키 조회
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        match self {
            Self::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// 점(`.`)으로 구분된 경로 조회 (시퀀스는 인덱스)
    pub fn pointer(&self, path: &str) -> Option<&PropertyValue> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| match node {
                Self::Map(map) => map.get(segment),
                Self::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_export(&self) -> Option<&ExportValue> {
        match self {
            Self::Export(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_code_ref(&self) -> Option<&CodeRef> {
        match self {
            Self::CodeRef(code_ref) => Some(code_ref),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// 트리 안의 코드 참조 개수
    pub fn code_ref_count(&self) -> usize {
        match self {
            Self::CodeRef(_) => 1,
            Self::Sequence(items) => items.iter().map(Self::code_ref_count).sum(),
            Self::Map(map) => map.values().map(Self::code_ref_count).sum(),
            _ => 0,
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

// ============================================================================
// Extension
// ============================================================================

/// 로드된 플러그인이 기여하는 Extension
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    /// 타입 태그
    pub extension_type: String,

    /// 디코딩된 속성
    pub properties: PropertyValue,

    /// 활성화 조건
    pub flags: ExtensionFlags,

    /// `pluginName[index]_buildHash`
    pub uid: String,

    /// 소속 플러그인
    pub plugin_name: String,
}

impl Extension {
    /// UID 생성
    pub fn make_uid(plugin_name: &str, index: usize, build_hash: &str) -> String {
        format!("{plugin_name}[{index}]_{build_hash}")
    }

    /// 기능 플래그 조건 확인
    ///
    /// 맵에 없는 플래그는 true도 false도 아니므로 두 조건 모두 실패합니다.
    pub fn is_allowed_by(&self, flags: &BTreeMap<String, bool>) -> bool {
        self.flags
            .required
            .iter()
            .all(|flag| flags.get(flag) == Some(&true))
            && self
                .flags
                .disallowed
                .iter()
                .all(|flag| flags.get(flag) == Some(&false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extension(flags: ExtensionFlags) -> Extension {
        Extension {
            extension_type: "app.page".into(),
            properties: PropertyValue::Null,
            flags,
            uid: Extension::make_uid("foo", 0, "abc"),
            plugin_name: "foo".into(),
        }
    }

    #[test]
    fn test_from_json() {
        let value = PropertyValue::from(json!({
            "path": "/foo",
            "exact": true,
            "items": [1, "two", null]
        }));

        assert_eq!(value.get("path").and_then(|v| v.as_str()), Some("/foo"));
        assert_eq!(value.get("exact"), Some(&PropertyValue::Bool(true)));
        assert_eq!(value.pointer("items.1"), Some(&PropertyValue::from("two")));
        assert_eq!(value.pointer("items.2"), Some(&PropertyValue::Null));
        assert!(value.pointer("items.9").is_none());
        assert_eq!(value.code_ref_count(), 0);
    }

    #[test]
    fn test_uid_format() {
        assert_eq!(Extension::make_uid("foo", 2, "abc123"), "foo[2]_abc123");
    }

    #[test]
    fn test_flag_gating() {
        let mut flags = BTreeMap::new();
        flags.insert("A".to_string(), true);
        flags.insert("B".to_string(), false);

        assert!(extension(ExtensionFlags::new()).is_allowed_by(&flags));
        assert!(extension(ExtensionFlags::new().require("A").disallow("B")).is_allowed_by(&flags));
        assert!(!extension(ExtensionFlags::new().require("B")).is_allowed_by(&flags));
        assert!(!extension(ExtensionFlags::new().disallow("A")).is_allowed_by(&flags));
    }

    #[test]
    fn test_missing_flag_fails_both_tests() {
        let flags = BTreeMap::new();
        assert!(!extension(ExtensionFlags::new().require("C")).is_allowed_by(&flags));
        assert!(!extension(ExtensionFlags::new().disallow("C")).is_allowed_by(&flags));
    }
}
