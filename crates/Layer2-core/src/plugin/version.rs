//! Version Range - npm 스타일 버전 범위와 prerelease 포함 매칭
//!
//! 지원 문법: `*`, `1.2.3`, `>=1.0.0 <2.0.0`, `~1.2`, `^1.2.3`, `1.x`,
//! `1.0.0 - 2.0.0`, `^1.0.0 || ^2.0.0`

use semver::{Comparator, Op, Version, VersionReq};
use std::fmt;
use std::str::FromStr;

/// 버전 범위 파싱 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version range '{range}': {reason}")]
pub struct RangeParseError {
    pub range: String,
    pub reason: String,
}

/// 파싱된 버전 범위 (`||`로 연결된 대안들)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// 범위 문자열 파싱
    pub fn parse(raw: &str) -> Result<Self, RangeParseError> {
        let mut alternatives = Vec::new();

        for alternative in raw.split("||") {
            let normalized = normalize_alternative(alternative).map_err(|reason| {
                RangeParseError {
                    range: raw.to_string(),
                    reason,
                }
            })?;
            let req = VersionReq::parse(&normalized).map_err(|e| RangeParseError {
                range: raw.to_string(),
                reason: e.to_string(),
            })?;
            alternatives.push(req);
        }

        Ok(Self {
            raw: raw.trim().to_string(),
            alternatives,
        })
    }

    /// 원본 문자열
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 버전이 범위를 만족하는지 확인
    ///
    /// prerelease 버전도 일반 semver 우선순위로 각 comparator와 비교합니다.
    /// (`1.0.0-beta`는 `>=0.9.0`을 만족하고 `^1.0.0`은 만족하지 않음)
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| {
            req.comparators
                .iter()
                .all(|cmp| matches_comparator(cmp, version))
        })
    }
}

impl FromStr for VersionRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// 한 대안을 `semver::VersionReq` 문법(쉼표 구분)으로 변환
fn normalize_alternative(alternative: &str) -> Result<String, String> {
    let trimmed = alternative.trim();
    if trimmed.is_empty() || trimmed == "x" || trimmed == "X" {
        return Ok("*".to_string());
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();

    // 하이픈 범위: "A - B" => ">=A, <=B"
    if tokens.len() == 3 && tokens[1] == "-" {
        return Ok(format!(
            ">={}, <={}",
            strip_v(tokens[0]),
            strip_v(tokens[2])
        ));
    }

    // 연산자만 떨어져 있는 토큰(">= 1.0.0")은 다음 토큰과 합침
    let mut comparators = Vec::new();
    let mut pending_op: Option<&str> = None;
    for token in tokens {
        if token == "-" {
            return Err("hyphen range must have exactly one lower and one upper bound".into());
        }
        if is_operator(token) {
            if pending_op.is_some() {
                return Err(format!("dangling operator before '{token}'"));
            }
            pending_op = Some(token);
            continue;
        }
        let comparator = match pending_op.take() {
            Some(op) => format!("{op}{}", strip_v(token)),
            None => strip_operator_v(token),
        };
        comparators.push(comparator);
    }
    if let Some(op) = pending_op {
        return Err(format!("operator '{op}' has no version"));
    }

    Ok(comparators.join(", "))
}

fn is_operator(token: &str) -> bool {
    matches!(token, "=" | ">" | ">=" | "<" | "<=" | "~" | "^")
}

fn strip_v(token: &str) -> &str {
    token
        .strip_prefix('v')
        .or_else(|| token.strip_prefix('V'))
        .unwrap_or(token)
}

/// `>=v1.2.3` 처럼 연산자 뒤에 붙은 `v` 제거
///
/// 연산자 없는 버전은 npm처럼 정확 매칭(`=`)으로 취급합니다.
/// semver 크레이트는 이를 `^`로 해석하기 때문입니다.
fn strip_operator_v(token: &str) -> String {
    let op_len = token
        .char_indices()
        .find(|(_, c)| !matches!(c, '=' | '>' | '<' | '~' | '^'))
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    let (op, rest) = token.split_at(op_len);
    let rest = strip_v(rest);

    if op.is_empty() && !has_wildcard(rest) {
        return format!("={rest}");
    }
    format!("{op}{rest}")
}

fn has_wildcard(version: &str) -> bool {
    let core = version.split(['-', '+']).next().unwrap_or(version);
    core.split('.')
        .any(|part| matches!(part, "*" | "x" | "X"))
}

// ============================================================================
// Comparator 매칭 (prerelease 제한 없음)
// ============================================================================

fn matches_comparator(cmp: &Comparator, ver: &Version) -> bool {
    match cmp.op {
        Op::Exact | Op::Wildcard => matches_exact(cmp, ver),
        Op::Greater => matches_greater(cmp, ver),
        Op::GreaterEq => matches_exact(cmp, ver) || matches_greater(cmp, ver),
        Op::Less => matches_less(cmp, ver),
        Op::LessEq => matches_exact(cmp, ver) || matches_less(cmp, ver),
        Op::Tilde => matches_tilde(cmp, ver),
        Op::Caret => matches_caret(cmp, ver),
        _ => false,
    }
}

fn matches_exact(cmp: &Comparator, ver: &Version) -> bool {
    if ver.major != cmp.major {
        return false;
    }
    if let Some(minor) = cmp.minor {
        if ver.minor != minor {
            return false;
        }
    }
    match cmp.patch {
        Some(patch) => ver.patch == patch && ver.pre == cmp.pre,
        // 부분 버전(`1.x`, `1.2`)은 prerelease와 무관하게 매칭
        None => true,
    }
}

fn matches_greater(cmp: &Comparator, ver: &Version) -> bool {
    if ver.major != cmp.major {
        return ver.major > cmp.major;
    }
    match cmp.minor {
        None => return false,
        Some(minor) => {
            if ver.minor != minor {
                return ver.minor > minor;
            }
        }
    }
    match cmp.patch {
        None => return false,
        Some(patch) => {
            if ver.patch != patch {
                return ver.patch > patch;
            }
        }
    }
    ver.pre > cmp.pre
}

fn matches_less(cmp: &Comparator, ver: &Version) -> bool {
    if ver.major != cmp.major {
        return ver.major < cmp.major;
    }
    match cmp.minor {
        None => return false,
        Some(minor) => {
            if ver.minor != minor {
                return ver.minor < minor;
            }
        }
    }
    match cmp.patch {
        None => return false,
        Some(patch) => {
            if ver.patch != patch {
                return ver.patch < patch;
            }
        }
    }
    ver.pre < cmp.pre
}

fn matches_tilde(cmp: &Comparator, ver: &Version) -> bool {
    if ver.major != cmp.major {
        return false;
    }
    if let Some(minor) = cmp.minor {
        if ver.minor != minor {
            return false;
        }
    }
    if let Some(patch) = cmp.patch {
        if ver.patch != patch {
            return ver.patch > patch;
        }
    }
    ver.pre >= cmp.pre
}

fn matches_caret(cmp: &Comparator, ver: &Version) -> bool {
    if ver.major != cmp.major {
        return false;
    }

    let minor = match cmp.minor {
        None => return true,
        Some(minor) => minor,
    };

    let patch = match cmp.patch {
        None => {
            return if cmp.major > 0 {
                ver.minor >= minor
            } else {
                ver.minor == minor
            };
        }
        Some(patch) => patch,
    };

    if cmp.major > 0 {
        if ver.minor != minor {
            return ver.minor > minor;
        } else if ver.patch != patch {
            return ver.patch > patch;
        }
    } else if minor > 0 {
        if ver.minor != minor {
            return false;
        } else if ver.patch != patch {
            return ver.patch > patch;
        }
    } else if ver.minor != minor || ver.patch != patch {
        return false;
    }

    ver.pre >= cmp.pre
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn matches(range: &str, version: &str) -> bool {
        VersionRange::parse(range).unwrap().matches(&v(version))
    }

    #[test]
    fn test_tilde_range() {
        assert!(matches("~2.0.0", "2.0.1"));
        assert!(matches("~2.0.0", "2.0.0"));
        assert!(!matches("~2.0.0", "2.1.0"));
        assert!(!matches("~2.0.0", "5.0.0"));
    }

    #[test]
    fn test_caret_range() {
        assert!(matches("^1.2.3", "1.9.0"));
        assert!(!matches("^1.2.3", "2.0.0"));
        assert!(!matches("^0.2.3", "0.3.0"));
        assert!(matches("^0.2.3", "0.2.9"));
    }

    #[test]
    fn test_space_separated_conjunction() {
        assert!(matches(">=1.0.0 <2.0.0", "1.5.0"));
        assert!(!matches(">=1.0.0 <2.0.0", "2.0.0"));
        assert!(matches(">= 1.0.0 < 2.0.0", "1.0.0"));
    }

    #[test]
    fn test_hyphen_and_or_ranges() {
        assert!(matches("1.0.0 - 2.0.0", "2.0.0"));
        assert!(!matches("1.0.0 - 2.0.0", "2.0.1"));
        assert!(matches("^1.0.0 || ^3.0.0", "3.1.0"));
        assert!(!matches("^1.0.0 || ^3.0.0", "2.1.0"));
    }

    #[test]
    fn test_wildcards() {
        assert!(matches("*", "0.0.1"));
        assert!(matches("", "9.9.9"));
        assert!(matches("1.x", "1.4.2"));
        assert!(!matches("1.x", "2.0.0"));
    }

    #[test]
    fn test_prerelease_inclusive_matching() {
        assert!(matches(">=1.0.0", "1.1.0-rc.1"));
        assert!(matches("^4.0.0", "4.12.0-ec.3"));
        assert!(!matches("^1.0.0", "1.0.0-beta"));
        assert!(matches(">=1.0.0-alpha", "1.0.0-beta"));
        assert!(matches("1.x", "1.5.0-beta"));
    }

    #[test]
    fn test_bare_version_is_exact() {
        assert!(matches("1.2.3", "1.2.3"));
        assert!(!matches("1.2.3", "1.2.4"));
        assert!(matches("1.2", "1.2.7"));
        assert!(!matches("1.2", "1.3.0"));
    }

    #[test]
    fn test_leading_v_is_accepted() {
        assert!(matches("v1.2.3", "1.2.3"));
        assert!(matches(">=v1.2.3", "1.3.0"));
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(VersionRange::parse("not-a-range").is_err());
        assert!(VersionRange::parse(">=").is_err());
        assert!(VersionRange::parse("1.0.0 - ").is_err());
    }
}
