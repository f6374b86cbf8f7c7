//! Version normalization and comparison (spec §9 open question, pinned in
//! `SPEC_FULL.md`): strip known prefixes, parse as semver, fall back to a
//! two-component tuple compare when a tool's version output isn't strict
//! semver.

use std::cmp::Ordering;

use semver::Version;

/// Prefixes stripped before attempting a semver parse. Ordered so longer,
/// more specific prefixes are tried first.
const KNOWN_PREFIXES: &[&str] = &["Apple clang ", "go version go", "go", "v", "version "];

/// A version string reduced to either a full semver or a `(major, minor)`
/// fallback pair, per spec §4.2's stated two-component fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedVersion {
    Semver(Version),
    Tuple(u64, u64),
}

fn strip_known_prefix(raw: &str) -> &str {
    let trimmed = raw.trim();
    for prefix in KNOWN_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim();
        }
    }
    trimmed
}

/// Pulls the first run of `\d+(\.\d+)*` out of a string, e.g.
/// `"Python 3.11.4"` -> `"3.11.4"`, `"kubectl v1.29.2+abcdef"` -> `"1.29.2"`.
fn extract_numeric_run(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    let mut start = None;
    let mut end = 0;
    for (i, b) in bytes.iter().enumerate() {
        let is_version_char = b.is_ascii_digit() || *b == b'.';
        if is_version_char {
            if start.is_none() {
                start = Some(i);
            }
            end = i + 1;
        } else if start.is_some() {
            break;
        }
    }
    start.map(|st| &s[st..end])
}

pub fn normalize(raw: &str) -> Option<NormalizedVersion> {
    let stripped = strip_known_prefix(raw);
    let candidate = extract_numeric_run(stripped)?;
    let candidate = candidate.trim_end_matches('.');
    if candidate.is_empty() {
        return None;
    }

    let semver_candidate = match candidate.matches('.').count() {
        0 => format!("{candidate}.0.0"),
        1 => format!("{candidate}.0"),
        _ => candidate.to_string(),
    };
    if let Ok(v) = Version::parse(&semver_candidate) {
        return Some(NormalizedVersion::Semver(v));
    }

    let mut parts = candidate.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some(NormalizedVersion::Tuple(major, minor))
}

fn as_tuple(v: &NormalizedVersion) -> (u64, u64, u64) {
    match v {
        NormalizedVersion::Semver(sv) => (sv.major, sv.minor, sv.patch),
        NormalizedVersion::Tuple(maj, min) => (*maj, *min, 0),
    }
}

pub fn compare(a: &NormalizedVersion, b: &NormalizedVersion) -> Ordering {
    as_tuple(a).cmp(&as_tuple(b))
}

pub fn gte(raw: &str, floor: &str) -> bool {
    match (normalize(raw), normalize(floor)) {
        (Some(a), Some(b)) => compare(&a, &b) != Ordering::Less,
        _ => false,
    }
}

pub fn in_range(raw: &str, floor: &str, ceiling: &str) -> bool {
    match (normalize(raw), normalize(floor), normalize(ceiling)) {
        (Some(a), Some(lo), Some(hi)) => {
            compare(&a, &lo) != Ordering::Less && compare(&a, &hi) != Ordering::Greater
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_strict_semver() {
        assert_eq!(
            normalize("1.29.2"),
            Some(NormalizedVersion::Semver(Version::new(1, 29, 2)))
        );
    }

    #[test]
    fn strips_go_prefix() {
        assert_eq!(
            normalize("go version go1.22.5 linux/amd64"),
            Some(NormalizedVersion::Semver(Version::new(1, 22, 5)))
        );
    }

    #[test]
    fn strips_v_prefix() {
        assert_eq!(
            normalize("v1.29.2+abcdef"),
            Some(NormalizedVersion::Semver(Version::new(1, 29, 2)))
        );
    }

    #[test]
    fn falls_back_to_two_component_tuple() {
        // Four dotted components never parse as semver (major.minor.patch
        // only), so these fall through to the tuple comparison.
        assert_eq!(normalize("3.11.2.1"), Some(NormalizedVersion::Tuple(3, 11)));
        assert_eq!(normalize("2024.12.1.5"), Some(NormalizedVersion::Tuple(2024, 12)));
    }

    #[test]
    fn unparsable_returns_none() {
        assert_eq!(normalize("unknown"), None);
    }

    #[test]
    fn gte_compares_mixed_normalized_forms() {
        assert!(gte("1.29.2", "1.28.0"));
        assert!(gte("3.11", "3.10"));
        assert!(!gte("3.9", "3.10"));
    }

    #[test]
    fn in_range_is_inclusive() {
        assert!(in_range("1.29.2", "1.28.0", "1.30.0"));
        assert!(!in_range("1.31.0", "1.28.0", "1.30.0"));
    }
}
