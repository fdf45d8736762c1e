use regex::{Regex, RegexBuilder};
use snoopd_common::{Result, SnoopdError};

const MAX_PATTERN_LEN: usize = 512;

/// Builds a `Regex` from a user-supplied pattern, rejecting patterns whose
/// shape is known to cause catastrophic backtracking in backtracking regex
/// engines (nested or adjacent quantified groups), even though the `regex`
/// crate itself guarantees linear-time matching. Callers depend on this
/// rejection as a filter invariant, not just a performance safeguard.
pub fn validate_regex(pattern: &str, flags: Option<&str>) -> Result<Regex> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(SnoopdError::Store(format!(
            "regex pattern exceeds {MAX_PATTERN_LEN} bytes"
        )));
    }
    if looks_catastrophic(pattern) {
        return Err(SnoopdError::Store(
            "regex pattern is catastrophically back-trackable".to_string(),
        ));
    }

    let mut builder = RegexBuilder::new(pattern);
    builder.size_limit(1 << 20);
    if let Some(flags) = flags {
        for flag in flags.chars() {
            match flag {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                _ => {
                    return Err(SnoopdError::Store(format!("unknown regex flag: {flag}")));
                }
            }
        }
    }
    builder
        .build()
        .map_err(|e| SnoopdError::Store(format!("invalid regex: {e}")))
}

/// Scans for a quantified group immediately adjacent to another quantifier,
/// e.g. `(a+)+`, `(a*)+`, `([^x]*)*` — the classic exponential-blowup shapes.
fn looks_catastrophic(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    let quantifier = |b: u8| b == b'+' || b == b'*';

    for i in 0..bytes.len() {
        if bytes[i] != b')' {
            continue;
        }
        let inner_quantified = i > 0 && quantifier(bytes[i - 1]);
        let outer_quantified = i + 1 < bytes.len() && quantifier(bytes[i + 1]);
        if inner_quantified && outer_quantified {
            return true;
        }
        // `(a+){2,}` style bounded-but-large repetition of an already
        // quantified group is just as pathological.
        if inner_quantified && bytes.get(i + 1) == Some(&b'{') {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_patterns() {
        assert!(validate_regex(r"^/api/v\d+/users$", None).is_ok());
    }

    #[test]
    fn rejects_nested_quantifiers() {
        assert!(validate_regex(r"(a+)+$", None).is_err());
        assert!(validate_regex(r"(a*)*$", None).is_err());
        assert!(validate_regex(r"([^/]+)+", None).is_err());
    }

    #[test]
    fn rejects_overlong_patterns() {
        let pattern = "a".repeat(MAX_PATTERN_LEN + 1);
        assert!(validate_regex(&pattern, None).is_err());
    }

    #[test]
    fn applies_case_insensitive_flag() {
        let re = validate_regex("hello", Some("i")).unwrap();
        assert!(re.is_match("HELLO"));
    }
}
