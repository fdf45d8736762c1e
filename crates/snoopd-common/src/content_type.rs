//! Content-type classification shared between the store and body search (spec §6).

const TEXT_PREFIXES: &[&str] = &["text/"];
const TEXT_EXACT: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-www-form-urlencoded",
    "application/xhtml+xml",
    "application/ld+json",
    "application/manifest+json",
    "application/x-javascript",
];
const TEXT_SUFFIXES: &[&str] = &["+json", "+xml", "+html", "+text"];

const JSON_EXACT: &[&str] = &[
    "application/json",
    "application/ld+json",
    "application/manifest+json",
];
const JSON_SUFFIX: &str = "+json";

/// Strip parameters (`;charset=...`) and lower-case a raw content-type header value.
pub fn normalize(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

pub fn is_text(content_type: &str) -> bool {
    let ct = normalize(content_type);
    TEXT_EXACT.contains(&ct.as_str())
        || TEXT_PREFIXES.iter().any(|p| ct.starts_with(p))
        || TEXT_SUFFIXES.iter().any(|s| ct.ends_with(s))
}

pub fn is_json(content_type: &str) -> bool {
    let ct = normalize(content_type);
    JSON_EXACT.contains(&ct.as_str()) || ct.ends_with(JSON_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_params() {
        assert_eq!(normalize("Application/JSON; charset=utf-8"), "application/json");
    }

    #[test]
    fn classifies_text_types() {
        assert!(is_text("text/plain"));
        assert!(is_text("application/json"));
        assert!(is_text("application/vnd.api+json"));
        assert!(!is_text("image/png"));
    }

    #[test]
    fn classifies_json_types() {
        assert!(is_json("application/json"));
        assert!(is_json("application/ld+json"));
        assert!(is_json("application/vnd.api+json"));
        assert!(!is_json("text/plain"));
        assert!(!is_json("application/xml"));
    }
}
