//! Daemon configuration (spec §4.8/§6): loaded once from `config.json`,
//! defaulted so a missing or empty file is valid, and tolerant of unknown
//! or malformed keys — a broken config must never block capture.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Required,
    Optional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub max_stored_requests: u64,
    pub max_body_size: u64,
    pub max_log_size: u64,
    pub poll_interval_ms: u64,
    pub match_timeout_ms: u64,
    pub handler_timeout_ms: u64,
    pub leaf_cert_cache: usize,
    pub event_log_capacity: usize,
    pub auth_mode: AuthMode,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_stored_requests: 10_000,
            max_body_size: 10 * 1024 * 1024,
            max_log_size: 10 * 1024 * 1024,
            poll_interval_ms: 2_000,
            match_timeout_ms: 250,
            handler_timeout_ms: 30_000,
            leaf_cert_cache: 512,
            event_log_capacity: 5_000,
            auth_mode: AuthMode::Required,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a `config.json` file, defaulting any field
    /// that is missing, has the wrong shape, or is out of range. Never fails:
    /// an unreadable or unparsable file simply yields [`Config::default`].
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        let value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(_) => return Self::default(),
        };
        Self::from_value(&value)
    }

    fn from_value(value: &Value) -> Self {
        let mut cfg = Self::default();
        let Some(obj) = value.as_object() else {
            return cfg;
        };

        if let Some(v) = positive_u64(obj.get("max_stored_requests")) {
            cfg.max_stored_requests = v;
        }
        if let Some(v) = positive_u64(obj.get("max_body_size")) {
            cfg.max_body_size = v;
        }
        if let Some(v) = positive_u64(obj.get("max_log_size")) {
            cfg.max_log_size = v;
        }
        if let Some(v) = positive_u64(obj.get("poll_interval")) {
            cfg.poll_interval_ms = v;
        }
        if let Some(v) = positive_u64(obj.get("match_timeout_ms")) {
            cfg.match_timeout_ms = v;
        }
        if let Some(v) = positive_u64(obj.get("handler_timeout_ms")) {
            cfg.handler_timeout_ms = v;
        }
        if let Some(v) = positive_u64(obj.get("leaf_cert_cache")) {
            cfg.leaf_cert_cache = v as usize;
        }
        if let Some(v) = positive_u64(obj.get("event_log_capacity")) {
            cfg.event_log_capacity = v as usize;
        }
        if let Some(Value::String(s)) = obj.get("auth_mode") {
            match s.as_str() {
                "required" => cfg.auth_mode = AuthMode::Required,
                "optional" => cfg.auth_mode = AuthMode::Optional,
                _ => {}
            }
        }
        if let Some(Value::String(s)) = obj.get("log_level") {
            if matches!(s.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
                cfg.log_level = s.clone();
            }
        }

        cfg
    }
}

fn positive_u64(value: Option<&Value>) -> Option<u64> {
    match value {
        Some(Value::Number(n)) => n.as_u64().filter(|v| *v > 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(Path::new("/nonexistent/config.json"));
        assert_eq!(cfg.max_body_size, Config::default().max_body_size);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, r#"{{"max_body_size": 2048, "totally_unknown": true}}"#).unwrap();
        let cfg = Config::load(f.path());
        assert_eq!(cfg.max_body_size, 2048);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, r#"{{"max_body_size": "not a number", "auth_mode": "bogus"}}"#).unwrap();
        let cfg = Config::load(f.path());
        assert_eq!(cfg.max_body_size, Config::default().max_body_size);
        assert_eq!(cfg.auth_mode, AuthMode::Required);
    }

    #[test]
    fn negative_or_zero_bounds_are_rejected() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, r#"{{"max_stored_requests": 0}}"#).unwrap();
        let cfg = Config::load(f.path());
        assert_eq!(cfg.max_stored_requests, Config::default().max_stored_requests);
    }
}
