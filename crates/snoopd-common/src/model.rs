//! Core data model shared by the store, interceptor runtime, proxy and
//! control server (spec §3).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Request/response header map. Multi-valued headers are joined with `", "`
/// at capture time, matching the wire convention used for display/search.
pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub label: Option<String>,
    pub source: Option<String>,
    pub pid: u32,
    pub started_at: i64,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptionType {
    Modified,
    Mocked,
}

impl InterceptionType {
    pub fn as_str(self) -> &'static str {
        match self {
            InterceptionType::Modified => "modified",
            InterceptionType::Mocked => "mocked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "modified" => Some(InterceptionType::Modified),
            "mocked" => Some(InterceptionType::Mocked),
            _ => None,
        }
    }
}

/// The fields known at the time a request is first received, before any
/// response exists. This is the input to `Store::save_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCore {
    pub session_id: String,
    pub timestamp: i64,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub request_headers: Headers,
    pub request_body: Option<Vec<u8>>,
    pub request_body_truncated: bool,
    pub request_content_type: Option<String>,
    pub replayed_from_id: Option<String>,
    pub replay_initiator: Option<String>,
    pub source: Option<String>,
}

/// The response-side fields filled in by `Store::update_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseUpdate {
    pub status: u16,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
    pub body_truncated: bool,
    pub content_type: Option<String>,
    pub duration_ms: u64,
    pub intercepted_by: Option<String>,
    pub interception_type: Option<InterceptionType>,
}

/// One full captured request/response pair (spec §3 `CapturedRequest`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub id: String,
    pub session_id: String,
    pub timestamp: i64,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub request_headers: Headers,
    pub request_body: Option<Vec<u8>>,
    pub request_body_truncated: bool,
    pub request_content_type: Option<String>,
    pub response_status: Option<u16>,
    pub response_headers: Option<Headers>,
    pub response_body: Option<Vec<u8>>,
    pub response_body_truncated: bool,
    pub response_content_type: Option<String>,
    pub duration_ms: Option<u64>,
    pub intercepted_by: Option<String>,
    pub interception_type: Option<InterceptionType>,
    pub replayed_from_id: Option<String>,
    pub replay_initiator: Option<String>,
    pub saved: bool,
    pub source: Option<String>,
}

/// Projection of `CapturedRequest` without bodies, used for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub id: String,
    pub session_id: String,
    pub timestamp: i64,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub response_status: Option<u16>,
    pub duration_ms: Option<u64>,
    pub intercepted_by: Option<String>,
    pub interception_type: Option<InterceptionType>,
    pub replayed_from_id: Option<String>,
    pub saved: bool,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyTarget {
    Request,
    Response,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderTarget {
    Request,
    Response,
    Both,
}

/// Status filter: an exact code, an `Nxx` bucket (e.g. `2` for 2xx), or an
/// inclusive `lo..=hi` range (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusRange {
    Exact(u16),
    Bucket(u16),
    Range(u16, u16),
}

impl StatusRange {
    pub fn matches(self, status: u16) -> bool {
        match self {
            StatusRange::Exact(code) => status == code,
            StatusRange::Bucket(bucket) => status / 100 == bucket,
            StatusRange::Range(lo, hi) => status >= lo && status <= hi,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestFilter {
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub status_range: Option<StatusRange>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub regex_flags: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub before: Option<i64>,
    #[serde(default)]
    pub header_name: Option<String>,
    #[serde(default)]
    pub header_value: Option<String>,
    #[serde(default)]
    pub header_target: Option<HeaderTarget>,
    #[serde(default)]
    pub intercepted_by: Option<String>,
    #[serde(default)]
    pub saved: Option<bool>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Matched,
    Mocked,
    Modified,
    Observed,
    Loaded,
    Reload,
    UserLog,
    MatchTimeout,
    InvalidResponse,
    ForwardAfterComplete,
    MatchError,
    HandlerError,
    HandlerTimeout,
    LoadError,
}

impl EventType {
    pub fn level(self) -> EventLevel {
        use EventType::*;
        match self {
            Matched | Mocked | Modified | Observed | Loaded | Reload | UserLog => EventLevel::Info,
            MatchTimeout | InvalidResponse | ForwardAfterComplete => EventLevel::Warn,
            MatchError | HandlerError | HandlerTimeout | LoadError => EventLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptorEvent {
    pub seq: i64,
    pub timestamp: i64,
    pub event_type: EventType,
    pub level: EventLevel,
    pub interceptor: Option<String>,
    pub message: String,
    pub request_id: Option<String>,
    pub request_url: Option<String>,
    pub request_method: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub after_seq: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub level: Option<EventLevel>,
    #[serde(default)]
    pub interceptor: Option<String>,
}

/// Milliseconds since the Unix epoch, matching every timestamp in this system.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_range_matches() {
        assert!(StatusRange::Exact(404).matches(404));
        assert!(!StatusRange::Exact(404).matches(403));
        assert!(StatusRange::Bucket(2).matches(204));
        assert!(!StatusRange::Bucket(2).matches(304));
        assert!(StatusRange::Range(200, 299).matches(250));
        assert!(!StatusRange::Range(200, 299).matches(300));
    }

    #[test]
    fn event_type_levels_match_spec() {
        assert_eq!(EventType::Matched.level(), EventLevel::Info);
        assert_eq!(EventType::MatchTimeout.level(), EventLevel::Warn);
        assert_eq!(EventType::HandlerTimeout.level(), EventLevel::Error);
    }
}
