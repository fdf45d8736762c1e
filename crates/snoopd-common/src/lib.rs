//! # snoopd-common
//!
//! Shared types, error taxonomy, path resolution, configuration and logging
//! setup for the snoopd interception daemon.
//!
//! ## Core types
//!
//! - [`model::CapturedRequest`] / [`model::RequestCore`]: the request/response record
//! - [`model::Session`]: a shell-scoped capture session
//! - [`model::InterceptorEvent`]: one entry in the interceptor event log
//! - [`paths::ProjectPaths`]: resolves the project data directory and its children
//! - [`config::Config`]: the daemon's defaulted, tolerant configuration
//! - [`error::SnoopdError`]: the unified error type

pub mod config;
pub mod content_type;
pub mod error;
pub mod logging;
pub mod model;
pub mod paths;

pub use error::{Result, SnoopdError};

/// Header names used to carry session identity across the proxy boundary (spec §6).
pub const SESSION_ID_HEADER: &str = "x-procsi-internal-session-id";
pub const SESSION_TOKEN_HEADER: &str = "x-procsi-internal-session-token";
pub const REPLAY_TOKEN_HEADER: &str = "x-procsi-internal-replay-token";

/// Hop-by-hop headers stripped before storing and before forwarding (spec §4.5).
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
];

pub fn is_hop_by_hop(header_name: &str) -> bool {
    let lower = header_name.to_ascii_lowercase();
    HOP_BY_HOP_HEADERS.contains(&lower.as_str()) || lower.starts_with("proxy-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_hop_by_hop_headers() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("Proxy-Foo"));
        assert!(!is_hop_by_hop("content-type"));
    }
}
