use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snoopd_common::model::{BodyTarget, RequestFilter, RequestSummary};
use snoopd_common::Result;

/// The plain request view handed to a plugin's `match`/`handle` functions.
/// Bodies cross the script boundary base64-encoded since rhai's `Blob` type
/// does not round-trip cleanly through `serde`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRequest {
    pub id: String,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body_base64: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PluginResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body_base64: Option<String>,
}

/// Performs the real upstream call for a `forward()` invocation from within
/// a plugin handler. Implemented by the proxy; called from the blocking
/// thread the script runs on.
pub trait Forwarder: Send + Sync {
    fn forward(&self, request: &PluginRequest) -> Result<PluginResponse>;
}

/// Read-only capture-store handle exposed to plugins (spec §4.4 "capture client").
pub trait CaptureClient: Send + Sync {
    fn count(&self, filter: RequestFilter) -> Result<u64>;
    fn list_summaries(&self, filter: RequestFilter, limit: usize, offset: usize) -> Result<Vec<RequestSummary>>;
    fn search_bodies(
        &self,
        query: String,
        target: BodyTarget,
        filter: RequestFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RequestSummary>>;
}
