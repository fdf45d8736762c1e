use std::sync::Arc;

use base64::Engine as _;
use http_body_util::Full;
use hyper::body::Bytes;
use snoopd_common::model::{BodyTarget, RequestFilter, RequestSummary};
use snoopd_common::{is_hop_by_hop, Result, SnoopdError};
use snoopd_interceptor::{CaptureClient, Forwarder, PluginRequest, PluginResponse};
use snoopd_store::Store;

use crate::pool::UpstreamClient;

/// Bridges the interceptor runtime's synchronous capability traits to the
/// async store and upstream client. Methods here run on the blocking thread
/// the script itself executes on, so `Handle::block_on` is safe: it is never
/// called from a core async worker.
pub struct ProxyCaptureClient {
    store: Arc<Store>,
    handle: tokio::runtime::Handle,
}

impl ProxyCaptureClient {
    pub fn new(store: Arc<Store>, handle: tokio::runtime::Handle) -> Self {
        Self { store, handle }
    }
}

impl CaptureClient for ProxyCaptureClient {
    fn count(&self, filter: RequestFilter) -> Result<u64> {
        let store = self.store.clone();
        self.handle.clone().block_on(async move { store.count(filter).await })
    }

    fn list_summaries(&self, filter: RequestFilter, limit: usize, offset: usize) -> Result<Vec<RequestSummary>> {
        let store = self.store.clone();
        self.handle.clone().block_on(async move { store.list_summaries(filter, limit, offset).await })
    }

    fn search_bodies(
        &self,
        query: String,
        target: BodyTarget,
        filter: RequestFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RequestSummary>> {
        let store = self.store.clone();
        self.handle
            .clone()
            .block_on(async move { store.search_bodies(query, target, filter, limit, offset).await })
    }
}

pub struct ProxyForwarder {
    client: UpstreamClient,
    handle: tokio::runtime::Handle,
    max_body_size: usize,
}

impl ProxyForwarder {
    pub fn new(client: UpstreamClient, handle: tokio::runtime::Handle, max_body_size: usize) -> Self {
        Self { client, handle, max_body_size }
    }
}

impl Forwarder for ProxyForwarder {
    fn forward(&self, request: &PluginRequest) -> Result<PluginResponse> {
        let client = self.client.clone();
        let request = request.clone();
        let max_body_size = self.max_body_size;
        self.handle.clone().block_on(async move { send_upstream(&client, &request, max_body_size).await })
    }
}

async fn send_upstream(client: &UpstreamClient, request: &PluginRequest, max_body_size: usize) -> Result<PluginResponse> {
    let body = match &request.body_base64 {
        Some(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| SnoopdError::ProxyProtocol(format!("invalid body encoding: {e}")))?,
        None => Vec::new(),
    };

    let mut builder = hyper::Request::builder().method(request.method.as_str()).uri(&request.url);
    for (name, value) in &request.headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name, value);
        }
    }
    let upstream_request = builder
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| SnoopdError::ProxyProtocol(format!("invalid upstream request: {e}")))?;

    let response = client
        .send(upstream_request)
        .await
        .map_err(|e| SnoopdError::Upstream(e.to_string()))?;

    let status = response.status().as_u16();
    let mut headers = std::collections::BTreeMap::new();
    for (name, value) in response.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let (body_bytes, _truncated) = crate::body::read_capped(response.into_body(), max_body_size).await?;
    let body_base64 = if body_bytes.is_empty() {
        None
    } else {
        Some(base64::engine::general_purpose::STANDARD.encode(&body_bytes))
    };

    Ok(PluginResponse { status, headers, body_base64 })
}
