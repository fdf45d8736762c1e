use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{HeaderMap, Request, Response, StatusCode};
use snoopd_common::model::{now_millis, InterceptionType, RequestCore, ResponseUpdate};
use snoopd_common::{content_type, is_hop_by_hop, SnoopdError, REPLAY_TOKEN_HEADER, SESSION_ID_HEADER, SESSION_TOKEN_HEADER};
use snoopd_interceptor::{CaptureClient, DispatchOutcome, Forwarder, InterceptorRuntime, PluginRequest, PluginResponse};
use snoopd_store::Store;
use tracing::{error, warn};

use crate::pool::{UpstreamBody, UpstreamClient};
use crate::session::SessionRegistry;

/// Shared, long-lived handles needed to service one exchange. Built once at
/// startup and cloned cheaply per connection.
pub struct ProxyContext {
    pub store: Arc<Store>,
    pub runtime: Arc<InterceptorRuntime>,
    pub client: UpstreamClient,
    pub sessions: Arc<SessionRegistry>,
    pub forwarder: Arc<dyn Forwarder>,
    pub capture: Arc<dyn CaptureClient>,
    pub max_body_size: usize,
    pub auth_required: bool,
    pub replay_token: String,
    pub event_log_capacity: usize,
}

/// A fully-materialized response: the exchange always buffers the whole body
/// (up to the cap) for capture, so there is no benefit to streaming it back out.
pub(crate) struct RawResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub body_truncated: bool,
}

/// Everything needed to run one request through capture, dispatch, and
/// response recording, independent of where it came from: a live connection
/// or a stored record being replayed.
pub(crate) struct Exchange {
    pub session_id: String,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub body_truncated: bool,
    pub content_type: Option<String>,
    pub source: Option<String>,
    pub replayed_from_id: Option<String>,
    pub replay_initiator: Option<String>,
}

impl RawResponse {
    fn into_hyper(self) -> Response<UpstreamBody> {
        let mut builder = Response::builder().status(
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        );
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        match builder.body(Full::new(Bytes::from(self.body))) {
            Ok(resp) => resp,
            Err(_) => Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from_static(b"malformed response")))
                .unwrap(),
        }
    }
}

/// Services one buffered HTTP exchange: authenticates the session, records
/// the request, dispatches it through the interceptor runtime, forwards or
/// synthesizes the response, and records it (spec §4.5/§4.4).
pub async fn handle_request(
    ctx: &ProxyContext,
    req: Request<hyper::body::Incoming>,
    scheme: &str,
) -> Response<UpstreamBody> {
    let session_id_hdr = header_str(&req, SESSION_ID_HEADER);
    let session_token_hdr = header_str(&req, SESSION_TOKEN_HEADER);
    let replay_token_hdr = header_str(&req, REPLAY_TOKEN_HEADER);

    let is_replay = replay_token_hdr.as_deref() == Some(ctx.replay_token.as_str());
    if !is_replay {
        let authenticated = match (&session_id_hdr, &session_token_hdr) {
            (Some(id), Some(token)) => ctx.sessions.check(id, token),
            _ => false,
        };
        if !authenticated && ctx.auth_required {
            return proxy_auth_required();
        }
    }

    let session_id = session_id_hdr.unwrap_or_else(|| "unauthenticated".to_string());
    let headers = collect_headers(req.headers());
    let method = req.method().to_string();
    let uri = req.uri().clone();
    let host = uri.host().map(str::to_string).unwrap_or_default();
    let path = uri.path().to_string();
    let url = format!(
        "{scheme}://{host}{port}{path}{query}",
        port = uri.port_u16().map(|p| format!(":{p}")).unwrap_or_default(),
        query = uri.query().map(|q| format!("?{q}")).unwrap_or_default(),
    );

    let request_content_type = headers.get("content-type").map(|v| content_type::normalize(v));
    let (body_bytes, body_truncated) = match crate::body::read_capped(req.into_body(), ctx.max_body_size).await {
        Ok(pair) => pair,
        Err(e) => return bad_gateway(&format!("failed to read request body: {e}")),
    };

    let exchange = Exchange {
        session_id,
        method,
        url,
        host,
        path,
        headers,
        body: body_bytes,
        body_truncated,
        content_type: request_content_type,
        source: Some(scheme.to_string()),
        replayed_from_id: None,
        replay_initiator: None,
    };

    let (_id, raw) = process_exchange(ctx, exchange).await;
    raw.into_hyper()
}

/// Records the request, dispatches it through the interceptor runtime, and
/// forwards or synthesizes + records the response. Shared by live proxy
/// traffic and daemon-initiated replay (spec §4.4/§4.5/§4.6 `replay_request`).
pub(crate) async fn process_exchange(ctx: &ProxyContext, exchange: Exchange) -> (String, RawResponse) {
    let Exchange {
        session_id,
        method,
        url,
        host,
        path,
        headers,
        body,
        body_truncated,
        content_type,
        source,
        replayed_from_id,
        replay_initiator,
    } = exchange;

    let request_body = if body.is_empty() { None } else { Some(body.clone()) };

    let core = RequestCore {
        session_id,
        timestamp: now_millis(),
        method: method.clone(),
        url: url.clone(),
        host: host.clone(),
        path: path.clone(),
        request_headers: headers.clone(),
        request_body: request_body.clone(),
        request_body_truncated: body_truncated,
        request_content_type: content_type,
        replayed_from_id,
        replay_initiator,
        source,
    };

    let id = match ctx.store.save_request(core).await {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "save_request failed; aborting exchange");
            return (String::new(), internal_error("failed to record request"));
        }
    };

    let plugin_request = PluginRequest {
        id: id.clone(),
        method: method.clone(),
        url: url.clone(),
        host,
        path,
        headers: headers.clone(),
        body_base64: request_body.as_ref().map(|b| base64::engine::general_purpose::STANDARD.encode(b)),
    };

    let start = std::time::Instant::now();
    let (outcome, events) = ctx
        .runtime
        .dispatch(plugin_request, ctx.forwarder.clone(), ctx.capture.clone())
        .await;

    spawn_event_log(ctx, events, &id, &url, &method);

    let (raw, intercepted_by, interception_type) = match outcome {
        DispatchOutcome::Passthrough | DispatchOutcome::Observed(_) => {
            let name = match &outcome {
                DispatchOutcome::Observed(n) => Some(n.clone()),
                _ => None,
            };
            let raw = match forward_upstream(ctx, &method, &url, &headers, &body).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, url, "upstream forward failed");
                    bad_gateway_raw(&e.to_string())
                }
            };
            (raw, name, None)
        }
        DispatchOutcome::Mocked(name, plugin_response) => {
            (plugin_response_to_raw(&plugin_response), Some(name), Some(InterceptionType::Mocked))
        }
        DispatchOutcome::Modified(name, plugin_response) => {
            (plugin_response_to_raw(&plugin_response), Some(name), Some(InterceptionType::Modified))
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let response_content_type = raw.headers.get("content-type").map(|v| content_type::normalize(v));

    let update = ResponseUpdate {
        status: raw.status,
        headers: raw.headers.clone(),
        body: if raw.body.is_empty() { None } else { Some(raw.body.clone()) },
        body_truncated: raw.body_truncated,
        content_type: response_content_type,
        duration_ms,
        intercepted_by,
        interception_type,
    };
    let store = ctx.store.clone();
    let id_for_update = id.clone();
    tokio::spawn(async move {
        if let Err(e) = store.update_response(&id_for_update, update).await {
            error!(error = %e, request_id = %id_for_update, "update_response failed");
        }
    });

    (id, raw)
}

fn spawn_event_log(
    ctx: &ProxyContext,
    events: Vec<snoopd_interceptor::EmittedEvent>,
    id: &str,
    url: &str,
    method: &str,
) {
    if events.is_empty() {
        return;
    }
    let store = ctx.store.clone();
    let id = id.to_string();
    let url = url.to_string();
    let method = method.to_string();
    let event_log_capacity = ctx.event_log_capacity;
    tokio::spawn(async move {
        for ev in events {
            if let Err(e) = store
                .append_event(
                    ev.event_type,
                    ev.interceptor,
                    ev.message,
                    Some(id.clone()),
                    Some(url.clone()),
                    Some(method.clone()),
                    ev.error,
                    event_log_capacity,
                )
                .await
            {
                error!(error = %e, "append_event failed");
            }
        }
    });
}

async fn forward_upstream(
    ctx: &ProxyContext,
    method: &str,
    url: &str,
    headers: &BTreeMap<String, String>,
    body: &[u8],
) -> snoopd_common::Result<RawResponse> {
    let mut builder = hyper::Request::builder().method(method).uri(url);
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name, value);
        }
    }
    let request = builder
        .body(Full::new(Bytes::copy_from_slice(body)))
        .map_err(|e| SnoopdError::ProxyProtocol(e.to_string()))?;

    let upstream_response = ctx.client.send(request).await.map_err(|e| SnoopdError::Upstream(e.to_string()))?;

    let status = upstream_response.status().as_u16();
    let mut response_headers = BTreeMap::new();
    for (name, value) in upstream_response.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            response_headers.insert(name.as_str().to_lowercase(), value.to_string());
        }
    }
    let (body, body_truncated) = crate::body::read_capped(upstream_response.into_body(), ctx.max_body_size).await?;
    Ok(RawResponse { status, headers: response_headers, body, body_truncated })
}

fn plugin_response_to_raw(response: &PluginResponse) -> RawResponse {
    let body = response
        .body_base64
        .as_deref()
        .and_then(|b| base64::engine::general_purpose::STANDARD.decode(b).ok())
        .unwrap_or_default();
    RawResponse { status: response.status, headers: response.headers.clone(), body, body_truncated: false }
}

fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value_str) = value.to_str() else { continue };
        map.entry(name.as_str().to_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value_str);
            })
            .or_insert_with(|| value_str.to_string());
    }
    map
}

fn header_str<B>(req: &Request<B>, name: &str) -> Option<String> {
    req.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn proxy_auth_required() -> Response<UpstreamBody> {
    Response::builder()
        .status(StatusCode::PROXY_AUTHENTICATION_REQUIRED)
        .body(Full::new(Bytes::from_static(b"session authentication required")))
        .unwrap()
}

fn bad_gateway(message: &str) -> Response<UpstreamBody> {
    bad_gateway_raw(message).into_hyper()
}

fn bad_gateway_raw(message: &str) -> RawResponse {
    RawResponse {
        status: 502,
        headers: BTreeMap::from([("x-snoopd-error".to_string(), "upstream".to_string())]),
        body: message.as_bytes().to_vec(),
        body_truncated: false,
    }
}

fn internal_error(message: &str) -> RawResponse {
    RawResponse { status: 500, headers: BTreeMap::new(), body: message.as_bytes().to_vec(), body_truncated: false }
}
