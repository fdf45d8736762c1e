use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use snoopd_common::model::{BodyTarget, EventFilter, RequestFilter};
use snoopd_common::{Result, SnoopdError};
use snoopd_proxy::ProxyContext;
use tokio::sync::watch;
use tracing::info;

use crate::protocol::ControlRequest;

/// Shared state the control server dispatches RPC methods against.
pub struct ControlContext {
    pub proxy: Arc<ProxyContext>,
    pub proxy_port: u16,
    pub started_at: Instant,
    pub shutdown_tx: watch::Sender<bool>,
}

/// Whether a method may be invoked by any peer on the socket, or requires
/// the connecting peer to share the daemon's own uid (spec §4.6 `replay_request`).
fn requires_same_uid(method: &str) -> bool {
    method == "replay_request"
}

pub async fn dispatch(ctx: &ControlContext, request: ControlRequest, peer_uid: u32) -> Result<Value> {
    if requires_same_uid(request.method.as_str()) && peer_uid != crate::peer_cred::current_uid() {
        return Err(SnoopdError::Auth(format!(
            "method {} requires a same-uid caller",
            request.method
        )));
    }

    match request.method.as_str() {
        "ping" => Ok(json!("pong")),

        "status" => Ok(json!({
            "proxyPort": ctx.proxy_port,
            "uptimeMs": ctx.started_at.elapsed().as_millis() as u64,
        })),

        "register_session" => {
            let label = request.params.get("label").and_then(Value::as_str).map(str::to_string);
            let source = request.params.get("source").and_then(Value::as_str).map(str::to_string);
            let pid = request.params.get("pid").and_then(Value::as_u64).unwrap_or(0) as u32;
            let session = ctx.proxy.store.register_session(label, pid, source).await?;
            ctx.proxy.sessions.insert(&session);
            Ok(serde_json::to_value(session)?)
        }

        "list_sessions" => {
            let sessions = ctx.proxy.store.list_sessions().await?;
            Ok(serde_json::to_value(sessions)?)
        }

        "list_requests" => {
            let (filter, limit, offset) = parse_list_params(&request.params)?;
            let records = list_full(ctx, filter, limit, offset).await?;
            Ok(serde_json::to_value(records)?)
        }

        "list_requests_summary" => {
            let (filter, limit, offset) = parse_list_params(&request.params)?;
            let summaries = ctx.proxy.store.list_summaries(filter, limit, offset).await?;
            Ok(serde_json::to_value(summaries)?)
        }

        "count_requests" => {
            let filter = parse_filter(&request.params)?;
            let count = ctx.proxy.store.count(filter).await?;
            Ok(json!({ "count": count }))
        }

        "get_request" => {
            let id = required_str(&request.params, "id")?;
            let record = ctx.proxy.store.get(&id).await?;
            Ok(serde_json::to_value(record)?)
        }

        "search_bodies" => {
            let query = required_str(&request.params, "query")?;
            let target = parse_body_target(&request.params);
            let (filter, limit, offset) = parse_list_params(&request.params)?;
            let summaries = ctx.proxy.store.search_bodies(query, target, filter, limit, offset).await?;
            Ok(serde_json::to_value(summaries)?)
        }

        "query_json_bodies" => {
            let path = required_str(&request.params, "path")?;
            let value = request.params.get("value").cloned();
            let target = parse_body_target(&request.params);
            let filter = parse_filter(&request.params)?;
            let summaries = ctx.proxy.store.query_json_bodies(path, value, target, filter).await?;
            Ok(serde_json::to_value(summaries)?)
        }

        "clear_requests" => {
            let deleted = ctx.proxy.store.clear().await?;
            Ok(json!({ "deleted": deleted }))
        }

        "save_request" => {
            let id = required_str(&request.params, "id")?;
            let saved = ctx.proxy.store.save(&id).await?;
            Ok(json!({ "saved": saved }))
        }

        "unsave_request" => {
            let id = required_str(&request.params, "id")?;
            let unsaved = ctx.proxy.store.unsave(&id).await?;
            Ok(json!({ "unsaved": unsaved }))
        }

        "replay_request" => {
            let id = required_str(&request.params, "id")?;
            let initiator = request.params.get("initiator").and_then(Value::as_str).map(str::to_string);
            let new_id = snoopd_proxy::replay(&ctx.proxy, &id, initiator).await?;
            Ok(json!({ "id": new_id }))
        }

        "list_interceptors" => {
            let plugins: Vec<Value> = ctx
                .proxy
                .runtime
                .list()
                .into_iter()
                .map(|(name, path, has_match, load_error)| {
                    json!({
                        "name": name,
                        "sourcePath": path.display().to_string(),
                        "hasMatch": has_match,
                        "loadError": load_error,
                    })
                })
                .collect();
            Ok(json!(plugins))
        }

        "reload_interceptors" => {
            let events = ctx.proxy.runtime.reload()?;
            for ev in &events {
                ctx.proxy
                    .store
                    .append_event(
                        ev.event_type,
                        ev.interceptor.clone(),
                        ev.message.clone(),
                        None,
                        None,
                        None,
                        ev.error.clone(),
                        ctx.proxy.event_log_capacity,
                    )
                    .await?;
            }
            Ok(json!({ "reloaded": events.len() }))
        }

        "get_interceptor_events" => {
            let filter = EventFilter {
                after_seq: request.params.get("afterSeq").and_then(Value::as_i64),
                limit: request.params.get("limit").and_then(Value::as_u64).map(|v| v as usize),
                level: request
                    .params
                    .get("level")
                    .and_then(Value::as_str)
                    .and_then(|s| serde_json::from_value(json!(s)).ok()),
                interceptor: request.params.get("interceptor").and_then(Value::as_str).map(str::to_string),
            };
            let events = ctx.proxy.store.get_interceptor_events(filter).await?;
            Ok(serde_json::to_value(events)?)
        }

        "clear_interceptor_events" => {
            let deleted = ctx.proxy.store.clear_interceptor_events().await?;
            Ok(json!({ "deleted": deleted }))
        }

        "shutdown" => {
            info!("shutdown requested over control socket");
            let _ = ctx.shutdown_tx.send(true);
            Ok(json!("shutting down"))
        }

        other => Err(SnoopdError::ControlProtocol(format!("unknown method: {other}"))),
    }
}

async fn list_full(
    ctx: &ControlContext,
    filter: RequestFilter,
    limit: usize,
    offset: usize,
) -> Result<Vec<snoopd_common::model::CapturedRequest>> {
    let summaries = ctx.proxy.store.list_summaries(filter, limit, offset).await?;
    let mut records = Vec::with_capacity(summaries.len());
    for summary in summaries {
        if let Some(record) = ctx.proxy.store.get(&summary.id).await? {
            records.push(record);
        }
    }
    Ok(records)
}

fn required_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SnoopdError::ControlProtocol(format!("missing required parameter: {key}")))
}

fn parse_body_target(params: &Value) -> BodyTarget {
    match params.get("target").and_then(Value::as_str) {
        Some("request") => BodyTarget::Request,
        Some("response") => BodyTarget::Response,
        _ => BodyTarget::Both,
    }
}

fn parse_filter(params: &Value) -> Result<RequestFilter> {
    let filter_value = params.get("filter").cloned().unwrap_or(Value::Null);
    if filter_value.is_null() {
        return Ok(RequestFilter::default());
    }
    serde_json::from_value(filter_value).map_err(SnoopdError::from)
}

fn parse_list_params(params: &Value) -> Result<(RequestFilter, usize, usize)> {
    let filter = parse_filter(params)?;
    let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize;
    let offset = params.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
    Ok((filter, limit, offset))
}
