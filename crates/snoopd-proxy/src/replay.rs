use snoopd_common::{Result, SnoopdError};

use crate::service::{process_exchange, Exchange, ProxyContext};

/// Re-executes a previously captured request against the same URL using its
/// original method/headers/body, producing a new capture record linked back
/// to the original via `replayedFromId` (spec §4.6 `replay_request`, §9).
pub async fn replay(ctx: &ProxyContext, id: &str, initiator: Option<String>) -> Result<String> {
    let original = ctx
        .store
        .get(id)
        .await?
        .ok_or_else(|| SnoopdError::Store(format!("no such request: {id}")))?;

    let exchange = Exchange {
        session_id: original.session_id,
        method: original.method,
        url: original.url,
        host: original.host,
        path: original.path,
        headers: original.request_headers,
        body: original.request_body.unwrap_or_default(),
        body_truncated: original.request_body_truncated,
        content_type: original.request_content_type,
        source: Some("replay".to_string()),
        replayed_from_id: Some(id.to_string()),
        replay_initiator: initiator,
    };

    let (new_id, _raw) = process_exchange(ctx, exchange).await;
    if new_id.is_empty() {
        return Err(SnoopdError::Store(format!("replay of {id} failed to record a new request")));
    }
    Ok(new_id)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use snoopd_common::model::BodyTarget;
    use snoopd_interceptor::{CaptureClient, Forwarder, InterceptorRuntime, PluginRequest, PluginResponse};
    use snoopd_store::Store;
    use tempfile::tempdir;

    use super::*;
    use crate::pool::UpstreamClient;
    use crate::session::SessionRegistry;

    struct NullForwarder;
    impl Forwarder for NullForwarder {
        fn forward(&self, _request: &PluginRequest) -> Result<PluginResponse> {
            Ok(PluginResponse { status: 204, headers: Default::default(), body_base64: None })
        }
    }

    struct NullCapture;
    impl CaptureClient for NullCapture {
        fn count(&self, _filter: snoopd_common::model::RequestFilter) -> Result<u64> {
            Ok(0)
        }
        fn list_summaries(
            &self,
            _filter: snoopd_common::model::RequestFilter,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<snoopd_common::model::RequestSummary>> {
            Ok(Vec::new())
        }
        fn search_bodies(
            &self,
            _query: String,
            _target: BodyTarget,
            _filter: snoopd_common::model::RequestFilter,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<snoopd_common::model::RequestSummary>> {
            Ok(Vec::new())
        }
    }

    async fn build_ctx(dir: &std::path::Path) -> ProxyContext {
        let store = Arc::new(Store::open(&dir.join("requests.db")).await.unwrap());
        let runtime = Arc::new(InterceptorRuntime::new(dir.join("interceptors"), 250, 30_000).unwrap());
        ProxyContext {
            store,
            runtime,
            client: UpstreamClient::new(),
            sessions: Arc::new(SessionRegistry::default()),
            forwarder: Arc::new(NullForwarder),
            capture: Arc::new(NullCapture),
            max_body_size: 1024 * 1024,
            auth_required: false,
            replay_token: "test-replay-token".to_string(),
            event_log_capacity: 5_000,
        }
    }

    #[tokio::test]
    async fn replay_of_missing_id_errors() {
        let dir = tempdir().unwrap();
        let ctx = build_ctx(dir.path()).await;
        let result = replay(&ctx, "does-not-exist", None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn replay_links_new_record_to_original() {
        let dir = tempdir().unwrap();
        let ctx = build_ctx(dir.path()).await;

        let core = snoopd_common::model::RequestCore {
            session_id: "s1".to_string(),
            timestamp: snoopd_common::model::now_millis(),
            method: "GET".to_string(),
            url: "http://example.com/".to_string(),
            host: "example.com".to_string(),
            path: "/".to_string(),
            request_headers: Default::default(),
            request_body: None,
            request_body_truncated: false,
            request_content_type: None,
            replayed_from_id: None,
            replay_initiator: None,
            source: Some("http".to_string()),
        };
        let original_id = ctx.store.save_request(core).await.unwrap();

        let new_id = replay(&ctx, &original_id, Some("cli".to_string())).await.unwrap();
        assert_ne!(new_id, original_id);

        let record = ctx.store.get(&new_id).await.unwrap().unwrap();
        assert_eq!(record.replayed_from_id.as_deref(), Some(original_id.as_str()));
        assert_eq!(record.method, "GET");
        assert_eq!(record.url, "http://example.com/");
    }
}
