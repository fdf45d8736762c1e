use std::path::{Path, PathBuf};
use std::sync::Arc;

use snoopd_common::{Result, SnoopdError};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, warn};

use crate::handler::{dispatch, ControlContext};
use crate::peer_cred::peer_uid;
use crate::protocol::{read_message, write_message, ControlResponse};

/// Binds the control socket inside the project data directory. Filesystem
/// permissions (owner-only) are the authentication boundary for read-only
/// calls; `replay_request` additionally checks the peer's uid (spec §4.6).
pub struct ControlServer {
    listener: UnixListener,
    ctx: Arc<ControlContext>,
    socket_path: PathBuf,
}

impl ControlServer {
    pub fn bind(socket_path: &Path, ctx: Arc<ControlContext>) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .map_err(|e| SnoopdError::ControlProtocol(format!("failed to remove stale socket: {e}")))?;
        }
        let listener = UnixListener::bind(socket_path)
            .map_err(|e| SnoopdError::ControlProtocol(format!("failed to bind control socket: {e}")))?;
        restrict_permissions(socket_path)?;
        Ok(Self { listener, ctx, socket_path: socket_path.to_path_buf() })
    }

    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let ctx = self.ctx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, ctx).await {
                                    debug!(error = %e, "control connection ended");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "failed to accept control connection"),
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn serve_connection(stream: UnixStream, ctx: Arc<ControlContext>) -> Result<()> {
    let uid = peer_uid(&stream).map_err(|e| SnoopdError::ControlProtocol(format!("failed to read peer credentials: {e}")))?;
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let request = match read_message(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e) => return Err(e),
        };

        let method = request.method.clone();
        let response = match dispatch(&ctx, request, uid).await {
            Ok(result) => ControlResponse::ok(result),
            Err(e) => {
                error!(error = %e, method, "control method failed");
                ControlResponse::err(e.to_string())
            }
        };

        write_message(&mut writer, &response).await?;
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use snoopd_interceptor::{CaptureClient, Forwarder, InterceptorRuntime, PluginRequest, PluginResponse};
    use snoopd_proxy::{ProxyContext, SessionRegistry, UpstreamClient};
    use snoopd_store::Store;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::protocol::ControlRequest;

    struct NullForwarder;
    impl Forwarder for NullForwarder {
        fn forward(&self, _request: &PluginRequest) -> snoopd_common::Result<PluginResponse> {
            Ok(PluginResponse { status: 204, headers: Default::default(), body_base64: None })
        }
    }

    struct NullCapture;
    impl CaptureClient for NullCapture {
        fn count(&self, _filter: snoopd_common::model::RequestFilter) -> snoopd_common::Result<u64> {
            Ok(0)
        }
        fn list_summaries(
            &self,
            _filter: snoopd_common::model::RequestFilter,
            _limit: usize,
            _offset: usize,
        ) -> snoopd_common::Result<Vec<snoopd_common::model::RequestSummary>> {
            Ok(Vec::new())
        }
        fn search_bodies(
            &self,
            _query: String,
            _target: snoopd_common::model::BodyTarget,
            _filter: snoopd_common::model::RequestFilter,
            _limit: usize,
            _offset: usize,
        ) -> snoopd_common::Result<Vec<snoopd_common::model::RequestSummary>> {
            Ok(Vec::new())
        }
    }

    async fn spawn_server(dir: &std::path::Path) -> (PathBuf, tokio::sync::watch::Receiver<bool>) {
        let store = Arc::new(Store::open(&dir.join("requests.db")).await.unwrap());
        let runtime = Arc::new(InterceptorRuntime::new(dir.join("interceptors"), 250, 30_000).unwrap());
        let proxy_ctx = Arc::new(ProxyContext {
            store,
            runtime,
            client: UpstreamClient::new(),
            sessions: Arc::new(SessionRegistry::default()),
            forwarder: Arc::new(NullForwarder),
            capture: Arc::new(NullCapture),
            max_body_size: 1024 * 1024,
            auth_required: false,
            replay_token: "test-token".to_string(),
            event_log_capacity: 5_000,
        });
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let ctx = Arc::new(ControlContext {
            proxy: proxy_ctx,
            proxy_port: 4000,
            started_at: std::time::Instant::now(),
            shutdown_tx,
        });

        let socket_path = dir.join("control.sock");
        let server = ControlServer::bind(&socket_path, ctx).unwrap();
        let mut shutdown_rx_clone = shutdown_rx.clone();
        tokio::spawn(async move {
            server
                .run(async move {
                    let _ = shutdown_rx_clone.changed().await;
                })
                .await;
        });
        // give the listener a moment to start accepting.
        tokio::time::sleep(Duration::from_millis(20)).await;
        (socket_path, shutdown_rx)
    }

    async fn call(socket_path: &Path, method: &str, params: serde_json::Value) -> ControlResponseOwned {
        let mut stream = UnixStream::connect(socket_path).await.unwrap();
        let request = ControlRequest { method: method.to_string(), params };
        let body = serde_json::to_vec(&serde_json::json!({"method": request.method, "params": request.params})).unwrap();
        stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(&body).await.unwrap();
        stream.flush().await.unwrap();

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut resp_buf = vec![0u8; len];
        stream.read_exact(&mut resp_buf).await.unwrap();
        serde_json::from_slice(&resp_buf).unwrap()
    }

    #[derive(serde::Deserialize)]
    struct ControlResponseOwned {
        #[serde(default)]
        ok: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    }

    #[tokio::test]
    async fn ping_round_trips_over_the_socket() {
        let dir = tempdir().unwrap();
        let (socket_path, _rx) = spawn_server(dir.path()).await;

        let response = call(&socket_path, "ping", serde_json::json!({})).await;
        assert_eq!(response.ok, Some(serde_json::json!("pong")));
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn unknown_method_returns_an_error_envelope() {
        let dir = tempdir().unwrap();
        let (socket_path, _rx) = spawn_server(dir.path()).await;

        let response = call(&socket_path, "not_a_real_method", serde_json::json!({})).await;
        assert!(response.ok.is_none());
        assert!(response.error.is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn register_and_list_sessions_round_trip() {
        let dir = tempdir().unwrap();
        let (socket_path, _rx) = spawn_server(dir.path()).await;

        let register = call(&socket_path, "register_session", serde_json::json!({"label": "cli", "pid": 123})).await;
        assert!(register.ok.is_some());

        let list = call(&socket_path, "list_sessions", serde_json::json!({})).await;
        let sessions = list.ok.expect("list_sessions should return ok");
        assert_eq!(sessions.as_array().unwrap().len(), 1);
    }
}
