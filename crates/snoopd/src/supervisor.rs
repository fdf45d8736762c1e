//! Daemon startup/shutdown orchestration (spec §4.7).

use std::sync::Arc;
use std::time::{Duration, Instant};

use snoopd_ca::CertificateAuthority;
use snoopd_common::config::{AuthMode, Config};
use snoopd_common::error::StartupFailure;
use snoopd_common::paths::ProjectPaths;
use snoopd_control::{ControlContext, ControlServer};
use snoopd_interceptor::InterceptorRuntime;
use snoopd_proxy::{ProxyCaptureClient, ProxyContext, ProxyForwarder, ProxyServer, SessionRegistry, UpstreamClient};
use snoopd_store::Store;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::pidfile::PidLock;
use crate::retention::RetentionTask;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runs the full startup sequence and then drives the daemon until it is
/// asked to shut down. Startup failures map onto distinct process exit
/// codes (§7) via [`StartupFailure`].
pub async fn run(paths: ProjectPaths) -> Result<(), StartupFailure> {
    // 1. Acquire the PID lock before touching anything else that could race
    // with an already-running daemon for this project.
    let _pid_lock = PidLock::acquire(&paths.pid_file())?;

    // 2. Configuration.
    let config = Config::load(&paths.config_file());

    // 3. Logging.
    let _log_guard = snoopd_common::logging::init(&paths.log_file(), &config.log_level)
        .map_err(|_| StartupFailure::StoreUnavailable)?;
    info!(max_stored_requests = config.max_stored_requests, max_body_size = config.max_body_size, max_log_size = config.max_log_size, auth_mode = ?config.auth_mode, "loaded configuration");

    // 4. Store, with migrations applied by `Store::open`.
    let store = Arc::new(Store::open(&paths.database()).await.map_err(|e| {
        warn!(error = %e, "failed to open store");
        StartupFailure::StoreUnavailable
    })?);

    // 5. Ensure CA.
    snoopd_proxy::install_crypto_provider();
    let ca = Arc::new(CertificateAuthority::ensure(&paths.data_dir, config.leaf_cert_cache).map_err(|e| {
        warn!(error = %e, "failed to ensure project CA");
        StartupFailure::CaUnwritable
    })?);

    // 6. Proxy listener + port file.
    let listener = snoopd_proxy::bind(&paths.preferred_port_file()).await.map_err(|e| {
        warn!(error = %e, "failed to bind proxy listener");
        StartupFailure::PortBindFailed
    })?;
    let proxy_port = listener.local_addr().map(|a| a.port()).map_err(|_| StartupFailure::PortBindFailed)?;
    snoopd_proxy::write_port_file(&paths.port_file(), proxy_port).map_err(|_| StartupFailure::PortBindFailed)?;
    snoopd_proxy::write_preferred_port(&paths.preferred_port_file(), proxy_port).map_err(|_| StartupFailure::PortBindFailed)?;
    info!(port = proxy_port, "proxy listening");

    // 7. Interceptors.
    let runtime = Arc::new(
        InterceptorRuntime::new(paths.interceptors_dir(), config.match_timeout_ms, config.handler_timeout_ms)
            .map_err(|e| {
                warn!(error = %e, "failed to load interceptors");
                StartupFailure::ConfigInvalid
            })?,
    );

    let client = UpstreamClient::new();
    let handle = tokio::runtime::Handle::current();
    let proxy_ctx = Arc::new(ProxyContext {
        store: store.clone(),
        runtime: runtime.clone(),
        client: client.clone(),
        sessions: Arc::new(SessionRegistry::new()),
        forwarder: Arc::new(ProxyForwarder::new(client.clone(), handle.clone(), config.max_body_size as usize)),
        capture: Arc::new(ProxyCaptureClient::new(store.clone(), handle.clone())),
        max_body_size: config.max_body_size as usize,
        auth_required: matches!(config.auth_mode, AuthMode::Required),
        replay_token: uuid::Uuid::new_v4().to_string(),
        event_log_capacity: config.event_log_capacity,
    });

    let proxy_server = ProxyServer::new(listener, proxy_ctx.clone(), ca.clone());

    // 8. Control server.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let control_ctx = Arc::new(ControlContext {
        proxy: proxy_ctx.clone(),
        proxy_port,
        started_at: Instant::now(),
        shutdown_tx: shutdown_tx.clone(),
    });
    let control_server = ControlServer::bind(&paths.control_socket(), control_ctx).map_err(|e| {
        warn!(error = %e, "failed to bind control socket");
        StartupFailure::StoreUnavailable
    })?;

    let retention = RetentionTask {
        store: store.clone(),
        log_file: paths.log_file(),
        max_stored_requests: config.max_stored_requests,
        max_log_size: config.max_log_size,
        poll_interval_ms: config.poll_interval_ms,
    };

    // 9. Run until SIGTERM/SIGINT or a control-plane `shutdown` call, then
    // drain for a bounded grace period.
    let mut signal_rx = shutdown_rx.clone();
    let mut proxy_rx = shutdown_rx.clone();
    let mut control_rx = shutdown_rx.clone();
    let retention_shutdown_rx = shutdown_rx;

    let signal_task = tokio::spawn(async move {
        crate::signals::wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let proxy_task = tokio::spawn(proxy_server.run(async move {
        let _ = proxy_rx.changed().await;
    }));
    let control_task = tokio::spawn(control_server.run(async move {
        let _ = control_rx.changed().await;
    }));
    let retention_task = tokio::spawn(retention.run(retention_shutdown_rx));

    let _ = signal_rx.changed().await;
    info!("shutdown requested, draining with a grace period");

    let drain = async {
        let _ = proxy_task.await;
        let _ = control_task.await;
        let _ = retention_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("shutdown grace period elapsed with tasks still running");
    }
    let _ = signal_task.abort();

    // `preferred_port_file` is intentionally left in place: it is a hint for
    // the next startup to try to reclaim the same port, not a liveness marker.
    let _ = std::fs::remove_file(paths.port_file());
    let _ = std::fs::remove_file(paths.control_socket());
    let _ = std::fs::remove_file(paths.pid_file());

    info!("daemon stopped");
    Ok(())
}
