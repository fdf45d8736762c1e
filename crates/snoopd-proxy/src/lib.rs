//! MITM HTTP(S) proxy: TCP accept loop, CONNECT/TLS termination, per-request
//! capture + interceptor dispatch, and daemon-initiated replay (spec §4.5).

mod body;
mod capture;
mod conn;
mod listener;
mod pool;
mod replay;
mod service;
mod session;
mod tls;

use std::sync::Arc;

use snoopd_ca::CertificateAuthority;
use snoopd_common::Result;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use capture::{ProxyCaptureClient, ProxyForwarder};
pub use listener::{bind, write_port_file, write_preferred_port};
pub use pool::UpstreamClient;
pub use replay::replay;
pub use service::ProxyContext;
pub use session::SessionRegistry;
pub use tls::install_crypto_provider;

/// Owns the bound listener and drives the accept loop until cancellation.
pub struct ProxyServer {
    listener: TcpListener,
    ctx: Arc<ProxyContext>,
    ca: Arc<CertificateAuthority>,
}

impl ProxyServer {
    pub fn new(listener: TcpListener, ctx: Arc<ProxyContext>, ca: Arc<CertificateAuthority>) -> Self {
        Self { listener, ctx, ca }
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accepts connections until `shutdown` resolves, then stops accepting
    /// new ones; in-flight connections are left to finish on their own.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("proxy accept loop stopping");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let ctx = self.ctx.clone();
                            let ca = self.ca.clone();
                            tokio::spawn(async move {
                                conn::serve(ctx, ca, stream).await;
                            });
                            let _ = peer;
                        }
                        Err(e) => warn!(error = %e, "failed to accept proxy connection"),
                    }
                }
            }
        }
    }
}
