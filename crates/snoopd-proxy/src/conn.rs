use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use snoopd_ca::CertificateAuthority;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::pool::UpstreamBody;
use crate::service::{handle_request, ProxyContext};
use crate::tls;

/// Drives one accepted TCP connection end to end: a CONNECT tunnel is
/// terminated here and MITM'd with a CA-issued leaf cert for the requested
/// host, while a plain request is served directly as HTTP (spec §4.5).
pub async fn serve(ctx: Arc<ProxyContext>, ca: Arc<CertificateAuthority>, stream: TcpStream) {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
        let ctx = ctx.clone();
        let ca = ca.clone();
        async move {
            if req.method() == Method::CONNECT {
                Ok::<_, std::convert::Infallible>(handle_connect(ctx, ca, req))
            } else {
                Ok(handle_request(&ctx, req, "http").await)
            }
        }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
    {
        debug!(error = %e, "connection closed");
    }
}

/// Replies `200 Connection Established` and schedules the TLS handshake +
/// MITM'd HTTP serving once hyper completes the upgrade in the background.
fn handle_connect(
    ctx: Arc<ProxyContext>,
    ca: Arc<CertificateAuthority>,
    req: Request<hyper::body::Incoming>,
) -> Response<UpstreamBody> {
    let target = req.uri().to_string();

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = serve_tls(ctx, ca, TokioIo::new(upgraded)).await {
                    warn!(error = %e, target, "MITM TLS session ended with error");
                }
            }
            Err(e) => warn!(error = %e, target, "failed to upgrade CONNECT tunnel"),
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .body(http_body_util::Full::new(hyper::body::Bytes::new()))
        .expect("static CONNECT response is well-formed")
}

async fn serve_tls<S>(ctx: Arc<ProxyContext>, ca: Arc<CertificateAuthority>, stream: S) -> snoopd_common::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let server_config = tls::server_config(ca)?;
    let acceptor = tokio_rustls::TlsAcceptor::from(server_config);
    let tls_stream = acceptor
        .accept(stream)
        .await
        .map_err(|e| snoopd_common::SnoopdError::ProxyProtocol(format!("TLS handshake failed: {e}")))?;

    let io = TokioIo::new(tls_stream);
    let service = service_fn(move |req: Request<hyper::body::Incoming>| {
        let ctx = ctx.clone();
        async move { Ok::<_, std::convert::Infallible>(handle_request(&ctx, req, "https").await) }
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .await
        .map_err(|e| snoopd_common::SnoopdError::ProxyProtocol(format!("MITM connection error: {e}")))
}
