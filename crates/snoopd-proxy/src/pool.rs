use http_body_util::Full;
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

pub type UpstreamBody = Full<Bytes>;

/// A single `hyper_util` legacy client backed by an HTTPS-capable connector.
/// `hyper_util`'s own pool already keys idle connections by (scheme, host,
/// port) authority, which is exactly the granularity spec §4.5 asks for, so
/// there is no need for a second pooling layer on top.
#[derive(Clone)]
pub struct UpstreamClient {
    inner: Client<hyper_rustls::HttpsConnector<HttpConnector>, UpstreamBody>,
}

impl UpstreamClient {
    pub fn new() -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("native root store must load")
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let inner = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .pool_max_idle_per_host(16)
            .build(https);
        Self { inner }
    }

    pub async fn send(
        &self,
        request: hyper::Request<UpstreamBody>,
    ) -> Result<hyper::Response<hyper::body::Incoming>, hyper_util::client::legacy::Error> {
        self.inner.request(request).await
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}
