use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use snoopd_ca::CertificateAuthority;
use snoopd_common::Result;

/// Must run once before any `ServerConfig` is built (rustls 0.23 requires an
/// explicit default crypto provider).
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Resolves a fresh `CertifiedKey` per SNI hostname by asking the project CA
/// to issue (or return a cached) leaf, converting it into the signing form
/// rustls needs at the TLS handshake boundary.
struct CaCertResolver {
    ca: Arc<CertificateAuthority>,
}

impl ResolvesServerCert for CaCertResolver {
    fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        let host = client_hello.server_name()?;
        let leaf = self.ca.issue_leaf(host).ok()?;
        let key_der = PrivateKeyDer::try_from(leaf.key_der.clone()).ok()?;
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key_der).ok()?;
        let chain = vec![CertificateDer::from(leaf.cert_der.clone())];
        Some(Arc::new(CertifiedKey::new(chain, signing_key)))
    }
}

/// Builds the per-connection MITM server config. ALPN lists both protocols
/// so the downstream TLS handshake can negotiate either with the client.
pub fn server_config(ca: Arc<CertificateAuthority>) -> Result<Arc<ServerConfig>> {
    let resolver = Arc::new(CaCertResolver { ca });
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

