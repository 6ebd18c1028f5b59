//! Client-side TLS for the proxies that are reached over TLS themselves
//! (`https://` and `https+h2://`).

use crate::error::{DialError, DialResult};
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use std::sync::{Arc, OnceLock};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

static NATIVE_ROOTS: OnceLock<Arc<rustls::RootCertStore>> = OnceLock::new();

/// Platform trust anchors, loaded once per process
pub fn native_roots() -> Arc<rustls::RootCertStore> {
    NATIVE_ROOTS
        .get_or_init(|| {
            let mut roots = rustls::RootCertStore::empty();
            let loaded = rustls_native_certs::load_native_certs();
            for err in &loaded.errors {
                warn!("Failed to load a native certificate: {}", err);
            }
            let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
            debug!(added, ignored, "Loaded native root certificates");
            Arc::new(roots)
        })
        .clone()
}

/// Client config trusting the platform roots and offering `alpn`
pub fn client_config(alpn: &[&[u8]]) -> DialResult<Arc<ClientConfig>> {
    client_config_with_roots(native_roots(), alpn)
}

/// Client config trusting `roots` only
pub fn client_config_with_roots(
    roots: Arc<rustls::RootCertStore>,
    alpn: &[&[u8]],
) -> DialResult<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DialError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    Ok(Arc::new(config))
}

pub fn connector(config: Arc<ClientConfig>) -> TlsConnector {
    TlsConnector::from(config)
}

/// Name to verify the proxy certificate against
pub fn server_name(host: &str) -> DialResult<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| DialError::Tls(format!("invalid TLS server name {:?}", host)))
}
