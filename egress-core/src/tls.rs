//! Shared TLS client configuration for outbound HTTPS

use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;

/// Client configuration trusting the bundled webpki roots
pub fn client_config() -> Result<Arc<ClientConfig>, rustls::Error> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(Arc::new(config))
}
