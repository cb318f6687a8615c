//! Gateway settings and the injected credential

use crate::error::{GatewayError, Result};
use egress_core::config::GatewayConfig;
use egress_core::EgressEnv;
use hyper::header::{HeaderName, HeaderValue};
use rustls::ClientConfig;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

/// Header carrying the secret toward the upstream API
pub const INJECTION_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// The secret attached to every forwarded request, if any.
///
/// Without a secret the gateway runs in passthrough mode and leaves the
/// client's headers alone.
#[derive(Clone, Default)]
pub struct CredentialInjection {
    value: Option<HeaderValue>,
    fingerprint: Option<String>,
}

impl CredentialInjection {
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Build from an optional secret; an empty secret means passthrough
    pub fn from_secret(secret: Option<&Zeroizing<String>>) -> Result<Self> {
        let secret = match secret {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(Self::passthrough()),
        };

        let mut value =
            HeaderValue::from_str(secret.as_str()).map_err(|_| GatewayError::InvalidSecret)?;
        value.set_sensitive(true);

        Ok(Self {
            value: Some(value),
            fingerprint: Some(fingerprint(secret)),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.value.is_none()
    }

    pub fn header_value(&self) -> Option<&HeaderValue> {
        self.value.as_ref()
    }

    /// Masked form safe for logs
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }
}

impl fmt::Debug for CredentialInjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialInjection")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// First four characters followed by a fixed mask
fn fingerprint(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{}****", prefix)
}

/// Where forwarded requests go
#[derive(Debug, Clone)]
pub struct Upstream {
    host: String,
    port: u16,
    tls: Option<Arc<ClientConfig>>,
}

impl Upstream {
    pub fn https(host: impl Into<String>, port: u16, tls: Arc<ClientConfig>) -> Self {
        Self {
            host: host.into(),
            port,
            tls: Some(tls),
        }
    }

    /// Cleartext upstream, for loopback test servers
    pub fn plain(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn tls(&self) -> Option<&Arc<ClientConfig>> {
        self.tls.as_ref()
    }

    /// Value for the `Host` header; the port is omitted when it is the
    /// scheme default
    pub fn authority(&self) -> String {
        let default_port = if self.tls.is_some() { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Everything a running gateway needs; immutable once built
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub listen: SocketAddr,
    pub upstream: Upstream,
    pub timeout: Duration,
    pub injection: CredentialInjection,
}

impl GatewaySettings {
    /// Combine the settings file with the environment snapshot
    pub fn from_config(
        config: &GatewayConfig,
        env: &EgressEnv,
        tls: Arc<ClientConfig>,
    ) -> Result<Self> {
        Ok(Self {
            listen: SocketAddr::new(config.listen_addr, env.gateway_port()),
            upstream: Upstream::https(config.upstream_host.clone(), config.upstream_port, tls),
            timeout: Duration::from_secs(config.timeout_secs),
            injection: CredentialInjection::from_secret(env.api_key())?,
        })
    }
}
