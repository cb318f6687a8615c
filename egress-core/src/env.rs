//! Environment-driven configuration
//!
//! Every variable the egress plane reads is listed here and read exactly
//! once. The result is immutable; nothing else in the workspace calls
//! `std::env::var` for these names.

use crate::chain::ChainDescriptor;
use std::env;
use std::fmt;
use std::path::PathBuf;
use zeroize::Zeroizing;

/// Upstream proxy URL (takes precedence over the lowercase form)
pub const UPSTREAM_PROXY: &str = "UPSTREAM_PROXY";
/// Lowercase fallback for the upstream proxy URL
pub const UPSTREAM_PROXY_LOWER: &str = "upstream_proxy";
/// Upstream proxy user, used only when the URL has no credentials
pub const UPSTREAM_PROXY_USER: &str = "UPSTREAM_PROXY_USER";
/// Upstream proxy password, used only when the URL has no credentials
pub const UPSTREAM_PROXY_PASS: &str = "UPSTREAM_PROXY_PASS";
/// Secret injected by the gateway
pub const API_KEY: &str = "ANTHROPIC_API_KEY";
/// Gateway listen port override
pub const GATEWAY_PORT: &str = "ANTHROPIC_PROXY_PORT";
/// Settings file override
pub const CONFIG_PATH: &str = "EGRESS_CONFIG";

/// Default gateway listen port
pub const DEFAULT_GATEWAY_PORT: u16 = 3129;

/// Snapshot of every recognised environment variable
#[derive(Clone, Default)]
pub struct EgressEnv {
    upstream_proxy: Option<String>,
    upstream_user: Option<String>,
    upstream_pass: Option<Zeroizing<String>>,
    api_key: Option<Zeroizing<String>>,
    gateway_port: Option<u16>,
    config_path: Option<PathBuf>,
}

impl EgressEnv {
    /// Read from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let upstream_proxy = non_empty(UPSTREAM_PROXY).or_else(|| non_empty(UPSTREAM_PROXY_LOWER));

        let gateway_port = non_empty(GATEWAY_PORT).and_then(|raw| match raw.trim().parse::<u16>() {
            Ok(port) => Some(port),
            Err(_) => {
                tracing::warn!("Ignoring invalid {}={:?}", GATEWAY_PORT, raw);
                None
            }
        });

        Self {
            upstream_proxy,
            upstream_user: non_empty(UPSTREAM_PROXY_USER),
            upstream_pass: non_empty(UPSTREAM_PROXY_PASS).map(Zeroizing::new),
            api_key: non_empty(API_KEY).map(Zeroizing::new),
            gateway_port,
            config_path: non_empty(CONFIG_PATH).map(PathBuf::from),
        }
    }

    pub fn upstream_proxy(&self) -> Option<&str> {
        self.upstream_proxy.as_deref()
    }

    /// Resolve the upstream chain from the URL and credential overrides
    pub fn chain(&self) -> ChainDescriptor {
        match self.upstream_proxy {
            Some(ref spec) => ChainDescriptor::resolve(
                spec,
                self.upstream_user.as_deref(),
                self.upstream_pass.as_ref().map(|p| p.as_str()),
            ),
            None => ChainDescriptor::none(),
        }
    }

    pub fn api_key(&self) -> Option<&Zeroizing<String>> {
        self.api_key.as_ref()
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway_port.unwrap_or(DEFAULT_GATEWAY_PORT)
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config_path.as_ref()
    }
}

impl fmt::Debug for EgressEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EgressEnv")
            .field("upstream_proxy", &self.upstream_proxy.as_ref().map(|_| "<set>"))
            .field("upstream_user", &self.upstream_user)
            .field("upstream_pass", &self.upstream_pass.as_ref().map(|_| "<redacted>"))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("gateway_port", &self.gateway_port)
            .field("config_path", &self.config_path)
            .finish()
    }
}
