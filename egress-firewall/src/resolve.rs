//! A-record resolution for allowlist hosts

use crate::error::{FirewallError, Result};
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::net::Ipv4Addr;
use tracing::debug;

/// Looks up IPv4 addresses for a hostname
#[async_trait]
pub trait DomainResolver: Send + Sync {
    async fn resolve_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>>;
}

/// Resolver driven by the system configuration (`/etc/resolv.conf`)
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    /// Fails with `ToolMissing` when no usable resolver configuration exists
    pub fn from_system_conf() -> Result<Self> {
        let resolver =
            TokioAsyncResolver::tokio_from_system_conf().map_err(|e| FirewallError::ToolMissing {
                tool: "resolver".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl DomainResolver for SystemResolver {
    async fn resolve_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>> {
        // IP literals short-circuit the lookup
        if let Ok(addr) = host.parse::<Ipv4Addr>() {
            return Ok(vec![addr]);
        }

        let lookup = self
            .resolver
            .ipv4_lookup(host)
            .await
            .map_err(|e| FirewallError::Resolve {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        let addrs: Vec<Ipv4Addr> = lookup.iter().map(|a| a.0).collect();
        debug!("Resolved {} -> {:?}", host, addrs);
        Ok(addrs)
    }
}
