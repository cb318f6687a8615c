//! Packet-filter synchronization for the sandbox egress plane
//!
//! Resolves the domain allowlist to IPv4 addresses, merges in published
//! provider ranges, and installs an address set plus an ordered policy
//! that ends in a default deny.

pub mod error;
pub mod policy;
pub mod provider;
pub mod resolve;
pub mod set;
pub mod store;
pub mod sync;

pub use error::{FirewallError, PolicyError, Result};
pub use policy::{FirewallPolicy, PolicyBuilder, Protocol, Rule};
pub use provider::{HttpRangeSource, RangeSource};
pub use resolve::{DomainResolver, SystemResolver};
pub use set::AddressSet;
pub use store::{IptablesStore, MemoryStore, PolicyStore};
pub use sync::{is_unavailable, reconcile, DesiredState, SyncReport, SyncSettings, Synchronizer};

use egress_core::config::FirewallConfig;
use egress_core::ChainDescriptor;
use tracing::warn;

/// Run one synchronization against `store` using the system resolver and
/// the configured provider endpoint.
///
/// Returns the store alongside the report so callers can inspect what was
/// applied.
pub async fn synchronize<S: PolicyStore>(
    store: S,
    config: &FirewallConfig,
    chain: &ChainDescriptor,
    fetch_provider: bool,
) -> Result<(SyncReport, S)> {
    let resolver = SystemResolver::from_system_conf()?;

    let ranges = if fetch_provider && !config.provider_url.is_empty() {
        match range_source(&config.provider_url) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!("Provider ranges disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let mut sync = Synchronizer::new(store, resolver, ranges, SyncSettings::from_config(config));
    let report = sync.run(&config.allowlist, chain).await?;
    Ok((report, sync.into_store()))
}

fn range_source(url: &str) -> Result<HttpRangeSource> {
    let tls = egress_core::tls::client_config()
        .map_err(|e| FirewallError::Fetch(format!("TLS setup: {}", e)))?;
    HttpRangeSource::new(url, tls)
}
