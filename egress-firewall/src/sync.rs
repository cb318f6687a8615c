//! Address set and policy reconciliation
//!
//! A synchronization run gathers the desired state (resolved allowlist
//! hosts, provider ranges, upstream proxy addresses) and then rebuilds the
//! kernel state from scratch: the set is flushed and repopulated and the
//! managed chain is flushed and reinstalled. Nothing is diffed, so stale
//! members never survive a successful run.
//!
//! The rebuild is not atomic. Between the chain flush and the final rule
//! the effective policy is whatever the kernel falls through to, and a
//! failure midway leaves a partially applied chain. Every run therefore
//! ends by reading the state back from the store; a run only succeeds
//! once the installed set and chain match what was computed.
//!
//! Addresses are resolved once per run. A CDN rotating its addresses
//! after startup will see traffic dropped here while the proxy layer still
//! allows the name; this layer is defense in depth behind the proxy.

use crate::error::{FirewallError, Result};
use crate::policy::FirewallPolicy;
use crate::provider::RangeSource;
use crate::resolve::DomainResolver;
use crate::set::AddressSet;
use crate::store::PolicyStore;
use egress_core::{Allowlist, ChainDescriptor, CoreError};
use ipnet::Ipv4Net;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::Path;
use tracing::{debug, info, warn};

/// Names and ports used when building the policy
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub set_name: String,
    pub chain: String,
    pub ports: Vec<u16>,
    pub categories: Vec<String>,
}

impl SyncSettings {
    pub fn from_config(config: &egress_core::config::FirewallConfig) -> Self {
        Self {
            set_name: config.set_name.clone(),
            chain: config.chain.clone(),
            ports: config.ports.clone(),
            categories: config.provider_categories.clone(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&egress_core::config::FirewallConfig::default())
    }
}

/// Everything a run wants the kernel to contain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    /// No allowlist was available: install fixed rules only
    pub restrictive: bool,
    /// A-records of allowlist hosts
    pub resolved: Vec<Ipv4Addr>,
    /// Provider CIDR ranges
    pub ranges: Vec<Ipv4Net>,
    /// Upstream proxy endpoints
    pub upstream: Vec<SocketAddrV4>,
}

impl DesiredState {
    /// State that allows no destinations at all
    pub fn restrictive() -> Self {
        Self {
            restrictive: true,
            ..Self::default()
        }
    }

    /// The address set this state produces
    pub fn address_set(&self, name: &str) -> AddressSet {
        let mut set = AddressSet::new(name);
        if self.restrictive {
            return set;
        }
        for addr in &self.resolved {
            set.insert_addr(*addr);
        }
        for net in &self.ranges {
            set.insert_net(*net);
        }
        set
    }

    /// The policy this state produces
    pub fn policy(&self, settings: &SyncSettings) -> Result<FirewallPolicy> {
        if self.restrictive {
            return Ok(FirewallPolicy::restrictive());
        }
        let mut builder = FirewallPolicy::builder().allow_set(&settings.set_name, &settings.ports);
        for endpoint in &self.upstream {
            builder = builder.allow_host(*endpoint.ip(), endpoint.port());
        }
        Ok(builder.build()?)
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub set: AddressSet,
    pub policy: FirewallPolicy,
    /// Allowlist hosts that produced no address
    pub unresolved: Vec<String>,
    /// Whether provider ranges were fetched
    pub provider_ranges: bool,
}

/// Rebuild set and chain in `store` from `desired`, then verify them.
///
/// The store must already have passed preflight.
pub fn reconcile<S: PolicyStore>(
    store: &mut S,
    settings: &SyncSettings,
    desired: &DesiredState,
) -> Result<(AddressSet, FirewallPolicy)> {
    let set = desired.address_set(&settings.set_name);
    let policy = desired.policy(settings)?;

    store.reset_set(&settings.set_name)?;
    for net in set.members() {
        store.add_to_set(&settings.set_name, *net)?;
    }
    store.install(&settings.chain, &policy)?;
    store.verify(&settings.chain, &set, &policy)?;

    info!(
        "Installed {} rules, {} set members in {}",
        policy.rules().len(),
        set.len(),
        settings.set_name
    );
    Ok((set, policy))
}

/// Drives one synchronization run
pub struct Synchronizer<S, R, P> {
    store: S,
    resolver: R,
    ranges: Option<P>,
    settings: SyncSettings,
}

impl<S, R, P> Synchronizer<S, R, P>
where
    S: PolicyStore,
    R: DomainResolver,
    P: RangeSource,
{
    /// `ranges` may be `None` to skip the provider fetch
    pub fn new(store: S, resolver: R, ranges: Option<P>, settings: SyncSettings) -> Self {
        Self {
            store,
            resolver,
            ranges,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Run one full cycle.
    ///
    /// Missing tooling aborts before anything is touched. A missing
    /// allowlist installs the restrictive policy. Resolution and provider
    /// failures are logged and skipped.
    pub async fn run(&mut self, allowlist: &Path, chain: &ChainDescriptor) -> Result<SyncReport> {
        self.store.preflight()?;

        let (desired, unresolved) = match Allowlist::load(allowlist) {
            Ok(list) => self.gather(&list, chain).await,
            Err(CoreError::AllowlistNotFound(path)) => {
                warn!(
                    "Allowlist {:?} not found; installing restrictive policy (no destinations allowed)",
                    path
                );
                (DesiredState::restrictive(), Vec::new())
            }
            Err(e) => {
                warn!("{}; installing restrictive policy (no destinations allowed)", e);
                (DesiredState::restrictive(), Vec::new())
            }
        };

        let provider_ranges = !desired.ranges.is_empty();
        let (set, policy) = reconcile(&mut self.store, &self.settings, &desired)?;

        Ok(SyncReport {
            set,
            policy,
            unresolved,
            provider_ranges,
        })
    }

    async fn gather(
        &self,
        list: &Allowlist,
        chain: &ChainDescriptor,
    ) -> (DesiredState, Vec<String>) {
        let mut desired = DesiredState::default();
        let mut unresolved = Vec::new();

        for host in list.hosts() {
            match self.resolver.resolve_ipv4(host).await {
                Ok(addrs) if !addrs.is_empty() => {
                    debug!("{} -> {} addresses", host, addrs.len());
                    for addr in addrs {
                        if !desired.resolved.contains(&addr) {
                            desired.resolved.push(addr);
                        }
                    }
                }
                Ok(_) => {
                    warn!("No A records for {}", host);
                    unresolved.push(host.to_string());
                }
                Err(e) => {
                    warn!("{}", e);
                    unresolved.push(host.to_string());
                }
            }
        }

        if let Some(ref source) = self.ranges {
            match source.fetch(&self.settings.categories).await {
                Ok(ranges) => {
                    info!("Fetched {} provider ranges", ranges.len());
                    desired.ranges = ranges;
                }
                Err(e) => warn!("Skipping provider ranges: {}", e),
            }
        }

        if chain.is_chaining() {
            match self.resolver.resolve_ipv4(&chain.host).await {
                Ok(addrs) if !addrs.is_empty() => {
                    desired.upstream = addrs
                        .into_iter()
                        .map(|addr| SocketAddrV4::new(addr, chain.port))
                        .collect();
                }
                Ok(_) => warn!("Upstream proxy {} has no A records", chain.host),
                Err(e) => warn!("Upstream proxy not allowed at packet layer: {}", e),
            }
        }

        (desired, unresolved)
    }
}

/// Whether an error means the packet-filter layer cannot be used at all
pub fn is_unavailable(err: &FirewallError) -> bool {
    matches!(err, FirewallError::ToolMissing { .. })
}
