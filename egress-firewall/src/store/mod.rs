//! Port to the kernel packet filter
//!
//! The synchronizer only talks to the kernel through [`PolicyStore`], so
//! the iptables/ipset adapter can be swapped for [`MemoryStore`] in tests
//! and dry runs.

pub mod iptables;
pub mod memory;

pub use iptables::IptablesStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::policy::FirewallPolicy;
use crate::set::AddressSet;
use ipnet::Ipv4Net;

/// Owner of the address set and managed rule chain
pub trait PolicyStore {
    /// Verify every required tool is present; called before any mutation
    fn preflight(&mut self) -> Result<()>;

    /// Create the named set if absent, otherwise flush it
    fn reset_set(&mut self, name: &str) -> Result<()>;

    /// Add one network to the named set
    fn add_to_set(&mut self, name: &str, net: Ipv4Net) -> Result<()>;

    /// Flush the managed chain and install the policy rules in order
    fn install(&mut self, chain: &str, policy: &FirewallPolicy) -> Result<()>;

    /// Read back the installed state and fail with `Mismatch` unless the
    /// set holds exactly `set`'s members and the chain holds exactly the
    /// policy rules in order
    fn verify(&mut self, chain: &str, set: &AddressSet, policy: &FirewallPolicy) -> Result<()>;
}
