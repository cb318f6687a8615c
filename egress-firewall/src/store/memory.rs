//! In-memory policy store

use super::PolicyStore;
use crate::error::{FirewallError, Result};
use crate::policy::{FirewallPolicy, Rule};
use crate::set::AddressSet;
use ipnet::Ipv4Net;
use std::collections::BTreeMap;

/// Policy store that records state instead of programming the kernel
#[derive(Debug, Default)]
pub struct MemoryStore {
    sets: BTreeMap<String, AddressSet>,
    chains: BTreeMap<String, Vec<Rule>>,
    missing_tool: Option<String>,
    mutations: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose preflight reports `tool` as missing
    pub fn without_tool(tool: impl Into<String>) -> Self {
        Self {
            missing_tool: Some(tool.into()),
            ..Self::default()
        }
    }

    pub fn set(&self, name: &str) -> Option<&AddressSet> {
        self.sets.get(name)
    }

    pub fn rules(&self, chain: &str) -> Option<&[Rule]> {
        self.chains.get(chain).map(|rules| rules.as_slice())
    }

    /// Number of state-changing calls made so far
    pub fn mutations(&self) -> usize {
        self.mutations
    }

    /// Direct access to an installed chain, for simulating outside edits
    #[cfg(test)]
    pub(crate) fn rules_mut(&mut self, chain: &str) -> Option<&mut Vec<Rule>> {
        self.chains.get_mut(chain)
    }
}

impl PolicyStore for MemoryStore {
    fn preflight(&mut self) -> Result<()> {
        match self.missing_tool {
            Some(ref tool) => Err(FirewallError::ToolMissing {
                tool: tool.clone(),
                reason: "not installed".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn reset_set(&mut self, name: &str) -> Result<()> {
        self.mutations += 1;
        self.sets
            .entry(name.to_string())
            .or_insert_with(|| AddressSet::new(name))
            .clear();
        Ok(())
    }

    fn add_to_set(&mut self, name: &str, net: Ipv4Net) -> Result<()> {
        self.mutations += 1;
        let set = self.sets.get_mut(name).ok_or_else(|| FirewallError::Command {
            command: format!("add {} {}", name, net),
            status: "1".to_string(),
            stderr: format!("set {} does not exist", name),
        })?;
        set.insert_net(net);
        Ok(())
    }

    fn install(&mut self, chain: &str, policy: &FirewallPolicy) -> Result<()> {
        self.mutations += 1;
        self.chains
            .insert(chain.to_string(), policy.rules().to_vec());
        Ok(())
    }

    fn verify(&mut self, chain: &str, set: &AddressSet, policy: &FirewallPolicy) -> Result<()> {
        match self.sets.get(set.name()) {
            Some(installed) if installed.members().eq(set.members()) => {}
            Some(installed) => {
                return Err(FirewallError::Mismatch {
                    target: set.name().to_string(),
                    detail: format!("{} members, expected {}", installed.len(), set.len()),
                })
            }
            None => {
                return Err(FirewallError::Mismatch {
                    target: set.name().to_string(),
                    detail: "set does not exist".to_string(),
                })
            }
        }

        match self.chains.get(chain) {
            Some(rules) if rules.as_slice() == policy.rules() => Ok(()),
            Some(rules) => Err(FirewallError::Mismatch {
                target: chain.to_string(),
                detail: format!("{} rules, expected {}", rules.len(), policy.rules().len()),
            }),
            None => Err(FirewallError::Mismatch {
                target: chain.to_string(),
                detail: "chain does not exist".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_creates_then_flushes() {
        let mut store = MemoryStore::new();
        store.reset_set("s").unwrap();
        store.add_to_set("s", "1.1.1.1/32".parse().unwrap()).unwrap();
        assert_eq!(store.set("s").unwrap().len(), 1);

        store.reset_set("s").unwrap();
        assert!(store.set("s").unwrap().is_empty());
    }

    #[test]
    fn test_add_to_unknown_set_fails() {
        let mut store = MemoryStore::new();
        assert!(store.add_to_set("nope", "1.1.1.1/32".parse().unwrap()).is_err());
    }

    #[test]
    fn test_install_replaces_chain() {
        let mut store = MemoryStore::new();
        let policy = FirewallPolicy::builder().allow_set("s", &[443]).build().unwrap();
        store.install("C", &policy).unwrap();
        store.install("C", &FirewallPolicy::restrictive()).unwrap();
        assert_eq!(store.rules("C").unwrap(), FirewallPolicy::restrictive().rules());
    }

    #[test]
    fn test_verify_matches_installed_state() {
        let mut store = MemoryStore::new();
        let mut set = AddressSet::new("s");
        set.insert_net("10.0.0.0/8".parse().unwrap());
        let policy = FirewallPolicy::builder().allow_set("s", &[443]).build().unwrap();

        store.reset_set("s").unwrap();
        store.add_to_set("s", "10.0.0.0/8".parse().unwrap()).unwrap();
        store.install("C", &policy).unwrap();
        store.verify("C", &set, &policy).unwrap();
    }

    #[test]
    fn test_verify_detects_tampered_chain() {
        let mut store = MemoryStore::new();
        let set = AddressSet::new("s");
        let policy = FirewallPolicy::builder().allow_set("s", &[443]).build().unwrap();
        store.reset_set("s").unwrap();
        store.install("C", &policy).unwrap();

        // Default deny removed behind the store's back
        store.rules_mut("C").unwrap().pop();

        let err = store.verify("C", &set, &policy).unwrap_err();
        assert!(matches!(err, FirewallError::Mismatch { ref target, .. } if target == "C"));
    }

    #[test]
    fn test_verify_detects_extra_set_member() {
        let mut store = MemoryStore::new();
        let set = AddressSet::new("s");
        store.reset_set("s").unwrap();
        store.add_to_set("s", "9.9.9.9/32".parse().unwrap()).unwrap();
        store.install("C", &FirewallPolicy::restrictive()).unwrap();

        let err = store
            .verify("C", &set, &FirewallPolicy::restrictive())
            .unwrap_err();
        assert!(matches!(err, FirewallError::Mismatch { ref target, .. } if target == "s"));
    }

    #[test]
    fn test_missing_tool_preflight() {
        let mut store = MemoryStore::without_tool("ipset");
        assert!(matches!(store.preflight(), Err(FirewallError::ToolMissing { .. })));
        assert_eq!(store.mutations(), 0);
    }
}
