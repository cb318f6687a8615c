//! In-process view of the kernel address set

use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// Named collection of IPv4 networks (single addresses are stored as /32)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSet {
    name: String,
    members: BTreeSet<Ipv4Net>,
}

impl AddressSet {
    /// Create a new empty set
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a single address; returns false if it was already present
    pub fn insert_addr(&mut self, addr: Ipv4Addr) -> bool {
        self.members.insert(Ipv4Net::from(addr))
    }

    /// Add a network, normalized to its network address
    pub fn insert_net(&mut self, net: Ipv4Net) -> bool {
        self.members.insert(net.trunc())
    }

    /// Check if an address falls inside any member
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.members.iter().any(|net| net.contains(&addr))
    }

    pub fn members(&self) -> impl Iterator<Item = &Ipv4Net> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses_and_ranges() {
        let mut set = AddressSet::new("allowed");
        set.insert_addr(Ipv4Addr::new(140, 82, 112, 3));
        set.insert_net("192.30.252.0/22".parse().unwrap());

        assert!(set.contains(Ipv4Addr::new(140, 82, 112, 3)));
        assert!(set.contains(Ipv4Addr::new(192, 30, 253, 9)));
        assert!(!set.contains(Ipv4Addr::new(140, 82, 112, 4)));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_duplicates_collapse() {
        let mut set = AddressSet::new("allowed");
        assert!(set.insert_addr(Ipv4Addr::new(1, 2, 3, 4)));
        assert!(!set.insert_addr(Ipv4Addr::new(1, 2, 3, 4)));
        assert!(!set.insert_net("1.2.3.4/32".parse().unwrap()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_networks_truncated() {
        let mut set = AddressSet::new("allowed");
        set.insert_net("10.1.2.3/8".parse().unwrap());
        let members: Vec<String> = set.members().map(|n| n.to_string()).collect();
        assert_eq!(members, vec!["10.0.0.0/8"]);
    }

    #[test]
    fn test_clear() {
        let mut set = AddressSet::new("allowed");
        set.insert_addr(Ipv4Addr::LOCALHOST);
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.name(), "allowed");
    }
}
