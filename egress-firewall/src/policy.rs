//! Ordered packet-filter policy
//!
//! Every policy is a fixed prefix (loopback, established, DNS), the
//! destination allow rules, and a terminal default-deny. Policies can only
//! be obtained through [`PolicyBuilder`] or [`FirewallPolicy::from_rules`],
//! both of which reject anything not ending in exactly one default-deny.

use crate::error::PolicyError;
use std::fmt;
use std::net::Ipv4Addr;

/// Transport protocol for a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A single outbound rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Anything on the loopback interface
    AllowLoopback,
    /// Return traffic for connections already accepted
    AllowEstablished,
    /// Name resolution
    AllowDns { protocol: Protocol },
    /// TCP to members of an address set on the given ports
    AllowSet { set: String, ports: Vec<u16> },
    /// TCP to one host and port (the upstream proxy)
    AllowHost { addr: Ipv4Addr, port: u16 },
    /// Terminal reject
    DefaultDeny,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::AllowLoopback => write!(f, "allow loopback"),
            Rule::AllowEstablished => write!(f, "allow established,related"),
            Rule::AllowDns { protocol } => write!(f, "allow {} dport 53", protocol),
            Rule::AllowSet { set, ports } => {
                let ports: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
                write!(f, "allow tcp to set {} dports {}", set, ports.join(","))
            }
            Rule::AllowHost { addr, port } => write!(f, "allow tcp to {}:{}", addr, port),
            Rule::DefaultDeny => write!(f, "deny all"),
        }
    }
}

/// Validated, ordered rule list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallPolicy {
    rules: Vec<Rule>,
}

impl FirewallPolicy {
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::new()
    }

    /// Fixed rules only: nothing beyond loopback, established and DNS
    pub fn restrictive() -> Self {
        Self {
            rules: fixed_prefix()
                .into_iter()
                .chain(std::iter::once(Rule::DefaultDeny))
                .collect(),
        }
    }

    /// Validate an arbitrary rule list
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self, PolicyError> {
        validate(&rules)?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Upstream proxy allowances in this policy
    pub fn allowed_hosts(&self) -> impl Iterator<Item = (Ipv4Addr, u16)> + '_ {
        self.rules.iter().filter_map(|rule| match rule {
            Rule::AllowHost { addr, port } => Some((*addr, *port)),
            _ => None,
        })
    }
}

impl fmt::Display for FirewallPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            writeln!(f, "{:>3}  {}", i + 1, rule)?;
        }
        Ok(())
    }
}

fn fixed_prefix() -> Vec<Rule> {
    vec![
        Rule::AllowLoopback,
        Rule::AllowEstablished,
        Rule::AllowDns {
            protocol: Protocol::Udp,
        },
        Rule::AllowDns {
            protocol: Protocol::Tcp,
        },
    ]
}

fn validate(rules: &[Rule]) -> Result<(), PolicyError> {
    match rules.iter().position(|r| *r == Rule::DefaultDeny) {
        None => Err(PolicyError::MissingDefaultDeny),
        Some(index) if index + 1 != rules.len() => {
            Err(PolicyError::RuleAfterDefaultDeny { index: index + 1 })
        }
        Some(_) => {
            for rule in rules {
                if let Rule::AllowSet { set, ports } = rule {
                    if ports.is_empty() {
                        return Err(PolicyError::EmptyPortList { set: set.clone() });
                    }
                }
            }
            Ok(())
        }
    }
}

/// Builds a policy in the only valid order
#[derive(Debug)]
pub struct PolicyBuilder {
    rules: Vec<Rule>,
}

impl PolicyBuilder {
    fn new() -> Self {
        Self {
            rules: fixed_prefix(),
        }
    }

    /// Allow TCP to set members on the given ports
    pub fn allow_set(mut self, set: impl Into<String>, ports: &[u16]) -> Self {
        self.rules.push(Rule::AllowSet {
            set: set.into(),
            ports: ports.to_vec(),
        });
        self
    }

    /// Allow TCP to a single host and port
    pub fn allow_host(mut self, addr: Ipv4Addr, port: u16) -> Self {
        let rule = Rule::AllowHost { addr, port };
        if !self.rules.contains(&rule) {
            self.rules.push(rule);
        }
        self
    }

    /// Append the default-deny and validate
    pub fn build(mut self) -> Result<FirewallPolicy, PolicyError> {
        self.rules.push(Rule::DefaultDeny);
        FirewallPolicy::from_rules(self.rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_order() {
        let policy = FirewallPolicy::builder()
            .allow_set("allowed-domains", &[80, 443, 22])
            .allow_host(Ipv4Addr::new(10, 0, 0, 5), 8080)
            .build()
            .unwrap();

        let rules = policy.rules();
        assert_eq!(rules[0], Rule::AllowLoopback);
        assert_eq!(rules[1], Rule::AllowEstablished);
        assert_eq!(rules[2], Rule::AllowDns { protocol: Protocol::Udp });
        assert_eq!(rules[3], Rule::AllowDns { protocol: Protocol::Tcp });
        assert!(matches!(rules[4], Rule::AllowSet { .. }));
        assert_eq!(rules[5], Rule::AllowHost { addr: Ipv4Addr::new(10, 0, 0, 5), port: 8080 });
        assert_eq!(rules.last(), Some(&Rule::DefaultDeny));
    }

    #[test]
    fn test_restrictive_is_prefix_plus_deny() {
        let policy = FirewallPolicy::restrictive();
        assert_eq!(policy.rules().len(), 5);
        assert_eq!(policy.rules().last(), Some(&Rule::DefaultDeny));
        assert!(!policy.rules().iter().any(|r| matches!(r, Rule::AllowSet { .. })));
    }

    #[test]
    fn test_missing_default_deny_rejected() {
        let result = FirewallPolicy::from_rules(vec![Rule::AllowLoopback]);
        assert_eq!(result, Err(PolicyError::MissingDefaultDeny));
    }

    #[test]
    fn test_rule_after_default_deny_rejected() {
        let result = FirewallPolicy::from_rules(vec![
            Rule::AllowLoopback,
            Rule::DefaultDeny,
            Rule::AllowEstablished,
        ]);
        assert_eq!(result, Err(PolicyError::RuleAfterDefaultDeny { index: 2 }));
    }

    #[test]
    fn test_empty_ports_rejected() {
        let result = FirewallPolicy::builder().allow_set("s", &[]).build();
        assert!(matches!(result, Err(PolicyError::EmptyPortList { .. })));
    }

    #[test]
    fn test_duplicate_host_rule_collapses() {
        let policy = FirewallPolicy::builder()
            .allow_host(Ipv4Addr::new(10, 0, 0, 5), 3128)
            .allow_host(Ipv4Addr::new(10, 0, 0, 5), 3128)
            .build()
            .unwrap();
        assert_eq!(policy.allowed_hosts().count(), 1);
    }

    #[test]
    fn test_display_numbers_rules() {
        let rendered = FirewallPolicy::restrictive().to_string();
        assert!(rendered.contains("  1  allow loopback"));
        assert!(rendered.trim_end().ends_with("deny all"));
    }
}
