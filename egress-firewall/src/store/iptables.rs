//! iptables/ipset adapter

use super::PolicyStore;
use crate::error::{FirewallError, Result};
use crate::policy::{FirewallPolicy, Rule};
use crate::set::AddressSet;
use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::debug;

/// Programs the kernel through the `iptables` and `ipset` binaries
#[derive(Debug)]
pub struct IptablesStore {
    iptables_name: PathBuf,
    ipset_name: PathBuf,
    iptables: Option<PathBuf>,
    ipset: Option<PathBuf>,
}

impl Default for IptablesStore {
    fn default() -> Self {
        Self::with_tools("iptables", "ipset")
    }
}

impl IptablesStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given binaries, either names looked up on `PATH` or paths
    pub fn with_tools(iptables: impl Into<PathBuf>, ipset: impl Into<PathBuf>) -> Self {
        Self {
            iptables_name: iptables.into(),
            ipset_name: ipset.into(),
            iptables: None,
            ipset: None,
        }
    }

    fn iptables(&self) -> Result<&Path> {
        self.iptables.as_deref().ok_or_else(|| not_checked("iptables"))
    }

    fn ipset(&self) -> Result<&Path> {
        self.ipset.as_deref().ok_or_else(|| not_checked("ipset"))
    }
}

fn not_checked(tool: &str) -> FirewallError {
    FirewallError::ToolMissing {
        tool: tool.to_string(),
        reason: "preflight not run".to_string(),
    }
}

fn locate(tool: &Path) -> Result<PathBuf> {
    which::which(tool).map_err(|e| FirewallError::ToolMissing {
        tool: tool.display().to_string(),
        reason: e.to_string(),
    })
}

fn output(program: &Path, args: &[String]) -> Result<Output> {
    debug!("Running {} {}", program.display(), args.join(" "));
    Ok(Command::new(program).args(args).output()?)
}

/// Run a command and turn a non-zero exit into an error
fn run(program: &Path, args: &[String]) -> Result<()> {
    let out = output(program, args)?;
    if out.status.success() {
        return Ok(());
    }
    Err(FirewallError::Command {
        command: format!("{} {}", program.display(), args.join(" ")),
        status: out.status.to_string(),
        stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
    })
}

/// Run a command and report whether it succeeded
fn succeeds(program: &Path, args: &[String]) -> Result<bool> {
    Ok(output(program, args)?.status.success())
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// iptables arguments appending `rule` to `chain`
pub fn rule_args(chain: &str, rule: &Rule) -> Vec<String> {
    let mut out = args(&["-A", chain]);
    out.extend(rule_spec(rule));
    out
}

/// iptables arguments checking that `rule` exists in `chain`
pub fn check_args(chain: &str, rule: &Rule) -> Vec<String> {
    let mut out = args(&["-C", chain]);
    out.extend(rule_spec(rule));
    out
}

/// Members listed by `ipset list <set>`, one per line after `Members:`.
///
/// hash:net prints single hosts without a prefix length.
pub fn parse_ipset_members(listing: &str) -> Result<BTreeSet<Ipv4Net>> {
    let mut members = BTreeSet::new();
    let mut in_members = false;
    for line in listing.lines() {
        let line = line.trim();
        if !in_members {
            in_members = line == "Members:";
            continue;
        }
        if line.is_empty() {
            continue;
        }
        let entry = line.split_whitespace().next().unwrap_or_default();
        let net = match entry.parse::<Ipv4Net>() {
            Ok(net) => net,
            Err(_) => match entry.parse::<Ipv4Addr>() {
                Ok(addr) => Ipv4Net::from(addr),
                Err(_) => {
                    return Err(FirewallError::Mismatch {
                        target: "ipset".to_string(),
                        detail: format!("unrecognised member {:?}", entry),
                    })
                }
            },
        };
        members.insert(net.trunc());
    }
    if !in_members {
        return Err(FirewallError::Mismatch {
            target: "ipset".to_string(),
            detail: "listing has no Members section".to_string(),
        });
    }
    Ok(members)
}

fn rule_spec(rule: &Rule) -> Vec<String> {
    let mut out = Vec::new();
    match rule {
        Rule::AllowLoopback => out.extend(args(&["-o", "lo", "-j", "ACCEPT"])),
        Rule::AllowEstablished => out.extend(args(&[
            "-m",
            "conntrack",
            "--ctstate",
            "ESTABLISHED,RELATED",
            "-j",
            "ACCEPT",
        ])),
        Rule::AllowDns { protocol } => {
            out.extend(args(&["-p", &protocol.to_string(), "--dport", "53", "-j", "ACCEPT"]))
        }
        Rule::AllowSet { set, ports } => {
            let ports: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
            out.extend(args(&[
                "-p",
                "tcp",
                "-m",
                "set",
                "--match-set",
                set,
                "dst",
                "-m",
                "multiport",
                "--dports",
                &ports.join(","),
                "-j",
                "ACCEPT",
            ]))
        }
        Rule::AllowHost { addr, port } => out.extend(args(&[
            "-p",
            "tcp",
            "-d",
            &addr.to_string(),
            "--dport",
            &port.to_string(),
            "-j",
            "ACCEPT",
        ])),
        Rule::DefaultDeny => out.extend(args(&[
            "-j",
            "REJECT",
            "--reject-with",
            "icmp-admin-prohibited",
        ])),
    }
    out
}

impl PolicyStore for IptablesStore {
    fn preflight(&mut self) -> Result<()> {
        let iptables = locate(&self.iptables_name)?;
        let ipset = locate(&self.ipset_name)?;

        // Listing needs the same privilege as writing
        if !succeeds(&iptables, &args(&["-n", "-L", "OUTPUT"]))? {
            return Err(FirewallError::ToolMissing {
                tool: "iptables".to_string(),
                reason: "cannot read the filter table (missing CAP_NET_ADMIN?)".to_string(),
            });
        }

        // Fails without the ip_set kernel module or the privilege to use it
        if !succeeds(&ipset, &args(&["list", "-n"]))? {
            return Err(FirewallError::ToolMissing {
                tool: "ipset".to_string(),
                reason: "cannot list sets (ip_set module not loaded or missing CAP_NET_ADMIN?)"
                    .to_string(),
            });
        }

        self.iptables = Some(iptables);
        self.ipset = Some(ipset);
        Ok(())
    }

    fn reset_set(&mut self, name: &str) -> Result<()> {
        let ipset = self.ipset()?;
        run(ipset, &args(&["create", name, "hash:net", "-exist"]))?;
        run(ipset, &args(&["flush", name]))
    }

    fn add_to_set(&mut self, name: &str, net: Ipv4Net) -> Result<()> {
        run(self.ipset()?, &args(&["add", name, &net.to_string(), "-exist"]))
    }

    fn install(&mut self, chain: &str, policy: &FirewallPolicy) -> Result<()> {
        let iptables = self.iptables()?;

        if !succeeds(iptables, &args(&["-n", "-L", chain]))? {
            run(iptables, &args(&["-N", chain]))?;
        }
        run(iptables, &args(&["-F", chain]))?;

        if !succeeds(iptables, &args(&["-C", "OUTPUT", "-j", chain]))? {
            run(iptables, &args(&["-I", "OUTPUT", "1", "-j", chain]))?;
        }

        for rule in policy.rules() {
            run(iptables, &rule_args(chain, rule))?;
        }
        Ok(())
    }

    fn verify(&mut self, chain: &str, set: &AddressSet, policy: &FirewallPolicy) -> Result<()> {
        let ipset = self.ipset()?;
        let listing = output(ipset, &args(&["list", set.name()]))?;
        if !listing.status.success() {
            return Err(FirewallError::Mismatch {
                target: set.name().to_string(),
                detail: String::from_utf8_lossy(&listing.stderr).trim().to_string(),
            });
        }
        let installed = parse_ipset_members(&String::from_utf8_lossy(&listing.stdout))?;
        let expected: BTreeSet<Ipv4Net> = set.members().copied().collect();
        if installed != expected {
            return Err(FirewallError::Mismatch {
                target: set.name().to_string(),
                detail: format!("{} members, expected {}", installed.len(), expected.len()),
            });
        }

        let iptables = self.iptables()?;
        if !succeeds(iptables, &args(&["-C", "OUTPUT", "-j", chain]))? {
            return Err(FirewallError::Mismatch {
                target: "OUTPUT".to_string(),
                detail: format!("no jump to {}", chain),
            });
        }

        // iptables -S rewrites rule text, so each rule is matched with -C
        // and the count and position of the deny come from the listing
        for rule in policy.rules() {
            if !succeeds(iptables, &check_args(chain, rule))? {
                return Err(FirewallError::Mismatch {
                    target: chain.to_string(),
                    detail: format!("missing rule: {}", rule),
                });
            }
        }

        let listing = output(iptables, &args(&["-S", chain]))?;
        let appended: Vec<String> = String::from_utf8_lossy(&listing.stdout)
            .lines()
            .filter(|line| line.starts_with("-A "))
            .map(|line| line.to_string())
            .collect();
        if appended.len() != policy.rules().len() {
            return Err(FirewallError::Mismatch {
                target: chain.to_string(),
                detail: format!(
                    "{} rules, expected {}",
                    appended.len(),
                    policy.rules().len()
                ),
            });
        }
        if !appended.last().is_some_and(|line| line.contains("-j REJECT")) {
            return Err(FirewallError::Mismatch {
                target: chain.to_string(),
                detail: "last rule is not the default deny".to_string(),
            });
        }
        Ok(())
    }
}
