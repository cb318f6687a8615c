//! Settings file schema

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Complete settings file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub firewall: FirewallConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Packet-filter hardening settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FirewallConfig {
    /// Run the firewall synchronizer at startup
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_allowlist")]
    pub allowlist: PathBuf,
    /// Name of the kernel address set
    #[serde(default = "default_set_name")]
    pub set_name: String,
    /// Name of the managed rule chain
    #[serde(default = "default_chain")]
    pub chain: String,
    /// TCP ports allowed towards set members
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    /// Published IP-range metadata (empty disables the fetch)
    #[serde(default = "default_provider_url")]
    pub provider_url: String,
    #[serde(default = "default_provider_categories")]
    pub provider_categories: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_allowlist() -> PathBuf {
    PathBuf::from("/etc/squid/allowed-domains.txt")
}

fn default_set_name() -> String {
    "allowed-domains".to_string()
}

fn default_chain() -> String {
    "EGRESS-ALLOW".to_string()
}

fn default_ports() -> Vec<u16> {
    vec![80, 443, 22]
}

fn default_provider_url() -> String {
    "https://api.github.com/meta".to_string()
}

fn default_provider_categories() -> Vec<String> {
    vec!["web".to_string(), "api".to_string(), "git".to_string()]
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowlist: default_allowlist(),
            set_name: default_set_name(),
            chain: default_chain(),
            ports: default_ports(),
            provider_url: default_provider_url(),
            provider_categories: default_provider_categories(),
        }
    }
}

/// Forward-proxy engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Base engine configuration containing the chaining marker
    #[serde(default = "default_template")]
    pub template: PathBuf,
    /// Where the generated configuration is written
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Engine binary
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Refuse to start when the allowlist file is missing
    #[serde(default = "default_true")]
    pub require_allowlist: bool,
}

fn default_template() -> PathBuf {
    PathBuf::from("/etc/squid/squid.conf.template")
}

fn default_output() -> PathBuf {
    PathBuf::from("/etc/squid/squid.conf")
}

fn default_engine() -> String {
    "squid".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            output: default_output(),
            engine: default_engine(),
            require_allowlist: true,
        }
    }
}

/// Credential-injecting gateway settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: IpAddr,
    #[serde(default = "default_upstream_host")]
    pub upstream_host: String,
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,
    /// Per-request upstream timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_listen_addr() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_upstream_host() -> String {
    "api.anthropic.com".to_string()
}

fn default_upstream_port() -> u16 {
    443
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_host: default_upstream_host(),
            upstream_port: default_upstream_port(),
            timeout_secs: default_timeout_secs(),
        }
    }
}
