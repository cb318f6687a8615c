//! Core library for the sandbox egress plane
//!
//! Parses the domain allowlist, resolves the upstream proxy chain, renders
//! the forwarding directive for the allowlisting proxy, and assembles the
//! environment and settings shared by the firewall, gateway and control
//! binaries.

pub mod allowlist;
pub mod chain;
pub mod config;
pub mod directive;
pub mod env;
pub mod error;
pub mod tls;

pub use allowlist::{Allowlist, AllowlistEntry};
pub use chain::{ChainDescriptor, ProxyCredentials, ProxySpec, DEFAULT_PROXY_PORT};
pub use config::{Config, ConfigLoader};
pub use directive::{render_chain_directive, render_proxy_config};
pub use env::EgressEnv;
pub use error::{ChainParseError, CoreError, Result};
