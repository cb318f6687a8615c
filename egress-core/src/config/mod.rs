//! Settings for the egress plane
//!
//! Settings come from an optional TOML file; secrets and the upstream
//! proxy only ever come from the environment (see [`crate::env`]).

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{Config, FirewallConfig, GatewayConfig, ProxyConfig};
