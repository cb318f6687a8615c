//! Error types for firewall synchronization

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FirewallError>;

#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("Required tool unavailable: {tool} ({reason})")]
    ToolMissing { tool: String, reason: String },

    #[error("Command `{command}` failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Invalid firewall policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("Resolution failed for {host}: {message}")]
    Resolve { host: String, message: String },

    #[error("Range fetch failed: {0}")]
    Fetch(String),

    #[error("Installed state of {target} does not match the policy: {detail}")]
    Mismatch { target: String, detail: String },

    #[error("Configuration error: {0}")]
    Config(#[from] egress_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("policy does not end with a default-deny rule")]
    MissingDefaultDeny,

    #[error("rule {index} follows the default-deny rule")]
    RuleAfterDefaultDeny { index: usize },

    #[error("set rule for {set} has no ports")]
    EmptyPortList { set: String },
}
