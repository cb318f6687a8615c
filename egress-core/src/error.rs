//! Error types for egress configuration

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Allowlist not found: {0}")]
    AllowlistNotFound(PathBuf),

    #[error("Failed to read allowlist {path}: {source}")]
    AllowlistRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid upstream proxy: {0}")]
    Chain(#[from] ChainParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ways an upstream proxy URL can fail the strict grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainParseError {
    #[error("no host in proxy URL")]
    MissingHost,

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("whitespace or control character in proxy {field}")]
    InvalidCharacter { field: &'static str },
}
