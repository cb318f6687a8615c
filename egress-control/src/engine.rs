//! Forward-proxy engine control

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// The allowlisting forward proxy the sandbox's traffic goes through
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Check a generated configuration without starting the proxy
    async fn validate(&self, config: &Path) -> Result<()>;

    /// Run the proxy in the foreground until it exits
    async fn run(&self, config: &Path) -> Result<()>;
}

/// Squid, driven through its command line
pub struct SquidEngine {
    binary: PathBuf,
}

impl SquidEngine {
    /// Find the binary on `PATH`, or accept an explicit path
    pub fn locate(name: &str) -> Result<Self> {
        let binary = which::which(name).with_context(|| format!("{} not found in PATH", name))?;
        debug!("Using proxy engine {:?}", binary);
        Ok(Self { binary })
    }
}

#[async_trait]
impl ProxyEngine for SquidEngine {
    fn name(&self) -> &str {
        "squid"
    }

    async fn validate(&self, config: &Path) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("-k")
            .arg("parse")
            .arg("-f")
            .arg(config)
            .output()
            .await
            .with_context(|| format!("Failed to run {:?}", self.binary))?;

        if !output.status.success() {
            bail!(
                "{:?} rejected by squid ({}): {}",
                config,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn run(&self, config: &Path) -> Result<()> {
        info!("Starting squid with {:?}", config);
        let status = Command::new(&self.binary)
            .arg("-N")
            .arg("-f")
            .arg(config)
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("Failed to start {:?}", self.binary))?;

        if !status.success() {
            bail!("squid exited with {}", status);
        }
        Ok(())
    }
}
