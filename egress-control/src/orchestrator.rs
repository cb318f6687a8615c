//! Startup sequencing for the egress plane
//!
//! Order matters: the proxy configuration is rendered and validated first,
//! then the packet filter is synchronized, and only after that do the
//! gateway and the proxy engine start. Any failure before the services
//! start aborts without serving traffic.

use crate::engine::ProxyEngine;
use anyhow::{bail, Context, Result};
use egress_core::{render_proxy_config, ChainDescriptor, Config, EgressEnv};
use egress_firewall::{is_unavailable, synchronize, PolicyStore, SyncReport};
use egress_gateway::{Gateway, GatewayHandle, GatewaySettings, ShutdownSignal};
use std::fs;
use tracing::{error, info, warn};

/// Render the proxy configuration for `chain` from the configured template
pub fn generated_config(config: &Config, chain: &ChainDescriptor) -> Result<String> {
    let template = fs::read_to_string(&config.proxy.template)
        .with_context(|| format!("Failed to read proxy template {:?}", config.proxy.template))?;
    Ok(render_proxy_config(&template, chain))
}

/// Resolve the upstream chain, refusing a proxy URL that was set but unusable
pub fn resolve_chain(env: &EgressEnv) -> Result<ChainDescriptor> {
    let chain = env.chain();
    if env.upstream_proxy().is_some() && !chain.is_chaining() {
        bail!("Upstream proxy is set but could not be parsed; refusing to start unchained");
    }
    if chain.is_chaining() {
        info!(
            "Chaining through {}{}",
            chain.authority(),
            if chain.credentials.is_some() {
                " (with login)"
            } else {
                ""
            }
        );
    }
    Ok(chain)
}

pub struct Orchestrator<E> {
    config: Config,
    env: EgressEnv,
    engine: E,
    skip_firewall: bool,
}

impl<E: ProxyEngine> Orchestrator<E> {
    pub fn new(config: Config, env: EgressEnv, engine: E) -> Self {
        Self {
            config,
            env,
            engine,
            skip_firewall: false,
        }
    }

    pub fn skip_firewall(mut self, skip: bool) -> Self {
        self.skip_firewall = skip;
        self
    }

    /// Write and validate the proxy configuration
    pub async fn prepare(&self) -> Result<ChainDescriptor> {
        let chain = resolve_chain(&self.env)?;

        let allowlist = &self.config.firewall.allowlist;
        if self.config.proxy.require_allowlist && !allowlist.exists() {
            bail!("Allowlist {:?} not found", allowlist);
        }

        let rendered = generated_config(&self.config, &chain)?;
        let output = &self.config.proxy.output;
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        fs::write(output, rendered).with_context(|| format!("Failed to write {:?}", output))?;

        self.engine
            .validate(output)
            .await
            .with_context(|| format!("{} configuration failed validation", self.engine.name()))?;
        info!("Proxy configuration {:?} validated", output);

        Ok(chain)
    }

    /// Synchronize the packet filter, degrading when it is unavailable
    pub async fn sync_firewall<S: PolicyStore>(
        &self,
        store: S,
        chain: &ChainDescriptor,
    ) -> Result<Option<SyncReport>> {
        if self.skip_firewall || !self.config.firewall.enabled {
            info!("Packet filter synchronization disabled");
            return Ok(None);
        }

        match synchronize(store, &self.config.firewall, chain, true).await {
            Ok((report, _)) => {
                info!(
                    "Packet filter active: {} set members, {} rules",
                    report.set.len(),
                    report.policy.rules().len()
                );
                Ok(Some(report))
            }
            Err(e) if is_unavailable(&e) => {
                warn!(
                    "Packet filter unavailable ({}); relying on proxy allowlisting alone",
                    e
                );
                Ok(None)
            }
            Err(e) => Err(e).context("Packet filter synchronization failed"),
        }
    }

    pub async fn start_gateway(&self) -> Result<GatewayHandle> {
        let tls = egress_core::tls::client_config().context("building TLS client configuration")?;
        let settings = GatewaySettings::from_config(&self.config.gateway, &self.env, tls)?;
        Ok(Gateway::bind(settings).await?.spawn())
    }

    /// Full startup, then run the proxy engine until it or the gateway
    /// stops, or the process receives SIGINT or SIGTERM
    pub async fn run<S: PolicyStore>(&self, store: S) -> Result<()> {
        let chain = self.prepare().await?;
        self.sync_firewall(store, &chain).await?;

        let mut shutdown = ShutdownSignal::new().context("installing signal handlers")?;
        let mut gateway = self.start_gateway().await?;
        let output = &self.config.proxy.output;

        enum Stopped {
            Engine(Result<()>),
            Gateway(egress_gateway::Result<()>),
            Signalled(&'static str),
        }

        let stopped = tokio::select! {
            result = self.engine.run(output) => Stopped::Engine(result),
            result = gateway.join() => Stopped::Gateway(result),
            name = shutdown.recv() => Stopped::Signalled(name),
        };

        match stopped {
            Stopped::Engine(result) => {
                gateway.shutdown().await?;
                result
            }
            Stopped::Gateway(result) => {
                error!("Gateway stopped unexpectedly");
                result?;
                bail!("Gateway stopped unexpectedly")
            }
            Stopped::Signalled(name) => {
                info!(signal = name, "Shutting down");
                gateway.shutdown().await?;
                Ok(())
            }
        }
    }
}
