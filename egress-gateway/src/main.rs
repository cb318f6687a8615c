use anyhow::{Context, Result};
use clap::Parser;
use egress_core::{ConfigLoader, EgressEnv};
use egress_gateway::{Gateway, GatewaySettings, ShutdownSignal};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

#[derive(Parser, Debug)]
#[command(name = "egress-gateway")]
#[command(about = "Relay API calls to the upstream host, injecting the API key")]
struct Args {
    /// Listen address (overrides the settings file)
    #[arg(long)]
    listen: Option<IpAddr>,

    /// Settings file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .with_env_var("EGRESS_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let env = EgressEnv::from_env();
    let mut config = ConfigLoader::load_or_default(
        args.config.as_deref(),
        env.config_path().map(|p| p.as_path()),
    )
    .context("loading settings")?;
    if let Some(listen) = args.listen {
        config.gateway.listen_addr = listen;
    }

    let tls = egress_core::tls::client_config().context("building TLS client configuration")?;
    let settings = GatewaySettings::from_config(&config.gateway, &env, tls)?;

    let mut shutdown = ShutdownSignal::new().context("installing signal handlers")?;
    let mut handle = Gateway::bind(settings).await?.spawn();

    let finished = tokio::select! {
        result = handle.join() => Ok(result),
        name = shutdown.recv() => Err(name),
    };
    match finished {
        Ok(result) => result?,
        Err(name) => {
            tracing::info!(signal = name, "Shutting down");
            handle.shutdown().await?;
        }
    }

    Ok(())
}
