//! Egress plane launcher: proxy configuration, packet filter, gateway and
//! the forward proxy, started in that order

use anyhow::{Context, Result};
use clap::Parser;
use egress_core::{ConfigLoader, EgressEnv};
use egress_firewall::IptablesStore;
use std::path::PathBuf;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

mod engine;
mod orchestrator;

use engine::SquidEngine;
use orchestrator::{generated_config, resolve_chain, Orchestrator};

#[derive(Parser)]
#[command(
    name = "egress-control",
    about = "Start the sandbox egress plane",
    version
)]
struct Args {
    /// Settings file (TOML format)
    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the generated proxy configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Do not touch the packet filter
    #[arg(long)]
    skip_firewall: bool,

    /// Enable debug logging
    #[arg(long, short)]
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
    let config = ConfigLoader::load_or_default(
        args.config.as_deref(),
        env.config_path().map(|p| p.as_path()),
    )
    .context("Failed to load settings")?;

    if args.print_config {
        let chain = resolve_chain(&env)?;
        print!("{}", generated_config(&config, &chain)?);
        return Ok(());
    }

    let engine = SquidEngine::locate(&config.proxy.engine)?;
    Orchestrator::new(config, env, engine)
        .skip_firewall(args.skip_firewall)
        .run(IptablesStore::new())
        .await
}
