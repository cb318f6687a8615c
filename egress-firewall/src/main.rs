use anyhow::{Context, Result};
use clap::Parser;
use egress_core::{ConfigLoader, EgressEnv};
use egress_firewall::{is_unavailable, synchronize, IptablesStore, MemoryStore, SyncReport};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

#[derive(Parser, Debug)]
#[command(name = "egress-firewall")]
#[command(about = "Install the allowlist address set and default-deny egress policy")]
struct Args {
    /// Allowlist file (overrides the settings file)
    #[arg(long, short = 'a')]
    allowlist: Option<PathBuf>,

    /// Settings file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Compute and print the policy without touching the kernel
    #[arg(long)]
    dry_run: bool,

    /// Skip the provider range fetch
    #[arg(long)]
    no_provider: bool,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var("EGRESS_LOG")
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &SyncReport) {
    println!("# set {} ({} members)", report.set.name(), report.set.len());
    for net in report.set.members() {
        println!("{}", net);
    }
    println!("# policy");
    print!("{}", report.policy);
    for host in &report.unresolved {
        println!("# unresolved: {}", host);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let env = EgressEnv::from_env();
    let mut config = ConfigLoader::load_or_default(
        args.config.as_deref(),
        env.config_path().map(|p| p.as_path()),
    )
    .context("loading settings")?;
    if let Some(allowlist) = args.allowlist {
        config.firewall.allowlist = allowlist;
    }

    let chain = env.chain();
    let fetch_provider = !args.no_provider;

    if args.dry_run {
        let (report, _) =
            synchronize(MemoryStore::new(), &config.firewall, &chain, fetch_provider).await?;
        print_report(&report);
        return Ok(());
    }

    match synchronize(IptablesStore::new(), &config.firewall, &chain, fetch_provider).await {
        Ok((report, _)) => {
            info!(
                "Egress policy active: {} set members, {} rules",
                report.set.len(),
                report.policy.rules().len()
            );
            Ok(())
        }
        Err(e) if is_unavailable(&e) => {
            warn!("Packet filtering unavailable, nothing installed: {}", e);
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}
