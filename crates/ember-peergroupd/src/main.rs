mod topology;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ember_peergroup::memory::LogPublisher;
use ember_peergroup::ReconcilerConfig;
use tracing::info;

use crate::topology::Topology;

#[derive(Parser)]
#[command(
    name = "ember-peergroupd",
    about = "keeps the ember controller replica set in step with cluster state"
)]
struct Args {
    /// path to TOML reconciler configuration
    #[arg(short = 'c', long, env = "EMBER_PEERGROUP_CONFIG")]
    config: Option<PathBuf>,

    /// path to TOML topology of controller nodes and replica-set members
    #[arg(short = 't', long, env = "EMBER_PEERGROUP_TOPOLOGY")]
    topology: Option<PathBuf>,

    /// print default configuration as TOML and exit
    #[arg(long)]
    config_template: bool,

    /// milliseconds between passes when nothing changes
    #[arg(long, env = "EMBER_PEERGROUP_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// most voting members allowed. must be odd
    #[arg(long, env = "EMBER_PEERGROUP_MAX_VOTERS")]
    max_voters: Option<usize>,

    /// pick replication addresses from a space every controller shares
    #[arg(long, env = "EMBER_PEERGROUP_SUPPORTS_SPACES")]
    supports_spaces: bool,
}

fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("error: {msg}");
    std::process::exit(1);
}

/// Layers CLI/env overrides on top of the loaded config.
fn apply_args(cfg: &mut ReconcilerConfig, args: &Args) {
    if let Some(ms) = args.poll_interval_ms {
        cfg.poll_interval = Duration::from_millis(ms);
    }
    if let Some(n) = args.max_voters {
        cfg.max_voters = n;
    }
    if args.supports_spaces {
        cfg.supports_spaces = true;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ember_peergroup=info,ember_peergroupd=info".into()),
        )
        .init();

    let args = Args::parse();

    if args.config_template {
        match ReconcilerConfig::default().to_toml() {
            Ok(toml) => {
                println!("{toml}");
                std::process::exit(0);
            }
            Err(e) => exit_err(format!("failed to generate config template: {e}")),
        }
    }

    // defaults → TOML file → CLI/env overrides
    let mut cfg = match &args.config {
        Some(path) => ReconcilerConfig::load(path).unwrap_or_else(|e| exit_err(e)),
        None => ReconcilerConfig::default(),
    };
    apply_args(&mut cfg, &args);
    if let Err(e) = cfg.validate() {
        exit_err(e);
    }

    let topology = match &args.topology {
        Some(path) => Topology::load(path).unwrap_or_else(|e| exit_err(e)),
        None => Topology::default(),
    };
    info!(nodes = topology.node_count(), "loaded topology");

    let cluster = Arc::new(topology.cluster_state());
    let session = Arc::new(topology.session());
    let handle = ember_peergroup::start(cluster, session, Arc::new(LogPublisher), cfg);

    let stopper = handle.stop_handle();
    let finished = handle.wait();
    tokio::pin!(finished);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let result = tokio::select! {
        biased;
        _ = &mut shutdown => {
            info!("shutdown signal received, stopping reconciler");
            stopper.stop();
            (&mut finished).await
        }
        // the loop only exits by itself on a fatal error
        result = &mut finished => result,
    };
    if let Err(e) = result {
        exit_err(e);
    }
}
