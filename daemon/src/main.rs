mod config;
mod error;
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
mod ring;
#[cfg(target_os = "linux")]
mod runner;
#[cfg(target_os = "linux")]
mod socket;

use clap::{Parser, Subcommand};
use config::Config;
use error::DaemonError;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use swivel_core::{Engine, FourTuple, classify};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "swivel")]
#[command(about = "Swivel layer-2/layer-3 TCP load balancer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Balance TCP traffic arriving on an interface
    Run {
        /// Interface to receive and retransmit frames on
        #[arg(long, default_value = "eth0")]
        iface: String,

        /// Path to the JSON configuration file
        #[arg(long)]
        config: PathBuf,

        /// Number of packet workers, at most 32 (defaults to SWIVEL_WORKERS or 1)
        #[arg(long)]
        workers: Option<usize>,

        /// Seconds between stats log lines
        #[arg(long, default_value_t = 10)]
        stats_interval: u64,
    },
    /// Show which backend slot a flow maps to
    Classify {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        src: Ipv4Addr,

        #[arg(long)]
        dst: Ipv4Addr,

        #[arg(long)]
        sport: u16,

        #[arg(long)]
        dport: u16,
    },
    /// Validate a configuration file and print the effective settings
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            iface,
            config,
            workers,
            stats_interval,
        } => run(&iface, &config, workers, stats_interval).await?,
        Commands::Classify {
            config,
            src,
            dst,
            sport,
            dport,
        } => {
            let engine = Config::load(&config)?.build_engine()?;
            let tuple = FourTuple::new(src, dst, sport, dport);
            let slot = classify(&tuple, engine.directory().capacity());
            match engine.directory().lookup(slot) {
                Some(b) => println!("hash {:#010x} -> slot {}: {} {}", tuple.hash(), slot, b.ip, b.mac),
                None => println!("hash {:#010x} -> slot {}: <unconfigured>", tuple.hash(), slot),
            }
        }
        Commands::CheckConfig { config } => {
            let config = Config::load(&config)?;
            let engine = config.build_engine()?;
            let ids = engine.identities();
            println!("client:        {} {}", ids.client.ip, ids.client.mac);
            println!("load balancer: {} {}", ids.load_balancer.ip, ids.load_balancer.mac);
            println!("policy:        {:?}", engine.unknown_source_policy());
            println!("capacity:      {}", engine.directory().capacity());
            for slot in 0..engine.directory().capacity().get() {
                match engine.directory().lookup(slot) {
                    Some(b) => println!("  slot {}: {} {}", slot, b.ip, b.mac),
                    None => println!("  slot {}: <unconfigured>", slot),
                }
            }
        }
    }

    Ok(())
}

fn log_stats(engine: &Engine) -> Result<(), DaemonError> {
    let snapshot = serde_json::to_string(&engine.stats().snapshot())?;
    tracing::info!(stats = %snapshot, "Engine stats");
    Ok(())
}

#[cfg(target_os = "linux")]
async fn run(
    iface: &str,
    config_path: &Path,
    workers: Option<usize>,
    stats_interval: u64,
) -> Result<(), DaemonError> {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::signal::unix::{SignalKind, signal};

    let engine = Arc::new(Config::load(config_path)?.build_engine()?);
    let workers = runner::worker_count(workers);
    let runner = runner::PacketRunner::start(engine.clone(), iface, workers)?;

    let mut hangup = signal(SignalKind::hangup())?;
    let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval.max(1)));
    ticker.tick().await;

    tracing::info!("Waiting for Ctrl-C...");
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                break;
            }
            _ = hangup.recv() => {
                // A bad reload keeps the running configuration.
                match Config::load(config_path).and_then(|c| c.apply(&engine)) {
                    Ok(()) => tracing::info!(path = %config_path.display(), "Configuration reloaded"),
                    Err(e) => tracing::error!(error = %e, "Reload failed"),
                }
            }
            _ = ticker.tick() => {
                log_stats(&engine)?;
                runner.drops().log();
            }
        }
    }

    tracing::info!("Exiting...");
    runner.drops().log();
    tokio::task::spawn_blocking(move || drop(runner))
        .await
        .map_err(|e| DaemonError::Io(std::io::Error::other(e)))?;
    log_stats(&engine)
}

#[cfg(not(target_os = "linux"))]
async fn run(
    _iface: &str,
    _config_path: &Path,
    _workers: Option<usize>,
    _stats_interval: u64,
) -> Result<(), DaemonError> {
    Err(DaemonError::Unsupported)
}
