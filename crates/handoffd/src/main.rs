//! handoffd: shared-listener connection distributor.
//!
//! One process owns the listening socket; a pool of in-process workers
//! takes turns serving the connections it accepts.
//!
//! # Usage
//!
//! ```text
//! handoffd scaffold --port 8080 --workers 4 > handoff.toml
//! handoffd run --config handoff.toml
//! handoffd run --port 8080 --workers 2
//! ```

mod pool;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use handoff_core::HandoffConfig;
use handoff_core::config::LoggingConfig;
use handoff_distributor::Coordinator;
use handoff_net::NetEndpointFactory;

use crate::pool::WorkerPool;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_FILTER: &str = "info,handoff_distributor=debug,handoff_net=debug,handoffd=debug";
const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "handoffd", about = "Shared-listener connection distributor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator and its worker pool.
    Run {
        /// Path to handoff.toml.
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Listen port (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Listen address (overrides the config file).
        #[arg(long)]
        address: Option<String>,

        /// Number of workers (overrides the config file).
        #[arg(long)]
        workers: Option<u32>,
    },
    /// Print a starter handoff.toml.
    Scaffold {
        #[arg(long, default_value = "8080")]
        port: u16,

        #[arg(long, default_value = "4")]
        workers: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            address,
            workers,
        } => {
            let config = load_config(config, port, address, workers)?;
            init_tracing(config.logging.as_ref())?;
            run(config).await
        }
        Command::Scaffold { port, workers } => {
            print!("{}", HandoffConfig::scaffold(port, workers).to_toml_string()?);
            Ok(())
        }
    }
}

/// Read the config file (or start from defaults) and apply CLI overrides.
fn load_config(
    path: Option<PathBuf>,
    port: Option<u16>,
    address: Option<String>,
    workers: Option<u32>,
) -> anyhow::Result<HandoffConfig> {
    let mut config = match &path {
        Some(path) => HandoffConfig::from_file(path)?,
        None => HandoffConfig::scaffold(port.unwrap_or(DEFAULT_PORT), 4),
    };

    if port.is_some() || address.is_some() {
        config.listen.path = None;
    }
    if let Some(port) = port {
        config.listen.port = Some(port);
    }
    if let Some(address) = address {
        config.listen.address = Some(address);
    }
    if let Some(workers) = workers {
        anyhow::ensure!(workers > 0, "--workers must be at least 1");
        config.workers.count = workers;
    }

    config.listen_spec()?;
    Ok(config)
}

fn init_tracing(logging: Option<&LoggingConfig>) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = logging
                .and_then(|l| l.filter.as_deref())
                .unwrap_or(DEFAULT_FILTER);
            EnvFilter::try_new(directive)?
        }
    };

    if logging.and_then(|l| l.json).unwrap_or(false) {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn run(config: HandoffConfig) -> anyhow::Result<()> {
    let spec = config.listen_spec()?;
    info!(group = %spec.group_key(), workers = config.workers.count, "handoffd starting");

    let (coordinator, task) = Coordinator::spawn(NetEndpointFactory);
    let (pool, local) = WorkerPool::start(
        coordinator.clone(),
        spec,
        config.workers.count,
        config.workers.banner.clone(),
    )
    .await?;
    info!(%local, "listening");

    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                for (key, stats) in coordinator.stats().await? {
                    debug!(
                        group = %key,
                        workers = stats.workers,
                        idle = stats.idle,
                        pending = stats.pending,
                        "group stats"
                    );
                }
            }
        }
    }

    pool.stop().await;
    coordinator.shutdown().await?;
    let _ = task.await;

    info!("handoffd stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::AddressKind;
    use std::io::Write;

    #[test]
    fn cli_parses_run_overrides() {
        let cli = Cli::try_parse_from(["handoffd", "run", "--port", "9000", "--workers", "2"]).unwrap();
        match cli.command {
            Command::Run {
                config,
                port,
                workers,
                ..
            } => {
                assert!(config.is_none());
                assert_eq!(port, Some(9000));
                assert_eq!(workers, Some(2));
            }
            Command::Scaffold { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn defaults_without_config_file() {
        let config = load_config(None, None, None, None).unwrap();
        let spec = config.listen_spec().unwrap();
        assert_eq!(spec.port, DEFAULT_PORT);
        assert_eq!(spec.address, "0.0.0.0");
        assert_eq!(config.workers.count, 4);
    }

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[listen]
path = "/tmp/handoffd.sock"

[workers]
count = 8
banner = "hi {{id}}"
"#
        )
        .unwrap();

        let config = load_config(
            Some(file.path().to_path_buf()),
            Some(7000),
            Some("127.0.0.1".to_string()),
            Some(3),
        )
        .unwrap();
        let spec = config.listen_spec().unwrap();
        assert_eq!(spec.kind, AddressKind::Tcp4);
        assert_eq!(spec.port, 7000);
        assert_eq!(config.workers.count, 3);
        assert_eq!(config.workers.banner.as_deref(), Some("hi {id}"));
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(load_config(None, None, None, Some(0)).is_err());
    }

    #[test]
    fn address_without_port_needs_one() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[listen]\npath = \"/tmp/x.sock\"\n").unwrap();
        assert!(load_config(Some(file.path().to_path_buf()), None, Some("::1".into()), None).is_err());
    }
}
