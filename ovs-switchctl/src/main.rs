//! ovs-switchctl
//!
//! Drives ovs-switch bridge reconciliation from the command line:
//! - apply a desired bridge state from a JSON file
//! - release sandbox ports and optionally delete the bridge
//! - print VXLAN endpoint port names for peer addresses

use std::net::AddrParseError;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use ovs_switch::prelude::*;
use ovs_switch::{
    converge, release, vtep_port_name_for, DesiredBridge, MemorySwitchDb, OvsError,
    StaticLinks, SwitchConfig,
};

/// Bad input: retrying with the same arguments cannot succeed
const EXIT_INVALID_INPUT: u8 = 2;
/// EX_UNAVAILABLE from sysexits.h: ovsdb-server is not installed or not running
const EXIT_OVS_UNAVAILABLE: u8 = 69;

#[derive(Parser, Debug)]
#[command(name = "ovs-switchctl")]
#[command(about = "Reconcile a local Open vSwitch bridge for container sandboxes")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// OVSDB unix socket (overrides OVS_SWITCH_OVSDB_SOCKET)
    #[arg(long, global = true)]
    socket: Option<String>,

    /// Bridge readiness timeout in milliseconds (overrides OVS_SWITCH_READY_TIMEOUT_MS)
    #[arg(long, global = true)]
    ready_timeout_ms: Option<u64>,

    /// Run against in-memory backends and report how many writes would happen
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Converge a bridge to the desired state in a JSON file
    Apply {
        /// Path to the desired state file
        path: PathBuf,
    },
    /// Detach ports from a bridge and optionally delete it
    Release {
        #[arg(long)]
        bridge: String,

        #[arg(long = "port")]
        ports: Vec<String>,

        #[arg(long)]
        delete_bridge: bool,
    },
    /// Print the VXLAN port name derived from each peer address
    VtepName {
        #[arg(required = true)]
        peers: Vec<String>,
    },
    /// List bridges known to OVSDB
    Bridges,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run_cli().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_status(&e))
        }
    }
}

/// Map a failure to the process exit status, logging a hint for OVS problems
fn exit_status(err: &anyhow::Error) -> u8 {
    let invalid_input = err.chain().any(|e| {
        e.downcast_ref::<SwitchError>()
            .is_some_and(SwitchError::is_invalid_input)
            || e.is::<AddrParseError>()
    });
    if invalid_input {
        return EXIT_INVALID_INPUT;
    }

    if let Some(ovs) = err.chain().find_map(|e| e.downcast_ref::<OvsError>()) {
        warn!("{}", ovs.suggestion());
        if ovs.needs_ovs() {
            return EXIT_OVS_UNAVAILABLE;
        }
    }
    1
}

async fn run_cli() -> Result<()> {
    ovs_switch::config::load_environment();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ovs_switchctl=info".parse()?)
                .add_directive("ovs_switch=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = SwitchConfig::from_env();
    if let Some(socket) = args.socket.clone() {
        config.ovsdb_socket = socket;
    }
    if let Some(ms) = args.ready_timeout_ms {
        config.readiness.timeout = Duration::from_millis(ms);
    }

    match args.command {
        Commands::VtepName { peers } => print_vtep_names(&peers),
        command if args.dry_run => {
            let db = MemorySwitchDb::new();
            let links = StaticLinks::new();
            run(command, &db, &links, &config).await?;
            info!("Dry run: {} database write(s)", db.mutations());
            Ok(())
        }
        command => {
            let db = OvsdbClient::from_config(&config);
            let dbs = db
                .list_dbs()
                .await
                .with_context(|| format!("OVSDB not reachable at {}", db.socket_path()))?;
            info!("✓ OVSDB is ready, available databases: {:?}", dbs);

            if matches!(command, Commands::Bridges) {
                for bridge in db.list_bridges().await? {
                    println!("{bridge}");
                }
                return Ok(());
            }
            run(command, &db, &NetlinkLinks::new(), &config).await
        }
    }
}

async fn run(
    command: Commands,
    db: &dyn SwitchDatabase,
    links: &dyn LinkManager,
    config: &SwitchConfig,
) -> Result<()> {
    match command {
        Commands::Apply { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let desired: DesiredBridge = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid desired state in {}", path.display()))?;

            let iface = converge(db, links, &desired, &config.readiness)
                .await
                .with_context(|| format!("Failed to converge bridge {}", desired.bridge))?;
            println!("{}", serde_json::to_string_pretty(&iface)?);
        }
        Commands::Release {
            bridge,
            ports,
            delete_bridge,
        } => {
            release(db, &bridge, &ports, delete_bridge)
                .await
                .with_context(|| format!("Failed to release bridge {bridge}"))?;
        }
        Commands::Bridges => {
            warn!("Listing bridges needs a live OVSDB; nothing to list in a dry run");
        }
        Commands::VtepName { peers } => print_vtep_names(&peers)?,
    }
    Ok(())
}

fn print_vtep_names(peers: &[String]) -> Result<()> {
    for peer in peers {
        let name = vtep_port_name_for(peer)
            .with_context(|| format!("invalid peer address '{peer}'"))?;
        println!("{peer} {name}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_invalid_input() {
        let err = anyhow::Error::new(SwitchError::InvalidName {
            name: "a/b".into(),
            reason: "contains '/'",
        })
        .context("Failed to converge bridge a/b");
        assert_eq!(exit_status(&err), EXIT_INVALID_INPUT);

        let err = anyhow::Error::new(vtep_port_name_for("bogus").unwrap_err())
            .context("invalid peer address 'bogus'");
        assert_eq!(exit_status(&err), EXIT_INVALID_INPUT);
    }

    #[test]
    fn test_exit_status_ovs_unavailable() {
        let err = anyhow::Error::new(OvsError::OvsdbSocketNotFound("/run/db.sock".into()))
            .context("OVSDB not reachable at /run/db.sock");
        assert_eq!(exit_status(&err), EXIT_OVS_UNAVAILABLE);
    }

    #[test]
    fn test_exit_status_backend_failure() {
        let err = anyhow::Error::new(SwitchError::NotFound("br0".into()))
            .context("Failed to release bridge br0");
        assert_eq!(exit_status(&err), 1);

        let err = anyhow::Error::new(OvsError::Rpc("unknown method".into()));
        assert_eq!(exit_status(&err), 1);
    }
}
