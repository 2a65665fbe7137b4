//! dpdk-wire-app - operator front end for the dispatch engine
//!
//! Brings up the EAL with ring vdevs, then either wires two ports together,
//! counts one port, installs a destination MAC drop rule and counts the rest,
//! or lists the attached ports.
//!
//! # Usage
//!
//! ```bash
//! # Forward net_ring0 <-> net_ring1 on two worker lcores
//! dpdk-wire-app --cores 0-2 wire 0 1
//!
//! # Retry partial transmits before dropping
//! dpdk-wire-app wire 0 1 --retry 4
//!
//! # Count everything on port 0, logging progress every second
//! RUST_LOG=info dpdk-wire-app count 0 --stats-interval 1
//!
//! # Drop one destination MAC in hardware, count the rest
//! dpdk-wire-app drop-rule 0 --dst-mac 02:00:00:00:00:99
//!
//! # Show attached ports
//! dpdk-wire-app --vdev net_ring0 --vdev net_ring1,mac=02:aa:00:00:00:01 list
//! ```
//!
//! Ctrl+C stops the workers; the final counters are printed on exit.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dpdk_wire::BoxError;
use dpdk_wire::api::rte::eal::EalBuilder;
use dpdk_wire::api::rte::eth::{EtherAddr, PortId};
use dpdk_wire::burst::TxPolicy;
use dpdk_wire_util::{WireApp, WireMode, list_ports};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dpdk-wire-app")]
#[command(about = "Burst forwarding between ports on dedicated lcores")]
struct Args {
    /// Lcores to use; the first is the main lcore, the rest run tasks
    #[arg(long, default_value = "0-2")]
    cores: String,

    /// Virtual device to probe (repeatable), e.g. net_ring0 or net_ring1,mac=02:00:00:00:00:01
    #[arg(long = "vdev", default_values_t = [String::from("net_ring0"), String::from("net_ring1")])]
    vdevs: Vec<String>,

    /// Socket memory budget in MB
    #[arg(long)]
    socket_mem: Option<u64>,

    /// Mbufs in the packet pool
    #[arg(long, default_value_t = 8191)]
    mbufs: u32,

    /// RX/TX descriptors per queue
    #[arg(long, default_value_t = 1024)]
    descriptors: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Forward port A to port B and B to A, one worker each
    Wire {
        port_a: PortId,
        port_b: PortId,
        /// Resubmit a partially sent burst up to N times before dropping
        #[arg(long)]
        retry: Option<u32>,
        /// Log task counters every N seconds
        #[arg(long)]
        stats_interval: Option<u64>,
    },
    /// Count and free every packet received on a port
    Count {
        port: PortId,
        #[arg(long)]
        stats_interval: Option<u64>,
    },
    /// Drop frames for one destination MAC on a port, count the rest
    DropRule {
        port: PortId,
        #[arg(long)]
        dst_mac: EtherAddr,
        #[arg(long)]
        stats_interval: Option<u64>,
    },
    /// List attached ports
    List,
}

fn run(args: Args) -> Result<(), BoxError> {
    let mut builder = EalBuilder::new().core_list(&args.cores);
    for vdev in &args.vdevs {
        builder = builder.vdev(vdev);
    }
    if let Some(mb) = args.socket_mem {
        builder = builder.memory_mb(mb);
    }
    let eal = builder
        .init()
        .map_err(|errno| format!("EAL initialization failed: {errno}"))?;
    info!(cores = %args.cores, ports = ?eal.ports(), "EAL up");

    let (app, stats_interval) = match args.command {
        Command::List => {
            let ports = list_ports();
            if ports.is_empty() {
                println!("No ports attached");
            }
            for port in ports {
                println!("{port}");
            }
            return Ok(());
        }
        Command::Wire {
            port_a,
            port_b,
            retry,
            stats_interval,
        } => {
            let policy = retry.map_or(TxPolicy::Drop, |attempts| TxPolicy::Retry { attempts });
            let app = WireApp::new(WireMode::Wire {
                a: port_a,
                b: port_b,
            })
            .tx_policy(policy);
            (app, stats_interval)
        }
        Command::Count {
            port,
            stats_interval,
        } => (WireApp::new(WireMode::Count { port }), stats_interval),
        Command::DropRule {
            port,
            dst_mac,
            stats_interval,
        } => (
            WireApp::new(WireMode::Count { port }).drop_dst_mac(port, dst_mac),
            stats_interval,
        ),
    };

    let mut app = app
        .pool(args.mbufs, dpdk_wire_util::app::DEFAULT_CACHE_SIZE)
        .descriptors(args.descriptors, args.descriptors);
    if let Some(secs) = stats_interval {
        app = app.stats_interval(Duration::from_secs(secs));
    }

    let cancel = app.cancel_token();
    ctrlc::set_handler(move || {
        warn!("Received Ctrl+C, shutting down");
        cancel.cancel();
    })?;

    let reports = app.run()?;
    for report in &reports {
        println!(
            "{} (lcore {}): {}",
            report.name,
            report.lcore.id(),
            report.stats
        );
    }
    drop(eal);
    Ok(())
}

fn main() -> ExitCode {
    // RUST_LOG wins; info otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
