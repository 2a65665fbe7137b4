//! WireApp builder and runner.

use std::thread;
use std::time::Duration;

use dpdk_wire::api::rte::eth::{EtherAddr, PortId};
use dpdk_wire::api::rte::pktmbuf::{MemPool, MemPoolConfig};
use dpdk_wire::burst::{CancelToken, TxPolicy};
use tracing::{info, warn};

use crate::dispatch::{Dispatch, TaskReport, WorkerDispatcher, WorkerTask};
use crate::error::Error;
use crate::port::{ConfiguredPort, PortManager, PortSettings};
use crate::steering::FlowEngine;

/// Default pool name
pub const WIRE_POOL_NAME: &str = "wire_pool";

/// Default number of mbufs in the pool
pub const DEFAULT_NUM_MBUFS: u32 = 8191;

/// Default per-lcore cache size
pub const DEFAULT_CACHE_SIZE: u32 = 250;

/// Default RX/TX descriptor count
pub const DEFAULT_RING_DEPTH: u16 = 1024;

/// What the workers do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMode {
    /// Forward A to B and B to A, one worker each
    Wire { a: PortId, b: PortId },
    /// Count and free everything received on one port
    Count { port: PortId },
}

impl WireMode {
    fn ports(&self) -> Vec<PortId> {
        match *self {
            WireMode::Wire { a, b } if a == b => vec![a],
            WireMode::Wire { a, b } => vec![a, b],
            WireMode::Count { port } => vec![port],
        }
    }
}

/// Builder for configuring and running the dispatch engine.
///
/// The EAL must be up; `WireApp` only creates the pool, brings ports up,
/// installs requested drop rules and dispatches the tasks. `run` returns
/// after the cancel token is set and every worker has stopped.
///
/// # Example
///
/// ```no_run
/// use dpdk_wire::api::rte::eal::EalBuilder;
/// use dpdk_wire_util::{WireApp, WireMode};
///
/// # fn main() -> Result<(), dpdk_wire::BoxError> {
/// let _eal = EalBuilder::new()
///     .core_list("0-2")
///     .vdev("net_ring0")
///     .vdev("net_ring1")
///     .init()?;
///
/// let app = WireApp::new(WireMode::Wire { a: 0, b: 1 });
/// let cancel = app.cancel_token();
/// ctrlc::set_handler(move || cancel.cancel())?;
/// for report in app.run()? {
///     println!("{}: {}", report.name, report.stats);
/// }
/// # Ok(())
/// # }
/// ```
pub struct WireApp {
    mode: WireMode,
    pool_name: String,
    num_mbufs: u32,
    cache_size: u32,
    rx_desc: u16,
    tx_desc: u16,
    promiscuous: bool,
    policy: TxPolicy,
    drop_dst_macs: Vec<(PortId, EtherAddr)>,
    stats_interval: Option<Duration>,
    cancel: CancelToken,
}

impl WireApp {
    pub fn new(mode: WireMode) -> Self {
        Self {
            mode,
            pool_name: WIRE_POOL_NAME.to_string(),
            num_mbufs: DEFAULT_NUM_MBUFS,
            cache_size: DEFAULT_CACHE_SIZE,
            rx_desc: DEFAULT_RING_DEPTH,
            tx_desc: DEFAULT_RING_DEPTH,
            promiscuous: true,
            policy: TxPolicy::Drop,
            drop_dst_macs: Vec::new(),
            stats_interval: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_name = name.into();
        self
    }

    /// Set the pool size and per-lcore cache (default: 8191 / 250).
    pub fn pool(mut self, num_mbufs: u32, cache_size: u32) -> Self {
        self.num_mbufs = num_mbufs;
        self.cache_size = cache_size;
        self
    }

    /// Set RX/TX descriptors (default: 1024).
    pub fn descriptors(mut self, rx: u16, tx: u16) -> Self {
        self.rx_desc = rx;
        self.tx_desc = tx;
        self
    }

    pub fn promiscuous(mut self, on: bool) -> Self {
        self.promiscuous = on;
        self
    }

    pub fn tx_policy(mut self, policy: TxPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Install an exact destination MAC drop rule on `port` before the
    /// workers start.
    pub fn drop_dst_mac(mut self, port: PortId, mac: EtherAddr) -> Self {
        self.drop_dst_macs.push((port, mac));
        self
    }

    /// Log every task's counters at this interval while running.
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = Some(interval);
        self
    }

    /// The token that stops every task.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn tasks(&self) -> Vec<WorkerTask> {
        let task = |t: WorkerTask| t.policy(self.policy).cancel_token(self.cancel.clone());
        match self.mode {
            WireMode::Wire { a, b } => vec![
                task(WorkerTask::forward(format!("fwd {a}->{b}"), a, b)),
                task(WorkerTask::forward(format!("fwd {b}->{a}"), b, a)),
            ],
            WireMode::Count { port } => {
                vec![task(WorkerTask::count(format!("count {port}"), port))]
            }
        }
    }

    /// Run until the cancel token is set.
    pub fn run(self) -> Result<Vec<TaskReport>, Error> {
        let dispatcher = WorkerDispatcher::new();
        let tasks = self.tasks();
        if tasks.len() > dispatcher.workers().len() {
            return Err(Error::InsufficientWorkers {
                requested: tasks.len(),
                available: dispatcher.workers().len(),
            });
        }

        let config = MemPoolConfig::new()
            .num_mbufs(self.num_mbufs)
            .cache_size(self.cache_size);
        let pool = MemPool::create(self.pool_name.as_str(), &config)?;

        let settings = PortSettings::new()
            .ring_depths(self.rx_desc, self.tx_desc)
            .promiscuous(self.promiscuous);
        let ports = self
            .mode
            .ports()
            .into_iter()
            .map(|port| PortManager::configure_with(port, &settings, &pool))
            .collect::<Result<Vec<ConfiguredPort>, _>>()?;

        let mut rules = Vec::with_capacity(self.drop_dst_macs.len());
        for &(port, mac) in &self.drop_dst_macs {
            rules.push(FlowEngine::drop_dst_mac(port, mac)?);
        }

        info!(
            mode = ?self.mode,
            workers = tasks.len(),
            rules = rules.len(),
            pool = %self.pool_name,
            "WireApp starting"
        );
        let dispatch = dispatcher.launch(tasks)?;
        if let Some(interval) = self.stats_interval {
            Self::monitor(&dispatch, interval);
        }
        let reports = dispatch.finish();

        for report in &reports {
            if report.ret != 0 {
                warn!(task = %report.name, ret = report.ret, "Task exited with error");
            }
            info!(
                task = %report.name,
                lcore = report.lcore.id(),
                stats = %report.stats,
                "Task report"
            );
        }
        for rule in rules {
            if let Ok(hits) = rule.query_hits() {
                info!(port_id = rule.port_id(), rule = rule.id(), hits, "Drop rule hits");
            }
        }
        for port in ports {
            if let Ok(stats) = port.stats() {
                info!(
                    port_id = port.port_id(),
                    ipackets = stats.ipackets,
                    opackets = stats.opackets,
                    imissed = stats.imissed,
                    rx_nombuf = stats.rx_nombuf,
                    "Port counters"
                );
            }
            port.stop()?;
        }
        drop(pool);

        info!("WireApp shutdown complete");
        Ok(reports)
    }

    fn monitor(dispatch: &Dispatch, interval: Duration) {
        while !dispatch.is_done() {
            thread::sleep(interval);
            for (name, stats) in dispatch.stats() {
                info!(task = name, %stats, "Progress");
            }
        }
    }
}
