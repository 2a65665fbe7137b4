//! Poll-mode drivers.
//!
//! A driver implements [`EthDriver`] for the device side of a port and hands
//! out [`RxBurst`]/[`TxBurst`] objects for its queues. The ethdev layer in
//! [`crate::api::rte::eth`] owns argument checking and the port state
//! machine, so drivers only see calls that are valid for the current state.

use std::any::Any;
use std::sync::Arc;

use tracing::warn;

use crate::api::rte::eth::{
    DevInfo, EthConf, EthStats, EtherAddr, Link, PortId, QueueId, RxConf, TxConf,
};
use crate::api::rte::flow::{FlowAction, FlowAttr, FlowError, FlowItem};
use crate::api::rte::mbuf::Mbuf;
use crate::api::rte::pktmbuf::MemPoolRef;
use crate::api::{Errno, Result};

pub mod ring;

pub use ring::{Ingress, RING_MAX_FLOW_RULES, RingPort};

/// Receive side of a queue.
pub trait RxBurst: Send + Sync {
    /// Fill the leading slots of `pkts` with received buffers.
    ///
    /// Returns how many slots were filled. Never blocks.
    fn rx_burst(&self, pkts: &mut [Option<Mbuf>]) -> usize;
}

/// Transmit side of a queue.
pub trait TxBurst: Send + Sync {
    /// Take buffers from the leading slots of `pkts`.
    ///
    /// Returns how many were accepted; accepted slots are left `None`, the
    /// rest are untouched. Never blocks.
    fn tx_burst(&self, pkts: &mut [Option<Mbuf>]) -> usize;
}

/// Device evaluated match/action rules.
pub trait FlowOps: Send + Sync {
    fn validate(&self, attr: &FlowAttr, pattern: &[FlowItem], actions: &[FlowAction])
    -> std::result::Result<(), FlowError>;

    /// Install a rule and return its id.
    fn create(&self, attr: &FlowAttr, pattern: &[FlowItem], actions: &[FlowAction])
    -> std::result::Result<u64, FlowError>;

    fn destroy(&self, id: u64) -> std::result::Result<(), FlowError>;

    fn flush(&self) -> std::result::Result<(), FlowError>;

    fn query_hits(&self, id: u64) -> std::result::Result<u64, FlowError>;
}

/// Device side of an ethernet port.
pub trait EthDriver: Send + Sync + 'static {
    fn driver_name(&self) -> &'static str;

    fn dev_info(&self) -> DevInfo;

    fn mac_addr(&self) -> EtherAddr;

    fn link(&self) -> Link;

    fn stats(&self) -> EthStats;

    fn configure(&self, nb_rx_queues: u16, nb_tx_queues: u16, conf: &EthConf) -> Result<()>;

    fn rx_queue_setup(
        &self,
        queue_id: QueueId,
        nb_desc: u16,
        conf: &RxConf,
        pool: &MemPoolRef,
    ) -> Result<Arc<dyn RxBurst>>;

    fn tx_queue_setup(
        &self,
        queue_id: QueueId,
        nb_desc: u16,
        conf: &TxConf,
    ) -> Result<Arc<dyn TxBurst>>;

    fn dev_start(&self) -> Result<()>;

    /// Stop the device. Installed flow rules are removed.
    fn dev_stop(&self) -> Result<()>;

    fn dev_close(&self) -> Result<()>;

    fn promiscuous_set(&self, on: bool) -> Result<()>;

    fn flow_ops(&self) -> Option<&dyn FlowOps> {
        None
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Create the port described by a `--vdev` argument, e.g.
/// `net_ring0` or `net_ring1,mac=02:00:00:00:00:aa`.
pub fn probe_vdev(devargs: &str) -> Result<PortId> {
    let (name, args) = devargs.split_once(',').unwrap_or((devargs, ""));
    if name.starts_with(ring::DRIVER_PREFIX) {
        return ring::probe(name, args);
    }
    warn!(vdev = devargs, "No driver for virtual device");
    Err(Errno::ENODEV)
}
