//! Port bring-up.

use std::fmt;

use dpdk_wire::api::Errno;
use dpdk_wire::api::rte::eth::{
    DevInfo, EthConf, EthDev, EthStats, EtherAddr, Link, PortId, QueueId, RxQueueConf,
    TxQueueConf,
};
use dpdk_wire::api::rte::pktmbuf::MemPoolRef;
use dpdk_wire::api::rte::queue::{RxQueue, TxQueue};
use tracing::{debug, info};

use crate::error::Error;

/// The bring-up step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStep {
    ValidatePort,
    DeviceInfo,
    Configure,
    AdjustDescriptors,
    /// Ring depths of every port on the pool plus lcore caches exceed it
    PoolSizing,
    RxQueueSetup(QueueId),
    TxQueueSetup(QueueId),
    Start,
    MacAddr,
    Promiscuous,
    Stop,
    Close,
}

impl fmt::Display for ConfigStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigStep::ValidatePort => f.write_str("port validation"),
            ConfigStep::DeviceInfo => f.write_str("device info query"),
            ConfigStep::Configure => f.write_str("configure"),
            ConfigStep::AdjustDescriptors => f.write_str("descriptor adjustment"),
            ConfigStep::PoolSizing => f.write_str("pool sizing check"),
            ConfigStep::RxQueueSetup(q) => write!(f, "rx queue {q} setup"),
            ConfigStep::TxQueueSetup(q) => write!(f, "tx queue {q} setup"),
            ConfigStep::Start => f.write_str("start"),
            ConfigStep::MacAddr => f.write_str("MAC address query"),
            ConfigStep::Promiscuous => f.write_str("promiscuous mode"),
            ConfigStep::Stop => f.write_str("stop"),
            ConfigStep::Close => f.write_str("close"),
        }
    }
}

/// Requested queue layout of a port.
#[derive(Debug, Clone)]
pub struct PortSettings {
    pub rx_queues: u16,
    pub tx_queues: u16,
    pub rx_ring_depth: u16,
    pub tx_ring_depth: u16,
    pub mtu: u32,
    pub promiscuous: bool,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            rx_queues: 1,
            tx_queues: 1,
            rx_ring_depth: 1024,
            tx_ring_depth: 1024,
            mtu: 1500,
            promiscuous: true,
        }
    }
}

impl PortSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queues(mut self, rx: u16, tx: u16) -> Self {
        self.rx_queues = rx;
        self.tx_queues = tx;
        self
    }

    /// Requested descriptor counts. The device may round them.
    pub fn ring_depths(mut self, rx: u16, tx: u16) -> Self {
        self.rx_ring_depth = rx;
        self.tx_ring_depth = tx;
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn promiscuous(mut self, on: bool) -> Self {
        self.promiscuous = on;
        self
    }
}

/// Configures ports against a mempool and brings them up.
///
/// Every step short-circuits; a failure leaves the port in whatever state
/// the failing step left it.
pub struct PortManager;

impl PortManager {
    pub fn configure(
        port: PortId,
        rx_queues: u16,
        tx_queues: u16,
        rx_ring_depth: u16,
        tx_ring_depth: u16,
        pool: &MemPoolRef,
    ) -> Result<ConfiguredPort, Error> {
        let settings = PortSettings::new()
            .queues(rx_queues, tx_queues)
            .ring_depths(rx_ring_depth, tx_ring_depth);
        Self::configure_with(port, &settings, pool)
    }

    pub fn configure_with(
        port: PortId,
        settings: &PortSettings,
        pool: &MemPoolRef,
    ) -> Result<ConfiguredPort, Error> {
        let fail = |step: ConfigStep| move |errno: Errno| Error::PortConfig { port, step, errno };

        if !EthDev::is_valid_port(port) {
            return Err(fail(ConfigStep::ValidatePort)(Errno::ENODEV));
        }
        let dev = EthDev::new(port);

        let info = dev.info().map_err(fail(ConfigStep::DeviceInfo))?;
        debug!(
            port_id = port,
            driver = %info.driver_name,
            max_rx_queues = info.max_rx_queues,
            max_tx_queues = info.max_tx_queues,
            "Device info"
        );

        let conf = EthConf::new().mtu(settings.mtu);
        dev.configure(settings.rx_queues, settings.tx_queues, &conf)
            .map_err(fail(ConfigStep::Configure))?;

        let (rx_desc, tx_desc) = dev
            .adjust_nb_rx_tx_desc(settings.rx_ring_depth, settings.tx_ring_depth)
            .map_err(fail(ConfigStep::AdjustDescriptors))?;

        let rings = settings.rx_queues as u64 * rx_desc as u64
            + settings.tx_queues as u64 * tx_desc as u64;
        if let Err(errno) = pool.reserve_ring_slots(port, rings) {
            debug!(
                port_id = port,
                rings,
                reserved = pool.ring_slots_reserved(),
                caches = pool.cache_reserve(),
                pool_size = pool.size(),
                "Pool too small for port"
            );
            return Err(fail(ConfigStep::PoolSizing)(errno));
        }

        let mac = Self::start(&dev, settings, &info, rx_desc, tx_desc, pool)
            .inspect_err(|_| pool.release_ring_slots(port))?;

        Ok(ConfiguredPort {
            dev,
            mac,
            rx_desc,
            tx_desc,
            rx_queues: settings.rx_queues,
            tx_queues: settings.tx_queues,
            pool: pool.clone(),
        })
    }

    fn start(
        dev: &EthDev,
        settings: &PortSettings,
        info: &DevInfo,
        rx_desc: u16,
        tx_desc: u16,
        pool: &MemPoolRef,
    ) -> Result<EtherAddr, Error> {
        let port = dev.port_id();
        let fail = |step: ConfigStep| move |errno: Errno| Error::PortConfig { port, step, errno };

        let socket_id = dev.socket_id();
        for q in 0..settings.rx_queues {
            let conf = RxQueueConf::new().nb_desc(rx_desc).socket_id(socket_id);
            dev.rx_queue_setup(q, pool, &conf)
                .map_err(fail(ConfigStep::RxQueueSetup(q)))?;
        }
        for q in 0..settings.tx_queues {
            let conf = TxQueueConf::new()
                .nb_desc(tx_desc)
                .socket_id(socket_id)
                .conf(info.default_txconf);
            dev.tx_queue_setup(q, &conf)
                .map_err(fail(ConfigStep::TxQueueSetup(q)))?;
        }

        dev.start().map_err(fail(ConfigStep::Start))?;

        let mac = dev.mac_addr().map_err(fail(ConfigStep::MacAddr))?;
        info!(
            port_id = port,
            %mac,
            rx_desc,
            tx_desc,
            "Port up"
        );

        let promiscuous = if settings.promiscuous {
            dev.promiscuous_enable()
        } else {
            dev.promiscuous_disable()
        };
        promiscuous.map_err(fail(ConfigStep::Promiscuous))?;
        Ok(mac)
    }
}

/// A started port.
#[derive(Debug, Clone)]
pub struct ConfiguredPort {
    dev: EthDev,
    mac: EtherAddr,
    rx_desc: u16,
    tx_desc: u16,
    rx_queues: u16,
    tx_queues: u16,
    pool: MemPoolRef,
}

impl ConfiguredPort {
    pub fn port_id(&self) -> PortId {
        self.dev.port_id()
    }

    pub fn mac(&self) -> EtherAddr {
        self.mac
    }

    /// RX ring depth after device adjustment.
    pub fn rx_desc(&self) -> u16 {
        self.rx_desc
    }

    /// TX ring depth after device adjustment.
    pub fn tx_desc(&self) -> u16 {
        self.tx_desc
    }

    pub fn rx_queues(&self) -> u16 {
        self.rx_queues
    }

    pub fn tx_queues(&self) -> u16 {
        self.tx_queues
    }

    pub fn rx_queue(&self, queue_id: QueueId) -> dpdk_wire::api::Result<RxQueue> {
        RxQueue::new(self.port_id(), queue_id)
    }

    pub fn tx_queue(&self, queue_id: QueueId) -> dpdk_wire::api::Result<TxQueue> {
        TxQueue::new(self.port_id(), queue_id)
    }

    pub fn link(&self) -> dpdk_wire::api::Result<Link> {
        self.dev.link_get_nowait()
    }

    pub fn stats(&self) -> dpdk_wire::api::Result<EthStats> {
        self.dev.stats()
    }

    /// Stop the port. Flow rules on it are removed.
    pub fn stop(&self) -> Result<(), Error> {
        let port = self.port_id();
        self.dev.stop().map_err(|errno| Error::PortConfig {
            port,
            step: ConfigStep::Stop,
            errno,
        })
    }

    /// Close a stopped port and hand its ring buffers back to the pool.
    pub fn close(self) -> Result<(), Error> {
        let port = self.port_id();
        self.dev.close().map_err(|errno| Error::PortConfig {
            port,
            step: ConfigStep::Close,
            errno,
        })?;
        self.pool.release_ring_slots(port);
        Ok(())
    }
}
