// Ethernet Device API
// Ports are attached poll-mode drivers addressed by a small integer id.
// This layer owns the port state machine and argument checking; drivers
// only implement the device side.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{debug, info};

use super::pktmbuf::{MemPoolRef, PKTMBUF_HEADROOM};
use crate::api::{Errno, Result};
use crate::pmd::{EthDriver, RxBurst, TxBurst};

/// Ethernet device port ID
pub type PortId = u16;

/// Queue ID for RX/TX queues
pub type QueueId = u16;

/// Maximum number of attached ports.
pub const RTE_MAX_ETHPORTS: usize = 32;

/// Link speed in Mbps, as reported by `link_get_nowait`.
pub const ETH_SPEED_NUM_NONE: u32 = 0;
pub const ETH_SPEED_NUM_10G: u32 = 10_000;

/// An ethernet MAC address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EtherAddr {
    pub addr_bytes: [u8; 6],
}

impl EtherAddr {
    pub const BROADCAST: EtherAddr = EtherAddr {
        addr_bytes: [0xff; 6],
    };

    pub const fn new(addr_bytes: [u8; 6]) -> Self {
        Self { addr_bytes }
    }

    /// Group bit clear.
    pub fn is_unicast(&self) -> bool {
        self.addr_bytes[0] & 0x01 == 0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Locally administered bit set.
    pub fn is_local_admin(&self) -> bool {
        self.addr_bytes[0] & 0x02 != 0
    }
}

impl From<[u8; 6]> for EtherAddr {
    fn from(addr_bytes: [u8; 6]) -> Self {
        Self { addr_bytes }
    }
}

impl fmt::Display for EtherAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.addr_bytes;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for EtherAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EtherAddr({self})")
    }
}

impl FromStr for EtherAddr {
    type Err = Errno;

    /// Parses `aa:bb:cc:dd:ee:ff` (or `-` separated).
    fn from_str(s: &str) -> Result<Self> {
        let mut addr_bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in addr_bytes.iter_mut() {
            let part = parts.next().ok_or(Errno::EINVAL)?;
            if part.len() != 2 {
                return Err(Errno::EINVAL);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| Errno::EINVAL)?;
        }
        if parts.next().is_some() {
            return Err(Errno::EINVAL);
        }
        Ok(Self { addr_bytes })
    }
}

/// Ethernet device configuration
#[derive(Debug, Clone)]
pub struct EthConf {
    /// Maximum Transfer Unit
    pub mtu: u32,
    /// RX offload flags
    pub rx_offloads: u64,
    /// TX offload flags
    pub tx_offloads: u64,
}

impl Default for EthConf {
    fn default() -> Self {
        Self {
            mtu: 1500,
            rx_offloads: 0,
            tx_offloads: 0,
        }
    }
}

impl EthConf {
    /// Create a simple configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set MTU
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set RX offloads
    pub fn rx_offloads(mut self, offloads: u64) -> Self {
        self.rx_offloads = offloads;
        self
    }

    /// Set TX offloads
    pub fn tx_offloads(mut self, offloads: u64) -> Self {
        self.tx_offloads = offloads;
        self
    }
}

/// Per-queue RX settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxConf {
    /// Descriptors to free before refilling
    pub free_thresh: u16,
    /// Drop packets when no descriptors are available
    pub drop_en: bool,
    pub offloads: u64,
}

/// Per-queue TX settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxConf {
    /// Descriptors used before reclaiming transmitted buffers
    pub free_thresh: u16,
    /// Descriptors used before setting the report-status bit
    pub rs_thresh: u16,
    pub offloads: u64,
}

/// Descriptor ring limits of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescLim {
    pub nb_max: u16,
    pub nb_min: u16,
    pub nb_align: u16,
}

impl DescLim {
    /// Round `n` to the alignment and clamp it into `[nb_min, nb_max]`.
    pub fn adjust(&self, n: u16) -> u16 {
        let mut n = n as u32;
        if self.nb_align > 0 {
            let align = self.nb_align as u32;
            n = n.div_ceil(align) * align;
        }
        if self.nb_max > 0 {
            n = n.min(self.nb_max as u32);
        }
        n.max(self.nb_min as u32) as u16
    }

    fn accepts(&self, n: u16) -> bool {
        n >= self.nb_min
            && (self.nb_max == 0 || n <= self.nb_max)
            && (self.nb_align == 0 || n % self.nb_align == 0)
    }
}

/// Device information.
#[derive(Debug, Clone)]
pub struct DevInfo {
    pub driver_name: String,
    pub device_name: String,
    pub max_rx_queues: u16,
    pub max_tx_queues: u16,
    pub max_mtu: u32,
    pub rx_desc_lim: DescLim,
    pub tx_desc_lim: DescLim,
    pub rx_offload_capa: u64,
    pub tx_offload_capa: u64,
    pub default_rxconf: RxConf,
    pub default_txconf: TxConf,
    /// Port is a representor of another device
    pub is_representor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

/// Link status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub up: bool,
    /// Mbps
    pub speed: u32,
    pub duplex: Duplex,
    pub autoneg: bool,
}

impl Link {
    pub fn down() -> Self {
        Self {
            up: false,
            speed: ETH_SPEED_NUM_NONE,
            duplex: Duplex::Half,
            autoneg: false,
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.up {
            return f.write_str("Link down");
        }
        let duplex = match self.duplex {
            Duplex::Full => "FDX",
            Duplex::Half => "HDX",
        };
        let speed = if self.speed >= 1000 {
            format!("{} Gbps", self.speed / 1000)
        } else {
            format!("{} Mbps", self.speed)
        };
        write!(f, "Link up at {speed} {duplex}")
    }
}

/// Basic port statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EthStats {
    pub ipackets: u64,
    pub opackets: u64,
    pub ibytes: u64,
    pub obytes: u64,
    /// Received packets dropped because the RX ring was full
    pub imissed: u64,
    /// Received packets that could not be stored
    pub ierrors: u64,
    /// RX buffer allocation failures
    pub rx_nombuf: u64,
}

/// Lifecycle state of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Unconfigured,
    Configured,
    Started,
    Stopped,
    Closed,
}

/// RX queue configuration
#[derive(Debug, Clone)]
pub struct RxQueueConf {
    /// Number of descriptors
    pub nb_desc: u16,
    /// NUMA socket ID (-1 for any)
    pub socket_id: i32,
    /// Optional RX conf (None uses device defaults)
    pub conf: Option<RxConf>,
}

impl Default for RxQueueConf {
    fn default() -> Self {
        Self {
            nb_desc: 1024,
            socket_id: -1,
            conf: None,
        }
    }
}

impl RxQueueConf {
    /// Create a new RxQueueConf with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of descriptors for the RX ring.
    pub fn nb_desc(mut self, n: u16) -> Self {
        self.nb_desc = n;
        self
    }

    /// Set the NUMA socket ID.
    ///
    /// Use -1 for automatic detection based on the device.
    pub fn socket_id(mut self, id: i32) -> Self {
        self.socket_id = id;
        self
    }

    /// Set the RX configuration.
    pub fn conf(mut self, conf: RxConf) -> Self {
        self.conf = Some(conf);
        self
    }
}

/// TX queue configuration
#[derive(Debug, Clone)]
pub struct TxQueueConf {
    /// Number of descriptors
    pub nb_desc: u16,
    /// NUMA socket ID (-1 for any)
    pub socket_id: i32,
    /// Optional TX conf (None uses device defaults)
    pub conf: Option<TxConf>,
}

impl Default for TxQueueConf {
    fn default() -> Self {
        Self {
            nb_desc: 1024,
            socket_id: -1,
            conf: None,
        }
    }
}

impl TxQueueConf {
    /// Create a new TxQueueConf with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of descriptors for the TX ring.
    pub fn nb_desc(mut self, n: u16) -> Self {
        self.nb_desc = n;
        self
    }

    /// Set the NUMA socket ID.
    ///
    /// Use -1 for automatic detection based on the device.
    pub fn socket_id(mut self, id: i32) -> Self {
        self.socket_id = id;
        self
    }

    /// Set the TX configuration.
    pub fn conf(mut self, conf: TxConf) -> Self {
        self.conf = Some(conf);
        self
    }
}

// ==================== Port registry ====================

struct PortData {
    state: PortState,
    rxq: Vec<Option<Arc<dyn RxBurst>>>,
    txq: Vec<Option<Arc<dyn TxBurst>>>,
    promiscuous: bool,
}

struct EthDevSlot {
    name: String,
    driver: Arc<dyn EthDriver>,
    data: Mutex<PortData>,
}

impl EthDevSlot {
    fn data(&self) -> MutexGuard<'_, PortData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

static PORTS: RwLock<Vec<Option<Arc<EthDevSlot>>>> = RwLock::new(Vec::new());

fn slot(port_id: PortId) -> Result<Arc<EthDevSlot>> {
    let ports = PORTS.read().unwrap_or_else(PoisonError::into_inner);
    ports
        .get(port_id as usize)
        .and_then(|s| s.clone())
        .ok_or(Errno::ENODEV)
}

/// Register a probed device and allocate its port id.
pub(crate) fn attach(name: &str, driver: Arc<dyn EthDriver>) -> Result<PortId> {
    let mut ports = PORTS.write().unwrap_or_else(PoisonError::into_inner);
    if ports.iter().flatten().any(|s| s.name == name) {
        return Err(Errno::EEXIST);
    }
    let free = ports.iter().position(Option::is_none);
    let port_id = match free {
        Some(id) => id,
        None if ports.len() < RTE_MAX_ETHPORTS => {
            ports.push(None);
            ports.len() - 1
        }
        None => return Err(Errno::ENOSPC),
    };
    ports[port_id] = Some(Arc::new(EthDevSlot {
        name: name.to_string(),
        driver,
        data: Mutex::new(PortData {
            state: PortState::Unconfigured,
            rxq: Vec::new(),
            txq: Vec::new(),
            promiscuous: false,
        }),
    }));
    debug!(port_id, name, "Attached port");
    Ok(port_id as PortId)
}

/// Stop, close and unregister a port. No-op for an unknown id.
pub(crate) fn detach(port_id: PortId) {
    let removed = {
        let mut ports = PORTS.write().unwrap_or_else(PoisonError::into_inner);
        ports.get_mut(port_id as usize).and_then(Option::take)
    };
    let Some(slot) = removed else {
        return;
    };
    let mut data = slot.data();
    if data.state == PortState::Started {
        let _ = slot.driver.dev_stop();
    }
    if data.state != PortState::Closed {
        let _ = slot.driver.dev_close();
    }
    data.state = PortState::Closed;
    data.rxq.clear();
    data.txq.clear();
    debug!(port_id, name = %slot.name, "Detached port");
}

/// The driver behind a port.
pub(crate) fn driver(port_id: PortId) -> Result<Arc<dyn EthDriver>> {
    Ok(slot(port_id)?.driver.clone())
}

/// Burst handle of an RX queue on a started port.
pub(crate) fn rx_queue(port_id: PortId, queue_id: QueueId) -> Result<Arc<dyn RxBurst>> {
    let slot = slot(port_id)?;
    let data = slot.data();
    if data.state != PortState::Started {
        return Err(Errno::ENETDOWN);
    }
    data.rxq
        .get(queue_id as usize)
        .and_then(|q| q.clone())
        .ok_or(Errno::EINVAL)
}

/// Burst handle of a TX queue on a started port.
pub(crate) fn tx_queue(port_id: PortId, queue_id: QueueId) -> Result<Arc<dyn TxBurst>> {
    let slot = slot(port_id)?;
    let data = slot.data();
    if data.state != PortState::Started {
        return Err(Errno::ENETDOWN);
    }
    data.txq
        .get(queue_id as usize)
        .and_then(|q| q.clone())
        .ok_or(Errno::EINVAL)
}

/// Ethernet device wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthDev {
    port_id: PortId,
}

impl EthDev {
    /// Create a handle for a port id
    ///
    /// Does not check, configure or start the device.
    pub fn new(port_id: PortId) -> Self {
        Self { port_id }
    }

    /// Find a port by device name.
    pub fn from_name(name: &str) -> Result<Self> {
        let ports = PORTS.read().unwrap_or_else(PoisonError::into_inner);
        ports
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.name == name))
            .map(|id| Self::new(id as PortId))
            .ok_or(Errno::ENODEV)
    }

    /// Get the port ID
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the number of available Ethernet devices
    pub fn count_avail() -> u16 {
        let ports = PORTS.read().unwrap_or_else(PoisonError::into_inner);
        ports.iter().flatten().count() as u16
    }

    /// Check that a port id refers to an attached device.
    pub fn is_valid_port(port_id: PortId) -> bool {
        slot(port_id).is_ok()
    }

    /// Device name given at probe time.
    pub fn name(&self) -> Result<String> {
        Ok(slot(self.port_id)?.name.clone())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Result<PortState> {
        Ok(slot(self.port_id)?.data().state)
    }

    /// Get device info
    pub fn info(&self) -> Result<DevInfo> {
        let slot = slot(self.port_id)?;
        let mut info = slot.driver.dev_info();
        info.device_name = slot.name.clone();
        Ok(info)
    }

    /// Get the NUMA socket ID of the device
    pub fn socket_id(&self) -> i32 {
        if Self::is_valid_port(self.port_id) { 0 } else { -1 }
    }

    /// Get the MAC address
    pub fn mac_addr(&self) -> Result<EtherAddr> {
        Ok(slot(self.port_id)?.driver.mac_addr())
    }

    /// Get device statistics
    pub fn stats(&self) -> Result<EthStats> {
        Ok(slot(self.port_id)?.driver.stats())
    }

    /// Link status without waiting for autonegotiation.
    pub fn link_get_nowait(&self) -> Result<Link> {
        Ok(slot(self.port_id)?.driver.link())
    }

    /// Configure the device
    pub fn configure(&self, nb_rx_queues: u16, nb_tx_queues: u16, conf: &EthConf) -> Result<()> {
        let slot = slot(self.port_id)?;
        let mut data = slot.data();
        match data.state {
            PortState::Started => return Err(Errno::EBUSY),
            PortState::Closed => return Err(Errno::ENODEV),
            _ => {}
        }

        let info = slot.driver.dev_info();
        if nb_rx_queues == 0 && nb_tx_queues == 0 {
            return Err(Errno::EINVAL);
        }
        if nb_rx_queues > info.max_rx_queues || nb_tx_queues > info.max_tx_queues {
            return Err(Errno::EINVAL);
        }
        if conf.rx_offloads & !info.rx_offload_capa != 0
            || conf.tx_offloads & !info.tx_offload_capa != 0
        {
            return Err(Errno::EINVAL);
        }
        if conf.mtu > info.max_mtu {
            return Err(Errno::EINVAL);
        }

        slot.driver.configure(nb_rx_queues, nb_tx_queues, conf)?;
        data.rxq = vec![None; nb_rx_queues as usize];
        data.txq = vec![None; nb_tx_queues as usize];
        data.state = PortState::Configured;
        debug!(
            port_id = self.port_id,
            nb_rx_queues, nb_tx_queues, "Configured port"
        );
        Ok(())
    }

    /// Adjust requested descriptor counts to the device limits.
    ///
    /// Returns the `(rx, tx)` counts that queue setup will accept.
    pub fn adjust_nb_rx_tx_desc(&self, nb_rx_desc: u16, nb_tx_desc: u16) -> Result<(u16, u16)> {
        let info = self.info()?;
        Ok((
            info.rx_desc_lim.adjust(nb_rx_desc),
            info.tx_desc_lim.adjust(nb_tx_desc),
        ))
    }

    fn check_queue_setup(data: &PortData) -> Result<()> {
        match data.state {
            PortState::Configured | PortState::Stopped => Ok(()),
            PortState::Started => Err(Errno::EBUSY),
            PortState::Closed => Err(Errno::ENODEV),
            PortState::Unconfigured => Err(Errno::EINVAL),
        }
    }

    /// Setup an RX queue
    pub fn rx_queue_setup(
        &self,
        queue_id: QueueId,
        mempool: &MemPoolRef,
        conf: &RxQueueConf,
    ) -> Result<()> {
        let slot = slot(self.port_id)?;
        let mut data = slot.data();
        Self::check_queue_setup(&data)?;
        if queue_id as usize >= data.rxq.len() {
            return Err(Errno::EINVAL);
        }
        let info = slot.driver.dev_info();
        if !info.rx_desc_lim.accepts(conf.nb_desc) {
            return Err(Errno::EINVAL);
        }
        if mempool.data_room_size() <= PKTMBUF_HEADROOM {
            return Err(Errno::ENOSPC);
        }
        let rx_conf = conf.conf.unwrap_or(info.default_rxconf);
        let queue = slot
            .driver
            .rx_queue_setup(queue_id, conf.nb_desc, &rx_conf, mempool)?;
        data.rxq[queue_id as usize] = Some(queue);
        Ok(())
    }

    /// Setup a TX queue
    pub fn tx_queue_setup(&self, queue_id: QueueId, conf: &TxQueueConf) -> Result<()> {
        let slot = slot(self.port_id)?;
        let mut data = slot.data();
        Self::check_queue_setup(&data)?;
        if queue_id as usize >= data.txq.len() {
            return Err(Errno::EINVAL);
        }
        let info = slot.driver.dev_info();
        if !info.tx_desc_lim.accepts(conf.nb_desc) {
            return Err(Errno::EINVAL);
        }
        let tx_conf = conf.conf.unwrap_or(info.default_txconf);
        let queue = slot
            .driver
            .tx_queue_setup(queue_id, conf.nb_desc, &tx_conf)?;
        data.txq[queue_id as usize] = Some(queue);
        Ok(())
    }

    /// Start the device
    ///
    /// Every configured queue must have been set up.
    pub fn start(&self) -> Result<()> {
        let slot = slot(self.port_id)?;
        let mut data = slot.data();
        match data.state {
            PortState::Started => return Ok(()),
            PortState::Configured | PortState::Stopped => {}
            PortState::Unconfigured => return Err(Errno::EINVAL),
            PortState::Closed => return Err(Errno::ENODEV),
        }
        if data.rxq.iter().any(Option::is_none) || data.txq.iter().any(Option::is_none) {
            return Err(Errno::EINVAL);
        }
        slot.driver.dev_start()?;
        data.state = PortState::Started;
        info!(port_id = self.port_id, name = %slot.name, "Port started");
        Ok(())
    }

    /// Stop the device
    ///
    /// Flow rules installed on the port are flushed.
    pub fn stop(&self) -> Result<()> {
        let slot = slot(self.port_id)?;
        let mut data = slot.data();
        if data.state != PortState::Started {
            return Ok(());
        }
        slot.driver.dev_stop()?;
        data.state = PortState::Stopped;
        info!(port_id = self.port_id, name = %slot.name, "Port stopped");
        Ok(())
    }

    /// Close the device
    ///
    /// The port must be stopped first.
    pub fn close(&self) -> Result<()> {
        let slot = slot(self.port_id)?;
        let mut data = slot.data();
        match data.state {
            PortState::Started => return Err(Errno::EBUSY),
            PortState::Closed => return Ok(()),
            _ => {}
        }
        slot.driver.dev_close()?;
        data.rxq.clear();
        data.txq.clear();
        data.state = PortState::Closed;
        Ok(())
    }

    fn set_promiscuous(&self, on: bool) -> Result<()> {
        let slot = slot(self.port_id)?;
        let mut data = slot.data();
        if data.state == PortState::Closed {
            return Err(Errno::ENODEV);
        }
        slot.driver.promiscuous_set(on)?;
        data.promiscuous = on;
        Ok(())
    }

    /// Enable promiscuous mode
    pub fn promiscuous_enable(&self) -> Result<()> {
        self.set_promiscuous(true)
    }

    /// Disable promiscuous mode
    pub fn promiscuous_disable(&self) -> Result<()> {
        self.set_promiscuous(false)
    }

    /// Whether promiscuous mode is enabled.
    pub fn promiscuous_get(&self) -> Result<bool> {
        Ok(slot(self.port_id)?.data().promiscuous)
    }
}

/// Builder for configuring and starting an Ethernet device
pub struct EthDevBuilder {
    port_id: PortId,
    eth_conf: EthConf,
    nb_rx_queues: u16,
    nb_tx_queues: u16,
    rx_queue_conf: RxQueueConf,
    tx_queue_conf: TxQueueConf,
    promiscuous: bool,
}

impl EthDevBuilder {
    /// Create a new builder for the given port
    pub fn new(port_id: PortId) -> Self {
        Self {
            port_id,
            eth_conf: EthConf::default(),
            nb_rx_queues: 1,
            nb_tx_queues: 1,
            rx_queue_conf: RxQueueConf::default(),
            tx_queue_conf: TxQueueConf::default(),
            promiscuous: false,
        }
    }

    /// Set device configuration
    pub fn eth_conf(mut self, conf: EthConf) -> Self {
        self.eth_conf = conf;
        self
    }

    /// Set number of RX queues
    pub fn nb_rx_queues(mut self, n: u16) -> Self {
        self.nb_rx_queues = n;
        self
    }

    /// Set number of TX queues
    pub fn nb_tx_queues(mut self, n: u16) -> Self {
        self.nb_tx_queues = n;
        self
    }

    /// Set RX queue configuration (applied to all queues)
    pub fn rx_queue_conf(mut self, conf: RxQueueConf) -> Self {
        self.rx_queue_conf = conf;
        self
    }

    /// Set TX queue configuration (applied to all queues)
    pub fn tx_queue_conf(mut self, conf: TxQueueConf) -> Self {
        self.tx_queue_conf = conf;
        self
    }

    /// Enable promiscuous mode
    pub fn promiscuous(mut self) -> Self {
        self.promiscuous = true;
        self
    }

    /// Build and start the device
    ///
    /// This will:
    /// 1. Configure the device
    /// 2. Setup all RX queues
    /// 3. Setup all TX queues
    /// 4. Enable promiscuous mode (if set)
    /// 5. Start the device
    pub fn build(self, mempool: &MemPoolRef) -> Result<EthDev> {
        let dev = EthDev::new(self.port_id);

        // Configure device
        dev.configure(self.nb_rx_queues, self.nb_tx_queues, &self.eth_conf)?;

        // Setup RX queues
        for q in 0..self.nb_rx_queues {
            dev.rx_queue_setup(q, mempool, &self.rx_queue_conf)?;
        }

        // Setup TX queues
        for q in 0..self.nb_tx_queues {
            dev.tx_queue_setup(q, &self.tx_queue_conf)?;
        }

        // Enable promiscuous mode if requested
        if self.promiscuous {
            dev.promiscuous_enable()?;
        }

        // Start the device
        dev.start()?;

        Ok(dev)
    }
}

/// Iterate over attached port IDs
pub fn iter_ports() -> impl Iterator<Item = PortId> {
    let ports = PORTS.read().unwrap_or_else(PoisonError::into_inner);
    let ids: Vec<PortId> = ports
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_some())
        .map(|(id, _)| id as PortId)
        .collect();
    ids.into_iter()
}
