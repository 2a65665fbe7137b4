//! Software ring PMD (`net_ring<N>`).
//!
//! Each queue is a fixed-depth descriptor ring. The device has a second,
//! "wire" side exposed through [`RingPort`]: frames injected there go
//! through the same ingress path a NIC would apply (promiscuous filter,
//! flow rules, queue selection, buffer allocation) and frames the
//! application transmits can be drained from the TX rings.
//!
//! Flow rules are kept in a copy-on-write table. The ingress path reads it
//! with a single atomic load; rule changes clone the table and swap it in.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use arc_swap::ArcSwap;
use crossbeam::queue::ArrayQueue;
use smoltcp::wire::EthernetFrame;
use tracing::{debug, info};

use super::{EthDriver, FlowOps, RxBurst, TxBurst};
use crate::api::rte::eth::{
    self, DescLim, DevInfo, Duplex, ETH_SPEED_NUM_10G, EthConf, EthStats, EtherAddr, Link, PortId,
    QueueId, RxConf, TxConf,
};
use crate::api::rte::flow::{
    FlowAction, FlowAttr, FlowError, FlowErrorCause, FlowErrorKind, FlowItem, check_rule,
    pattern_matches,
};
use crate::api::rte::mbuf::Mbuf;
use crate::api::rte::pktmbuf::MemPoolRef;
use crate::api::{Errno, Result};

pub(crate) const DRIVER_PREFIX: &str = "net_ring";

/// Queues per direction.
pub const RING_MAX_QUEUES: u16 = 16;

/// Rules a ring port can hold.
pub const RING_MAX_FLOW_RULES: usize = 1024;

const RING_DESC_LIM: DescLim = DescLim {
    nb_max: 4096,
    nb_min: 32,
    nb_align: 32,
};

/// Outcome of injecting one frame on the wire side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingress {
    /// Stored in this RX queue
    Queued(QueueId),
    /// Dropped by a flow rule
    Filtered,
    /// Port stopped, frame not addressed to us, or frame too large
    Dropped,
    /// RX ring full
    Missed,
    /// RX pool empty
    NoMbuf,
}

#[derive(Default)]
struct RingStats {
    ipackets: AtomicU64,
    opackets: AtomicU64,
    ibytes: AtomicU64,
    obytes: AtomicU64,
    imissed: AtomicU64,
    ierrors: AtomicU64,
    rx_nombuf: AtomicU64,
}

impl RingStats {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EthStats {
        EthStats {
            ipackets: self.ipackets.load(Ordering::Relaxed),
            opackets: self.opackets.load(Ordering::Relaxed),
            ibytes: self.ibytes.load(Ordering::Relaxed),
            obytes: self.obytes.load(Ordering::Relaxed),
            imissed: self.imissed.load(Ordering::Relaxed),
            ierrors: self.ierrors.load(Ordering::Relaxed),
            rx_nombuf: self.rx_nombuf.load(Ordering::Relaxed),
        }
    }
}

struct RingRxQueue {
    ring: ArrayQueue<Mbuf>,
    pool: MemPoolRef,
    running: Arc<AtomicBool>,
    stats: Arc<RingStats>,
}

impl RxBurst for RingRxQueue {
    fn rx_burst(&self, pkts: &mut [Option<Mbuf>]) -> usize {
        if !self.running.load(Ordering::Acquire) {
            return 0;
        }
        let mut n = 0;
        let mut bytes = 0;
        for slot in pkts.iter_mut() {
            let Some(mbuf) = self.ring.pop() else {
                break;
            };
            bytes += mbuf.data_len() as u64;
            *slot = Some(mbuf);
            n += 1;
        }
        RingStats::bump(&self.stats.ipackets, n as u64);
        RingStats::bump(&self.stats.ibytes, bytes);
        n
    }
}

struct RingTxQueue {
    ring: ArrayQueue<Mbuf>,
    running: Arc<AtomicBool>,
    stats: Arc<RingStats>,
}

impl TxBurst for RingTxQueue {
    fn tx_burst(&self, pkts: &mut [Option<Mbuf>]) -> usize {
        if !self.running.load(Ordering::Acquire) {
            return 0;
        }
        let mut n = 0;
        let mut bytes = 0;
        for slot in pkts.iter_mut() {
            let Some(mbuf) = slot.take() else {
                break;
            };
            let len = mbuf.data_len() as u64;
            if let Err(mbuf) = self.ring.push(mbuf) {
                *slot = Some(mbuf);
                break;
            }
            bytes += len;
            n += 1;
        }
        RingStats::bump(&self.stats.opackets, n as u64);
        RingStats::bump(&self.stats.obytes, bytes);
        n
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Drop,
    Queue(QueueId),
}

struct InstalledRule {
    id: u64,
    priority: u32,
    pattern: Vec<FlowItem>,
    fate: Option<Fate>,
    counted: bool,
    hits: AtomicU64,
}

enum Verdict {
    Drop,
    Queue(QueueId),
    Default,
}

#[derive(Default)]
struct Queues {
    rx: Vec<Option<Arc<RingRxQueue>>>,
    tx: Vec<Option<Arc<RingTxQueue>>>,
}

/// Device state of one ring port.
pub(crate) struct RingDevice {
    mac: EtherAddr,
    running: Arc<AtomicBool>,
    promiscuous: AtomicBool,
    queues: RwLock<Queues>,
    rules: ArcSwap<Vec<Arc<InstalledRule>>>,
    // serializes rule writers; readers never take it
    rules_write: Mutex<()>,
    next_rule_id: AtomicU64,
    stats: Arc<RingStats>,
}

impl RingDevice {
    fn new(mac: EtherAddr) -> Self {
        Self {
            mac,
            running: Arc::new(AtomicBool::new(false)),
            promiscuous: AtomicBool::new(false),
            queues: RwLock::new(Queues::default()),
            rules: ArcSwap::from_pointee(Vec::new()),
            rules_write: Mutex::new(()),
            next_rule_id: AtomicU64::new(1),
            stats: Arc::new(RingStats::default()),
        }
    }

    fn classify(&self, frame: &[u8]) -> Verdict {
        let rules = self.rules.load();
        for rule in rules.iter() {
            if !pattern_matches(&rule.pattern, frame) {
                continue;
            }
            rule.hits.fetch_add(1, Ordering::Relaxed);
            match rule.fate {
                Some(Fate::Drop) => return Verdict::Drop,
                Some(Fate::Queue(q)) => return Verdict::Queue(q),
                None => continue,
            }
        }
        Verdict::Default
    }

    fn accepts_dst(&self, frame: &[u8]) -> bool {
        if self.promiscuous.load(Ordering::Relaxed) {
            return true;
        }
        match EthernetFrame::new_checked(frame) {
            Ok(eth) => {
                let dst = EtherAddr::new(eth.dst_addr().0);
                !dst.is_unicast() || dst == self.mac
            }
            Err(_) => false,
        }
    }

    fn nb_rx_queues(&self) -> usize {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rx
            .len()
    }

    fn drain_queues(&self) {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        for rxq in queues.rx.iter().flatten() {
            while rxq.ring.pop().is_some() {}
        }
        for txq in queues.tx.iter().flatten() {
            while txq.ring.pop().is_some() {}
        }
    }

    fn write_rules<F>(&self, f: F) -> std::result::Result<(), FlowError>
    where
        F: FnOnce(&mut Vec<Arc<InstalledRule>>) -> std::result::Result<(), FlowError>,
    {
        let _guard = self
            .rules_write
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut rules = (**self.rules.load()).clone();
        f(&mut rules)?;
        self.rules.store(Arc::new(rules));
        Ok(())
    }
}

fn unsupported(cause: FlowErrorCause, message: &str) -> FlowError {
    FlowError::new(FlowErrorKind::Validation, cause, Errno::ENOTSUP, message)
}

impl FlowOps for RingDevice {
    fn validate(
        &self,
        attr: &FlowAttr,
        pattern: &[FlowItem],
        actions: &[FlowAction],
    ) -> std::result::Result<(), FlowError> {
        if attr.egress || attr.transfer {
            return Err(unsupported(
                FlowErrorCause::Attr,
                "only ingress rules are supported",
            ));
        }
        if attr.group != 0 {
            return Err(unsupported(FlowErrorCause::Attr, "groups are not supported"));
        }
        check_rule(attr, pattern, actions)?;

        if let Some(i) = pattern
            .iter()
            .position(|item| matches!(item, FlowItem::Vlan { .. }))
        {
            return Err(unsupported(
                FlowErrorCause::Item(i),
                "VLAN matching is not supported",
            ));
        }

        let nb_rx = self.nb_rx_queues();
        for (i, action) in actions.iter().enumerate() {
            if let FlowAction::Queue(q) = action
                && *q as usize >= nb_rx
            {
                return Err(FlowError::new(
                    FlowErrorKind::Validation,
                    FlowErrorCause::Action(i),
                    Errno::EINVAL,
                    "queue index out of range",
                ));
            }
        }
        Ok(())
    }

    fn create(
        &self,
        attr: &FlowAttr,
        pattern: &[FlowItem],
        actions: &[FlowAction],
    ) -> std::result::Result<u64, FlowError> {
        self.validate(attr, pattern, actions)?;

        let fate = actions.iter().find_map(|a| match a {
            FlowAction::Drop => Some(Fate::Drop),
            FlowAction::Queue(q) => Some(Fate::Queue(*q)),
            _ => None,
        });
        let rule = Arc::new(InstalledRule {
            id: self.next_rule_id.fetch_add(1, Ordering::Relaxed),
            priority: attr.priority,
            pattern: pattern.to_vec(),
            fate,
            counted: actions.contains(&FlowAction::Count),
            hits: AtomicU64::new(0),
        });
        let id = rule.id;

        self.write_rules(|rules| {
            if rules.len() >= RING_MAX_FLOW_RULES {
                return Err(FlowError::new(
                    FlowErrorKind::Creation,
                    FlowErrorCause::Unspecified,
                    Errno::ENOSPC,
                    "flow rule table is full",
                ));
            }
            // after every rule of lower or equal priority
            let at = rules.partition_point(|r| r.priority <= rule.priority);
            rules.insert(at, rule);
            Ok(())
        })?;
        debug!(rule = id, priority = attr.priority, "Installed flow rule");
        Ok(id)
    }

    fn destroy(&self, id: u64) -> std::result::Result<(), FlowError> {
        self.write_rules(|rules| {
            let at = rules.iter().position(|r| r.id == id).ok_or_else(|| {
                FlowError::new(
                    FlowErrorKind::Destroy,
                    FlowErrorCause::Handle,
                    Errno::ENOENT,
                    "no such flow rule",
                )
            })?;
            rules.remove(at);
            Ok(())
        })
    }

    fn flush(&self) -> std::result::Result<(), FlowError> {
        let _guard = self
            .rules_write
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.rules.store(Arc::new(Vec::new()));
        Ok(())
    }

    fn query_hits(&self, id: u64) -> std::result::Result<u64, FlowError> {
        let rules = self.rules.load();
        let rule = rules.iter().find(|r| r.id == id).ok_or_else(|| {
            FlowError::new(
                FlowErrorKind::Query,
                FlowErrorCause::Handle,
                Errno::ENOENT,
                "no such flow rule",
            )
        })?;
        if !rule.counted {
            return Err(FlowError::new(
                FlowErrorKind::Query,
                FlowErrorCause::Handle,
                Errno::ENOTSUP,
                "rule has no COUNT action",
            ));
        }
        Ok(rule.hits.load(Ordering::Relaxed))
    }
}

impl EthDriver for RingDevice {
    fn driver_name(&self) -> &'static str {
        DRIVER_PREFIX
    }

    fn dev_info(&self) -> DevInfo {
        DevInfo {
            driver_name: DRIVER_PREFIX.to_string(),
            device_name: String::new(),
            max_rx_queues: RING_MAX_QUEUES,
            max_tx_queues: RING_MAX_QUEUES,
            max_mtu: 9000,
            rx_desc_lim: RING_DESC_LIM,
            tx_desc_lim: RING_DESC_LIM,
            rx_offload_capa: 0,
            tx_offload_capa: 0,
            default_rxconf: RxConf {
                free_thresh: 32,
                drop_en: false,
                offloads: 0,
            },
            default_txconf: TxConf {
                free_thresh: 32,
                rs_thresh: 32,
                offloads: 0,
            },
            is_representor: false,
        }
    }

    fn mac_addr(&self) -> EtherAddr {
        self.mac
    }

    fn link(&self) -> Link {
        if self.running.load(Ordering::Acquire) {
            Link {
                up: true,
                speed: ETH_SPEED_NUM_10G,
                duplex: Duplex::Full,
                autoneg: false,
            }
        } else {
            Link::down()
        }
    }

    fn stats(&self) -> EthStats {
        self.stats.snapshot()
    }

    fn configure(&self, nb_rx_queues: u16, nb_tx_queues: u16, _conf: &EthConf) -> Result<()> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        queues.rx = vec![None; nb_rx_queues as usize];
        queues.tx = vec![None; nb_tx_queues as usize];
        Ok(())
    }

    fn rx_queue_setup(
        &self,
        queue_id: QueueId,
        nb_desc: u16,
        _conf: &RxConf,
        pool: &MemPoolRef,
    ) -> Result<Arc<dyn RxBurst>> {
        let queue = Arc::new(RingRxQueue {
            ring: ArrayQueue::new(nb_desc as usize),
            pool: pool.clone(),
            running: self.running.clone(),
            stats: self.stats.clone(),
        });
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        let slot = queues.rx.get_mut(queue_id as usize).ok_or(Errno::EINVAL)?;
        *slot = Some(queue.clone());
        Ok(queue)
    }

    fn tx_queue_setup(
        &self,
        queue_id: QueueId,
        nb_desc: u16,
        _conf: &TxConf,
    ) -> Result<Arc<dyn TxBurst>> {
        let queue = Arc::new(RingTxQueue {
            ring: ArrayQueue::new(nb_desc as usize),
            running: self.running.clone(),
            stats: self.stats.clone(),
        });
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        let slot = queues.tx.get_mut(queue_id as usize).ok_or(Errno::EINVAL)?;
        *slot = Some(queue.clone());
        Ok(queue)
    }

    fn dev_start(&self) -> Result<()> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn dev_stop(&self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        let _ = FlowOps::flush(self);
        self.drain_queues();
        Ok(())
    }

    fn dev_close(&self) -> Result<()> {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        queues.rx.clear();
        queues.tx.clear();
        Ok(())
    }

    fn promiscuous_set(&self, on: bool) -> Result<()> {
        self.promiscuous.store(on, Ordering::Relaxed);
        Ok(())
    }

    fn flow_ops(&self) -> Option<&dyn FlowOps> {
        Some(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Create the port for `net_ring<N>[,mac=xx:xx:xx:xx:xx:xx]`.
pub(crate) fn probe(name: &str, args: &str) -> Result<PortId> {
    let index: u8 = name
        .strip_prefix(DRIVER_PREFIX)
        .and_then(|n| n.parse().ok())
        .ok_or(Errno::EINVAL)?;
    let mut mac = EtherAddr::new([0x02, 0, 0, 0, 0, index]);
    for kv in args.split(',').filter(|s| !s.is_empty()) {
        match kv.split_once('=') {
            Some(("mac", value)) => mac = value.parse()?,
            _ => return Err(Errno::EINVAL),
        }
    }
    let port = RingPort::create(name, mac)?;
    info!(port_id = port.port_id(), name, mac = %mac, "Probed ring device");
    Ok(port.port_id())
}

/// Wire side of a ring port.
#[derive(Clone)]
pub struct RingPort {
    port_id: PortId,
    dev: Arc<RingDevice>,
}

impl RingPort {
    /// Attach a new ring device and return its wire side.
    pub fn create(name: &str, mac: EtherAddr) -> Result<Self> {
        let dev = Arc::new(RingDevice::new(mac));
        let port_id = eth::attach(name, dev.clone())?;
        Ok(Self { port_id, dev })
    }

    /// Wire side of an existing ring port.
    ///
    /// `ENOTSUP` if the port is backed by another driver.
    pub fn from_port(port_id: PortId) -> Result<Self> {
        let dev = eth::driver(port_id)?
            .into_any()
            .downcast::<RingDevice>()
            .map_err(|_| Errno::ENOTSUP)?;
        Ok(Self { port_id, dev })
    }

    /// Remove the port from the system.
    pub fn detach(self) {
        eth::detach(self.port_id);
    }

    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    pub fn mac(&self) -> EtherAddr {
        self.dev.mac
    }

    /// Deliver one frame to the port's receive path.
    pub fn inject(&self, frame: &[u8]) -> Ingress {
        let dev = &self.dev;
        if !dev.running.load(Ordering::Acquire) || !dev.accepts_dst(frame) {
            return Ingress::Dropped;
        }
        let queue_id = match dev.classify(frame) {
            Verdict::Drop => return Ingress::Filtered,
            Verdict::Queue(q) => q,
            Verdict::Default => 0,
        };

        let queues = dev.queues.read().unwrap_or_else(PoisonError::into_inner);
        let Some(Some(rxq)) = queues.rx.get(queue_id as usize) else {
            RingStats::bump(&dev.stats.ierrors, 1);
            return Ingress::Dropped;
        };
        let Some(mut mbuf) = rxq.pool.try_alloc() else {
            RingStats::bump(&dev.stats.rx_nombuf, 1);
            return Ingress::NoMbuf;
        };
        if !mbuf.copy_from_slice(frame) {
            RingStats::bump(&dev.stats.ierrors, 1);
            return Ingress::Dropped;
        }
        mbuf.set_port(self.port_id);
        match rxq.ring.push(mbuf) {
            Ok(()) => Ingress::Queued(queue_id),
            Err(_mbuf) => {
                RingStats::bump(&dev.stats.imissed, 1);
                Ingress::Missed
            }
        }
    }

    /// Take every frame transmitted on a TX queue so far.
    pub fn drain_tx(&self, queue_id: QueueId) -> Vec<Mbuf> {
        let queues = self.dev.queues.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::new();
        if let Some(Some(txq)) = queues.tx.get(queue_id as usize) {
            while let Some(mbuf) = txq.ring.pop() {
                out.push(mbuf);
            }
        }
        out
    }

    /// Frames waiting in an RX ring.
    pub fn rx_pending(&self, queue_id: QueueId) -> usize {
        let queues = self.dev.queues.read().unwrap_or_else(PoisonError::into_inner);
        match queues.rx.get(queue_id as usize) {
            Some(Some(rxq)) => rxq.ring.len(),
            _ => 0,
        }
    }

    /// Frames waiting in a TX ring.
    pub fn tx_pending(&self, queue_id: QueueId) -> usize {
        let queues = self.dev.queues.read().unwrap_or_else(PoisonError::into_inner);
        match queues.tx.get(queue_id as usize) {
            Some(Some(txq)) => txq.ring.len(),
            _ => 0,
        }
    }

    /// Number of installed flow rules.
    pub fn flow_rule_count(&self) -> usize {
        self.dev.rules.load().len()
    }
}
