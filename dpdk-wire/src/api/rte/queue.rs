// RX/TX Queue API
// Burst handles for the queues of a started port.

use std::fmt;
use std::sync::Arc;

use arrayvec::ArrayVec;

use super::eth::{self, PortId, QueueId};
use super::mbuf::Mbuf;
use crate::api::Result;
use crate::pmd::{RxBurst, TxBurst};

/// Maximum burst size for RX/TX operations
pub const MAX_BURST_SIZE: usize = 64;

/// RX Queue handle for receiving packets
#[derive(Clone)]
pub struct RxQueue {
    port_id: PortId,
    queue_id: QueueId,
    burst: Arc<dyn RxBurst>,
}

impl RxQueue {
    /// Create a new RX queue handle.
    ///
    /// The queue must be set up and the port started, otherwise
    /// `ENETDOWN` (port not started) or `EINVAL` (no such queue).
    pub fn new(port_id: PortId, queue_id: QueueId) -> Result<Self> {
        let burst = eth::rx_queue(port_id, queue_id)?;
        Ok(Self {
            port_id,
            queue_id,
            burst,
        })
    }

    /// Get the port ID
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the queue ID
    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Receive a burst of packets into the provided buffer.
    ///
    /// Returns the number of packets received. Zero is a normal outcome.
    /// Packets are appended to the `mbufs` vector (up to its remaining capacity).
    #[inline]
    pub fn rx<const N: usize>(&self, mbufs: &mut ArrayVec<Mbuf, N>) -> usize {
        let capacity = mbufs.remaining_capacity().min(MAX_BURST_SIZE);
        if capacity == 0 {
            return 0;
        }

        let mut slots: [Option<Mbuf>; MAX_BURST_SIZE] = [const { None }; MAX_BURST_SIZE];
        let received = self.burst.rx_burst(&mut slots[..capacity]);

        for mbuf in slots.iter_mut().take(received).filter_map(Option::take) {
            mbufs.push(mbuf);
        }
        received
    }

    /// Receive a burst of packets, returning them as a new ArrayVec.
    #[inline]
    pub fn rx_burst<const N: usize>(&self) -> ArrayVec<Mbuf, N> {
        let mut mbufs = ArrayVec::new();
        self.rx(&mut mbufs);
        mbufs
    }
}

impl fmt::Debug for RxQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxQueue")
            .field("port_id", &self.port_id)
            .field("queue_id", &self.queue_id)
            .finish()
    }
}

/// TX Queue handle for transmitting packets
#[derive(Clone)]
pub struct TxQueue {
    port_id: PortId,
    queue_id: QueueId,
    burst: Arc<dyn TxBurst>,
}

impl TxQueue {
    /// Create a new TX queue handle.
    ///
    /// The queue must be set up and the port started.
    pub fn new(port_id: PortId, queue_id: QueueId) -> Result<Self> {
        let burst = eth::tx_queue(port_id, queue_id)?;
        Ok(Self {
            port_id,
            queue_id,
            burst,
        })
    }

    /// Get the port ID
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the queue ID
    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Transmit a burst of packets from the provided buffer.
    ///
    /// Accepted packets are removed from the front of `mbufs` and now belong
    /// to the device. Returns the number of packets accepted.
    ///
    /// Packets that were not accepted remain in the buffer, in order
    /// (caller must handle).
    #[inline]
    pub fn tx<const N: usize>(&self, mbufs: &mut ArrayVec<Mbuf, N>) -> usize {
        if mbufs.is_empty() {
            return 0;
        }

        let nb_pkts = mbufs.len().min(MAX_BURST_SIZE);
        let mut slots: [Option<Mbuf>; MAX_BURST_SIZE] = [const { None }; MAX_BURST_SIZE];
        for (slot, mbuf) in slots.iter_mut().zip(mbufs.drain(..nb_pkts)) {
            *slot = Some(mbuf);
        }

        let sent = self.burst.tx_burst(&mut slots[..nb_pkts]);

        let unsent = slots[..nb_pkts].iter_mut().filter_map(Option::take);
        for (i, mbuf) in unsent.enumerate() {
            mbufs.insert(i, mbuf);
        }
        sent
    }
}

impl fmt::Debug for TxQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxQueue")
            .field("port_id", &self.port_id)
            .field("queue_id", &self.queue_id)
            .finish()
    }
}
