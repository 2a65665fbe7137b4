//! Wire-side traffic generation for ring ports.

use dpdk_wire::pmd::{Ingress, RingPort};
use tracing::debug;

/// Per-outcome counts of a batch of injected frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectTally {
    /// Frames stored in any RX queue
    pub queued: u64,
    pub filtered: u64,
    pub dropped: u64,
    pub missed: u64,
    pub no_mbuf: u64,
}

impl InjectTally {
    pub fn record(&mut self, ingress: Ingress) {
        match ingress {
            Ingress::Queued(_) => self.queued += 1,
            Ingress::Filtered => self.filtered += 1,
            Ingress::Dropped => self.dropped += 1,
            Ingress::Missed => self.missed += 1,
            Ingress::NoMbuf => self.no_mbuf += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.queued + self.filtered + self.dropped + self.missed + self.no_mbuf
    }
}

/// Inject `frame` `count` times.
pub fn inject_n(port: &RingPort, frame: &[u8], count: usize) -> InjectTally {
    let mut tally = InjectTally::default();
    for _ in 0..count {
        tally.record(port.inject(frame));
    }
    debug!(port_id = port.port_id(), ?tally, "Injected frames");
    tally
}

/// Inject every frame once, in order.
pub fn inject_all<'a>(port: &RingPort, frames: impl IntoIterator<Item = &'a [u8]>) -> InjectTally {
    let mut tally = InjectTally::default();
    for frame in frames {
        tally.record(port.inject(frame));
    }
    tally
}
