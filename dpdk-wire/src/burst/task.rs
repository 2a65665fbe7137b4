use std::hint;
use std::sync::Arc;

use arrayvec::ArrayVec;
use tracing::debug;

use super::stats::{BurstOutcome, BurstStats, StatsHandle, TaskStats};
use super::{CancelToken, MAX_PKT_BURST, TxPolicy};
use crate::api::Result;
use crate::api::rte::eth::PortId;
use crate::api::rte::mbuf::Mbuf;
use crate::api::rte::queue::{RxQueue, TxQueue};

/// Receives bursts on one port and transmits them on another.
pub struct ForwardTask {
    rx: RxQueue,
    tx: TxQueue,
    policy: TxPolicy,
    scratch: ArrayVec<Mbuf, MAX_PKT_BURST>,
    stats: BurstStats,
    shared: Arc<TaskStats>,
}

impl ForwardTask {
    /// Forward from RX queue 0 of `in_port` to TX queue 0 of `out_port`.
    ///
    /// Both ports must be started.
    pub fn new(in_port: PortId, out_port: PortId, policy: TxPolicy) -> Result<Self> {
        Ok(Self::from_queues(
            RxQueue::new(in_port, 0)?,
            TxQueue::new(out_port, 0)?,
            policy,
        ))
    }

    pub fn from_queues(rx: RxQueue, tx: TxQueue, policy: TxPolicy) -> Self {
        Self {
            rx,
            tx,
            policy,
            scratch: ArrayVec::new(),
            stats: BurstStats::default(),
            shared: Arc::default(),
        }
    }

    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle(self.shared.clone())
    }

    pub fn stats(&self) -> BurstStats {
        self.stats
    }

    /// One receive/transmit iteration.
    pub fn poll_once(&mut self) -> BurstOutcome {
        let received = self.rx.rx(&mut self.scratch);
        if received == 0 {
            return BurstOutcome::default();
        }

        let mut forwarded = self.tx.tx(&mut self.scratch);
        if let TxPolicy::Retry { attempts } = self.policy {
            for _ in 0..attempts {
                if self.scratch.is_empty() {
                    break;
                }
                forwarded += self.tx.tx(&mut self.scratch);
            }
        }

        // whatever the queue refused goes back to the pool here
        let dropped = self.scratch.len();
        self.scratch.clear();

        let outcome = BurstOutcome {
            received,
            forwarded,
            dropped,
        };
        self.stats.record(&outcome);
        self.shared.publish(&self.stats);
        outcome
    }

    /// Poll until `cancel` is set and return the final counters.
    pub fn run(&mut self, cancel: &CancelToken) -> BurstStats {
        debug!(
            rx_port = self.rx.port_id(),
            tx_port = self.tx.port_id(),
            policy = ?self.policy,
            "Forward loop started"
        );
        while !cancel.is_cancelled() {
            if self.poll_once().is_idle() {
                hint::spin_loop();
            }
        }
        debug!(
            rx_port = self.rx.port_id(),
            tx_port = self.tx.port_id(),
            stats = %self.stats,
            "Forward loop stopped"
        );
        self.stats
    }
}

/// Receives bursts on one port, counts and frees them.
pub struct CountTask {
    rx: RxQueue,
    scratch: ArrayVec<Mbuf, MAX_PKT_BURST>,
    stats: BurstStats,
    shared: Arc<TaskStats>,
}

impl CountTask {
    /// Count packets arriving on RX queue 0 of `port`.
    pub fn new(port: PortId) -> Result<Self> {
        Ok(Self::from_queue(RxQueue::new(port, 0)?))
    }

    pub fn from_queue(rx: RxQueue) -> Self {
        Self {
            rx,
            scratch: ArrayVec::new(),
            stats: BurstStats::default(),
            shared: Arc::default(),
        }
    }

    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle(self.shared.clone())
    }

    pub fn stats(&self) -> BurstStats {
        self.stats
    }

    /// Total packets counted so far.
    pub fn total(&self) -> u64 {
        self.stats.received
    }

    pub fn poll_once(&mut self) -> BurstOutcome {
        let received = self.rx.rx(&mut self.scratch);
        if received == 0 {
            return BurstOutcome::default();
        }
        self.scratch.clear();

        let outcome = BurstOutcome {
            received,
            ..Default::default()
        };
        self.stats.record(&outcome);
        self.shared.publish(&self.stats);
        outcome
    }

    pub fn run(&mut self, cancel: &CancelToken) -> BurstStats {
        debug!(port = self.rx.port_id(), "Count loop started");
        while !cancel.is_cancelled() {
            if self.poll_once().is_idle() {
                hint::spin_loop();
            }
        }
        debug!(port = self.rx.port_id(), total = self.total(), "Count loop stopped");
        self.stats
    }
}

/// Either kind of burst loop, for callers that schedule them uniformly.
pub enum BurstTask {
    Forward(ForwardTask),
    Count(CountTask),
}

impl BurstTask {
    pub fn stats_handle(&self) -> StatsHandle {
        match self {
            BurstTask::Forward(t) => t.stats_handle(),
            BurstTask::Count(t) => t.stats_handle(),
        }
    }

    pub fn poll_once(&mut self) -> BurstOutcome {
        match self {
            BurstTask::Forward(t) => t.poll_once(),
            BurstTask::Count(t) => t.poll_once(),
        }
    }

    pub fn run(&mut self, cancel: &CancelToken) -> BurstStats {
        match self {
            BurstTask::Forward(t) => t.run(cancel),
            BurstTask::Count(t) => t.run(cancel),
        }
    }
}

impl From<ForwardTask> for BurstTask {
    fn from(task: ForwardTask) -> Self {
        BurstTask::Forward(task)
    }
}

impl From<CountTask> for BurstTask {
    fn from(task: CountTask) -> Self {
        BurstTask::Count(task)
    }
}
