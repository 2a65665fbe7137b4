use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of one burst task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BurstStats {
    /// Non-empty bursts received
    pub rx_bursts: u64,
    /// Buffers received
    pub received: u64,
    /// Buffers accepted by the TX queue
    pub forwarded: u64,
    /// Buffers freed because the TX queue did not accept them
    pub dropped: u64,
}

impl BurstStats {
    pub(crate) fn record(&mut self, outcome: &BurstOutcome) {
        if outcome.received > 0 {
            self.rx_bursts += 1;
        }
        self.received += outcome.received as u64;
        self.forwarded += outcome.forwarded as u64;
        self.dropped += outcome.dropped as u64;
    }
}

impl fmt::Display for BurstStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packets in {} bursts, {} forwarded, {} dropped",
            self.received, self.rx_bursts, self.forwarded, self.dropped
        )
    }
}

/// Result of a single iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BurstOutcome {
    pub received: usize,
    pub forwarded: usize,
    pub dropped: usize,
}

impl BurstOutcome {
    pub fn is_idle(&self) -> bool {
        self.received == 0
    }
}

/// Published copy of a task's counters.
///
/// Only the owning task stores into it, so plain relaxed stores suffice.
#[derive(Debug, Default)]
pub(crate) struct TaskStats {
    rx_bursts: AtomicU64,
    received: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl TaskStats {
    pub(crate) fn publish(&self, stats: &BurstStats) {
        self.rx_bursts.store(stats.rx_bursts, Ordering::Relaxed);
        self.received.store(stats.received, Ordering::Relaxed);
        self.forwarded.store(stats.forwarded, Ordering::Relaxed);
        self.dropped.store(stats.dropped, Ordering::Relaxed);
    }

    fn load(&self) -> BurstStats {
        BurstStats {
            rx_bursts: self.rx_bursts.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of a running task's counters.
#[derive(Debug, Clone)]
pub struct StatsHandle(pub(crate) Arc<TaskStats>);

impl StatsHandle {
    /// Counters as of the task's last completed iteration. Fields are read
    /// individually and may come from adjacent iterations.
    pub fn snapshot(&self) -> BurstStats {
        self.0.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_skips_empty_bursts() {
        let mut stats = BurstStats::default();
        stats.record(&BurstOutcome::default());
        assert_eq!(stats, BurstStats::default());

        stats.record(&BurstOutcome {
            received: 5,
            forwarded: 3,
            dropped: 2,
        });
        assert_eq!(stats.rx_bursts, 1);
        assert_eq!(stats.received, 5);
        assert_eq!(stats.forwarded + stats.dropped, stats.received);
    }

    #[test]
    fn test_published_snapshot() {
        let shared = Arc::new(TaskStats::default());
        let handle = StatsHandle(shared.clone());
        let stats = BurstStats {
            rx_bursts: 2,
            received: 40,
            forwarded: 39,
            dropped: 1,
        };
        shared.publish(&stats);
        assert_eq!(handle.snapshot(), stats);
        assert_eq!(
            stats.to_string(),
            "40 packets in 2 bursts, 39 forwarded, 1 dropped"
        );
    }
}
