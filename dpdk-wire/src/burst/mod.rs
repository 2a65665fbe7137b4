//! Steady-state burst loops.
//!
//! A task owns its queues and a fixed scratch array of [`MAX_PKT_BURST`]
//! buffers. Each iteration receives one burst, then either counts and frees
//! it ([`CountTask`]) or offers it to a TX queue ([`ForwardTask`]). Nothing
//! here blocks: an empty burst is a normal outcome.
//!
//! Counters are written only by the task itself and published after every
//! iteration, so other threads can read them through a [`StatsHandle`]
//! without any synchronization on the fast path.
//!
//! ```no_run
//! use dpdk_wire::burst::{CancelToken, ForwardTask, TxPolicy};
//!
//! # fn example() -> dpdk_wire::api::Result<()> {
//! let cancel = CancelToken::new();
//! let mut task = ForwardTask::new(0, 1, TxPolicy::Drop)?;
//! let stats = task.stats_handle();
//! let total = task.run(&cancel);
//! assert_eq!(total, stats.snapshot());
//! # Ok(())
//! # }
//! ```

mod stats;
mod task;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use stats::{BurstOutcome, BurstStats, StatsHandle};
pub use task::{BurstTask, CountTask, ForwardTask};

/// Buffers received per iteration.
pub const MAX_PKT_BURST: usize = 32;

/// What a forward task does with buffers the TX queue did not accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxPolicy {
    /// Free them immediately.
    #[default]
    Drop,
    /// Offer the remainder again up to `attempts` more times in the same
    /// iteration, then free what is left.
    Retry { attempts: u32 },
}

/// Cooperative stop flag shared between a task and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this token to stop at its next iteration.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
