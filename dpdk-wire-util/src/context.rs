//! Worker context passed to each lcore.

use dpdk_wire::api::rte::lcore::Lcore;

/// Where a dispatched task runs.
///
/// Built by the dispatcher before launch and moved onto the worker together
/// with the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    /// The lcore this worker is running on.
    pub lcore: Lcore,

    /// NUMA socket ID for this lcore.
    pub socket_id: u32,
}

impl WorkerContext {
    pub fn new(lcore: Lcore) -> Self {
        Self {
            lcore,
            socket_id: lcore.socket_id(),
        }
    }
}
