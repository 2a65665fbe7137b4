use std::fmt;

use dpdk_wire::api::rte::eth::PortId;
use dpdk_wire::api::rte::flow::FlowError;
use dpdk_wire::api::rte::pktmbuf::MemPoolError;
use dpdk_wire::api::{Errno, neg_code};

use crate::port::ConfigStep;

/// Error type for dpdk-wire-util operations.
#[derive(Debug)]
pub enum Error {
    /// EAL bring-up failed.
    Eal(Errno),
    /// Mempool creation failed.
    MemPool(MemPoolError),
    /// A port configuration step failed.
    PortConfig {
        port: PortId,
        step: ConfigStep,
        errno: Errno,
    },
    /// Flow rule validation, creation or removal failed.
    Flow(FlowError),
    /// More tasks than worker lcores.
    InsufficientWorkers { requested: usize, available: usize },
    /// A worker lcore refused the task.
    Launch { lcore: u32, errno: Errno },
    /// A task could not open its queues.
    Task { name: String, errno: Errno },
}

impl Error {
    /// Signed errno code, e.g. `-19` for `ENODEV`.
    pub fn code(&self) -> i32 {
        let errno = match self {
            Error::Eal(e) => *e,
            Error::MemPool(e) => e.errno(),
            Error::PortConfig { errno, .. } => *errno,
            Error::Flow(e) => e.errno,
            Error::InsufficientWorkers { .. } => Errno::EINVAL,
            Error::Launch { errno, .. } | Error::Task { errno, .. } => *errno,
        };
        neg_code(errno)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Eal(e) => write!(f, "EAL initialization failed: {e}"),
            Error::MemPool(e) => write!(f, "mempool creation failed: {e}"),
            Error::PortConfig { port, step, errno } => {
                write!(
                    f,
                    "port {port}: {step} failed: {errno} ({})",
                    neg_code(*errno)
                )
            }
            Error::Flow(e) => write!(f, "{e}"),
            Error::InsufficientWorkers {
                requested,
                available,
            } => write!(
                f,
                "{requested} tasks need {requested} worker lcores but only {available} available; \
                 pass more cores, e.g. --cores 0-{requested}"
            ),
            Error::Launch { lcore, errno } => {
                write!(f, "failed to launch on lcore {lcore}: {errno}")
            }
            Error::Task { name, errno } => write!(f, "task {name}: {errno}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MemPool(e) => Some(e),
            Error::Flow(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MemPoolError> for Error {
    fn from(e: MemPoolError) -> Self {
        Error::MemPool(e)
    }
}

impl From<FlowError> for Error {
    fn from(e: FlowError) -> Self {
        Error::Flow(e)
    }
}
