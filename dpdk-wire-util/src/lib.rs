//! Application layer for dpdk-wire.
//!
//! Brings ports up against a mempool ([`PortManager`]), installs drop and
//! steering rules ([`FlowEngine`]), runs one burst task per worker lcore
//! ([`WorkerDispatcher`]) and ties those together in [`WireApp`].
//!
//! # Quick start
//!
//! ```no_run
//! use dpdk_wire::api::rte::eal::EalBuilder;
//! use dpdk_wire::api::rte::pktmbuf::{MemPool, MemPoolConfig};
//! use dpdk_wire_util::{PortManager, WorkerDispatcher, WorkerTask};
//!
//! # fn main() -> Result<(), dpdk_wire::BoxError> {
//! let _eal = EalBuilder::new().core_list("0-1").vdev("net_ring0").init()?;
//! let pool = MemPool::create("pool", &MemPoolConfig::new())?;
//! let port = PortManager::configure(0, 1, 1, 1024, 1024, &pool)?;
//!
//! let task = WorkerTask::count("count", port.port_id());
//! let cancel = task.cancel.clone();
//! let dispatch = WorkerDispatcher::new().launch(vec![task])?;
//! cancel.cancel();
//! dispatch.wait();
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod listing;
pub mod port;
pub mod steering;

pub use app::{WireApp, WireMode};
pub use context::WorkerContext;
pub use dispatch::{Behavior, Dispatch, TaskReport, WorkerDispatcher, WorkerTask};
pub use error::Error;
pub use listing::{PortListing, list_ports};
pub use port::{ConfigStep, ConfiguredPort, PortManager, PortSettings};
pub use steering::FlowEngine;
