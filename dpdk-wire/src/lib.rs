//! User-space packet dispatch: mempools, ethernet ports driven by poll-mode
//! drivers, burst RX/TX, flow steering and the burst forwarding engine.
//!
//! The [`api::rte`] module follows the DPDK shape (EAL, lcores, mempools,
//! ethdev, queues, rte_flow). Devices are backed by the drivers in [`pmd`].
//! The steady-state loops live in [`burst`].

pub mod api;
pub mod burst;
pub mod pmd;

/// A boxed error type for dpdk-wire operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
