pub mod eal;
pub mod eth;
pub mod flow;
pub mod lcore;
pub mod mbuf;
pub mod memory;
pub mod pktmbuf;
pub mod queue;
