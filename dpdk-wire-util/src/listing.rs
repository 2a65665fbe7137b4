//! Diagnostic port listing.

use std::fmt;

use dpdk_wire::api::Result;
use dpdk_wire::api::rte::eth::{self, EthDev, EtherAddr, Link, PortId};
use nix::ifaddrs::getifaddrs;

/// What is known about one attached port.
#[derive(Debug, Clone)]
pub struct PortListing {
    pub port_id: PortId,
    pub device_name: String,
    pub is_representor: bool,
    pub driver: String,
    pub mac: EtherAddr,
    pub max_rx_queues: u16,
    pub max_tx_queues: u16,
    pub link: Link,
    /// Kernel interface carrying the same MAC, if any
    pub interface: Option<String>,
}

impl fmt::Display for PortListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Port {}: {}", self.port_id, self.device_name)?;
        writeln!(f, "  Driver: {}", self.driver)?;
        writeln!(f, "  Representor: {}", self.is_representor)?;
        writeln!(f, "  MAC: {}", self.mac)?;
        writeln!(
            f,
            "  Queues: {} rx / {} tx",
            self.max_rx_queues, self.max_tx_queues
        )?;
        writeln!(f, "  {}", self.link)?;
        match &self.interface {
            Some(name) => write!(f, "  Interface: {name}"),
            None => write!(f, "  Interface: none"),
        }
    }
}

/// Kernel interface whose hardware address is `mac`.
pub fn interface_for_mac(mac: &EtherAddr) -> Option<String> {
    let ifaddrs = getifaddrs().ok()?;

    for ifaddr in ifaddrs {
        if let Some(address) = ifaddr.address
            && let Some(link) = address.as_link_addr()
            && link.addr() == Some(mac.addr_bytes)
        {
            return Some(ifaddr.interface_name);
        }
    }

    None
}

/// Describe one port.
pub fn describe_port(port_id: PortId) -> Result<PortListing> {
    let dev = EthDev::new(port_id);
    let info = dev.info()?;
    let mac = dev.mac_addr()?;
    Ok(PortListing {
        port_id,
        device_name: info.device_name,
        is_representor: info.is_representor,
        driver: info.driver_name,
        mac,
        max_rx_queues: info.max_rx_queues,
        max_tx_queues: info.max_tx_queues,
        link: dev.link_get_nowait()?,
        interface: interface_for_mac(&mac),
    })
}

/// Describe every attached port.
pub fn list_ports() -> Vec<PortListing> {
    eth::iter_ports()
        .filter_map(|port_id| describe_port(port_id).ok())
        .collect()
}
