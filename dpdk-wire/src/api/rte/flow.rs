//! Generic flow API.
//!
//! A flow rule is a pattern (a stack of protocol items, each with an
//! optional `spec` and `mask`) plus a list of actions, evaluated by the
//! device on ingress before packets reach an RX queue. Both lists are
//! terminated by an explicit `End` entry.
//!
//! # Example
//!
//! ```no_run
//! use dpdk_wire::api::rte::eth::EtherAddr;
//! use dpdk_wire::api::rte::flow::{EthHeader, Flow, FlowAction, FlowAttr, FlowItem};
//!
//! let dst: EtherAddr = "02:00:00:00:00:01".parse().unwrap();
//! let pattern = [
//!     FlowItem::Eth {
//!         spec: Some(EthHeader { dst, ..Default::default() }),
//!         mask: Some(EthHeader { dst: EtherAddr::BROADCAST, ..Default::default() }),
//!     },
//!     FlowItem::End,
//! ];
//! let actions = [FlowAction::Drop, FlowAction::End];
//! let flow = Flow::create(0, &FlowAttr::ingress(), &pattern, &actions).unwrap();
//! flow.destroy().unwrap();
//! ```

use std::fmt;
use std::net::Ipv4Addr;

use smoltcp::wire::{EthernetFrame, EthernetProtocol, IpProtocol, Ipv4Packet, TcpPacket, UdpPacket};

use super::eth::{self, EtherAddr, PortId};
use crate::api::{Errno, neg_code};

/// Rule attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowAttr {
    pub group: u32,
    /// Lower values are evaluated first
    pub priority: u32,
    pub ingress: bool,
    pub egress: bool,
    pub transfer: bool,
}

impl FlowAttr {
    pub fn ingress() -> Self {
        Self {
            ingress: true,
            ..Default::default()
        }
    }

    pub fn egress() -> Self {
        Self {
            egress: true,
            ..Default::default()
        }
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    pub fn transfer(mut self) -> Self {
        self.transfer = true;
        self
    }
}

/// Ethernet header fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EthHeader {
    pub dst: EtherAddr,
    pub src: EtherAddr,
    pub ether_type: u16,
}

impl EthHeader {
    pub const DEFAULT_MASK: EthHeader = EthHeader {
        dst: EtherAddr::BROADCAST,
        src: EtherAddr::BROADCAST,
        ether_type: 0,
    };

    fn to_bytes(self) -> [u8; 14] {
        let mut b = [0u8; 14];
        b[..6].copy_from_slice(&self.dst.addr_bytes);
        b[6..12].copy_from_slice(&self.src.addr_bytes);
        b[12..].copy_from_slice(&self.ether_type.to_be_bytes());
        b
    }
}

/// 802.1Q tag fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VlanHeader {
    pub tci: u16,
    pub inner_type: u16,
}

impl VlanHeader {
    /// VLAN id only.
    pub const DEFAULT_MASK: VlanHeader = VlanHeader {
        tci: 0x0fff,
        inner_type: 0,
    };

    fn to_bytes(self) -> [u8; 4] {
        let mut b = [0u8; 4];
        b[..2].copy_from_slice(&self.tci.to_be_bytes());
        b[2..].copy_from_slice(&self.inner_type.to_be_bytes());
        b
    }
}

/// IPv4 header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub next_proto_id: u8,
}

impl Default for Ipv4Header {
    fn default() -> Self {
        Self {
            src: Ipv4Addr::UNSPECIFIED,
            dst: Ipv4Addr::UNSPECIFIED,
            next_proto_id: 0,
        }
    }
}

impl Ipv4Header {
    pub const DEFAULT_MASK: Ipv4Header = Ipv4Header {
        src: Ipv4Addr::BROADCAST,
        dst: Ipv4Addr::BROADCAST,
        next_proto_id: 0,
    };

    fn to_bytes(self) -> [u8; 9] {
        let mut b = [0u8; 9];
        b[..4].copy_from_slice(&self.src.octets());
        b[4..8].copy_from_slice(&self.dst.octets());
        b[8] = self.next_proto_id;
        b
    }
}

/// UDP or TCP port fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct L4Ports {
    pub src_port: u16,
    pub dst_port: u16,
}

impl L4Ports {
    pub const DEFAULT_MASK: L4Ports = L4Ports {
        src_port: 0xffff,
        dst_port: 0xffff,
    };

    fn to_bytes(self) -> [u8; 4] {
        let mut b = [0u8; 4];
        b[..2].copy_from_slice(&self.src_port.to_be_bytes());
        b[2..].copy_from_slice(&self.dst_port.to_be_bytes());
        b
    }
}

/// One entry of a rule pattern.
///
/// A `None` spec matches any packet carrying that layer. A `None` mask
/// selects the item's default mask. Mask bits set mean exact match, clear
/// bits are wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowItem {
    Eth {
        spec: Option<EthHeader>,
        mask: Option<EthHeader>,
    },
    Vlan {
        spec: Option<VlanHeader>,
        mask: Option<VlanHeader>,
    },
    Ipv4 {
        spec: Option<Ipv4Header>,
        mask: Option<Ipv4Header>,
    },
    Udp {
        spec: Option<L4Ports>,
        mask: Option<L4Ports>,
    },
    Tcp {
        spec: Option<L4Ports>,
        mask: Option<L4Ports>,
    },
    /// Placeholder, matches anything
    Void,
    End,
}

impl FlowItem {
    /// Short protocol name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            FlowItem::Eth { .. } => "ETH",
            FlowItem::Vlan { .. } => "VLAN",
            FlowItem::Ipv4 { .. } => "IPV4",
            FlowItem::Udp { .. } => "UDP",
            FlowItem::Tcp { .. } => "TCP",
            FlowItem::Void => "VOID",
            FlowItem::End => "END",
        }
    }

    fn layer(&self) -> Option<u8> {
        match self {
            FlowItem::Eth { .. } => Some(2),
            FlowItem::Vlan { .. } => Some(3),
            FlowItem::Ipv4 { .. } => Some(4),
            FlowItem::Udp { .. } | FlowItem::Tcp { .. } => Some(5),
            FlowItem::Void | FlowItem::End => None,
        }
    }

    fn has_mask_without_spec(&self) -> bool {
        match self {
            FlowItem::Eth { spec, mask } => spec.is_none() && mask.is_some(),
            FlowItem::Vlan { spec, mask } => spec.is_none() && mask.is_some(),
            FlowItem::Ipv4 { spec, mask } => spec.is_none() && mask.is_some(),
            FlowItem::Udp { spec, mask } | FlowItem::Tcp { spec, mask } => {
                spec.is_none() && mask.is_some()
            }
            FlowItem::Void | FlowItem::End => false,
        }
    }
}

/// One entry of a rule action list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAction {
    /// Drop matching packets
    Drop,
    /// Steer matching packets to an RX queue
    Queue(u16),
    /// Count matching packets, see [`Flow::query_hits`]
    Count,
    /// Continue with the next rule
    PassThru,
    End,
}

impl FlowAction {
    /// Whether the action decides the packet's fate.
    pub fn is_fate(&self) -> bool {
        matches!(self, FlowAction::Drop | FlowAction::Queue(_))
    }
}

/// Stage of the flow API call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowErrorKind {
    Validation,
    Creation,
    Destroy,
    Query,
}

impl fmt::Display for FlowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowErrorKind::Validation => "validation",
            FlowErrorKind::Creation => "creation",
            FlowErrorKind::Destroy => "destroy",
            FlowErrorKind::Query => "query",
        };
        f.write_str(s)
    }
}

/// Object responsible for a flow error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowErrorCause {
    Attr,
    /// Index into the pattern list
    Item(usize),
    /// Index into the action list
    Action(usize),
    Handle,
    Unspecified,
}

impl fmt::Display for FlowErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowErrorCause::Attr => f.write_str("attributes"),
            FlowErrorCause::Item(i) => write!(f, "pattern item {i}"),
            FlowErrorCause::Action(i) => write!(f, "action {i}"),
            FlowErrorCause::Handle => f.write_str("flow handle"),
            FlowErrorCause::Unspecified => f.write_str("unspecified"),
        }
    }
}

/// Structured flow API error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowError {
    pub kind: FlowErrorKind,
    pub cause: FlowErrorCause,
    pub errno: Errno,
    pub message: Option<String>,
}

impl FlowError {
    pub fn new(
        kind: FlowErrorKind,
        cause: FlowErrorCause,
        errno: Errno,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            cause,
            errno,
            message: Some(message.into()),
        }
    }

    /// Signed code, e.g. `-95` for `ENOTSUP`.
    pub fn code(&self) -> i32 {
        neg_code(self.errno)
    }

    fn with_kind(mut self, kind: FlowErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flow {} failed at {} ({}): {}",
            self.kind,
            self.cause,
            self.errno,
            self.message.as_deref().unwrap_or("(no stated reason)")
        )
    }
}

impl std::error::Error for FlowError {}

fn invalid(cause: FlowErrorCause, message: &str) -> FlowError {
    FlowError::new(FlowErrorKind::Validation, cause, Errno::EINVAL, message)
}

/// Device independent checks on a rule: list termination, item order,
/// spec/mask pairing and at most one fate action.
pub fn check_rule(
    attr: &FlowAttr,
    pattern: &[FlowItem],
    actions: &[FlowAction],
) -> Result<(), FlowError> {
    if attr.ingress == attr.egress {
        return Err(invalid(
            FlowErrorCause::Attr,
            "exactly one of ingress or egress is required",
        ));
    }

    let Some(end) = pattern.iter().position(|i| *i == FlowItem::End) else {
        return Err(invalid(
            FlowErrorCause::Item(pattern.len()),
            "pattern is not terminated by END",
        ));
    };
    if end + 1 != pattern.len() {
        return Err(invalid(FlowErrorCause::Item(end + 1), "item after END"));
    }
    let mut last_layer = 0;
    for (i, item) in pattern[..end].iter().enumerate() {
        if item.has_mask_without_spec() {
            return Err(invalid(FlowErrorCause::Item(i), "mask given without spec"));
        }
        if let Some(layer) = item.layer() {
            // VLAN tags may stack; everything else moves strictly inward
            if layer < last_layer || (layer == last_layer && layer != 3) {
                return Err(invalid(FlowErrorCause::Item(i), "items out of protocol order"));
            }
            last_layer = layer;
        }
    }

    let Some(end) = actions.iter().position(|a| *a == FlowAction::End) else {
        return Err(invalid(
            FlowErrorCause::Action(actions.len()),
            "action list is not terminated by END",
        ));
    };
    if end + 1 != actions.len() {
        return Err(invalid(FlowErrorCause::Action(end + 1), "action after END"));
    }
    if end == 0 {
        return Err(invalid(FlowErrorCause::Action(0), "no action"));
    }
    let mut fates = actions[..end]
        .iter()
        .enumerate()
        .filter(|(_, a)| a.is_fate());
    fates.next();
    if let Some((i, _)) = fates.next() {
        return Err(invalid(FlowErrorCause::Action(i), "more than one fate action"));
    }
    Ok(())
}

fn masked_eq(value: &[u8], spec: &[u8], mask: &[u8]) -> bool {
    value
        .iter()
        .zip(spec)
        .zip(mask)
        .all(|((v, s), m)| v & m == s & m)
}

fn item_matches<const N: usize>(value: [u8; N], spec: Option<[u8; N]>, mask: [u8; N]) -> bool {
    match spec {
        Some(spec) => masked_eq(&value, &spec, &mask),
        None => true,
    }
}

const ETHER_TYPE_VLAN: u16 = 0x8100;
const ETHER_TYPE_QINQ: u16 = 0x88a8;

/// Cursor over the headers of one frame.
struct Headers<'a> {
    frame: &'a [u8],
    ether_type: u16,
    /// Offset of the payload following the last parsed L2 header
    l3_offset: usize,
    l4: Option<(u8, usize)>,
    l2_done: bool,
}

impl<'a> Headers<'a> {
    fn new(frame: &'a [u8]) -> Option<Self> {
        let eth = EthernetFrame::new_checked(frame).ok()?;
        Some(Self {
            frame,
            ether_type: u16::from(eth.ethertype()),
            l3_offset: EthernetFrame::<&[u8]>::header_len(),
            l4: None,
            l2_done: false,
        })
    }

    fn eth(&self) -> EthHeader {
        let eth = EthernetFrame::new_unchecked(self.frame);
        EthHeader {
            dst: EtherAddr::new(eth.dst_addr().0),
            src: EtherAddr::new(eth.src_addr().0),
            ether_type: u16::from(eth.ethertype()),
        }
    }

    fn pop_vlan(&mut self) -> Option<VlanHeader> {
        if self.l2_done || !matches!(self.ether_type, ETHER_TYPE_VLAN | ETHER_TYPE_QINQ) {
            return None;
        }
        let tag = self.frame.get(self.l3_offset..self.l3_offset + 4)?;
        let header = VlanHeader {
            tci: u16::from_be_bytes([tag[0], tag[1]]),
            inner_type: u16::from_be_bytes([tag[2], tag[3]]),
        };
        self.ether_type = header.inner_type;
        self.l3_offset += 4;
        Some(header)
    }

    fn ipv4(&mut self) -> Option<Ipv4Header> {
        if self.ether_type != u16::from(EthernetProtocol::Ipv4) {
            return None;
        }
        self.l2_done = true;
        let ip = Ipv4Packet::new_checked(self.frame.get(self.l3_offset..)?).ok()?;
        let proto = u8::from(ip.next_header());
        self.l4 = Some((proto, self.l3_offset + ip.header_len() as usize));
        Some(Ipv4Header {
            src: ip.src_addr(),
            dst: ip.dst_addr(),
            next_proto_id: proto,
        })
    }

    fn l4_ports(&mut self, proto: IpProtocol) -> Option<L4Ports> {
        if self.l4.is_none() {
            self.ipv4()?;
        }
        let (next, offset) = self.l4?;
        if next != u8::from(proto) {
            return None;
        }
        let payload = self.frame.get(offset..)?;
        let (src_port, dst_port) = match proto {
            IpProtocol::Udp => {
                let udp = UdpPacket::new_checked(payload).ok()?;
                (udp.src_port(), udp.dst_port())
            }
            _ => {
                let tcp = TcpPacket::new_checked(payload).ok()?;
                (tcp.src_port(), tcp.dst_port())
            }
        };
        Some(L4Ports { src_port, dst_port })
    }
}

/// Evaluate a pattern against one ethernet frame.
///
/// Items are matched in order from the outermost header inward; an item
/// whose protocol is absent from the frame fails the match.
pub fn pattern_matches(pattern: &[FlowItem], frame: &[u8]) -> bool {
    let Some(mut headers) = Headers::new(frame) else {
        return false;
    };
    for item in pattern {
        let matched = match item {
            FlowItem::Eth { spec, mask } => {
                !headers.l2_done
                    && item_matches(
                        headers.eth().to_bytes(),
                        spec.map(EthHeader::to_bytes),
                        mask.unwrap_or(EthHeader::DEFAULT_MASK).to_bytes(),
                    )
            }
            FlowItem::Vlan { spec, mask } => headers.pop_vlan().is_some_and(|vlan| {
                item_matches(
                    vlan.to_bytes(),
                    spec.map(VlanHeader::to_bytes),
                    mask.unwrap_or(VlanHeader::DEFAULT_MASK).to_bytes(),
                )
            }),
            FlowItem::Ipv4 { spec, mask } => headers.ipv4().is_some_and(|ip| {
                item_matches(
                    ip.to_bytes(),
                    spec.map(Ipv4Header::to_bytes),
                    mask.unwrap_or(Ipv4Header::DEFAULT_MASK).to_bytes(),
                )
            }),
            FlowItem::Udp { spec, mask } => {
                headers.l4_ports(IpProtocol::Udp).is_some_and(|ports| {
                    item_matches(
                        ports.to_bytes(),
                        spec.map(L4Ports::to_bytes),
                        mask.unwrap_or(L4Ports::DEFAULT_MASK).to_bytes(),
                    )
                })
            }
            FlowItem::Tcp { spec, mask } => {
                headers.l4_ports(IpProtocol::Tcp).is_some_and(|ports| {
                    item_matches(
                        ports.to_bytes(),
                        spec.map(L4Ports::to_bytes),
                        mask.unwrap_or(L4Ports::DEFAULT_MASK).to_bytes(),
                    )
                })
            }
            FlowItem::Void => true,
            FlowItem::End => break,
        };
        if !matched {
            return false;
        }
    }
    true
}

fn no_flow_ops(kind: FlowErrorKind, port_id: PortId) -> FlowError {
    match eth::driver(port_id) {
        Err(errno) => FlowError::new(kind, FlowErrorCause::Unspecified, errno, "no such port"),
        Ok(_) => FlowError::new(
            kind,
            FlowErrorCause::Unspecified,
            Errno::ENOTSUP,
            "flow API not supported by this driver",
        ),
    }
}

/// An installed flow rule.
///
/// Dropping the handle leaves the rule installed; use [`Flow::destroy`] or
/// [`Flow::flush`] to remove it.
#[derive(Debug, PartialEq, Eq)]
pub struct Flow {
    port_id: PortId,
    id: u64,
}

impl Flow {
    /// Check whether a rule would be accepted by the port, without
    /// installing it.
    pub fn validate(
        port_id: PortId,
        attr: &FlowAttr,
        pattern: &[FlowItem],
        actions: &[FlowAction],
    ) -> Result<(), FlowError> {
        check_rule(attr, pattern, actions)?;
        let driver =
            eth::driver(port_id).map_err(|_| no_flow_ops(FlowErrorKind::Validation, port_id))?;
        let ops = driver
            .flow_ops()
            .ok_or_else(|| no_flow_ops(FlowErrorKind::Validation, port_id))?;
        ops.validate(attr, pattern, actions)
            .map_err(|e| e.with_kind(FlowErrorKind::Validation))
    }

    /// Validate and install a rule. The rule is active when this returns.
    pub fn create(
        port_id: PortId,
        attr: &FlowAttr,
        pattern: &[FlowItem],
        actions: &[FlowAction],
    ) -> Result<Flow, FlowError> {
        Self::validate(port_id, attr, pattern, actions)?;
        let driver =
            eth::driver(port_id).map_err(|_| no_flow_ops(FlowErrorKind::Creation, port_id))?;
        let ops = driver
            .flow_ops()
            .ok_or_else(|| no_flow_ops(FlowErrorKind::Creation, port_id))?;
        let id = ops
            .create(attr, pattern, actions)
            .map_err(|e| e.with_kind(FlowErrorKind::Creation))?;
        Ok(Flow { port_id, id })
    }

    /// Remove the rule from the port.
    pub fn destroy(self) -> Result<(), FlowError> {
        let driver = eth::driver(self.port_id)
            .map_err(|_| no_flow_ops(FlowErrorKind::Destroy, self.port_id))?;
        let ops = driver
            .flow_ops()
            .ok_or_else(|| no_flow_ops(FlowErrorKind::Destroy, self.port_id))?;
        ops.destroy(self.id)
            .map_err(|e| e.with_kind(FlowErrorKind::Destroy))
    }

    /// Packets matched so far. The rule must carry a `Count` action.
    pub fn query_hits(&self) -> Result<u64, FlowError> {
        let driver = eth::driver(self.port_id)
            .map_err(|_| no_flow_ops(FlowErrorKind::Query, self.port_id))?;
        let ops = driver
            .flow_ops()
            .ok_or_else(|| no_flow_ops(FlowErrorKind::Query, self.port_id))?;
        ops.query_hits(self.id)
            .map_err(|e| e.with_kind(FlowErrorKind::Query))
    }

    /// Remove every rule installed on a port.
    pub fn flush(port_id: PortId) -> Result<(), FlowError> {
        let driver =
            eth::driver(port_id).map_err(|_| no_flow_ops(FlowErrorKind::Destroy, port_id))?;
        let ops = driver
            .flow_ops()
            .ok_or_else(|| no_flow_ops(FlowErrorKind::Destroy, port_id))?;
        ops.flush().map_err(|e| e.with_kind(FlowErrorKind::Destroy))
    }

    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Driver assigned rule id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use smoltcp::wire::{EthernetAddress, EthernetRepr, IpAddress, Ipv4Address, Ipv4Repr, UdpRepr};

    use super::*;

    const DST: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];
    const SRC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x02];

    fn udp_frame(dst: [u8; 6], dst_port: u16) -> Vec<u8> {
        let payload = b"ping";
        let udp = UdpRepr {
            src_port: 4000,
            dst_port,
        };
        let ip = Ipv4Repr {
            src_addr: Ipv4Address::new(10, 0, 0, 1),
            dst_addr: Ipv4Address::new(10, 0, 0, 2),
            next_header: IpProtocol::Udp,
            payload_len: udp.header_len() + payload.len(),
            hop_limit: 64,
        };
        let eth = EthernetRepr {
            src_addr: EthernetAddress(SRC),
            dst_addr: EthernetAddress(dst),
            ethertype: EthernetProtocol::Ipv4,
        };
        let len = eth.buffer_len() + ip.buffer_len() + udp.header_len() + payload.len();
        let mut buf = vec![0u8; len];
        let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
        eth.emit(&mut frame);
        let mut packet = Ipv4Packet::new_unchecked(frame.payload_mut());
        ip.emit(&mut packet, &smoltcp::phy::ChecksumCapabilities::default());
        let mut datagram = UdpPacket::new_unchecked(packet.payload_mut());
        udp.emit(
            &mut datagram,
            &IpAddress::Ipv4(ip.src_addr),
            &IpAddress::Ipv4(ip.dst_addr),
            payload.len(),
            |buf| buf.copy_from_slice(payload),
            &smoltcp::phy::ChecksumCapabilities::default(),
        );
        buf
    }

    fn eth_dst(dst: [u8; 6], mask: [u8; 6]) -> FlowItem {
        FlowItem::Eth {
            spec: Some(EthHeader {
                dst: EtherAddr::new(dst),
                ..Default::default()
            }),
            mask: Some(EthHeader {
                dst: EtherAddr::new(mask),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_exact_mac_mask_matches_only_identical() {
        let pattern = [eth_dst(DST, [0xff; 6]), FlowItem::End];
        assert!(pattern_matches(&pattern, &udp_frame(DST, 53)));

        let mut other = DST;
        other[5] ^= 0x01;
        assert!(!pattern_matches(&pattern, &udp_frame(other, 53)));
    }

    #[test]
    fn test_zero_mask_matches_anything() {
        let pattern = [eth_dst(DST, [0; 6]), FlowItem::End];
        assert!(pattern_matches(&pattern, &udp_frame(DST, 53)));
        assert!(pattern_matches(&pattern, &udp_frame([0xaa; 6], 53)));
    }

    #[test]
    fn test_partial_mask_is_bitwise() {
        // only the OUI must match
        let pattern = [eth_dst(DST, [0xff, 0xff, 0xff, 0, 0, 0]), FlowItem::End];
        assert!(pattern_matches(&pattern, &udp_frame([0x02, 0, 0, 9, 9, 9], 53)));
        assert!(!pattern_matches(&pattern, &udp_frame([0x06, 0, 0, 0, 0, 1], 53)));
    }

    #[test]
    fn test_layer_without_spec_requires_protocol() {
        let udp_any = [
            FlowItem::Eth { spec: None, mask: None },
            FlowItem::Ipv4 { spec: None, mask: None },
            FlowItem::Udp { spec: None, mask: None },
            FlowItem::End,
        ];
        assert!(pattern_matches(&udp_any, &udp_frame(DST, 53)));

        let tcp_any = [
            FlowItem::Ipv4 { spec: None, mask: None },
            FlowItem::Tcp { spec: None, mask: None },
            FlowItem::End,
        ];
        assert!(!pattern_matches(&tcp_any, &udp_frame(DST, 53)));
    }

    #[test]
    fn test_udp_port_spec_uses_default_mask() {
        let pattern = [
            FlowItem::Void,
            FlowItem::Udp {
                spec: Some(L4Ports {
                    src_port: 4000,
                    dst_port: 53,
                }),
                mask: None,
            },
            FlowItem::End,
        ];
        assert!(pattern_matches(&pattern, &udp_frame(DST, 53)));
        assert!(!pattern_matches(&pattern, &udp_frame(DST, 54)));
    }

    #[test]
    fn test_runt_frame_never_matches() {
        let pattern = [FlowItem::Void, FlowItem::End];
        assert!(!pattern_matches(&pattern, &[0u8; 10]));
    }

    #[test]
    fn test_check_rule_terminators() {
        let attr = FlowAttr::ingress();
        let ok_pattern = [eth_dst(DST, [0xff; 6]), FlowItem::End];
        let ok_actions = [FlowAction::Drop, FlowAction::End];
        assert!(check_rule(&attr, &ok_pattern, &ok_actions).is_ok());

        let err = check_rule(&attr, &[eth_dst(DST, [0xff; 6])], &ok_actions).unwrap_err();
        assert_eq!(err.kind, FlowErrorKind::Validation);
        assert_eq!(err.cause, FlowErrorCause::Item(1));
        assert_eq!(err.errno, Errno::EINVAL);

        let err = check_rule(&attr, &[FlowItem::End, FlowItem::Void], &ok_actions).unwrap_err();
        assert_eq!(err.cause, FlowErrorCause::Item(1));

        let err = check_rule(&attr, &ok_pattern, &[FlowAction::Drop]).unwrap_err();
        assert_eq!(err.cause, FlowErrorCause::Action(1));

        let err = check_rule(&attr, &ok_pattern, &[FlowAction::End]).unwrap_err();
        assert_eq!(err.cause, FlowErrorCause::Action(0));
    }

    #[test]
    fn test_check_rule_structure() {
        let actions = [FlowAction::Drop, FlowAction::End];

        let err = check_rule(&FlowAttr::default(), &[FlowItem::End], &actions).unwrap_err();
        assert_eq!(err.cause, FlowErrorCause::Attr);

        let mask_only = [
            FlowItem::Eth {
                spec: None,
                mask: Some(EthHeader::DEFAULT_MASK),
            },
            FlowItem::End,
        ];
        let err = check_rule(&FlowAttr::ingress(), &mask_only, &actions).unwrap_err();
        assert_eq!(err.cause, FlowErrorCause::Item(0));

        let reversed = [
            FlowItem::Ipv4 { spec: None, mask: None },
            FlowItem::Eth { spec: None, mask: None },
            FlowItem::End,
        ];
        let err = check_rule(&FlowAttr::ingress(), &reversed, &actions).unwrap_err();
        assert_eq!(err.cause, FlowErrorCause::Item(1));

        let two_fates = [
            FlowAction::Count,
            FlowAction::Drop,
            FlowAction::Queue(0),
            FlowAction::End,
        ];
        let err = check_rule(&FlowAttr::ingress(), &[FlowItem::End], &two_fates).unwrap_err();
        assert_eq!(err.cause, FlowErrorCause::Action(2));
    }

    #[test]
    fn test_flow_error_display() {
        let err = FlowError {
            kind: FlowErrorKind::Creation,
            cause: FlowErrorCause::Item(0),
            errno: Errno::ENOTSUP,
            message: None,
        };
        assert!(err.to_string().contains("(no stated reason)"));
        assert_eq!(err.code(), -(Errno::ENOTSUP as i32));
    }
}
