//! Frame builders.

use std::net::Ipv4Addr;

use dpdk_wire::api::rte::eth::EtherAddr;
use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, IpAddress, IpProtocol,
    Ipv4Packet, Ipv4Repr, TcpPacket, TcpSeqNumber, UdpPacket, UdpRepr,
};

/// Addresses of a test flow. `udp`/`tcp` emit a complete, checksummed frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    pub src_mac: EtherAddr,
    pub dst_mac: EtherAddr,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self {
            src_mac: EtherAddr::new([0x02, 0, 0, 0, 0xee, 0x01]),
            dst_mac: EtherAddr::BROADCAST,
            src_ip: Ipv4Addr::new(192, 168, 1, 1),
            dst_ip: Ipv4Addr::new(192, 168, 1, 100),
            src_port: 40000,
            dst_port: 9000,
        }
    }
}

impl FrameSpec {
    pub fn to(dst_mac: EtherAddr) -> Self {
        Self {
            dst_mac,
            ..Default::default()
        }
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn src_ip(mut self, ip: Ipv4Addr) -> Self {
        self.src_ip = ip;
        self
    }

    fn eth(&self) -> EthernetRepr {
        EthernetRepr {
            src_addr: EthernetAddress(self.src_mac.addr_bytes),
            dst_addr: EthernetAddress(self.dst_mac.addr_bytes),
            ethertype: EthernetProtocol::Ipv4,
        }
    }

    fn ipv4(&self, protocol: IpProtocol, payload_len: usize) -> Ipv4Repr {
        Ipv4Repr {
            src_addr: self.src_ip,
            dst_addr: self.dst_ip,
            next_header: protocol,
            payload_len,
            hop_limit: 64,
        }
    }

    /// Ethernet + IPv4 + UDP frame carrying `payload`.
    pub fn udp(&self, payload: &[u8]) -> Vec<u8> {
        let udp = UdpRepr {
            src_port: self.src_port,
            dst_port: self.dst_port,
        };
        let eth = self.eth();
        let ip = self.ipv4(IpProtocol::Udp, udp.header_len() + payload.len());
        let caps = ChecksumCapabilities::default();

        let mut buf = vec![0u8; eth.buffer_len() + ip.buffer_len() + ip.payload_len];
        let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
        eth.emit(&mut frame);
        let mut packet = Ipv4Packet::new_unchecked(frame.payload_mut());
        ip.emit(&mut packet, &caps);
        let mut datagram = UdpPacket::new_unchecked(packet.payload_mut());
        udp.emit(
            &mut datagram,
            &IpAddress::Ipv4(self.src_ip),
            &IpAddress::Ipv4(self.dst_ip),
            payload.len(),
            |buf| buf.copy_from_slice(payload),
            &caps,
        );
        buf
    }

    /// Ethernet + IPv4 + TCP SYN frame without options.
    pub fn tcp_syn(&self) -> Vec<u8> {
        const TCP_HEADER_LEN: u8 = 20;
        let eth = self.eth();
        let ip = self.ipv4(IpProtocol::Tcp, TCP_HEADER_LEN as usize);
        let caps = ChecksumCapabilities::default();

        let mut buf = vec![0u8; eth.buffer_len() + ip.buffer_len() + ip.payload_len];
        let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
        eth.emit(&mut frame);
        let mut packet = Ipv4Packet::new_unchecked(frame.payload_mut());
        ip.emit(&mut packet, &caps);
        let mut segment = TcpPacket::new_unchecked(packet.payload_mut());
        segment.set_src_port(self.src_port);
        segment.set_dst_port(self.dst_port);
        segment.set_seq_number(TcpSeqNumber(1));
        segment.set_header_len(TCP_HEADER_LEN);
        segment.set_syn(true);
        segment.set_window_len(64240);
        segment.fill_checksum(&IpAddress::Ipv4(self.src_ip), &IpAddress::Ipv4(self.dst_ip));
        buf
    }
}

/// Minimal 60 byte frame with only the Ethernet header filled in.
pub fn raw_eth(dst: EtherAddr, src: EtherAddr, ether_type: u16) -> Vec<u8> {
    let mut buf = vec![0u8; 60];
    buf[..6].copy_from_slice(&dst.addr_bytes);
    buf[6..12].copy_from_slice(&src.addr_bytes);
    buf[12..14].copy_from_slice(&ether_type.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_frame_parses_back() {
        let spec = FrameSpec::to(EtherAddr::new([0x02, 0, 0, 0, 0, 9])).dst_port(53);
        let buf = spec.udp(b"hello");
        let frame = EthernetFrame::new_checked(&buf[..]).unwrap();
        assert_eq!(frame.dst_addr().0, [0x02, 0, 0, 0, 0, 9]);
        let packet = Ipv4Packet::new_checked(frame.payload()).unwrap();
        assert!(packet.verify_checksum());
        let datagram = UdpPacket::new_checked(packet.payload()).unwrap();
        assert_eq!(datagram.dst_port(), 53);
        assert_eq!(datagram.payload(), b"hello");
    }

    #[test]
    fn test_tcp_syn_parses_back() {
        let buf = FrameSpec::default().dst_port(80).tcp_syn();
        let frame = EthernetFrame::new_checked(&buf[..]).unwrap();
        let packet = Ipv4Packet::new_checked(frame.payload()).unwrap();
        assert_eq!(packet.next_header(), IpProtocol::Tcp);
        let segment = TcpPacket::new_checked(packet.payload()).unwrap();
        assert!(segment.syn());
        assert_eq!(segment.dst_port(), 80);
    }
}
