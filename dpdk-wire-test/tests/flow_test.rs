//! Flow rule tests against ring ports brought up by the EAL.
//!
//! Each test owns one port, so no test has to reconfigure a port another
//! test already started.

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use dpdk_wire::api::Errno;
use dpdk_wire::api::rte::eal::Eal;
use dpdk_wire::api::rte::eth::EtherAddr;
use dpdk_wire::api::rte::flow::{
    EthHeader, Flow, FlowAction, FlowAttr, FlowErrorCause, FlowErrorKind, FlowItem, Ipv4Header,
    L4Ports, VlanHeader,
};
use dpdk_wire::api::rte::pktmbuf::{MemPool, MemPoolConfig};
use dpdk_wire::pmd::{Ingress, RingPort};
use dpdk_wire_test::frames::FrameSpec;
use dpdk_wire_test::traffic::inject_n;
use dpdk_wire_test::util::{
    TEST_MBUF_CACHE_SIZE, TEST_MBUF_COUNT, TEST_RING_DEPTH, init_tracing, ring_eal,
};
use dpdk_wire_util::{ConfiguredPort, PortManager, PortSettings};

static GLOBAL_EAL: OnceLock<Eal> = OnceLock::new();

fn init_eal() -> &'static Eal {
    GLOBAL_EAL.get_or_init(|| {
        init_tracing();
        ring_eal("0-1", 4).init().expect("Failed to initialize EAL")
    })
}

fn test_pool(name: &str) -> MemPool {
    let config = MemPoolConfig::new()
        .num_mbufs(TEST_MBUF_COUNT)
        .cache_size(TEST_MBUF_CACHE_SIZE);
    MemPool::create(name, &config).expect("Failed to create mempool")
}

/// Configure the `index`-th vdev port and return it with its wire side.
fn bring_up(index: usize, rx_queues: u16, pool: &MemPool) -> (ConfiguredPort, RingPort) {
    let eal = init_eal();
    let port_id = eal.ports()[index];
    let settings = PortSettings::new()
        .queues(rx_queues, 1)
        .ring_depths(TEST_RING_DEPTH, TEST_RING_DEPTH);
    let port = PortManager::configure_with(port_id, &settings, pool).expect("configure failed");
    let wire = RingPort::from_port(port_id).expect("not a ring port");
    (port, wire)
}

fn mac(last: u8) -> EtherAddr {
    EtherAddr::new([0x02, 0, 0, 0, 0x77, last])
}

fn dst_mac_rule(dst: EtherAddr, mask: EthHeader) -> [FlowItem; 2] {
    [
        FlowItem::Eth {
            spec: Some(EthHeader {
                dst,
                ..Default::default()
            }),
            mask: Some(mask),
        },
        FlowItem::End,
    ]
}

#[test]
#[serial_test::serial]
fn test_eth_mask_selects_compared_bits() {
    let pool = test_pool("flow_mask_pool");
    let (port, wire) = bring_up(0, 1, &pool);
    let attr = FlowAttr::ingress();
    let actions = [FlowAction::Count, FlowAction::Drop, FlowAction::End];

    // an all-zero mask turns the spec into a wildcard
    let wildcard = dst_mac_rule(mac(1), EthHeader::default());
    let flow = Flow::create(port.port_id(), &attr, &wildcard, &actions).unwrap();
    for last in 1..=10 {
        let frame = FrameSpec::to(mac(last)).udp(b"any");
        assert_eq!(wire.inject(&frame), Ingress::Filtered);
    }
    assert_eq!(flow.query_hits().unwrap(), 10);
    flow.destroy().unwrap();

    let exact = dst_mac_rule(
        mac(1),
        EthHeader {
            dst: EtherAddr::BROADCAST,
            ..Default::default()
        },
    );
    let flow = Flow::create(port.port_id(), &attr, &exact, &actions).unwrap();
    assert_eq!(wire.inject(&FrameSpec::to(mac(1)).udp(b"x")), Ingress::Filtered);
    assert_eq!(wire.inject(&FrameSpec::to(mac(2)).udp(b"x")), Ingress::Queued(0));
    assert_eq!(flow.query_hits().unwrap(), 1);

    let stats = port.stats().unwrap();
    assert_eq!(stats.ipackets, 0);
    assert_eq!(wire.rx_pending(0), 1);

    port.stop().unwrap();
    assert_eq!(wire.flow_rule_count(), 0);
}

#[test]
#[serial_test::serial]
fn test_udp_port_steers_to_queue() {
    let pool = test_pool("flow_steer_pool");
    let (port, wire) = bring_up(1, 2, &pool);

    let pattern = [
        FlowItem::Eth {
            spec: None,
            mask: None,
        },
        FlowItem::Ipv4 {
            spec: None,
            mask: None,
        },
        FlowItem::Udp {
            spec: Some(L4Ports {
                src_port: 0,
                dst_port: 53,
            }),
            mask: Some(L4Ports {
                src_port: 0,
                dst_port: 0xffff,
            }),
        },
        FlowItem::End,
    ];
    let actions = [FlowAction::Queue(1), FlowAction::End];
    Flow::create(port.port_id(), &FlowAttr::ingress(), &pattern, &actions).unwrap();

    let dns = FrameSpec::default().dst_port(53).udp(b"query");
    assert_eq!(wire.inject(&dns), Ingress::Queued(1));
    assert_eq!(
        wire.inject(&FrameSpec::default().udp(b"query")),
        Ingress::Queued(0)
    );
    // same port number, wrong protocol
    assert_eq!(
        wire.inject(&FrameSpec::default().dst_port(53).tcp_syn()),
        Ingress::Queued(0)
    );

    let rxq = port.rx_queue(1).unwrap();
    let mbufs = rxq.rx_burst::<32>();
    assert_eq!(mbufs.len(), 1);
    assert_eq!(mbufs[0].data(), dns.as_slice());
    assert_eq!(mbufs[0].port(), port.port_id());
    assert_eq!(wire.rx_pending(0), 2);

    port.stop().unwrap();
}

#[test]
#[serial_test::serial]
fn test_priority_orders_overlapping_rules() {
    let pool = test_pool("flow_prio_pool");
    let (port, wire) = bring_up(2, 1, &pool);

    let src_prefix = |addr: Ipv4Addr, mask: Ipv4Addr| {
        [
            FlowItem::Eth {
                spec: None,
                mask: None,
            },
            FlowItem::Ipv4 {
                spec: Some(Ipv4Header {
                    src: addr,
                    ..Default::default()
                }),
                mask: Some(Ipv4Header {
                    src: mask,
                    ..Default::default()
                }),
            },
            FlowItem::End,
        ]
    };

    let drop_ten = Flow::create(
        port.port_id(),
        &FlowAttr::ingress().priority(1),
        &src_prefix(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(255, 0, 0, 0)),
        &[FlowAction::Count, FlowAction::Drop, FlowAction::End],
    )
    .unwrap();
    // installed later but evaluated first
    let allow = Flow::create(
        port.port_id(),
        &FlowAttr::ingress().priority(0),
        &src_prefix(Ipv4Addr::new(10, 1, 0, 0), Ipv4Addr::new(255, 255, 0, 0)),
        &[FlowAction::Count, FlowAction::Queue(0), FlowAction::End],
    )
    .unwrap();
    assert_eq!(wire.flow_rule_count(), 2);

    let frame = |src| FrameSpec::default().src_ip(src).udp(b"p");
    let allowed = inject_n(&wire, &frame(Ipv4Addr::new(10, 1, 2, 3)), 3);
    let dropped = inject_n(&wire, &frame(Ipv4Addr::new(10, 2, 0, 1)), 5);
    let other = inject_n(&wire, &frame(Ipv4Addr::new(192, 168, 1, 1)), 2);
    assert_eq!(allowed.queued, 3);
    assert_eq!(dropped.filtered, 5);
    assert_eq!(other.queued, 2);

    assert_eq!(allow.query_hits().unwrap(), 3);
    assert_eq!(drop_ten.query_hits().unwrap(), 5);

    port.stop().unwrap();
    assert_eq!(wire.flow_rule_count(), 0);
    assert_eq!(allow.query_hits().unwrap_err().kind, FlowErrorKind::Query);
    // a stopped port takes nothing from the wire
    assert_eq!(wire.inject(&frame(Ipv4Addr::new(10, 1, 2, 3))), Ingress::Dropped);
}

#[test]
#[serial_test::serial]
fn test_rejected_rules_report_cause() {
    let pool = test_pool("flow_reject_pool");
    let (port, wire) = bring_up(3, 1, &pool);
    let port_id = port.port_id();
    let eth_any = FlowItem::Eth {
        spec: None,
        mask: None,
    };

    let err = Flow::create(
        port_id,
        &FlowAttr::ingress(),
        &[eth_any.clone(), FlowItem::End],
        &[FlowAction::Queue(4), FlowAction::End],
    )
    .unwrap_err();
    assert_eq!(err.kind, FlowErrorKind::Validation);
    assert_eq!(err.cause, FlowErrorCause::Action(0));
    assert_eq!(err.errno, Errno::EINVAL);

    let err = Flow::validate(
        port_id,
        &FlowAttr::ingress(),
        &[
            eth_any.clone(),
            FlowItem::Vlan {
                spec: Some(VlanHeader {
                    tci: 100,
                    inner_type: 0,
                }),
                mask: None,
            },
            FlowItem::End,
        ],
        &[FlowAction::Drop, FlowAction::End],
    )
    .unwrap_err();
    assert_eq!(err.cause, FlowErrorCause::Item(1));
    assert_eq!(err.errno, Errno::ENOTSUP);

    let err = Flow::validate(
        port_id,
        &FlowAttr::egress(),
        &[eth_any.clone(), FlowItem::End],
        &[FlowAction::Drop, FlowAction::End],
    )
    .unwrap_err();
    assert_eq!(err.cause, FlowErrorCause::Attr);
    assert_eq!(err.errno, Errno::ENOTSUP);

    let err = Flow::validate(
        port_id,
        &FlowAttr::ingress(),
        &[eth_any.clone(), FlowItem::End],
        &[FlowAction::Drop, FlowAction::Queue(0), FlowAction::End],
    )
    .unwrap_err();
    assert_eq!(err.cause, FlowErrorCause::Action(1));
    assert_eq!(err.code(), -(Errno::EINVAL as i32));

    let err = Flow::validate(
        31,
        &FlowAttr::ingress(),
        &[eth_any, FlowItem::End],
        &[FlowAction::Drop, FlowAction::End],
    )
    .unwrap_err();
    assert_eq!(err.errno, Errno::ENODEV);

    assert_eq!(wire.flow_rule_count(), 0);
    port.stop().unwrap();
}
