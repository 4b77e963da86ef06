//! DHCP client driven by the runner against a scripted server.

mod common;

use std::net::Ipv4Addr;

use common::*;
use embernet::buffer::MemPool;
use embernet::dhcp::message::{
    DhcpMessage, MessageBuilder, MessageType, BOOTREPLY, OPT_LEASE_TIME, OPT_REQUESTED_IP,
    OPT_ROUTER, OPT_SERVER_ID, OPT_SUBNET_MASK,
};
use embernet::dhcp::{DhcpClientSettings, DhcpEvent, DhcpState};
use embernet::driver::{Duplex, LinkSpeed, LinkState};
use embernet::ipv4::{DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use embernet::stack::Runner;
use embernet::types::{EthernetHeader, EthernetProtocol, ETH_HLEN};
use embernet::Tick;
use smoltcp::wire::{IpAddress, IpProtocol, Ipv4Packet, UdpPacket};

const SERVER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const OFFERED: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);

/// A DHCP message sent by the client.
struct Sent {
    dest_mac: embernet::types::MacAddress,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    payload: Vec<u8>,
}

impl Sent {
    fn message(&self) -> DhcpMessage<'_> {
        DhcpMessage::parse(&self.payload).unwrap()
    }

    fn message_type(&self) -> MessageType {
        self.message().message_type().unwrap()
    }
}

/// DHCP messages transmitted since the last call; IPv6 traffic is skipped.
fn dhcp_sent(iface: &TestInterface<'_>) -> Vec<Sent> {
    sent_frames(iface)
        .into_iter()
        .filter(|f| EthernetHeader::parse(f).unwrap().ethertype == EthernetProtocol::Ipv4)
        .map(|f| {
            let dest_mac = EthernetHeader::parse(&f).unwrap().dest;
            let (src, dst, payload) = parse_udp4(&f);
            Sent {
                dest_mac,
                src,
                dst,
                payload,
            }
        })
        .collect()
}

/// Server answer to `xid` carrying `options`.
fn server_reply(iface: &TestInterface<'_>, xid: u32, msg_type: MessageType, lease_secs: Option<u32>) {
    let mut msg = MessageBuilder::new(msg_type, xid, 0, OUR_MAC, Ipv4Addr::UNSPECIFIED, false);
    msg.option_addr(OPT_SERVER_ID, SERVER).unwrap();
    if msg_type != MessageType::Nak {
        msg.option_addr(OPT_SUBNET_MASK, Ipv4Addr::new(255, 255, 255, 0)).unwrap();
        msg.option_addr(OPT_ROUTER, SERVER).unwrap();
    }
    if let Some(secs) = lease_secs {
        msg.option(OPT_LEASE_TIME, &secs.to_be_bytes()).unwrap();
    }
    let mut data = msg.finish();
    data[0] = BOOTREPLY;
    if msg_type != MessageType::Nak {
        data[16..20].copy_from_slice(&OFFERED.octets());
    }
    inject(
        iface,
        &udp4_frame(SERVER, Ipv4Addr::BROADCAST, DHCP_SERVER_PORT, DHCP_CLIENT_PORT, &data),
    );
}

#[test]
fn test_offer_ack_binds() {
    let pool = MemPool::new(16);
    let iface = interface(&pool, 1500);
    let mut runner = Runner::new(&iface);
    runner.enable_dhcp(DhcpClientSettings::default(), Tick(0));

    // random start delay
    assert_eq!(runner.poll(Tick(500)), None);
    assert!(dhcp_sent(&iface).is_empty());

    runner.poll(Tick(1000));
    let sent = dhcp_sent(&iface);
    assert_eq!(sent.len(), 1);
    let discover = &sent[0];
    assert_eq!(discover.message_type(), MessageType::Discover);
    assert_eq!((discover.src, discover.dst), (Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST));
    assert_eq!(discover.dest_mac, embernet::types::BROADCAST_MAC);
    assert_eq!(discover.message().chaddr, OUR_MAC);
    let xid = discover.message().xid;

    server_reply(&iface, xid, MessageType::Offer, Some(3600));
    assert_eq!(runner.poll(Tick(1100)), None);
    let sent = dhcp_sent(&iface);
    assert_eq!(sent.len(), 1);
    let request = sent[0].message();
    assert_eq!(request.message_type(), Some(MessageType::Request));
    assert_eq!(request.option_addr(OPT_REQUESTED_IP), Some(OFFERED));
    assert_eq!(request.option_addr(OPT_SERVER_ID), Some(SERVER));
    assert_eq!(runner.dhcp().unwrap().state(), DhcpState::Requesting);

    server_reply(&iface, xid, MessageType::Ack, Some(3600));
    let lease = match runner.poll(Tick(1200)) {
        Some(DhcpEvent::Configured(lease)) => lease,
        other => panic!("expected a lease, got {:?}", other),
    };
    assert_eq!(runner.dhcp().unwrap().state(), DhcpState::Bound);
    assert_eq!(lease.addr, OFFERED);
    assert_eq!(lease.router, Some(SERVER));
    assert!(lease.t1 < lease.t2 && lease.t2 < lease.lease_time);

    let config = iface.ipv4_config();
    assert_eq!(config.addr, OFFERED);
    assert_eq!(config.subnet_mask, Ipv4Addr::new(255, 255, 255, 0));
    assert_eq!(config.gateway, Some(SERVER));
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn test_discover_headers_verify() {
    let pool = MemPool::new(16);
    let iface = interface(&pool, 1500);
    let mut runner = Runner::new(&iface);
    runner.enable_dhcp(DhcpClientSettings::default(), Tick(0));
    runner.poll(Tick(1000));

    let frames: Vec<Vec<u8>> = sent_frames(&iface)
        .into_iter()
        .filter(|f| EthernetHeader::parse(f).unwrap().ethertype == EthernetProtocol::Ipv4)
        .collect();
    assert_eq!(frames.len(), 1);

    let ip = Ipv4Packet::new_checked(&frames[0][ETH_HLEN..]).unwrap();
    assert!(ip.verify_checksum());
    assert!(ip.dont_frag());
    assert!(!ip.more_frags());
    assert_eq!(ip.hop_limit(), 64);
    assert_eq!(ip.next_header(), IpProtocol::Udp);

    let udp = UdpPacket::new_checked(ip.payload()).unwrap();
    assert_eq!((udp.src_port(), udp.dst_port()), (DHCP_CLIENT_PORT, DHCP_SERVER_PORT));
    assert_ne!(udp.checksum(), 0);
    let src = IpAddress::Ipv4(ip.src_addr());
    let dst = IpAddress::Ipv4(ip.dst_addr());
    assert!(udp.verify_checksum(&src, &dst));
}

#[test]
fn test_nak_returns_to_init() {
    let pool = MemPool::new(16);
    let iface = interface(&pool, 1500);
    let mut runner = Runner::new(&iface);
    runner.enable_dhcp(DhcpClientSettings::default(), Tick(0));

    runner.poll(Tick(1000));
    let xid = dhcp_sent(&iface)[0].message().xid;
    server_reply(&iface, xid, MessageType::Offer, Some(3600));
    runner.poll(Tick(1100));
    dhcp_sent(&iface);

    server_reply(&iface, xid, MessageType::Nak, None);
    assert_eq!(runner.poll(Tick(1200)), None);
    assert_eq!(runner.dhcp().unwrap().state(), DhcpState::Init);
    assert!(!iface.ipv4_config().is_configured());

    // acquisition starts over with a fresh Discover
    runner.poll(Tick(2200));
    let sent = dhcp_sent(&iface);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message_type(), MessageType::Discover);
}

#[test]
fn test_server_answers_third_discover() {
    let pool = MemPool::new(16);
    let iface = interface(&pool, 1500);
    let mut runner = Runner::new(&iface);
    runner.enable_dhcp(DhcpClientSettings::default(), Tick(0));

    // 4 s, then 8 s between retransmissions
    let mut discovers = Vec::new();
    for t in (1000..=13_000).step_by(500) {
        runner.poll(Tick(t));
        for sent in dhcp_sent(&iface) {
            assert_eq!(sent.message_type(), MessageType::Discover);
            discovers.push((t, sent.message().xid));
        }
    }
    let times: Vec<u32> = discovers.iter().map(|(t, _)| *t).collect();
    assert_eq!(times, vec![1000, 5000, 13_000]);
    assert_eq!(runner.dhcp().unwrap().state(), DhcpState::Selecting);

    let xid = discovers[2].1;
    server_reply(&iface, xid, MessageType::Offer, Some(3600));
    runner.poll(Tick(13_100));
    server_reply(&iface, xid, MessageType::Ack, Some(3600));
    assert!(matches!(runner.poll(Tick(13_200)), Some(DhcpEvent::Configured(_))));
    assert_eq!(runner.dhcp().unwrap().state(), DhcpState::Bound);
}

#[test]
fn test_renewal_is_unicast_to_server() {
    let pool = MemPool::new(16);
    let iface = interface(&pool, 1500);
    let mut runner = Runner::new(&iface);
    runner.enable_dhcp(DhcpClientSettings::default(), Tick(0));

    runner.poll(Tick(1000));
    let xid = dhcp_sent(&iface)[0].message().xid;
    server_reply(&iface, xid, MessageType::Offer, Some(60));
    runner.poll(Tick(1100));
    server_reply(&iface, xid, MessageType::Ack, Some(60));
    runner.poll(Tick(1200));
    dhcp_sent(&iface);

    // T1 = 30 s after the Request went out
    runner.poll(Tick(1100 + 29_900));
    assert!(dhcp_sent(&iface).is_empty());
    runner.poll(Tick(1100 + 30_000));
    assert_eq!(runner.dhcp().unwrap().state(), DhcpState::Renewing);
    let sent = dhcp_sent(&iface);
    assert_eq!(sent.len(), 1);
    assert_eq!((sent[0].src, sent[0].dst), (OFFERED, SERVER));
    assert_eq!(sent[0].dest_mac, PEER_MAC);
    assert_eq!(sent[0].message().ciaddr, OFFERED);

    let xid = sent[0].message().xid;
    server_reply(&iface, xid, MessageType::Ack, Some(60));
    assert!(matches!(runner.poll(Tick(31_200)), Some(DhcpEvent::Configured(_))));
    assert_eq!(runner.dhcp().unwrap().state(), DhcpState::Bound);
}

#[test]
fn test_link_bounce_reboots() {
    let pool = MemPool::new(16);
    let iface = interface(&pool, 1500);
    let mut runner = Runner::new(&iface);
    runner.enable_dhcp(DhcpClientSettings::default(), Tick(0));

    runner.poll(Tick(1000));
    let xid = dhcp_sent(&iface)[0].message().xid;
    server_reply(&iface, xid, MessageType::Offer, Some(3600));
    runner.poll(Tick(1100));
    server_reply(&iface, xid, MessageType::Ack, Some(3600));
    runner.poll(Tick(1200));
    dhcp_sent(&iface);

    iface.with_driver(|d| d.set_link(LinkState::DOWN));
    runner.poll(Tick(2000));
    iface.with_driver(|d| d.set_link(LinkState::up(LinkSpeed::Mbps100, Duplex::Full)));
    runner.poll(Tick(3000));
    assert_eq!(runner.dhcp().unwrap().state(), DhcpState::InitReboot);

    runner.poll(Tick(4000));
    assert_eq!(runner.dhcp().unwrap().state(), DhcpState::Rebooting);
    let sent = dhcp_sent(&iface);
    assert_eq!(sent.len(), 1);
    let request = sent[0].message();
    assert_eq!(request.message_type(), Some(MessageType::Request));
    assert_eq!(request.option_addr(OPT_REQUESTED_IP), Some(OFFERED));
    assert_eq!(request.option(OPT_SERVER_ID), None);
    assert_eq!(sent[0].dst, Ipv4Addr::BROADCAST);
}

#[test]
fn test_disable_removes_address() {
    let pool = MemPool::new(16);
    let iface = interface(&pool, 1500);
    let mut runner = Runner::new(&iface);
    runner.enable_dhcp(DhcpClientSettings::default(), Tick(0));

    runner.poll(Tick(1000));
    let xid = dhcp_sent(&iface)[0].message().xid;
    server_reply(&iface, xid, MessageType::Offer, Some(3600));
    runner.poll(Tick(1100));
    server_reply(&iface, xid, MessageType::Ack, Some(3600));
    runner.poll(Tick(1200));
    assert!(iface.ipv4_config().is_configured());

    assert_eq!(runner.disable_dhcp(), Some(DhcpEvent::Deconfigured));
    assert!(!iface.ipv4_config().is_configured());
    assert!(runner.dhcp().is_none());
}
