//! Shared harness: a loopback interface plus frame builders for the peer
//! side of each exchange.

#![allow(dead_code)]

use std::net::{Ipv4Addr, Ipv6Addr};

use embernet::buffer::MemPool;
use embernet::driver::LoopbackDriver;
use embernet::ipv6::checksum::{ipv6_pseudo_header, Checksum};
use embernet::ipv6::header::{FragmentHeader, Ipv6Header, IPV6_FRAG_HEADER_LEN, IPV6_HEADER_LEN};
use embernet::stack::{InterfaceConfig, NetInterface};
use embernet::types::{EthernetHeader, EthernetProtocol, MacAddress, ETH_HLEN};
use embernet::Tick;
use rand::rngs::mock::StepRng;
use smoltcp::wire::EthernetAddress;

pub const OUR_MAC: MacAddress = EthernetAddress([0x02, 0, 0, 0, 0, 0x01]);
pub const PEER_MAC: MacAddress = EthernetAddress([0x02, 0, 0, 0, 0, 0x02]);

pub const ICMPV6: u8 = 58;
pub const UDP: u8 = 17;
pub const HOP_BY_HOP: u8 = 0;
pub const FRAGMENT: u8 = 44;

pub type TestInterface<'a> = NetInterface<'a, LoopbackDriver, StepRng>;

pub fn our_addr() -> Ipv6Addr {
    "fe80::1".parse().unwrap()
}

pub fn peer_addr() -> Ipv6Addr {
    "fe80::2".parse().unwrap()
}

/// Initialized interface with a link-local address and an empty TX queue.
pub fn interface(pool: &MemPool, mtu: usize) -> TestInterface<'_> {
    let config = InterfaceConfig { name: "test0", mtu };
    let iface = NetInterface::new(config, pool, LoopbackDriver::new(OUR_MAC), StepRng::new(1000, 0));
    iface.init().unwrap();
    iface.poll(Tick(0));
    iface.set_link_local_addr(our_addr()).unwrap();
    sent_frames(&iface);
    iface
}

pub fn inject(iface: &TestInterface<'_>, frame: &[u8]) {
    iface.with_driver(|d| d.inject(frame)).unwrap();
}

/// Drain the frames transmitted so far.
pub fn sent_frames(iface: &TestInterface<'_>) -> Vec<Vec<u8>> {
    iface.with_driver(|d| {
        let mut frames = Vec::new();
        while let Some(f) = d.take_sent() {
            frames.push(f.to_vec());
        }
        frames
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// IPv6
// ═══════════════════════════════════════════════════════════════════════════

pub fn ethernet(dest: MacAddress, src: MacAddress, ethertype: EthernetProtocol, payload: &[u8]) -> Vec<u8> {
    let eth = EthernetHeader { dest, src, ethertype };
    let mut frame = eth.emit().to_vec();
    frame.extend_from_slice(payload);
    frame
}

pub fn ipv6_frame(
    dest_mac: MacAddress,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    next_header: u8,
    hop_limit: u8,
    payload: &[u8],
) -> Vec<u8> {
    let header = Ipv6Header::new(src, dst, next_header, hop_limit, payload.len() as u16);
    let mut packet = header.emit().to_vec();
    packet.extend_from_slice(payload);
    ethernet(dest_mac, PEER_MAC, EthernetProtocol::Ipv6, &packet)
}

/// ICMPv6 message with its checksum filled in.
pub fn icmpv6(src: Ipv6Addr, dst: Ipv6Addr, msg_type: u8, body: &[u8]) -> Vec<u8> {
    let mut msg = vec![msg_type, 0, 0, 0];
    msg.extend_from_slice(body);
    let mut sum = ipv6_pseudo_header(&src, &dst, msg.len() as u32, ICMPV6);
    sum.add(&msg);
    let c = sum.finish();
    msg[2..4].copy_from_slice(&c.to_be_bytes());
    msg
}

pub fn echo_request(src: Ipv6Addr, dst: Ipv6Addr, id: u16, seq: u16, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&id.to_be_bytes());
    body.extend_from_slice(&seq.to_be_bytes());
    body.extend_from_slice(data);
    icmpv6(src, dst, 128, &body)
}

/// UDP datagram with its checksum filled in.
pub fn udp(src: Ipv6Addr, dst: Ipv6Addr, sport: u16, dport: u16, data: &[u8]) -> Vec<u8> {
    let len = 8 + data.len();
    let mut msg = Vec::with_capacity(len);
    msg.extend_from_slice(&sport.to_be_bytes());
    msg.extend_from_slice(&dport.to_be_bytes());
    msg.extend_from_slice(&(len as u16).to_be_bytes());
    msg.extend_from_slice(&[0, 0]);
    msg.extend_from_slice(data);
    let mut sum = ipv6_pseudo_header(&src, &dst, len as u32, UDP);
    sum.add(&msg);
    let c = sum.finish();
    msg[6..8].copy_from_slice(&c.to_be_bytes());
    msg
}

/// Split `payload` into Fragment-header-prefixed pieces of `size` bytes.
pub fn fragments(payload: &[u8], next_header: u8, identification: u32, size: usize) -> Vec<Vec<u8>> {
    payload
        .chunks(size)
        .enumerate()
        .map(|(i, chunk)| {
            let offset = i * size;
            let frag = FragmentHeader {
                next_header,
                offset: offset as u16,
                more: offset + chunk.len() < payload.len(),
                identification,
            };
            let mut piece = frag.emit().to_vec();
            piece.extend_from_slice(chunk);
            piece
        })
        .collect()
}

/// Decoded IPv6 frame as sent by the interface.
pub struct SentIpv6 {
    pub dest_mac: MacAddress,
    pub header: Ipv6Header,
    pub payload: Vec<u8>,
}

pub fn parse_ipv6(frame: &[u8]) -> SentIpv6 {
    let eth = EthernetHeader::parse(frame).unwrap();
    assert_eq!(eth.ethertype, EthernetProtocol::Ipv6);
    let mut fixed = [0u8; IPV6_HEADER_LEN];
    fixed.copy_from_slice(&frame[ETH_HLEN..ETH_HLEN + IPV6_HEADER_LEN]);
    let header = Ipv6Header::parse(&fixed).unwrap();
    let start = ETH_HLEN + IPV6_HEADER_LEN;
    let payload = frame[start..start + header.payload_len as usize].to_vec();
    SentIpv6 {
        dest_mac: eth.dest,
        header,
        payload,
    }
}

/// Reassemble fragments sent by the interface. Returns the upper-layer
/// protocol and payload.
pub fn reassemble(frames: &[SentIpv6]) -> (u8, Vec<u8>) {
    let mut data = Vec::new();
    let mut next_header = 0;
    for f in frames {
        assert_eq!(f.header.next_header, FRAGMENT);
        let mut raw = [0u8; IPV6_FRAG_HEADER_LEN];
        raw.copy_from_slice(&f.payload[..IPV6_FRAG_HEADER_LEN]);
        let frag = FragmentHeader::parse(&raw);
        next_header = frag.next_header;
        let offset = frag.offset as usize;
        let chunk = &f.payload[IPV6_FRAG_HEADER_LEN..];
        if data.len() < offset + chunk.len() {
            data.resize(offset + chunk.len(), 0);
        }
        data[offset..offset + chunk.len()].copy_from_slice(chunk);
    }
    (next_header, data)
}

// ═══════════════════════════════════════════════════════════════════════════
// IPv4 / UDP
// ═══════════════════════════════════════════════════════════════════════════

/// Broadcast IPv4/UDP frame from the peer. The UDP checksum is left zero.
pub fn udp4_frame(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16, data: &[u8]) -> Vec<u8> {
    let udp_len = 8 + data.len();
    let total = 20 + udp_len;
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    ip[8] = 64;
    ip[9] = UDP;
    ip[12..16].copy_from_slice(&src.octets());
    ip[16..20].copy_from_slice(&dst.octets());
    let mut sum = Checksum::new();
    sum.add(&ip);
    let c = sum.finish();
    ip[10..12].copy_from_slice(&c.to_be_bytes());

    ip.extend_from_slice(&sport.to_be_bytes());
    ip.extend_from_slice(&dport.to_be_bytes());
    ip.extend_from_slice(&(udp_len as u16).to_be_bytes());
    ip.extend_from_slice(&[0, 0]);
    ip.extend_from_slice(data);

    ethernet(embernet::types::BROADCAST_MAC, PEER_MAC, EthernetProtocol::Ipv4, &ip)
}

/// UDP payload of an IPv4 frame sent by the interface, with the
/// destination address.
pub fn parse_udp4(frame: &[u8]) -> (Ipv4Addr, Ipv4Addr, Vec<u8>) {
    let eth = EthernetHeader::parse(frame).unwrap();
    assert_eq!(eth.ethertype, EthernetProtocol::Ipv4);
    let ip = &frame[ETH_HLEN..];
    assert_eq!(ip[9], UDP);
    let src = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
    let dst = Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]);
    let udp_len = u16::from_be_bytes([ip[24], ip[25]]) as usize;
    (src, dst, ip[28..20 + udp_len].to_vec())
}
