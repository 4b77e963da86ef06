//! Minimal IPv4/UDP transport carrying the DHCP client.
//!
//! Only what DHCP needs: unfragmented UDP datagrams sent to the broadcast
//! address or to an ARP-cached neighbor, and received datagrams for the
//! client port queued in a small inbox. Senders of received datagrams are
//! gleaned into the ARP cache.
//!
//! # Reference
//! RFC 791, RFC 768

use core::net::Ipv4Addr;
use core::sync::atomic::Ordering;

use heapless::{Deque, Vec};
use log::{trace, warn};
use rand_core::RngCore;
use smoltcp::wire::{IpProtocol, Ipv4Address, Ipv4Packet, UdpPacket};

use crate::buffer::ChunkedBuffer;
use crate::driver::NicDriver;
use crate::error::{NetError, Result};
use crate::ipv6::checksum::ipv4_pseudo_header;
use crate::stack::NetInterface;
use crate::types::{EthernetHeader, EthernetProtocol, MacAddress, BROADCAST_MAC, ETH_HLEN, ETH_MTU};

pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
pub const IPV4_DEFAULT_TTL: u8 = 64;

pub const DHCP_CLIENT_PORT: u16 = 68;
pub const DHCP_SERVER_PORT: u16 = 67;

/// Largest UDP payload that fits an unfragmented Ethernet frame.
pub const UDP_PAYLOAD_MAX: usize = ETH_MTU - IPV4_HEADER_LEN - UDP_HEADER_LEN;

/// Datagrams queued for the DHCP client.
pub const UDP_INBOX_LEN: usize = 4;

pub const IPV4_MAX_DNS_SERVERS: usize = 2;

/// Per-interface IPv4 configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Config {
    pub addr: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    /// Unused slots hold the unspecified address.
    pub dns_servers: [Ipv4Addr; IPV4_MAX_DNS_SERVERS],
}

impl Default for Ipv4Config {
    fn default() -> Self {
        Self {
            addr: Ipv4Addr::UNSPECIFIED,
            subnet_mask: Ipv4Addr::UNSPECIFIED,
            gateway: None,
            dns_servers: [Ipv4Addr::UNSPECIFIED; IPV4_MAX_DNS_SERVERS],
        }
    }
}

impl Ipv4Config {
    pub fn is_configured(&self) -> bool {
        !self.addr.is_unspecified()
    }

    pub fn is_on_link(&self, addr: &Ipv4Addr) -> bool {
        let mask = u32::from(self.subnet_mask);
        self.is_configured() && (u32::from(*addr) & mask) == (u32::from(self.addr) & mask)
    }

    /// Directed broadcast address of the subnet.
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !u32::from(self.subnet_mask))
    }
}

/// A received UDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDatagram {
    pub src: Ipv4Addr,
    pub src_port: u16,
    pub dst: Ipv4Addr,
    pub data: Vec<u8, UDP_PAYLOAD_MAX>,
}

/// Queue of datagrams for the client port. The newest datagram is dropped
/// when full.
#[derive(Debug, Default)]
pub struct UdpInbox {
    queue: Deque<UdpDatagram, UDP_INBOX_LEN>,
}

impl UdpInbox {
    pub const fn new() -> Self {
        Self { queue: Deque::new() }
    }

    pub fn push(&mut self, datagram: UdpDatagram) -> Result<()> {
        self.queue
            .push_back(datagram)
            .map_err(|_| NetError::OutOfResources)
    }

    pub fn pop(&mut self) -> Option<UdpDatagram> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl<'a, D: NicDriver, R: RngCore> NetInterface<'a, D, R> {
    pub fn set_ipv4_config(&self, config: Ipv4Config) {
        *self.ipv4_config.lock() = config;
    }

    /// Next datagram received on the client port.
    pub fn udp_receive(&self) -> Option<UdpDatagram> {
        self.udp_inbox.lock().pop()
    }

    /// Link-layer destination for an IPv4 datagram.
    fn ipv4_resolve(&self, dst: &Ipv4Addr) -> Result<MacAddress> {
        if dst.is_broadcast() {
            return Ok(BROADCAST_MAC);
        }
        let next_hop = {
            let config = self.ipv4_config.lock();
            if config.is_configured() && *dst == config.broadcast() {
                return Ok(BROADCAST_MAC);
            }
            if config.is_on_link(dst) || !config.is_configured() {
                *dst
            } else {
                config.gateway.ok_or(NetError::NoRoute)?
            }
        };
        self.arp_cache
            .lock()
            .lookup(&next_hop)
            .ok_or(NetError::Unresolved)
    }

    /// Send one unfragmented UDP datagram.
    pub fn send_udp(
        &self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
    ) -> Result<()> {
        if payload.len() > UDP_PAYLOAD_MAX {
            return Err(NetError::InvalidLength);
        }
        let dest_mac = self.ipv4_resolve(&dst)?;

        let udp_len = (UDP_HEADER_LEN + payload.len()) as u16;
        let ident = self.frag_id.fetch_add(1, Ordering::Relaxed) as u16;

        let mut headers = [0u8; IPV4_HEADER_LEN + UDP_HEADER_LEN];
        let (ip_bytes, udp_bytes) = headers.split_at_mut(IPV4_HEADER_LEN);

        let mut ip = Ipv4Packet::new_unchecked(ip_bytes);
        ip.set_version(4);
        ip.set_header_len(IPV4_HEADER_LEN as u8);
        ip.set_total_len(IPV4_HEADER_LEN as u16 + udp_len);
        ip.set_ident(ident);
        ip.clear_flags();
        ip.set_dont_frag(true);
        ip.set_frag_offset(0);
        ip.set_hop_limit(IPV4_DEFAULT_TTL);
        ip.set_next_header(IpProtocol::Udp);
        ip.set_src_addr(Ipv4Address(src.octets()));
        ip.set_dst_addr(Ipv4Address(dst.octets()));
        ip.fill_checksum();

        // UDP checksum spans the header block and the caller payload
        let mut sum = ipv4_pseudo_header(&src, &dst, u8::from(IpProtocol::Udp), udp_len);
        let mut udp = UdpPacket::new_unchecked(udp_bytes);
        udp.set_src_port(src_port);
        udp.set_dst_port(dst_port);
        udp.set_len(udp_len);
        udp.set_checksum(0);
        sum.add(udp.into_inner());
        sum.add(payload);
        let checksum = match sum.finish() {
            0 => 0xffff,
            c => c,
        };
        UdpPacket::new_unchecked(&mut headers[IPV4_HEADER_LEN..]).set_checksum(checksum);

        let eth = EthernetHeader {
            dest: dest_mac,
            src: self.mac_address(),
            ethertype: EthernetProtocol::Ipv4,
        };

        let mut frame = ChunkedBuffer::alloc(
            self.pool,
            ETH_HLEN + IPV4_HEADER_LEN + UDP_HEADER_LEN + payload.len(),
        )?;
        frame.write_all(0, &eth.emit())?;
        frame.write_all(ETH_HLEN, &headers)?;
        frame.write_all(ETH_HLEN + IPV4_HEADER_LEN + UDP_HEADER_LEN, payload)?;

        self.send_packet(&frame, 0)
    }

    pub(crate) fn ipv4_process_packet(&self, eth: &EthernetHeader, packet: &[u8]) {
        if let Err(e) = self.ipv4_process(eth, packet) {
            trace!("[NIC] {}: IPv4 datagram dropped: {}", self.name(), e);
            self.stats.rx_drop();
        }
    }

    fn ipv4_process(&self, eth: &EthernetHeader, packet: &[u8]) -> Result<()> {
        let ip = Ipv4Packet::new_checked(packet).map_err(|_| NetError::InvalidHeader)?;
        if ip.version() != 4 || !ip.verify_checksum() {
            return Err(NetError::InvalidHeader);
        }
        // no IPv4 reassembly
        if ip.more_frags() || ip.frag_offset() != 0 {
            return Err(NetError::InvalidHeader);
        }
        if ip.next_header() != IpProtocol::Udp {
            return Ok(());
        }

        let src = Ipv4Addr::from(ip.src_addr().0);
        let dst = Ipv4Addr::from(ip.dst_addr().0);

        let config = *self.ipv4_config.lock();
        let for_us = !config.is_configured()
            || dst.is_broadcast()
            || dst == config.addr
            || dst == config.broadcast();
        if !for_us {
            return Err(NetError::InvalidAddress);
        }

        let payload = ip.payload();
        let udp = UdpPacket::new_checked(payload).map_err(|_| NetError::InvalidHeader)?;
        let udp_len = udp.len() as usize;
        if udp.checksum() != 0 {
            let mut sum = ipv4_pseudo_header(&src, &dst, u8::from(IpProtocol::Udp), udp.len());
            sum.add(&payload[..udp_len]);
            if sum.finish() != 0 {
                return Err(NetError::InvalidHeader);
            }
        }

        if !src.is_unspecified() && !src.is_broadcast() {
            if let Err(e) = self.arp_cache.lock().learn(src, eth.src, self.now()) {
                trace!("[NIC] {}: ARP cache: {}", self.name(), e);
            }
        }

        if udp.dst_port() != DHCP_CLIENT_PORT {
            trace!("[NIC] {}: UDP port {} unreachable", self.name(), udp.dst_port());
            return Ok(());
        }

        let data = Vec::from_slice(udp.payload()).map_err(|_| NetError::InvalidLength)?;
        let datagram = UdpDatagram {
            src,
            src_port: udp.src_port(),
            dst,
            data,
        };
        if self.udp_inbox.lock().push(datagram).is_err() {
            warn!("[NIC] {}: UDP inbox full, datagram dropped", self.name());
            return Err(NetError::OutOfResources);
        }
        Ok(())
    }
}
